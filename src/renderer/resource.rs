//! 资源管理模块
//!
//! 按名称缓存着色器、缓冲区和纹理，管理跨线程的操作队列和延迟释放队列，
//! 并按需创建文字渲染器。
//!
//! # 设计原则
//!
//! - **先到先得**：同名缓冲区第一次创建后，后续描述被忽略
//! - **单点执行**：跨线程投递的操作和释放请求都在 `process_pending_operations` 中按 FIFO 执行
//! - **后端无关**：具体资源由设备提供的 `ResourceFactory` 创建

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};

use super::backend::Backend;
use super::buffer::{BufferDescriptor, SharedBuffer};
use super::device::{RenderDevice, ResourceFactory};
use super::shader::{SharedShader, ShaderSource, BUILTIN_SHADERS, SHADER_TEXT};
use super::text::{TextRenderer, TextSettings};
use super::texture::{SharedTexture, TextureDescriptor};
use crate::core::error::{GraphicsError, Result};
use crate::{engine_error, engine_info, engine_warn};

/// 投递到渲染线程的操作
pub type RenderOp = Box<dyn FnOnce(&mut ResourceManager) + Send>;

/// 渲染线程操作队列的发送端
///
/// 可以克隆并发送到任意线程。
#[derive(Clone)]
pub struct RenderThreadQueue {
    sender: Sender<RenderOp>,
}

impl RenderThreadQueue {
    /// 投递一个操作，管理器已销毁时返回 `false`
    pub fn post(&self, op: impl FnOnce(&mut ResourceManager) + Send + 'static) -> bool {
        self.sender.send(Box::new(op)).is_ok()
    }
}

/// 延迟释放请求
enum Disposal {
    Buffer(String),
    Texture(String),
    /// 被同名注册替换下来的着色器
    ReplacedShader(SharedShader),
    /// 被同名注册替换下来的纹理
    ReplacedTexture(SharedTexture),
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// 资源管理器
pub struct ResourceManager {
    backend: Backend,
    factory: Option<Rc<dyn ResourceFactory>>,
    max_texture_size: u32,

    shaders: HashMap<String, SharedShader>,
    buffers: HashMap<String, SharedBuffer>,
    textures: HashMap<String, SharedTexture>,
    unnamed_textures: Vec<SharedTexture>,

    text_settings: TextSettings,
    text_renderer: Option<TextRenderer>,
    text_failed: bool,

    sender: Sender<RenderOp>,
    receiver: Receiver<RenderOp>,
    disposals: VecDeque<Disposal>,

    disposed: bool,
}

impl ResourceManager {
    /// 创建某个后端的资源管理器，需要 `initialize` 后才能创建资源
    pub fn new(backend: Backend) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            backend,
            factory: None,
            max_texture_size: 4096,
            shaders: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            unnamed_textures: Vec::new(),
            text_settings: TextSettings::default(),
            text_renderer: None,
            text_failed: false,
            sender,
            receiver,
            disposals: VecDeque::new(),
            disposed: false,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// 绑定设备并编译内置着色器，可重复调用
    ///
    /// 内置着色器编译失败只记录日志，无效的着色器依然注册。
    pub fn initialize(&mut self, device: &dyn RenderDevice) -> Result<()> {
        if self.disposed {
            return Err(GraphicsError::InvalidState("resource manager has been disposed".to_string()).into());
        }
        if self.factory.is_some() {
            return Ok(());
        }
        if device.backend_type() != self.backend {
            return Err(GraphicsError::InvalidState(format!(
                "{} resource manager cannot use a {} device",
                self.backend.name(),
                device.backend_type().name()
            ))
            .into());
        }
        let factory = device.resource_factory().ok_or(GraphicsError::NotInitialized)?;
        self.max_texture_size = device.max_texture_size();

        for name in BUILTIN_SHADERS {
            match factory.shader_source(name) {
                Some(source) => {
                    let shader = factory.create_shader(&source);
                    {
                        let s = shader.borrow();
                        if !s.is_valid() {
                            engine_error!(
                                "Built-in shader '{}' failed to compile: {}",
                                name,
                                s.compile_log().unwrap_or("no log")
                            );
                        }
                    }
                    self.shaders.insert(name.to_string(), shader);
                }
                None => engine_warn!("{} has no source for built-in shader '{}'", self.backend.name(), name),
            }
        }

        self.factory = Some(factory);
        engine_info!("{} resource manager initialized", self.backend.name());
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.factory.is_some() && !self.disposed
    }

    fn factory(&self) -> Result<&Rc<dyn ResourceFactory>> {
        if self.disposed {
            return Err(GraphicsError::NotInitialized.into());
        }
        self.factory.as_ref().ok_or_else(|| GraphicsError::NotInitialized.into())
    }

    // ---------------------------------------------------------------------
    // 着色器
    // ---------------------------------------------------------------------

    pub fn get_shader(&self, name: &str) -> Option<SharedShader> {
        self.shaders.get(name).cloned()
    }

    /// 注册着色器，同名的旧着色器在下一次 `process_pending_operations` 时释放
    pub fn register_shader(&mut self, name: &str, shader: SharedShader) {
        if let Some(old) = self.shaders.insert(name.to_string(), shader.clone()) {
            if !Rc::ptr_eq(&old, &shader) {
                self.disposals.push_back(Disposal::ReplacedShader(old));
            }
        }
    }

    /// 编译并注册着色器
    ///
    /// 编译失败时返回并注册一个无效着色器。
    pub fn create_shader(&mut self, name: &str, source: &ShaderSource) -> Result<SharedShader> {
        let shader = self.factory()?.create_shader(source);
        if !shader.borrow().is_valid() {
            engine_error!(
                "Shader '{}' failed to compile: {}",
                name,
                shader.borrow().compile_log().unwrap_or("no log")
            );
        }
        self.register_shader(name, shader.clone());
        Ok(shader)
    }

    // ---------------------------------------------------------------------
    // 缓冲区
    // ---------------------------------------------------------------------

    /// 获取或创建命名缓冲区（先到先得，已有时忽略 `descriptor`）
    pub fn get_or_create_buffer(&mut self, name: &str, descriptor: &BufferDescriptor) -> Result<SharedBuffer> {
        if let Some(buffer) = self.buffers.get(name) {
            return Ok(buffer.clone());
        }
        let buffer = self.factory()?.create_buffer(descriptor)?;
        self.buffers.insert(name.to_string(), buffer.clone());
        Ok(buffer)
    }

    pub fn get_buffer(&self, name: &str) -> Option<SharedBuffer> {
        self.buffers.get(name).cloned()
    }

    /// 请求释放命名缓冲区，在下一次 `process_pending_operations` 时执行
    pub fn dispose_buffer(&mut self, name: &str) {
        self.disposals.push_back(Disposal::Buffer(name.to_string()));
    }

    // ---------------------------------------------------------------------
    // 纹理
    // ---------------------------------------------------------------------

    /// 创建未命名纹理，由管理器兜底释放
    ///
    /// 调用者自行 `dispose` 的纹理会在之后被清出列表。
    pub fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<SharedTexture> {
        let texture = self.factory()?.create_texture(descriptor)?;
        self.prune_unnamed_textures();
        self.unnamed_textures.push(texture.clone());
        Ok(texture)
    }

    /// 去掉已被释放的未命名纹理
    fn prune_unnamed_textures(&mut self) {
        self.unnamed_textures
            .retain(|t| t.try_borrow().map_or(true, |t| t.is_initialized()));
    }

    /// 创建并注册命名纹理
    pub fn create_named_texture(&mut self, name: &str, descriptor: &TextureDescriptor) -> Result<SharedTexture> {
        let texture = self.factory()?.create_texture(descriptor)?;
        self.register_texture(name, texture.clone());
        Ok(texture)
    }

    pub fn get_texture(&self, name: &str) -> Option<SharedTexture> {
        self.textures.get(name).cloned()
    }

    /// 注册纹理，同名的旧纹理在下一次 `process_pending_operations` 时释放
    ///
    /// 未命名纹理注册后改由名称持有。
    pub fn register_texture(&mut self, name: &str, texture: SharedTexture) {
        self.unnamed_textures.retain(|t| !Rc::ptr_eq(t, &texture));
        if let Some(old) = self.textures.insert(name.to_string(), texture.clone()) {
            if !Rc::ptr_eq(&old, &texture) {
                self.disposals.push_back(Disposal::ReplacedTexture(old));
            }
        }
    }

    /// 请求释放命名纹理，在下一次 `process_pending_operations` 时执行
    pub fn dispose_texture(&mut self, name: &str) {
        self.disposals.push_back(Disposal::Texture(name.to_string()));
    }

    // ---------------------------------------------------------------------
    // 文字
    // ---------------------------------------------------------------------

    pub fn set_text_settings(&mut self, settings: TextSettings) {
        self.text_settings = settings;
        if let Some(mut renderer) = self.text_renderer.take() {
            renderer.dispose();
        }
        self.text_failed = false;
    }

    /// 文字渲染器，首次调用时创建
    ///
    /// 没有可用字体时记录一次错误并返回 `None`。
    pub fn text_renderer(&mut self) -> Option<&mut TextRenderer> {
        if self.text_renderer.is_none() && !self.text_failed {
            match self.create_text_renderer() {
                Ok(renderer) => self.text_renderer = Some(renderer),
                Err(e) => {
                    engine_error!("Text renderer unavailable: {}", e);
                    self.text_failed = true;
                }
            }
        }
        self.text_renderer.as_mut()
    }

    fn create_text_renderer(&self) -> Result<TextRenderer> {
        let factory = self.factory()?.clone();
        let shader = self
            .get_shader(SHADER_TEXT)
            .ok_or_else(|| GraphicsError::InvalidState("text shader is not registered".to_string()))?;
        TextRenderer::new(&factory, shader, &self.text_settings, self.max_texture_size)
    }

    // ---------------------------------------------------------------------
    // 线程
    // ---------------------------------------------------------------------

    /// 投递一个在渲染线程执行的操作
    pub fn run_on_render_thread(&self, op: impl FnOnce(&mut ResourceManager) + Send + 'static) {
        // 接收端由自身持有，发送不会失败
        let _ = self.sender.send(Box::new(op));
    }

    /// 可跨线程使用的投递句柄
    pub fn render_thread_queue(&self) -> RenderThreadQueue {
        RenderThreadQueue {
            sender: self.sender.clone(),
        }
    }

    /// 在渲染线程上调用：先按 FIFO 执行投递的操作，再执行释放请求
    ///
    /// 某个操作 panic 时记录错误并继续执行后面的操作和释放请求。
    ///
    /// # 返回值
    ///
    /// 执行的操作数（不含释放请求，含 panic 的操作）
    pub fn process_pending_operations(&mut self) -> usize {
        if self.disposed {
            return 0;
        }

        let mut executed = 0;
        // 只执行进入时已在队列中的操作，操作内部再投递的留到下一次
        let pending: Vec<RenderOp> = self.receiver.try_iter().collect();
        for op in pending {
            executed += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| op(self))) {
                engine_error!("Render-thread operation {} panicked: {}", executed, panic_message(payload.as_ref()));
            }
            if self.disposed {
                // 操作内部调用了 dispose
                return executed;
            }
        }

        while let Some(disposal) = self.disposals.pop_front() {
            self.run_disposal(disposal);
        }
        self.prune_unnamed_textures();

        executed
    }

    fn run_disposal(&mut self, disposal: Disposal) {
        match disposal {
            Disposal::Buffer(name) => {
                if let Some(buffer) = self.buffers.remove(&name) {
                    buffer.borrow_mut().dispose();
                }
            }
            Disposal::Texture(name) => {
                if let Some(texture) = self.textures.remove(&name) {
                    texture.borrow_mut().dispose();
                }
            }
            Disposal::ReplacedShader(shader) => {
                // 同一个着色器又被注册回来时保留
                if !self.shaders.values().any(|s| Rc::ptr_eq(s, &shader)) {
                    shader.borrow_mut().dispose();
                }
            }
            Disposal::ReplacedTexture(texture) => {
                if !self.textures.values().any(|t| Rc::ptr_eq(t, &texture)) {
                    texture.borrow_mut().dispose();
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // 生命周期
    // ---------------------------------------------------------------------

    /// 释放全部资源，可重复调用，未执行的操作被丢弃
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let dropped = self.receiver.try_iter().count();
        if dropped > 0 {
            engine_warn!("Dropping {} pending render-thread operations", dropped);
        }

        if let Some(mut renderer) = self.text_renderer.take() {
            renderer.dispose();
        }

        if let Some(factory) = &self.factory {
            factory.wait_idle();
            factory.clear_pipeline_cache();
        }

        // 名称请求随后连同映射一起释放，被替换下来的资源在这里释放
        for disposal in std::mem::take(&mut self.disposals) {
            match disposal {
                Disposal::ReplacedShader(shader) => shader.borrow_mut().dispose(),
                Disposal::ReplacedTexture(texture) => texture.borrow_mut().dispose(),
                Disposal::Buffer(_) | Disposal::Texture(_) => {}
            }
        }

        for (_, buffer) in self.buffers.drain() {
            buffer.borrow_mut().dispose();
        }
        for (_, texture) in self.textures.drain() {
            texture.borrow_mut().dispose();
        }
        for texture in self.unnamed_textures.drain(..) {
            texture.borrow_mut().dispose();
        }
        for (_, shader) in self.shaders.drain() {
            shader.borrow_mut().dispose();
        }

        self.factory = None;
        engine_info!("{} resource manager disposed", self.backend.name());
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::mock::MockDevice;
    use crate::renderer::shader::{SHADER_DEFAULT, SHADER_SIMPLE};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn setup() -> (MockDevice, ResourceManager) {
        let mut device = MockDevice::new(Backend::OpenGl);
        device.initialize().unwrap();
        let mut manager = ResourceManager::new(Backend::OpenGl);
        manager.initialize(&device).unwrap();
        (device, manager)
    }

    #[test]
    fn test_initialize_requires_initialized_device() {
        let device = MockDevice::new(Backend::OpenGl);
        let mut manager = ResourceManager::new(Backend::OpenGl);
        assert!(manager.initialize(&device).is_err());
        assert!(manager.get_or_create_buffer("a", &BufferDescriptor::default()).is_err());
    }

    #[test]
    fn test_backend_mismatch_rejected() {
        let mut device = MockDevice::new(Backend::Vulkan);
        device.initialize().unwrap();
        let mut manager = ResourceManager::new(Backend::OpenGl);
        assert!(manager.initialize(&device).is_err());
    }

    #[test]
    fn test_builtin_shaders_registered() {
        let (device, mut manager) = setup();
        for name in [SHADER_DEFAULT, SHADER_SIMPLE, SHADER_TEXT] {
            assert!(manager.get_shader(name).unwrap().borrow().is_valid());
        }
        // 重复初始化不重新编译
        manager.initialize(&device).unwrap();
        assert_eq!(device.factory.counters.shaders.get(), 3);
    }

    #[test]
    fn test_failed_builtin_still_registered() {
        let mut device = MockDevice::new(Backend::OpenGl);
        device.initialize().unwrap();
        device.factory.failing.borrow_mut().insert(SHADER_SIMPLE.to_string());
        let mut manager = ResourceManager::new(Backend::OpenGl);
        manager.initialize(&device).unwrap();
        let simple = manager.get_shader(SHADER_SIMPLE).unwrap();
        assert!(!simple.borrow().is_valid());
    }

    #[test]
    fn test_failed_shader_keeps_log_and_is_registered() {
        let (device, mut manager) = setup();
        device.factory.failing.borrow_mut().insert("broken".to_string());
        let shader = manager
            .create_shader("overlay", &ShaderSource::glsl("broken", "void main() {}", "void main() {}"))
            .unwrap();
        assert!(!shader.borrow().is_valid());
        assert_eq!(shader.borrow().compile_log(), Some("mock compile failure"));
        assert!(Rc::ptr_eq(&manager.get_shader("overlay").unwrap(), &shader));
    }

    #[test]
    fn test_buffer_first_writer_wins() {
        let (_device, mut manager) = setup();
        let a = manager
            .get_or_create_buffer("candles", &BufferDescriptor::position_color_2d(64))
            .unwrap();
        let b = manager
            .get_or_create_buffer("candles", &BufferDescriptor::position_only_2d(8))
            .unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(b.borrow().descriptor().floats_per_vertex, 6);
    }

    #[test]
    fn test_disposal_is_deferred() {
        let (device, mut manager) = setup();
        manager.get_or_create_buffer("grid", &BufferDescriptor::default()).unwrap();
        manager.create_named_texture("atlas", &TextureDescriptor::font_atlas(8, 8)).unwrap();

        manager.dispose_buffer("grid");
        manager.dispose_texture("atlas");
        assert!(manager.get_buffer("grid").is_some());

        manager.process_pending_operations();
        assert!(manager.get_buffer("grid").is_none());
        assert!(manager.get_texture("atlas").is_none());
        assert_eq!(device.factory.counters.buffer_disposals.get(), 1);
        assert_eq!(device.factory.counters.texture_disposals.get(), 1);
    }

    #[test]
    fn test_ops_run_in_fifo_order_from_other_threads() {
        let (_device, mut manager) = setup();
        let queue = manager.render_thread_queue();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let handle = {
            let order = order.clone();
            std::thread::spawn(move || {
                for i in 0..3 {
                    let order = order.clone();
                    queue.post(move |_| order.lock().unwrap().push(i));
                }
            })
        };
        handle.join().unwrap();

        let order2 = order.clone();
        manager.run_on_render_thread(move |m| {
            order2.lock().unwrap().push(if m.is_initialized() { 3 } else { 99 });
        });

        assert_eq!(manager.process_pending_operations(), 4);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(manager.process_pending_operations(), 0);
    }

    #[test]
    fn test_op_can_dispose_buffer() {
        let (_device, mut manager) = setup();
        manager.get_or_create_buffer("volume", &BufferDescriptor::default()).unwrap();
        manager.run_on_render_thread(|m| m.dispose_buffer("volume"));
        manager.process_pending_operations();
        assert!(manager.get_buffer("volume").is_none());
    }

    #[test]
    fn test_dispose_releases_everything_once() {
        let (device, mut manager) = setup();
        manager.get_or_create_buffer("a", &BufferDescriptor::default()).unwrap();
        manager.create_texture(&TextureDescriptor::rgba(4, 4)).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        manager.run_on_render_thread(move |_| {
            ran2.fetch_add(1, Ordering::SeqCst);
        });

        manager.dispose();
        manager.dispose();
        assert_eq!(manager.process_pending_operations(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let counters = &device.factory.counters;
        assert_eq!(counters.buffer_disposals.get(), 1);
        assert_eq!(counters.texture_disposals.get(), 1);
        assert_eq!(counters.shader_disposals.get(), 3);
        assert_eq!(counters.pipeline_clears.get(), 1);
        assert_eq!(device.factory.ledger.live_count(), 0);
        assert_eq!(device.factory.ledger.double_releases(), 0);
        assert!(manager.get_shader(SHADER_DEFAULT).is_none());
    }

    #[test]
    fn test_register_texture_defers_disposal_of_replaced() {
        let (device, mut manager) = setup();
        let first = manager.create_named_texture("logo", &TextureDescriptor::rgba(2, 2)).unwrap();
        let second = manager.create_texture(&TextureDescriptor::rgba(2, 2)).unwrap();
        manager.register_texture("logo", second.clone());
        assert!(Rc::ptr_eq(&manager.get_texture("logo").unwrap(), &second));
        // 旧纹理可能还被本帧引用
        assert!(first.borrow().is_initialized());
        assert!(manager.unnamed_textures.is_empty());

        manager.process_pending_operations();
        assert!(!first.borrow().is_initialized());
        assert!(second.borrow().is_initialized());
        assert_eq!(device.factory.counters.texture_disposals.get(), 1);

        manager.dispose();
        assert_eq!(device.factory.counters.texture_disposals.get(), 2);
        assert_eq!(device.factory.ledger.double_releases(), 0);
    }

    #[test]
    fn test_register_shader_defers_disposal_of_replaced() {
        let (device, mut manager) = setup();
        let old = manager.get_shader(SHADER_SIMPLE).unwrap();
        let source = device.factory.shader_source(SHADER_SIMPLE).unwrap();
        let new = manager.create_shader(SHADER_SIMPLE, &source).unwrap();
        assert!(Rc::ptr_eq(&manager.get_shader(SHADER_SIMPLE).unwrap(), &new));
        assert!(old.borrow().is_valid());
        assert_eq!(device.factory.counters.shader_disposals.get(), 0);

        manager.process_pending_operations();
        assert!(!old.borrow().is_valid());
        assert!(new.borrow().is_valid());
        assert_eq!(device.factory.counters.shader_disposals.get(), 1);
    }

    #[test]
    fn test_replaced_then_restored_shader_survives() {
        let (device, mut manager) = setup();
        let original = manager.get_shader(SHADER_DEFAULT).unwrap();
        let source = device.factory.shader_source(SHADER_DEFAULT).unwrap();
        manager.create_shader(SHADER_DEFAULT, &source).unwrap();
        manager.register_shader(SHADER_DEFAULT, original.clone());

        manager.process_pending_operations();
        assert!(original.borrow().is_valid());
        assert_eq!(device.factory.counters.shader_disposals.get(), 1);
    }

    #[test]
    fn test_replaced_resources_released_by_dispose() {
        let (device, mut manager) = setup();
        manager.create_named_texture("logo", &TextureDescriptor::rgba(2, 2)).unwrap();
        manager.create_named_texture("logo", &TextureDescriptor::rgba(2, 2)).unwrap();
        manager.dispose();
        assert_eq!(device.factory.counters.texture_disposals.get(), 2);
        assert_eq!(device.factory.ledger.live_count(), 0);
    }

    #[test]
    fn test_disposed_unnamed_textures_are_pruned() {
        let (device, mut manager) = setup();
        for _ in 0..16 {
            let texture = manager.create_texture(&TextureDescriptor::rgba(4, 4)).unwrap();
            texture.borrow_mut().dispose();
        }
        manager.process_pending_operations();
        assert!(manager.unnamed_textures.is_empty());

        let kept = manager.create_texture(&TextureDescriptor::rgba(4, 4)).unwrap();
        assert_eq!(manager.unnamed_textures.len(), 1);
        manager.dispose();
        assert!(!kept.borrow().is_initialized());
        assert_eq!(device.factory.counters.texture_disposals.get(), 17);
        assert_eq!(device.factory.ledger.double_releases(), 0);
    }

    #[test]
    fn test_panicking_op_does_not_stop_the_queue() {
        let (device, mut manager) = setup();
        manager.get_or_create_buffer("grid", &BufferDescriptor::default()).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        manager.run_on_render_thread(|_| panic!("bad op"));
        let ran2 = ran.clone();
        manager.run_on_render_thread(move |m| {
            m.dispose_buffer("grid");
            ran2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(manager.process_pending_operations(), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(manager.get_buffer("grid").is_none());
        assert_eq!(device.factory.counters.buffer_disposals.get(), 1);
    }
}
