//! 测试用的无 GPU 后端
//!
//! 只记录调用次数，用来测试资源管理器、文字渲染器和后端注册表的逻辑。

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use super::backend::{Backend, BlendMode, DrawMode};
use super::buffer::{Buffer, BufferDescriptor, SharedBuffer, UploadPlan};
use super::device::{RenderDevice, ResourceFactory};
use super::frame::{FrameState, FrameTracker};
use super::handle::{HandleKind, HandleLedger, Tracked};
use super::shader::{Shader, ShaderSource, SharedShader, UniformBlock, UniformValue, BUILTIN_SHADERS};
use super::state::FrameStats;
use super::texture::{SharedTexture, Texture, TextureDescriptor};
use crate::core::error::Result;

#[derive(Default)]
pub struct Counters {
    pub draws: Cell<u64>,
    pub shaders: Cell<u32>,
    pub buffers: Cell<u32>,
    pub textures: Cell<u32>,
    pub buffer_disposals: Cell<u32>,
    pub texture_disposals: Cell<u32>,
    pub shader_disposals: Cell<u32>,
    pub pipeline_clears: Cell<u32>,
}

fn bump(cell: &Cell<u32>) {
    cell.set(cell.get() + 1);
}

#[derive(Default)]
pub struct MockFactory {
    pub counters: Rc<Counters>,
    pub ledger: HandleLedger,
    /// 这些名称的着色器编译失败
    pub failing: RefCell<HashSet<String>>,
}

impl MockFactory {
    pub fn draws(&self) -> u64 {
        self.counters.draws.get()
    }
}

impl ResourceFactory for MockFactory {
    fn backend(&self) -> Backend {
        Backend::OpenGl
    }

    fn create_shader(&self, source: &ShaderSource) -> SharedShader {
        bump(&self.counters.shaders);
        let valid = !self.failing.borrow().contains(&source.name);
        Rc::new(RefCell::new(MockShader {
            name: source.name.clone(),
            valid,
            uniforms: UniformBlock::default(),
            counters: self.counters.clone(),
            _tracked: valid.then(|| Tracked::new(&self.ledger, HandleKind::Shader)),
        }))
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<SharedBuffer> {
        bump(&self.counters.buffers);
        Ok(Rc::new(RefCell::new(MockBuffer {
            descriptor: descriptor.clone(),
            capacity: descriptor.capacity_floats(),
            vertex_count: 0,
            counters: self.counters.clone(),
            tracked: Some(Tracked::new(&self.ledger, HandleKind::Buffer)),
        })))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<SharedTexture> {
        bump(&self.counters.textures);
        Ok(Rc::new(RefCell::new(MockTexture {
            descriptor: descriptor.clone(),
            counters: self.counters.clone(),
            tracked: Some(Tracked::new(&self.ledger, HandleKind::Texture)),
        })))
    }

    fn shader_source(&self, name: &str) -> Option<ShaderSource> {
        BUILTIN_SHADERS
            .contains(&name)
            .then(|| ShaderSource::glsl(name, "void main() {}", "void main() {}"))
    }

    fn clear_pipeline_cache(&self) {
        bump(&self.counters.pipeline_clears);
    }

    fn wait_idle(&self) {}
}

pub struct MockShader {
    pub name: String,
    pub valid: bool,
    pub uniforms: UniformBlock,
    counters: Rc<Counters>,
    _tracked: Option<Tracked>,
}

impl Shader for MockShader {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn bind(&mut self) {}

    fn unbind(&mut self) {}

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.uniforms.set(name, value);
    }

    fn dispose(&mut self) {
        if self.valid {
            self.valid = false;
            self._tracked = None;
            bump(&self.counters.shader_disposals);
        }
    }

    fn compile_log(&self) -> Option<&str> {
        (!self.valid).then_some("mock compile failure")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockBuffer {
    descriptor: BufferDescriptor,
    capacity: usize,
    vertex_count: u32,
    counters: Rc<Counters>,
    tracked: Option<Tracked>,
}

impl Buffer for MockBuffer {
    fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, data: &[f32], offset: usize, count: usize) {
        let plan = UploadPlan::new(data.len(), offset, count, self.capacity, false);
        self.capacity = plan.capacity;
        self.vertex_count = (plan.floats / self.descriptor.floats_per_vertex as usize) as u32;
    }

    fn bind(&mut self) {}

    fn unbind(&mut self) {}

    fn draw_range(&mut self, _mode: DrawMode, _first: u32, count: u32) {
        if count > 0 && self.tracked.is_some() {
            self.counters.draws.set(self.counters.draws.get() + 1);
        }
    }

    fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    fn set_vertex_count(&mut self, count: u32) {
        self.vertex_count = count;
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn dispose(&mut self) {
        if self.tracked.take().is_some() {
            bump(&self.counters.buffer_disposals);
        }
    }

    fn is_initialized(&self) -> bool {
        self.tracked.is_some()
    }
}

pub struct MockTexture {
    descriptor: TextureDescriptor,
    counters: Rc<Counters>,
    tracked: Option<Tracked>,
}

impl Texture for MockTexture {
    fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, width: u32, height: u32, _bytes: &[u8]) {
        self.descriptor.width = width;
        self.descriptor.height = height;
    }

    fn bind(&mut self, _unit: u32) {}

    fn unbind(&mut self) {}

    fn dispose(&mut self) {
        if self.tracked.take().is_some() {
            bump(&self.counters.texture_disposals);
        }
    }

    fn is_initialized(&self) -> bool {
        self.tracked.is_some()
    }
}

/// 只跟踪状态的设备
pub struct MockDevice {
    pub backend: Backend,
    pub tracker: FrameTracker,
    pub factory: Rc<MockFactory>,
    pub size: (u32, u32),
}

impl MockDevice {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            tracker: FrameTracker::new(),
            factory: Rc::new(MockFactory::default()),
            size: (64, 64),
        }
    }
}

impl RenderDevice for MockDevice {
    fn initialize(&mut self) -> Result<()> {
        if self.tracker.needs_initialize()? {
            self.tracker.mark_initialized();
        }
        Ok(())
    }

    fn dispose(&mut self) {
        self.tracker.dispose();
    }

    fn is_initialized(&self) -> bool {
        self.tracker.is_initialized()
    }

    fn backend_type(&self) -> Backend {
        self.backend
    }

    fn frame_state(&self) -> FrameState {
        self.tracker.state()
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.tracker.begin_frame().map(|_| ())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.tracker.end_frame();
        Ok(())
    }

    fn set_viewport(&mut self, _x: i32, _y: i32, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn set_scissor_enabled(&mut self, _enabled: bool) {}

    fn set_scissor(&mut self, _x: i32, _y: i32, _width: u32, _height: u32) {}

    fn set_blend_mode(&mut self, _mode: BlendMode) {}

    fn set_line_width(&mut self, _width: f32) {}

    fn set_line_smoothing(&mut self, _enabled: bool) {}

    fn set_depth_test_enabled(&mut self, _enabled: bool) {}

    fn clear_screen(&mut self, _r: f32, _g: f32, _b: f32, _a: f32) {}

    fn clear_depth(&mut self) {}

    fn resource_factory(&self) -> Option<Rc<dyn ResourceFactory>> {
        if self.tracker.is_initialized() {
            let factory: Rc<dyn ResourceFactory> = self.factory.clone();
            Some(factory)
        } else {
            None
        }
    }

    fn max_line_width(&self) -> f32 {
        1.0
    }

    fn max_texture_size(&self) -> u32 {
        4096
    }

    fn renderer_info(&self) -> String {
        "mock".to_string()
    }

    fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    fn supports_pixel_readback(&self) -> bool {
        false
    }

    fn read_frame_pixels(&mut self, _pixels: &mut [u32]) -> Result<()> {
        Ok(())
    }

    fn frame_stats(&self) -> FrameStats {
        FrameStats {
            frames: self.tracker.frames_completed(),
            ..FrameStats::default()
        }
    }

    fn ledger(&self) -> HandleLedger {
        self.factory.ledger.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
