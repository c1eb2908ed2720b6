//! Metal 渲染设备
//!
//! 每帧一个命令缓冲区。帧内清屏结束当前编码器并以新的清除操作开始下一个通道；
//! `end_frame` 用 blit 同步托管存储的目标，提交后阻塞等待，再读出像素。

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use metal::{MTLRegion, MTLStorageMode, MTLTextureUsage, TextureDescriptor as MtlTextureDescriptor};
use objc::rc::autoreleasepool;
use tracing::{debug, info, warn};

use super::buffer::MetalBuffer;
use super::context::{FrameEncoder, MtlContext, MAX_TEXTURE_SIZE, TARGET_FORMAT};
use super::shader::MetalShader;
use super::shaders;
use super::texture::MetalTexture;
use crate::core::config::RenderConfig;
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend::{Backend, BlendMode};
use crate::renderer::buffer::{BufferDescriptor, SharedBuffer};
use crate::renderer::device::{RenderDevice, ResourceFactory};
use crate::renderer::frame::{FrameState, FrameTracker};
use crate::renderer::handle::{HandleKind, HandleLedger, Tracked};
use crate::renderer::readback::{copy_rows_to_argb, PixelOrder};
use crate::renderer::shader::{ShaderSource, SharedShader};
use crate::renderer::state::{FrameStats, Rect};
use crate::renderer::texture::{SharedTexture, TextureDescriptor};

/// Metal 资源工厂
pub struct MetalFactory {
    ctx: Rc<MtlContext>,
}

impl ResourceFactory for MetalFactory {
    fn backend(&self) -> Backend {
        Backend::Metal
    }

    fn create_shader(&self, source: &ShaderSource) -> SharedShader {
        Rc::new(RefCell::new(MetalShader::new(&self.ctx, source)))
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<SharedBuffer> {
        Ok(Rc::new(RefCell::new(MetalBuffer::new(&self.ctx, descriptor))))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<SharedTexture> {
        Ok(Rc::new(RefCell::new(MetalTexture::new(&self.ctx, descriptor)?)))
    }

    fn shader_source(&self, name: &str) -> Option<ShaderSource> {
        shaders::source(name)
    }

    fn clear_pipeline_cache(&self) {
        self.ctx.clear_pipelines();
    }

    fn wait_idle(&self) {
        self.ctx.wait_idle();
    }
}

/// 离屏目标和最近一帧的像素
struct RenderTarget {
    texture: metal::Texture,
    width: u32,
    height: u32,
    pixels: Option<Vec<u8>>,
    _tracked: Tracked,
}

impl RenderTarget {
    fn new(ctx: &MtlContext, width: u32, height: u32) -> Self {
        let desc = MtlTextureDescriptor::new();
        desc.set_pixel_format(TARGET_FORMAT);
        desc.set_width(width as u64);
        desc.set_height(height as u64);
        desc.set_usage(MTLTextureUsage::RenderTarget);
        desc.set_storage_mode(MTLStorageMode::Managed);
        let texture = ctx.device.new_texture(&desc);
        debug!(width, height, "Offscreen target created");
        Self {
            texture,
            width,
            height,
            pixels: None,
            _tracked: Tracked::new(&ctx.ledger, HandleKind::RenderTarget),
        }
    }

    fn row_pitch(&self) -> usize {
        self.width as usize * 4
    }

    /// 目标已同步到 CPU 端后拷出内容
    fn capture(&mut self) {
        let mut bytes = vec![0u8; self.row_pitch() * self.height as usize];
        self.texture.get_bytes(
            bytes.as_mut_ptr() as *mut _,
            self.row_pitch() as u64,
            MTLRegion::new_2d(0, 0, self.width as u64, self.height as u64),
            0,
        );
        self.pixels = Some(bytes);
    }
}

/// Metal 渲染设备
pub struct MetalDevice {
    config: RenderConfig,
    tracker: FrameTracker,
    ledger: HandleLedger,
    ctx: Option<Rc<MtlContext>>,
    factory: Option<Rc<MetalFactory>>,
    target: Option<RenderTarget>,
    last_stats: FrameStats,
}

impl MetalDevice {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            config: config.clone(),
            tracker: FrameTracker::new(),
            ledger: HandleLedger::new(),
            ctx: None,
            factory: None,
            target: None,
            last_stats: FrameStats::default(),
        }
    }

    fn live(&self) -> Option<&Rc<MtlContext>> {
        if self.tracker.is_initialized() {
            self.ctx.as_ref()
        } else {
            None
        }
    }

    fn ensure_target(&mut self, ctx: &MtlContext, width: u32, height: u32) {
        if !self.target.as_ref().is_some_and(|t| t.width == width && t.height == height) {
            self.target = Some(RenderTarget::new(ctx, width, height));
        }
    }

    /// 结束编码、同步目标、提交并等待
    fn submit_frame(&mut self, ctx: &MtlContext) -> Result<()> {
        let frame = ctx.frame.borrow_mut().take().ok_or(GraphicsError::NotInitialized)?;
        let target = self.target.as_mut().ok_or(GraphicsError::NotInitialized)?;

        frame.encoder.end_encoding();
        let blit = frame.command_buffer.new_blit_command_encoder();
        blit.synchronize_resource(&target.texture);
        blit.end_encoding();

        let value = ctx.fences.next_value();
        frame.command_buffer.commit();
        frame.command_buffer.wait_until_completed();
        if matches!(frame.command_buffer.status(), metal::MTLCommandBufferStatus::Error) {
            return Err(GraphicsError::CommandExecution("Metal command buffer failed".to_string()).into());
        }
        ctx.fences.update_completed_value(value);
        target.capture();
        Ok(())
    }

    fn release_native(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        if let Some(frame) = ctx.frame.borrow_mut().take() {
            frame.encoder.end_encoding();
        }
        ctx.wait_idle();
        ctx.state.borrow_mut().end();
        self.last_stats = ctx.state.borrow().stats;
        self.target = None;
        self.factory = None;
        info!(remaining = Rc::strong_count(&ctx) - 1, "Metal device disposed");
    }
}

impl RenderDevice for MetalDevice {
    fn initialize(&mut self) -> Result<()> {
        if !self.tracker.needs_initialize()? {
            return Ok(());
        }
        let ctx = Rc::new(MtlContext::new(&self.config, self.ledger.clone())?);
        let (width, height) = {
            let state = ctx.state.borrow();
            (state.frame_width, state.frame_height)
        };
        self.ensure_target(&ctx, width, height);
        self.factory = Some(Rc::new(MetalFactory { ctx: ctx.clone() }));
        self.ctx = Some(ctx);
        self.tracker.mark_initialized();
        info!(width, height, "Metal device initialized");
        Ok(())
    }

    fn dispose(&mut self) {
        if self.tracker.dispose() != FrameState::Disposed {
            autoreleasepool(|| self.release_native());
        }
    }

    fn is_initialized(&self) -> bool {
        self.tracker.is_initialized()
    }

    fn backend_type(&self) -> Backend {
        Backend::Metal
    }

    fn frame_state(&self) -> FrameState {
        self.tracker.state()
    }

    fn begin_frame(&mut self) -> Result<()> {
        if !self.tracker.begin_frame()? {
            return Ok(());
        }
        let Some(ctx) = self.ctx.clone() else {
            self.tracker.abort_frame();
            return Err(GraphicsError::NotInitialized.into());
        };
        let (width, height, clear) = {
            let state = ctx.state.borrow();
            (state.frame_width, state.frame_height, state.clear_color)
        };
        self.ensure_target(&ctx, width, height);
        let Some(target) = &self.target else {
            self.tracker.abort_frame();
            return Err(GraphicsError::NotInitialized.into());
        };
        let frame = autoreleasepool(|| {
            let command_buffer = ctx.queue.new_command_buffer().to_owned();
            let encoder = ctx.open_pass(&command_buffer, &target.texture, clear);
            FrameEncoder { command_buffer, encoder }
        });
        *ctx.frame.borrow_mut() = Some(frame);
        ctx.state.borrow_mut().begin();
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        if !self.tracker.in_frame() {
            return Ok(());
        }
        let Some(ctx) = self.ctx.clone() else {
            self.tracker.end_frame();
            return Ok(());
        };
        let result = autoreleasepool(|| self.submit_frame(&ctx));
        if let Err(e) = &result {
            warn!("Frame submission failed: {}", e);
        }
        ctx.state.borrow_mut().end();
        self.tracker.end_frame();
        result
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        if let Some(ctx) = self.live() {
            ctx.state.borrow_mut().set_viewport(x, y, width, height);
        }
    }

    fn set_scissor_enabled(&mut self, enabled: bool) {
        if let Some(ctx) = self.live() {
            ctx.state.borrow_mut().scissor_enabled = enabled;
        }
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        if let Some(ctx) = self.live() {
            ctx.state.borrow_mut().scissor = Rect::new(x, y, width, height);
        }
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        if let Some(ctx) = self.live() {
            ctx.state.borrow_mut().blend = mode;
        }
    }

    fn set_line_width(&mut self, width: f32) {
        if let Some(ctx) = self.live() {
            ctx.state.borrow_mut().set_line_width(width);
        }
    }

    fn set_line_smoothing(&mut self, enabled: bool) {
        if let Some(ctx) = self.live() {
            ctx.state.borrow_mut().line_smoothing = enabled;
        }
    }

    fn set_depth_test_enabled(&mut self, enabled: bool) {
        if let Some(ctx) = self.live() {
            ctx.state.borrow_mut().depth_test = enabled;
        }
    }

    fn clear_screen(&mut self, r: f32, g: f32, b: f32, a: f32) {
        let (Some(ctx), Some(target)) = (self.live(), &self.target) else {
            return;
        };
        ctx.state.borrow_mut().clear_color = [r, g, b, a];
        let mut frame = ctx.frame.borrow_mut();
        if let Some(frame) = frame.as_mut() {
            autoreleasepool(|| {
                frame.encoder.end_encoding();
                frame.encoder = ctx.open_pass(&frame.command_buffer, &target.texture, [r, g, b, a]);
            });
        }
    }

    fn clear_depth(&mut self) {}

    fn resource_factory(&self) -> Option<Rc<dyn ResourceFactory>> {
        if !self.tracker.is_initialized() {
            return None;
        }
        self.factory.clone().map(|f| f as Rc<dyn ResourceFactory>)
    }

    // Metal 没有线宽状态
    fn max_line_width(&self) -> f32 {
        1.0
    }

    fn max_texture_size(&self) -> u32 {
        if self.ctx.is_some() {
            MAX_TEXTURE_SIZE
        } else {
            0
        }
    }

    fn renderer_info(&self) -> String {
        self.ctx
            .as_ref()
            .map_or_else(|| "Metal (not initialized)".to_string(), |ctx| ctx.renderer_info.clone())
    }

    fn frame_size(&self) -> (u32, u32) {
        match &self.ctx {
            Some(ctx) => {
                let state = ctx.state.borrow();
                (state.frame_width, state.frame_height)
            }
            None => (self.config.width, self.config.height),
        }
    }

    fn read_frame_pixels(&mut self, pixels: &mut [u32]) -> Result<()> {
        if self.live().is_none() {
            return Err(GraphicsError::NotInitialized.into());
        }
        let target = self.target.as_ref().ok_or(GraphicsError::NotInitialized)?;
        let bytes = target
            .pixels
            .as_deref()
            .ok_or_else(|| GraphicsError::Readback("no completed frame to read".to_string()))?;
        copy_rows_to_argb(bytes, target.row_pitch(), target.width, target.height, PixelOrder::Rgba, pixels)
    }

    fn frame_stats(&self) -> FrameStats {
        match &self.ctx {
            Some(ctx) => ctx.state.borrow().stats,
            None => self.last_stats,
        }
    }

    fn ledger(&self) -> HandleLedger {
        self.ledger.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for MetalDevice {
    fn drop(&mut self) {
        self.dispose();
    }
}
