//! OpenGL 渲染设备
//!
//! 帧内的绘制只进入录制列表；`end_frame` 一次性写入 uniform 区、
//! 回放命令、把目标复制到回读缓冲区并同步映射。

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc;

use tracing::{debug, info, warn};

use super::buffer::OpenGlBuffer;
use super::context::{Command, GlContext, TARGET_FORMAT};
use super::shader::OpenGlShader;
use super::shaders;
use super::texture::OpenGlTexture;
use crate::core::config::RenderConfig;
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend::{Backend, BlendMode};
use crate::renderer::buffer::{BufferDescriptor, SharedBuffer};
use crate::renderer::device::{RenderDevice, ResourceFactory};
use crate::renderer::frame::{FrameState, FrameTracker};
use crate::renderer::handle::{HandleKind, HandleLedger, Tracked};
use crate::renderer::readback::{align_up, copy_rows_to_argb, PixelOrder};
use crate::renderer::shader::{ShaderSource, SharedShader, UniformBlock};
use crate::renderer::state::{FrameStats, Rect};
use crate::renderer::texture::{SharedTexture, TextureDescriptor};

/// OpenGL 资源工厂
pub struct OpenGlFactory {
    ctx: Rc<GlContext>,
}

impl ResourceFactory for OpenGlFactory {
    fn backend(&self) -> Backend {
        Backend::OpenGl
    }

    fn create_shader(&self, source: &ShaderSource) -> SharedShader {
        Rc::new(RefCell::new(OpenGlShader::new(&self.ctx, source)))
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<SharedBuffer> {
        Ok(Rc::new(RefCell::new(OpenGlBuffer::new(&self.ctx, descriptor))))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<SharedTexture> {
        Ok(Rc::new(RefCell::new(OpenGlTexture::new(&self.ctx, descriptor)?)))
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

/// 离屏目标和回读缓冲区
struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    row_pitch: usize,
    width: u32,
    height: u32,
    /// 最近一帧映射出来的像素
    pixels: Option<Vec<u8>>,
    _tracked: Vec<Tracked>,
}

impl RenderTarget {
    fn new(ctx: &GlContext, width: u32, height: u32) -> Self {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let row_pitch = align_up(width as usize * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize);
        let readback = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (row_pitch * height as usize) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        debug!(width, height, row_pitch, "Offscreen target created");
        Self {
            texture,
            view,
            readback,
            row_pitch,
            width,
            height,
            pixels: None,
            _tracked: vec![
                Tracked::new(&ctx.ledger, HandleKind::RenderTarget),
                Tracked::new(&ctx.ledger, HandleKind::Staging),
            ],
        }
    }

    /// 映射回读缓冲区并拷出内容
    fn map_pixels(&mut self, device: &wgpu::Device) -> Result<()> {
        let slice = self.readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| GraphicsError::Readback("map callback never ran".to_string()))?
            .map_err(|e| GraphicsError::Readback(format!("map_async failed: {}", e)))?;
        self.pixels = Some(slice.get_mapped_range().to_vec());
        self.readback.unmap();
        Ok(())
    }
}

/// 本帧的 uniform 缓冲区，按需增长
struct UniformArena {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: usize,
}

impl UniformArena {
    fn new(ctx: &GlContext, capacity: usize) -> Self {
        let capacity = capacity.max(ctx.uniform_alignment + UniformBlock::SIZE);
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform arena"),
            size: capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &ctx.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(UniformBlock::SIZE as u64),
                }),
            }],
        });
        Self {
            buffer,
            bind_group,
            capacity,
        }
    }
}

/// OpenGL 渲染设备
pub struct OpenGlDevice {
    config: RenderConfig,
    tracker: FrameTracker,
    ledger: HandleLedger,
    ctx: Option<Rc<GlContext>>,
    factory: Option<Rc<OpenGlFactory>>,
    target: Option<RenderTarget>,
    uniforms: Option<UniformArena>,
    last_stats: FrameStats,
}

impl OpenGlDevice {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            config: config.clone(),
            tracker: FrameTracker::new(),
            ledger: HandleLedger::new(),
            ctx: None,
            factory: None,
            target: None,
            uniforms: None,
            last_stats: FrameStats::default(),
        }
    }

    fn live(&self) -> Option<&Rc<GlContext>> {
        if self.tracker.is_initialized() {
            self.ctx.as_ref()
        } else {
            None
        }
    }

    fn ensure_target(&mut self, ctx: &GlContext, width: u32, height: u32) {
        if !self.target.as_ref().is_some_and(|t| t.width == width && t.height == height) {
            self.target = Some(RenderTarget::new(ctx, width, height));
        }
    }

    /// 回放录制的命令并提交，阻塞到完成
    fn submit_frame(&mut self, ctx: &GlContext) -> Result<()> {
        let recording = std::mem::take(&mut *ctx.recording.borrow_mut());
        let clear = ctx.state.borrow().clear_color;

        // 1. uniform 区
        if self.uniforms.as_ref().map_or(true, |u| u.capacity < recording.uniforms.len()) {
            self.uniforms = Some(UniformArena::new(ctx, recording.uniforms.len() * 2));
        }
        let (Some(uniforms), Some(target)) = (&self.uniforms, &mut self.target) else {
            return Err(GraphicsError::NotInitialized.into());
        };
        if !recording.uniforms.is_empty() {
            ctx.queue.write_buffer(&uniforms.buffer, 0, &recording.uniforms);
        }

        // 2. 回放：每个 Clear 开始一个新通道
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame encoder"),
        });
        let mut passes: Vec<([f32; 4], Vec<&Command>)> = vec![(clear, Vec::new())];
        for command in &recording.commands {
            match command {
                Command::Clear(color) => passes.push((*color, Vec::new())),
                Command::Draw(_) => {
                    if let Some(last) = passes.last_mut() {
                        last.1.push(command);
                    }
                }
            }
        }
        for (color, draws) in &passes {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0] as f64,
                            g: color[1] as f64,
                            b: color[2] as f64,
                            a: color[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            for command in draws {
                let Command::Draw(draw) = command else {
                    continue;
                };
                pass.set_pipeline(&draw.pipeline);
                pass.set_bind_group(0, &uniforms.bind_group, &[draw.uniform_offset]);
                if let Some(texture) = &draw.texture {
                    pass.set_bind_group(1, texture, &[]);
                }
                let Rect { x, y, width, height } = draw.viewport;
                pass.set_viewport(x as f32, y as f32, width as f32, height as f32, 0.0, 1.0);
                let s = draw.scissor;
                pass.set_scissor_rect(s.x as u32, s.y as u32, s.width, s.height);
                pass.set_vertex_buffer(0, draw.vertex.slice(..));
                pass.draw(draw.first..draw.first + draw.count, 0..1);
            }
        }

        // 3. 复制到回读缓冲区
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &target.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(target.row_pitch as u32),
                    rows_per_image: Some(target.height),
                },
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );

        // 4. 提交并等待
        let value = ctx.fences.next_value();
        let index = ctx.queue.submit(Some(encoder.finish()));
        ctx.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        ctx.fences.update_completed_value(value);
        target.map_pixels(&ctx.device)
    }

    fn release_native(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        ctx.wait_idle();
        ctx.recording.borrow_mut().commands.clear();
        ctx.state.borrow_mut().end();
        self.last_stats = ctx.state.borrow().stats;
        self.target = None;
        self.uniforms = None;
        self.factory = None;
        info!(remaining = Rc::strong_count(&ctx) - 1, "OpenGL device disposed");
    }
}

impl RenderDevice for OpenGlDevice {
    fn initialize(&mut self) -> Result<()> {
        if !self.tracker.needs_initialize()? {
            return Ok(());
        }
        let ctx = Rc::new(GlContext::new(&self.config, self.ledger.clone())?);
        let (width, height) = {
            let state = ctx.state.borrow();
            (state.frame_width, state.frame_height)
        };
        self.ensure_target(&ctx, width, height);
        self.factory = Some(Rc::new(OpenGlFactory { ctx: ctx.clone() }));
        self.ctx = Some(ctx);
        self.tracker.mark_initialized();
        info!(width, height, "OpenGL device initialized");
        Ok(())
    }

    fn dispose(&mut self) {
        if self.tracker.dispose() != FrameState::Disposed {
            self.release_native();
        }
    }

    fn is_initialized(&self) -> bool {
        self.tracker.is_initialized()
    }

    fn backend_type(&self) -> Backend {
        Backend::OpenGl
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
        let (width, height) = {
            let state = ctx.state.borrow();
            (state.frame_width, state.frame_height)
        };
        self.ensure_target(&ctx, width, height);
        *ctx.recording.borrow_mut() = Default::default();
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
        let result = self.submit_frame(&ctx);
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
        if let Some(ctx) = self.live() {
            let mut state = ctx.state.borrow_mut();
            state.clear_color = [r, g, b, a];
            if state.in_frame {
                ctx.recording.borrow_mut().commands.push(Command::Clear([r, g, b, a]));
            }
        }
    }

    fn clear_depth(&mut self) {}

    fn resource_factory(&self) -> Option<Rc<dyn ResourceFactory>> {
        if !self.tracker.is_initialized() {
            return None;
        }
        self.factory.clone().map(|f| f as Rc<dyn ResourceFactory>)
    }

    // wgpu 不支持宽线
    fn max_line_width(&self) -> f32 {
        1.0
    }

    fn max_texture_size(&self) -> u32 {
        self.ctx.as_ref().map_or(0, |ctx| ctx.max_texture_size)
    }

    fn renderer_info(&self) -> String {
        self.ctx
            .as_ref()
            .map_or_else(|| "OpenGL (not initialized)".to_string(), |ctx| ctx.renderer_info.clone())
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
        let target = self
            .target
            .as_ref()
            .ok_or(GraphicsError::NotInitialized)?;
        let bytes = target
            .pixels
            .as_deref()
            .ok_or_else(|| GraphicsError::Readback("no completed frame to read".to_string()))?;
        copy_rows_to_argb(bytes, target.row_pitch, target.width, target.height, PixelOrder::Rgba, pixels)
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

impl Drop for OpenGlDevice {
    fn drop(&mut self) {
        self.dispose();
    }
}
