//! Vulkan 渲染设备
//!
//! 离屏渲染到一张 RGBA8 图像。每帧录制一个命令缓冲区：渲染通道结束后
//! 把图像复制到常驻映射的暂存缓冲区，提交后阻塞等待 Fence，
//! 所以 `read_frame_pixels` 只需转换暂存内容。

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use ash::vk;
use tracing::{debug, info, warn};

use super::buffer::VulkanBuffer;
use super::context::{command_error, device_error, HostBuffer, VkContext, TARGET_FORMAT};
use super::shader::VulkanShader;
use super::shaders;
use super::texture::VulkanTexture;
use crate::core::config::RenderConfig;
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend::{Backend, BlendMode};
use crate::renderer::buffer::{BufferDescriptor, SharedBuffer};
use crate::renderer::device::{RenderDevice, ResourceFactory};
use crate::renderer::frame::{FrameState, FrameTracker};
use crate::renderer::handle::{HandleKind, HandleLedger, Tracked};
use crate::renderer::readback::{copy_rows_to_argb, PixelOrder};
use crate::renderer::shader::{ShaderSource, SharedShader};
use crate::renderer::state::FrameStats;
use crate::renderer::texture::{SharedTexture, TextureDescriptor};

/// Vulkan 资源工厂
pub struct VulkanFactory {
    ctx: Rc<VkContext>,
}

impl ResourceFactory for VulkanFactory {
    fn backend(&self) -> Backend {
        Backend::Vulkan
    }

    fn create_shader(&self, source: &ShaderSource) -> SharedShader {
        Rc::new(RefCell::new(VulkanShader::new(&self.ctx, source)))
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<SharedBuffer> {
        Ok(Rc::new(RefCell::new(VulkanBuffer::new(&self.ctx, descriptor)?)))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<SharedTexture> {
        Ok(Rc::new(RefCell::new(VulkanTexture::new(&self.ctx, descriptor)?)))
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

/// 每帧复用的命令对象
struct FrameObjects {
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    _tracked: Vec<Tracked>,
}

impl FrameObjects {
    fn new(ctx: &VkContext) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(ctx.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { ctx.device.create_command_pool(&pool_info, None) }
            .map_err(device_error("vkCreateCommandPool"))?;

        let alloc = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = match unsafe { ctx.device.allocate_command_buffers(&alloc) } {
            Ok(cmds) => cmds[0],
            Err(e) => {
                unsafe { ctx.device.destroy_command_pool(pool, None) };
                return Err(device_error("vkAllocateCommandBuffers")(e));
            }
        };

        let fence = match unsafe { ctx.device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { ctx.device.destroy_command_pool(pool, None) };
                return Err(device_error("vkCreateFence")(e));
            }
        };

        Ok(Self {
            pool,
            cmd,
            fence,
            _tracked: vec![
                Tracked::new(&ctx.ledger, HandleKind::CommandPool),
                Tracked::new(&ctx.ledger, HandleKind::Fence),
            ],
        })
    }

    fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.fence, None);
            device.destroy_command_pool(self.pool, None);
        }
    }
}

/// 离屏颜色目标和回读暂存
struct RenderTarget {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    framebuffer: vk::Framebuffer,
    staging: HostBuffer,
    width: u32,
    height: u32,
    /// 暂存缓冲区里是否有一帧完整的像素
    has_frame: bool,
    _tracked: Vec<Tracked>,
}

impl RenderTarget {
    fn new(ctx: &VkContext, width: u32, height: u32) -> Result<Self> {
        let (image, memory) = ctx.create_image(
            width,
            height,
            TARGET_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;
        let destroy_image = |device: &ash::Device| unsafe {
            device.destroy_image(image, None);
            device.free_memory(memory, None);
        };

        let view = match ctx.create_view(image, TARGET_FORMAT) {
            Ok(view) => view,
            Err(e) => {
                destroy_image(&ctx.device);
                return Err(e);
            }
        };

        let attachments = [view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(ctx.render_pass())
            .attachments(&attachments)
            .width(width)
            .height(height)
            .layers(1);
        let framebuffer = match unsafe { ctx.device.create_framebuffer(&framebuffer_info, None) } {
            Ok(fb) => fb,
            Err(e) => {
                unsafe { ctx.device.destroy_image_view(view, None) };
                destroy_image(&ctx.device);
                return Err(device_error("vkCreateFramebuffer")(e));
            }
        };

        let staging = match ctx.create_host_buffer(
            width as usize * height as usize * 4,
            vk::BufferUsageFlags::TRANSFER_DST,
        ) {
            Ok(staging) => staging,
            Err(e) => {
                unsafe {
                    ctx.device.destroy_framebuffer(framebuffer, None);
                    ctx.device.destroy_image_view(view, None);
                }
                destroy_image(&ctx.device);
                return Err(e);
            }
        };

        debug!(width, height, "Offscreen target created");
        Ok(Self {
            image,
            memory,
            view,
            framebuffer,
            staging,
            width,
            height,
            has_frame: false,
            _tracked: vec![
                Tracked::new(&ctx.ledger, HandleKind::RenderTarget),
                Tracked::new(&ctx.ledger, HandleKind::Staging),
            ],
        })
    }

    fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_framebuffer(self.framebuffer, None);
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
        self.staging.destroy(device);
    }
}

/// Vulkan 渲染设备
pub struct VulkanDevice {
    config: RenderConfig,
    tracker: FrameTracker,
    ledger: HandleLedger,
    ctx: Option<Rc<VkContext>>,
    factory: Option<Rc<VulkanFactory>>,
    frame: Option<FrameObjects>,
    target: Option<RenderTarget>,
    last_stats: FrameStats,
}

impl VulkanDevice {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            config: config.clone(),
            tracker: FrameTracker::new(),
            ledger: HandleLedger::new(),
            ctx: None,
            factory: None,
            frame: None,
            target: None,
            last_stats: FrameStats::default(),
        }
    }

    /// 已初始化且未释放时的上下文
    fn live(&self) -> Option<&Rc<VkContext>> {
        if self.tracker.is_initialized() {
            self.ctx.as_ref()
        } else {
            None
        }
    }

    /// 帧尺寸变化时重建离屏目标（帧外调用，GPU 已空闲）
    fn ensure_target(&mut self, ctx: &VkContext, width: u32, height: u32) -> Result<()> {
        if self.target.as_ref().is_some_and(|t| t.width == width && t.height == height) {
            return Ok(());
        }
        if let Some(old) = self.target.take() {
            ctx.wait_idle();
            old.destroy(&ctx.device);
        }
        self.target = Some(RenderTarget::new(ctx, width, height)?);
        Ok(())
    }

    fn record_begin(&mut self) -> Result<()> {
        let ctx = self.ctx.clone().ok_or(GraphicsError::NotInitialized)?;
        let (width, height, clear) = {
            let state = ctx.state.borrow();
            (state.frame_width, state.frame_height, state.clear_color)
        };
        self.ensure_target(&ctx, width, height)?;
        let (Some(frame), Some(target)) = (&self.frame, &self.target) else {
            return Err(GraphicsError::NotInitialized.into());
        };

        let device = &ctx.device;
        unsafe {
            device
                .reset_command_buffer(frame.cmd, vk::CommandBufferResetFlags::empty())
                .map_err(command_error("vkResetCommandBuffer"))?;
            let begin = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(frame.cmd, &begin)
                .map_err(command_error("vkBeginCommandBuffer"))?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            }];
            let pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(ctx.render_pass())
                .framebuffer(target.framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: vk::Extent2D { width, height },
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(frame.cmd, &pass_info, vk::SubpassContents::INLINE);
        }

        ctx.state.borrow_mut().begin();
        ctx.bindings.borrow_mut().cmd = Some(frame.cmd);
        Ok(())
    }

    fn submit_frame(&mut self, ctx: &VkContext) -> Result<()> {
        let (Some(frame), Some(target)) = (&self.frame, &mut self.target) else {
            return Err(GraphicsError::NotInitialized.into());
        };
        let device = &ctx.device;
        unsafe {
            device.cmd_end_render_pass(frame.cmd);

            // 渲染通道结束后图像已处于 TRANSFER_SRC_OPTIMAL
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: target.width,
                    height: target.height,
                    depth: 1,
                },
            };
            device.cmd_copy_image_to_buffer(
                frame.cmd,
                target.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                target.staging.buffer,
                &[region],
            );
            let to_host = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ)
                .build();
            device.cmd_pipeline_barrier(
                frame.cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[to_host],
                &[],
                &[],
            );
            device.end_command_buffer(frame.cmd).map_err(command_error("vkEndCommandBuffer"))?;

            device.reset_fences(&[frame.fence]).map_err(command_error("vkResetFences"))?;
            let value = ctx.fences.next_value();
            let cmds = [frame.cmd];
            let submit = [vk::SubmitInfo::builder().command_buffers(&cmds).build()];
            device
                .queue_submit(ctx.queue, &submit, frame.fence)
                .map_err(command_error("vkQueueSubmit"))?;
            device
                .wait_for_fences(&[frame.fence], true, u64::MAX)
                .map_err(command_error("vkWaitForFences"))?;
            ctx.fences.update_completed_value(value);
        }
        target.has_frame = true;
        ctx.collect_retired(ctx.fences.completed_value());
        Ok(())
    }

    fn release_native(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        ctx.wait_idle();
        {
            let mut bindings = ctx.bindings.borrow_mut();
            bindings.cmd = None;
        }
        ctx.state.borrow_mut().end();
        self.last_stats = ctx.state.borrow().stats;
        ctx.drain_retired();
        if let Some(target) = self.target.take() {
            target.destroy(&ctx.device);
        }
        if let Some(frame) = self.frame.take() {
            frame.destroy(&ctx.device);
        }
        self.factory = None;
        // 仍存活的资源持有上下文，最后一个释放时销毁逻辑设备
        info!(remaining = Rc::strong_count(&ctx) - 1, "Vulkan device disposed");
    }
}

impl RenderDevice for VulkanDevice {
    fn initialize(&mut self) -> Result<()> {
        if !self.tracker.needs_initialize()? {
            return Ok(());
        }
        let ctx = Rc::new(VkContext::new(&self.config, self.ledger.clone())?);
        let frame = FrameObjects::new(&ctx)?;
        self.frame = Some(frame);
        if let Err(e) = self.ensure_target(&ctx, self.config.width.max(1), self.config.height.max(1)) {
            if let Some(frame) = self.frame.take() {
                frame.destroy(&ctx.device);
            }
            return Err(e);
        }
        self.factory = Some(Rc::new(VulkanFactory { ctx: ctx.clone() }));
        self.ctx = Some(ctx);
        self.tracker.mark_initialized();
        info!(width = self.config.width, height = self.config.height, "Vulkan device initialized");
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
        Backend::Vulkan
    }

    fn frame_state(&self) -> FrameState {
        self.tracker.state()
    }

    fn begin_frame(&mut self) -> Result<()> {
        if !self.tracker.begin_frame()? {
            return Ok(());
        }
        if let Err(e) = self.record_begin() {
            self.tracker.abort_frame();
            return Err(e);
        }
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
            ctx.drain_retired();
        }
        ctx.bindings.borrow_mut().cmd = None;
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
            ctx.state.borrow_mut().scissor = crate::renderer::state::Rect::new(x, y, width, height);
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

    // 只记录状态，光栅化线段不做抗锯齿
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
        let Some(ctx) = self.live() else {
            return;
        };
        let mut state = ctx.state.borrow_mut();
        state.clear_color = [r, g, b, a];
        let cmd = ctx.bindings.borrow().cmd;
        if let (true, Some(cmd)) = (state.in_frame, cmd) {
            let attachment = vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue { float32: [r, g, b, a] },
                },
            };
            let rect = vk::ClearRect {
                rect: vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: vk::Extent2D {
                        width: state.frame_width,
                        height: state.frame_height,
                    },
                },
                base_array_layer: 0,
                layer_count: 1,
            };
            unsafe { ctx.device.cmd_clear_attachments(cmd, &[attachment], &[rect]) };
        }
    }

    // 没有深度缓冲
    fn clear_depth(&mut self) {}

    fn resource_factory(&self) -> Option<Rc<dyn ResourceFactory>> {
        if !self.tracker.is_initialized() {
            return None;
        }
        self.factory.clone().map(|f| f as Rc<dyn ResourceFactory>)
    }

    fn max_line_width(&self) -> f32 {
        self.ctx.as_ref().map_or(1.0, |ctx| ctx.max_line_width)
    }

    fn max_texture_size(&self) -> u32 {
        self.ctx.as_ref().map_or(0, |ctx| ctx.max_texture_size)
    }

    fn renderer_info(&self) -> String {
        self.ctx
            .as_ref()
            .map_or_else(|| "Vulkan (not initialized)".to_string(), |ctx| ctx.renderer_info.clone())
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
            .filter(|t| t.has_frame)
            .ok_or_else(|| GraphicsError::Readback("no completed frame to read".to_string()))?;
        copy_rows_to_argb(
            target.staging.bytes(),
            target.width as usize * 4,
            target.width,
            target.height,
            PixelOrder::Rgba,
            pixels,
        )
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

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        self.dispose();
    }
}
