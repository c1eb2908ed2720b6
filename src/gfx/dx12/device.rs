//! DX12 渲染设备
//!
//! 每帧录制一个直接命令列表：目标从 COPY_SOURCE 转到 RENDER_TARGET，
//! 按清屏颜色清除，帧结束时转回并复制进 READBACK 缓冲区，执行后阻塞等待。

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info, warn};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;

use super::buffer::Dx12Buffer;
use super::context::{borrowed, buffer_desc, committed_resource, transition, DxContext, FrameRecording, TARGET_FORMAT};
use super::descriptor::DescriptorHeap;
use super::shader::Dx12Shader;
use super::shaders;
use super::texture::Dx12Texture;
use crate::core::config::RenderConfig;
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend::{Backend, BlendMode};
use crate::renderer::buffer::{BufferDescriptor, SharedBuffer};
use crate::renderer::device::{RenderDevice, ResourceFactory};
use crate::renderer::frame::{FrameState, FrameTracker};
use crate::renderer::handle::{HandleKind, HandleLedger, Tracked};
use crate::renderer::readback::{align_up, copy_rows_to_argb, PixelOrder};
use crate::renderer::shader::{ShaderSource, SharedShader};
use crate::renderer::state::{FrameStats, Rect};
use crate::renderer::texture::{SharedTexture, TextureDescriptor};

/// DX12 资源工厂
pub struct Dx12Factory {
    ctx: Rc<DxContext>,
}

impl ResourceFactory for Dx12Factory {
    fn backend(&self) -> Backend {
        Backend::Dx12
    }

    fn create_shader(&self, source: &ShaderSource) -> SharedShader {
        Rc::new(RefCell::new(Dx12Shader::new(&self.ctx, source)))
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<SharedBuffer> {
        Ok(Rc::new(RefCell::new(Dx12Buffer::new(&self.ctx, descriptor)?)))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<SharedTexture> {
        Ok(Rc::new(RefCell::new(Dx12Texture::new(&self.ctx, descriptor)?)))
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

/// 离屏目标、RTV 和回读缓冲区
struct RenderTarget {
    texture: ID3D12Resource,
    rtv_heap: DescriptorHeap,
    readback: ID3D12Resource,
    width: u32,
    height: u32,
    row_pitch: usize,
    pixels: Option<Vec<u8>>,
    _tracked: [Tracked; 2],
}

impl RenderTarget {
    fn new(ctx: &DxContext, width: u32, height: u32) -> Result<Self> {
        let desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: width as u64,
            Height: height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: TARGET_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
            ..Default::default()
        };
        let texture = committed_resource(&ctx.device, D3D12_HEAP_TYPE_DEFAULT, &desc, D3D12_RESOURCE_STATE_COPY_SOURCE)?;
        let rtv_heap = DescriptorHeap::new(&ctx.device, D3D12_DESCRIPTOR_HEAP_TYPE_RTV, 1, false)?;
        unsafe { ctx.device.CreateRenderTargetView(&texture, None, rtv_heap.cpu_handle(0)) };

        let row_pitch = align_up(width as usize * 4, D3D12_TEXTURE_DATA_PITCH_ALIGNMENT as usize);
        let readback = committed_resource(
            &ctx.device,
            D3D12_HEAP_TYPE_READBACK,
            &buffer_desc((row_pitch * height as usize) as u64),
            D3D12_RESOURCE_STATE_COPY_DEST,
        )?;
        debug!(width, height, row_pitch, "Offscreen target created");
        Ok(Self {
            texture,
            rtv_heap,
            readback,
            width,
            height,
            row_pitch,
            pixels: None,
            _tracked: [
                Tracked::new(&ctx.ledger, HandleKind::RenderTarget),
                Tracked::new(&ctx.ledger, HandleKind::Staging),
            ],
        })
    }

    /// 把目标复制到回读缓冲区
    fn record_copy(&self, list: &ID3D12GraphicsCommandList) {
        unsafe {
            let dst = D3D12_TEXTURE_COPY_LOCATION {
                pResource: borrowed(&self.readback),
                Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                        Offset: 0,
                        Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                            Format: TARGET_FORMAT,
                            Width: self.width,
                            Height: self.height,
                            Depth: 1,
                            RowPitch: self.row_pitch as u32,
                        },
                    },
                },
            };
            let src = D3D12_TEXTURE_COPY_LOCATION {
                pResource: borrowed(&self.texture),
                Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
            };
            list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
        }
    }

    fn capture(&mut self) -> Result<()> {
        let size = self.row_pitch * self.height as usize;
        unsafe {
            let mut mapped = std::ptr::null_mut();
            let range = D3D12_RANGE { Begin: 0, End: size };
            self.readback
                .Map(0, Some(&range), Some(&mut mapped))
                .map_err(|e| GraphicsError::Readback(format!("readback Map failed: {:?}", e)))?;
            let bytes = std::slice::from_raw_parts(mapped as *const u8, size).to_vec();
            self.readback.Unmap(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }));
            self.pixels = Some(bytes);
        }
        Ok(())
    }
}

/// 每帧复用的命令分配器和列表
struct FrameObjects {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
}

impl FrameObjects {
    fn new(ctx: &DxContext) -> Result<Self> {
        unsafe {
            let allocator: ID3D12CommandAllocator = ctx
                .device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(|e| GraphicsError::DeviceCreation(format!("CreateCommandAllocator failed: {:?}", e)))?;
            let list: ID3D12GraphicsCommandList = ctx
                .device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
                .map_err(|e| GraphicsError::DeviceCreation(format!("CreateCommandList failed: {:?}", e)))?;
            list.Close()
                .map_err(|e| GraphicsError::DeviceCreation(format!("Close failed: {:?}", e)))?;
            Ok(Self { allocator, list })
        }
    }
}

/// DX12 渲染设备
pub struct Dx12Device {
    config: RenderConfig,
    tracker: FrameTracker,
    ledger: HandleLedger,
    ctx: Option<Rc<DxContext>>,
    factory: Option<Rc<Dx12Factory>>,
    frame_objects: Option<FrameObjects>,
    target: Option<RenderTarget>,
    last_stats: FrameStats,
}

impl Dx12Device {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            config: config.clone(),
            tracker: FrameTracker::new(),
            ledger: HandleLedger::new(),
            ctx: None,
            factory: None,
            frame_objects: None,
            target: None,
            last_stats: FrameStats::default(),
        }
    }

    fn live(&self) -> Option<&Rc<DxContext>> {
        if self.tracker.is_initialized() {
            self.ctx.as_ref()
        } else {
            None
        }
    }

    fn ensure_target(&mut self, ctx: &DxContext, width: u32, height: u32) -> Result<()> {
        if !self.target.as_ref().is_some_and(|t| t.width == width && t.height == height) {
            self.target = Some(RenderTarget::new(ctx, width, height)?);
        }
        Ok(())
    }

    /// 重置命令列表并开始录制
    fn open_frame(&mut self, ctx: &DxContext) -> Result<FrameRecording> {
        let (width, height, clear) = {
            let state = ctx.state.borrow();
            (state.frame_width, state.frame_height, state.clear_color)
        };
        self.ensure_target(ctx, width, height)?;
        let (Some(target), Some(objects)) = (&self.target, &self.frame_objects) else {
            return Err(GraphicsError::NotInitialized.into());
        };
        let rtv = target.rtv_heap.cpu_handle(0);
        unsafe {
            objects
                .allocator
                .Reset()
                .map_err(|e| GraphicsError::CommandExecution(format!("allocator Reset failed: {:?}", e)))?;
            objects
                .list
                .Reset(&objects.allocator, None)
                .map_err(|e| GraphicsError::CommandExecution(format!("list Reset failed: {:?}", e)))?;
            let list = &objects.list;
            list.ResourceBarrier(&[transition(
                &target.texture,
                D3D12_RESOURCE_STATE_COPY_SOURCE,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            )]);
            list.OMSetRenderTargets(1, Some(&rtv), false, None);
            list.ClearRenderTargetView(rtv, clear.as_ptr(), None);
            list.SetGraphicsRootSignature(&ctx.root_signature);
            list.SetDescriptorHeaps(&[Some(ctx.srv_heap.heap().clone()), Some(ctx.sampler_heap.heap().clone())]);
        }
        Ok(FrameRecording {
            list: objects.list.clone(),
            rtv,
            keep_alive: Vec::new(),
        })
    }

    /// 转回目标状态、复制到回读缓冲区、执行并等待
    fn submit_frame(&mut self, ctx: &DxContext) -> Result<()> {
        let frame = ctx.frame.borrow_mut().take().ok_or(GraphicsError::NotInitialized)?;
        let target = self.target.as_mut().ok_or(GraphicsError::NotInitialized)?;
        unsafe {
            frame.list.ResourceBarrier(&[transition(
                &target.texture,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                D3D12_RESOURCE_STATE_COPY_SOURCE,
            )]);
            target.record_copy(&frame.list);
            frame
                .list
                .Close()
                .map_err(|e| GraphicsError::CommandExecution(format!("list Close failed: {:?}", e)))?;
        }
        ctx.execute_and_wait(&frame.list)?;
        debug!(retained = frame.keep_alive.len(), "Frame completed");
        drop(frame);
        ctx.collect_retired();
        target.capture()
    }

    fn release_native(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        if let Some(frame) = ctx.frame.borrow_mut().take() {
            unsafe {
                let _ = frame.list.Close();
            }
        }
        ctx.wait_idle();
        ctx.state.borrow_mut().end();
        ctx.collect_retired();
        self.last_stats = ctx.state.borrow().stats;
        self.target = None;
        self.frame_objects = None;
        self.factory = None;
        info!(remaining = Rc::strong_count(&ctx) - 1, "DX12 device disposed");
    }
}

impl RenderDevice for Dx12Device {
    fn initialize(&mut self) -> Result<()> {
        if !self.tracker.needs_initialize()? {
            return Ok(());
        }
        let ctx = Rc::new(DxContext::new(&self.config, self.ledger.clone())?);
        let (width, height) = {
            let state = ctx.state.borrow();
            (state.frame_width, state.frame_height)
        };
        self.ensure_target(&ctx, width, height)?;
        self.frame_objects = Some(FrameObjects::new(&ctx)?);
        self.factory = Some(Rc::new(Dx12Factory { ctx: ctx.clone() }));
        self.ctx = Some(ctx);
        self.tracker.mark_initialized();
        info!(width, height, "DX12 device initialized");
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
        Backend::Dx12
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
        match self.open_frame(&ctx) {
            Ok(frame) => {
                *ctx.frame.borrow_mut() = Some(frame);
                ctx.state.borrow_mut().begin();
                Ok(())
            }
            Err(e) => {
                self.tracker.abort_frame();
                Err(e)
            }
        }
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
        let Some(ctx) = self.live() else {
            return;
        };
        let color = [r, g, b, a];
        ctx.state.borrow_mut().clear_color = color;
        if let Some(frame) = ctx.frame.borrow().as_ref() {
            unsafe { frame.list.ClearRenderTargetView(frame.rtv, color.as_ptr(), None) };
        }
    }

    fn clear_depth(&mut self) {}

    fn resource_factory(&self) -> Option<Rc<dyn ResourceFactory>> {
        if !self.tracker.is_initialized() {
            return None;
        }
        self.factory.clone().map(|f| f as Rc<dyn ResourceFactory>)
    }

    // D3D12 光栅化只有一像素宽的线
    fn max_line_width(&self) -> f32 {
        1.0
    }

    fn max_texture_size(&self) -> u32 {
        if self.ctx.is_some() {
            D3D12_REQ_TEXTURE2D_U_OR_V_DIMENSION
        } else {
            0
        }
    }

    fn renderer_info(&self) -> String {
        self.ctx
            .as_ref()
            .map_or_else(|| "Direct3D 12 (not initialized)".to_string(), |ctx| ctx.renderer_info.clone())
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

impl Drop for Dx12Device {
    fn drop(&mut self) {
        self.dispose();
    }
}
