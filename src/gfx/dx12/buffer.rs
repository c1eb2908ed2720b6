//! DX12 顶点缓冲区
//!
//! 放在 UPLOAD 堆上并保持映射，CPU 直接写入。绘制时把资源克隆进帧的
//! keep-alive 列表；本帧已引用的存储再次上传前换新。

use std::cell::Cell;
use std::rc::Rc;

use windows::Win32::Graphics::Direct3D12::*;

use super::context::{buffer_desc, committed_resource, primitive_topology, DxContext, ROOT_CONSTANTS, ROOT_SAMPLER_TABLE, ROOT_SRV_TABLE};
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend::DrawMode;
use crate::renderer::buffer::{Buffer, BufferDescriptor, UploadPlan};
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::shader::UniformBlock;
use crate::renderer::state::{check_draw, clamp_draw_range, SkipReason};
use crate::{engine_error, engine_warn};

struct VertexStorage {
    resource: ID3D12Resource,
    mapped: *mut u8,
    size: usize,
    last_used: Cell<u64>,
    _tracked: Tracked,
}

impl VertexStorage {
    fn new(ctx: &DxContext, floats: usize) -> Result<Self> {
        let size = floats.max(1) * 4;
        let resource = committed_resource(
            &ctx.device,
            D3D12_HEAP_TYPE_UPLOAD,
            &buffer_desc(size as u64),
            D3D12_RESOURCE_STATE_GENERIC_READ,
        )?;
        let mut mapped = std::ptr::null_mut();
        unsafe { resource.Map(0, None, Some(&mut mapped)) }
            .map_err(|e| GraphicsError::ResourceCreation(format!("vertex buffer Map failed: {:?}", e)))?;
        Ok(Self {
            resource,
            mapped: mapped as *mut u8,
            size,
            last_used: Cell::new(0),
            _tracked: Tracked::new(&ctx.ledger, HandleKind::Buffer),
        })
    }

    fn write(&self, data: &[f32]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len = bytes.len().min(self.size);
        // UPLOAD 堆保持映射直到释放
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped, len) };
    }

    fn view(&self, stride: u32) -> D3D12_VERTEX_BUFFER_VIEW {
        D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: unsafe { self.resource.GetGPUVirtualAddress() },
            SizeInBytes: self.size as u32,
            StrideInBytes: stride,
        }
    }
}

impl Drop for VertexStorage {
    fn drop(&mut self) {
        unsafe { self.resource.Unmap(0, None) };
    }
}

/// DX12 顶点缓冲区
pub struct Dx12Buffer {
    ctx: Rc<DxContext>,
    descriptor: BufferDescriptor,
    storage: Option<VertexStorage>,
    capacity: usize,
    vertex_count: u32,
}

impl Dx12Buffer {
    pub fn new(ctx: &Rc<DxContext>, descriptor: &BufferDescriptor) -> Result<Self> {
        let capacity = descriptor.capacity_floats();
        Ok(Self {
            ctx: ctx.clone(),
            descriptor: descriptor.clone(),
            storage: Some(VertexStorage::new(ctx, capacity)?),
            capacity,
            vertex_count: 0,
        })
    }
}

impl Buffer for Dx12Buffer {
    fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, data: &[f32], offset: usize, count: usize) {
        let Some(storage) = &self.storage else {
            engine_warn!("Upload to a disposed DX12 buffer ignored");
            return;
        };
        let in_use = self.ctx.state.borrow().used_this_frame(storage.last_used.get());
        let plan = UploadPlan::new(data.len(), offset, count, self.capacity, in_use);
        if plan.reallocate {
            match VertexStorage::new(&self.ctx, plan.capacity) {
                Ok(storage) => {
                    self.storage = Some(storage);
                    self.capacity = plan.capacity;
                }
                Err(e) => {
                    engine_error!("Vertex buffer reallocation failed: {}", e);
                    return;
                }
            }
        }
        if let Some(storage) = &self.storage {
            storage.write(&data[plan.src_range()]);
        }
        self.vertex_count = (plan.floats / self.descriptor.floats_per_vertex.max(1) as usize) as u32;
    }

    // 顶点缓冲区在绘制时设置
    fn bind(&mut self) {}

    fn unbind(&mut self) {}

    fn draw_range(&mut self, mode: DrawMode, first: u32, count: u32) {
        let ctx = &self.ctx;
        let Some(storage) = &self.storage else {
            ctx.state.borrow_mut().record_skip(SkipReason::Disposed);
            return;
        };
        let count = clamp_draw_range(first, count, self.vertex_count);
        let (program, texture) = {
            let bindings = ctx.bindings.borrow();
            (bindings.program.upgrade(), bindings.texture.upgrade())
        };
        let mut frame = ctx.frame.borrow_mut();
        let checked = check_draw(
            ctx.state.borrow().in_frame && frame.is_some(),
            program.as_ref().map(|p| p.needs_texture),
            texture.is_some(),
            count,
        );
        let (program, frame) = match (checked, program, frame.as_mut()) {
            (Ok(()), Some(program), Some(frame)) => (program, frame),
            (Err(reason), _, _) => return ctx.state.borrow_mut().record_skip(reason),
            _ => return ctx.state.borrow_mut().record_skip(SkipReason::NoShader),
        };

        let blend = ctx.state.borrow().blend;
        let pipeline = match ctx.pipeline(&program, &self.descriptor, mode, blend) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                engine_error!("Skipping draw, pipeline creation failed: {}", e);
                return ctx.state.borrow_mut().record_skip(SkipReason::NoShader);
            }
        };

        let mut state = ctx.state.borrow_mut();
        let scissor = state.effective_scissor();
        let viewport = state.viewport;
        if viewport.width == 0 || viewport.height == 0 || scissor.width == 0 || scissor.height == 0 {
            return state.record_skip(SkipReason::Empty);
        }
        let serial = state.frame_serial;
        let uniforms = program.uniforms.get();
        let list = &frame.list;

        unsafe {
            // 1. 管线和固定功能状态
            list.SetPipelineState(&pipeline);
            list.RSSetViewports(&[D3D12_VIEWPORT {
                TopLeftX: viewport.x as f32,
                TopLeftY: viewport.y as f32,
                Width: viewport.width as f32,
                Height: viewport.height as f32,
                MinDepth: 0.0,
                MaxDepth: 1.0,
            }]);
            list.RSSetScissorRects(&[windows::Win32::Foundation::RECT {
                left: scissor.x,
                top: scissor.y,
                right: scissor.x + scissor.width as i32,
                bottom: scissor.y + scissor.height as i32,
            }]);

            // 2. uniform 块作为 root constants
            let words = uniforms.as_words();
            list.SetGraphicsRoot32BitConstants(ROOT_CONSTANTS, (UniformBlock::SIZE / 4) as u32, words.as_ptr() as *const _, 0);

            // 3. 纹理
            if program.needs_texture {
                if let Some(texture) = &texture {
                    list.SetGraphicsRootDescriptorTable(ROOT_SRV_TABLE, ctx.srv_heap.gpu_handle(texture.slot));
                    list.SetGraphicsRootDescriptorTable(ROOT_SAMPLER_TABLE, ctx.sampler_heap.gpu_handle(texture.slot));
                    texture.last_used.set(serial);
                    frame.keep_alive.push(texture.resource.clone());
                }
            }

            // 4. 顶点并绘制
            list.IASetPrimitiveTopology(primitive_topology(mode));
            list.IASetVertexBuffers(0, Some(&[storage.view(self.descriptor.stride_bytes())]));
            list.DrawInstanced(count, 1, first, 0);
        }
        frame.keep_alive.push(storage.resource.clone());
        storage.last_used.set(serial);
        state.record_draw();
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
        if self.storage.take().is_some() {
            self.vertex_count = 0;
        }
    }

    fn is_initialized(&self) -> bool {
        self.storage.is_some()
    }
}
