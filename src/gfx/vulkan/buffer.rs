//! Vulkan 顶点缓冲区
//!
//! 存储是常驻映射的主机可见内存，上传直接 memcpy。
//! 帧内已被绘制引用的存储再次上传时换新存储（见 `UploadPlan`）。

use std::cell::Cell;
use std::rc::Rc;

use ash::vk;

use super::context::{HostBuffer, VkContext};
use crate::core::error::Result;
use crate::engine_error;
use crate::renderer::backend::DrawMode;
use crate::renderer::buffer::{Buffer, BufferDescriptor, UploadPlan};
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::state::{check_draw, clamp_draw_range, SkipReason};

/// 一块顶点存储，drop 时退役
struct VertexStorage {
    ctx: Rc<VkContext>,
    host: Option<HostBuffer>,
    last_used: Cell<u64>,
    tracked: Option<Tracked>,
}

impl VertexStorage {
    fn new(ctx: &Rc<VkContext>, floats: usize) -> Result<Self> {
        let host = ctx.create_host_buffer(floats * 4, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        Ok(Self {
            ctx: ctx.clone(),
            host: Some(host),
            last_used: Cell::new(0),
            tracked: Some(Tracked::new(&ctx.ledger, HandleKind::Buffer)),
        })
    }

    fn buffer(&self) -> vk::Buffer {
        self.host.as_ref().map(|h| h.buffer).unwrap_or_default()
    }
}

impl Drop for VertexStorage {
    fn drop(&mut self) {
        let host = self.host.take();
        let tracked = self.tracked.take();
        self.ctx.retire(move |device| {
            if let Some(host) = host {
                host.destroy(device);
            }
            drop(tracked);
        });
    }
}

/// Vulkan 顶点缓冲区
pub struct VulkanBuffer {
    ctx: Rc<VkContext>,
    descriptor: BufferDescriptor,
    storage: Option<VertexStorage>,
    capacity: usize,
    vertex_count: u32,
    disposed: bool,
}

impl VulkanBuffer {
    pub fn new(ctx: &Rc<VkContext>, descriptor: &BufferDescriptor) -> Result<Self> {
        let capacity = descriptor.capacity_floats();
        let storage = VertexStorage::new(ctx, capacity)?;
        Ok(Self {
            ctx: ctx.clone(),
            descriptor: descriptor.clone(),
            storage: Some(storage),
            capacity,
            vertex_count: 0,
            disposed: false,
        })
    }

    fn in_use(&self) -> bool {
        let state = self.ctx.state.borrow();
        self.storage
            .as_ref()
            .is_some_and(|s| state.used_this_frame(s.last_used.get()))
    }
}

impl Buffer for VulkanBuffer {
    fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, data: &[f32], offset: usize, count: usize) {
        if self.disposed {
            tracing::warn!("Upload to a disposed Vulkan buffer ignored");
            return;
        }
        let plan = UploadPlan::new(data.len(), offset, count, self.capacity, self.in_use());
        if plan.reallocate {
            match VertexStorage::new(&self.ctx, plan.capacity) {
                // 旧存储在替换时退役
                Ok(storage) => self.storage = Some(storage),
                Err(e) => {
                    engine_error!("Vertex buffer reallocation failed: {}", e);
                    return;
                }
            }
            self.capacity = plan.capacity;
        }
        if let Some(host) = self.storage.as_ref().and_then(|s| s.host.as_ref()) {
            host.write(0, bytemuck::cast_slice(&data[plan.src_range()]));
        }
        self.vertex_count = (plan.floats / self.descriptor.floats_per_vertex.max(1) as usize) as u32;
    }

    // 顶点缓冲区在每次绘制时绑定
    fn bind(&mut self) {}

    fn unbind(&mut self) {}

    fn draw_range(&mut self, mode: DrawMode, first: u32, count: u32) {
        let ctx = self.ctx.clone();
        let Some(storage) = &self.storage else {
            ctx.state.borrow_mut().record_skip(SkipReason::Disposed);
            return;
        };
        let count = clamp_draw_range(first, count, self.vertex_count);

        let (cmd, program, texture) = {
            let bindings = ctx.bindings.borrow();
            (bindings.cmd, bindings.program.upgrade(), bindings.texture.upgrade())
        };
        let check = {
            let state = ctx.state.borrow();
            check_draw(
                state.in_frame && cmd.is_some(),
                program.as_ref().map(|p| p.needs_texture),
                texture.is_some(),
                count,
            )
        };
        let (Ok(()), Some(cmd), Some(program)) = (check, cmd, program) else {
            ctx.state.borrow_mut().record_skip(check.err().unwrap_or(SkipReason::NoFrame));
            return;
        };

        let blend = ctx.state.borrow().blend;
        let pipeline = match ctx.pipeline(&program, &self.descriptor, mode, blend) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                engine_error!("Skipping draw, pipeline creation failed: {}", e);
                ctx.state.borrow_mut().record_skip(SkipReason::NoShader);
                return;
            }
        };

        let state = ctx.state.borrow();
        let viewport = vk::Viewport {
            x: state.viewport.x as f32,
            y: state.viewport.y as f32,
            width: state.viewport.width.max(1) as f32,
            height: state.viewport.height.max(1) as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let clip = state.effective_scissor();
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: clip.x, y: clip.y },
            extent: vk::Extent2D { width: clip.width, height: clip.height },
        };
        let device = &ctx.device;
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_set_line_width(cmd, state.line_width);
            device.cmd_push_constants(
                cmd,
                ctx.pipeline_layout(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                program.uniforms.get().as_bytes(),
            );
            if program.needs_texture {
                if let Some(texture) = &texture {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        ctx.pipeline_layout(),
                        0,
                        &[texture.set],
                        &[],
                    );
                    texture.last_used.set(state.frame_serial);
                }
            }
            device.cmd_bind_vertex_buffers(cmd, 0, &[storage.buffer()], &[0]);
            device.cmd_draw(cmd, count, 1, first, 0);
        }
        storage.last_used.set(state.frame_serial);
        drop(state);
        ctx.state.borrow_mut().record_draw();
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
        if !self.disposed {
            self.disposed = true;
            self.storage = None;
            self.vertex_count = 0;
        }
    }

    fn is_initialized(&self) -> bool {
        !self.disposed
    }
}
