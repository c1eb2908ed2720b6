//! OpenGL 顶点缓冲区
//!
//! 绘制只记录命令，帧结束时统一回放。`queue.write_buffer` 在提交时先于
//! 命令执行，所以本帧已被绘制引用的存储必须换新再写。

use std::cell::Cell;
use std::rc::Rc;

use super::context::{Command, DrawCommand, GlContext};
use crate::engine_warn;
use crate::renderer::backend::DrawMode;
use crate::renderer::buffer::{Buffer, BufferDescriptor, UploadPlan};
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::state::{check_draw, clamp_draw_range, SkipReason};

struct VertexStorage {
    buffer: Rc<wgpu::Buffer>,
    last_used: Cell<u64>,
    _tracked: Tracked,
}

impl VertexStorage {
    fn new(ctx: &GlContext, floats: usize) -> Self {
        let size = (floats.max(1) * 4) as u64;
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vertex buffer"),
            size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer: Rc::new(buffer),
            last_used: Cell::new(0),
            _tracked: Tracked::new(&ctx.ledger, HandleKind::Buffer),
        }
    }
}

/// OpenGL 顶点缓冲区
pub struct OpenGlBuffer {
    ctx: Rc<GlContext>,
    descriptor: BufferDescriptor,
    storage: Option<VertexStorage>,
    capacity: usize,
    vertex_count: u32,
}

impl OpenGlBuffer {
    pub fn new(ctx: &Rc<GlContext>, descriptor: &BufferDescriptor) -> Self {
        let capacity = descriptor.capacity_floats();
        Self {
            ctx: ctx.clone(),
            descriptor: descriptor.clone(),
            storage: Some(VertexStorage::new(ctx, capacity)),
            capacity,
            vertex_count: 0,
        }
    }
}

impl Buffer for OpenGlBuffer {
    fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, data: &[f32], offset: usize, count: usize) {
        let Some(storage) = &self.storage else {
            engine_warn!("Upload to a disposed OpenGL buffer ignored");
            return;
        };
        let in_use = self.ctx.state.borrow().used_this_frame(storage.last_used.get());
        let plan = UploadPlan::new(data.len(), offset, count, self.capacity, in_use);
        if plan.reallocate {
            self.storage = Some(VertexStorage::new(&self.ctx, plan.capacity));
            self.capacity = plan.capacity;
        }
        let bytes: &[u8] = bytemuck::cast_slice(&data[plan.src_range()]);
        if let (Some(storage), false) = (&self.storage, bytes.is_empty()) {
            self.ctx.queue.write_buffer(&storage.buffer, 0, bytes);
        }
        self.vertex_count = (plan.floats / self.descriptor.floats_per_vertex.max(1) as usize) as u32;
    }

    // 顶点缓冲区随绘制命令记录
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
        let checked = check_draw(
            ctx.state.borrow().in_frame,
            program.as_ref().map(|p| p.needs_texture),
            texture.is_some(),
            count,
        );
        let program = match (checked, program) {
            (Ok(()), Some(program)) => program,
            (Err(reason), _) => return ctx.state.borrow_mut().record_skip(reason),
            (Ok(()), None) => return ctx.state.borrow_mut().record_skip(SkipReason::NoShader),
        };

        let blend = ctx.state.borrow().blend;
        let pipeline = match ctx.pipeline(&program, &self.descriptor, mode, blend) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                crate::engine_error!("Skipping draw, pipeline creation failed: {}", e);
                return ctx.state.borrow_mut().record_skip(SkipReason::NoShader);
            }
        };

        let mut state = ctx.state.borrow_mut();
        let serial = state.frame_serial;
        let viewport = state.viewport.clamp_to(state.frame_width, state.frame_height);
        let scissor = state.effective_scissor();
        if viewport.width == 0 || viewport.height == 0 || scissor.width == 0 || scissor.height == 0 {
            return state.record_skip(SkipReason::Empty);
        }
        let texture = if program.needs_texture {
            texture.map(|t| {
                t.last_used.set(serial);
                t.bind_group.clone()
            })
        } else {
            None
        };
        let uniform_offset = ctx
            .recording
            .borrow_mut()
            .push_uniforms(&program.uniforms.get(), ctx.uniform_alignment);
        ctx.recording.borrow_mut().commands.push(Command::Draw(DrawCommand {
            pipeline,
            vertex: storage.buffer.clone(),
            texture,
            uniform_offset,
            viewport,
            scissor,
            first,
            count,
        }));
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
