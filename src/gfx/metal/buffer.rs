//! Metal 顶点缓冲区
//!
//! 共享存储模式，CPU 直接写入。绘制立即编码进当前渲染编码器；
//! 已被本帧引用的存储在再次上传前换新，旧对象由命令缓冲区保留。

use std::cell::Cell;
use std::rc::Rc;

use metal::MTLResourceOptions;

use super::context::{primitive_type, MtlContext, UNIFORM_INDEX};
use crate::renderer::backend::DrawMode;
use crate::renderer::buffer::{Buffer, BufferDescriptor, UploadPlan};
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::shader::UniformBlock;
use crate::renderer::state::{check_draw, clamp_draw_range, SkipReason};
use crate::{engine_error, engine_warn};

struct VertexStorage {
    buffer: metal::Buffer,
    last_used: Cell<u64>,
    _tracked: Tracked,
}

impl VertexStorage {
    fn new(ctx: &MtlContext, floats: usize) -> Self {
        let buffer = ctx
            .device
            .new_buffer((floats.max(1) * 4) as u64, MTLResourceOptions::StorageModeShared);
        Self {
            buffer,
            last_used: Cell::new(0),
            _tracked: Tracked::new(&ctx.ledger, HandleKind::Buffer),
        }
    }

    fn write(&self, data: &[f32]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let capacity = self.buffer.length() as usize;
        let len = bytes.len().min(capacity);
        // 共享存储的 contents() 在缓冲区生命周期内有效
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.buffer.contents() as *mut u8, len);
        }
    }
}

/// Metal 顶点缓冲区
pub struct MetalBuffer {
    ctx: Rc<MtlContext>,
    descriptor: BufferDescriptor,
    storage: Option<VertexStorage>,
    capacity: usize,
    vertex_count: u32,
}

impl MetalBuffer {
    pub fn new(ctx: &Rc<MtlContext>, descriptor: &BufferDescriptor) -> Self {
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

impl Buffer for MetalBuffer {
    fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, data: &[f32], offset: usize, count: usize) {
        let Some(storage) = &self.storage else {
            engine_warn!("Upload to a disposed Metal buffer ignored");
            return;
        };
        let in_use = self.ctx.state.borrow().used_this_frame(storage.last_used.get());
        let plan = UploadPlan::new(data.len(), offset, count, self.capacity, in_use);
        if plan.reallocate {
            self.storage = Some(VertexStorage::new(&self.ctx, plan.capacity));
            self.capacity = plan.capacity;
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
        let frame = ctx.frame.borrow();
        let checked = check_draw(
            ctx.state.borrow().in_frame && frame.is_some(),
            program.as_ref().map(|p| p.needs_texture),
            texture.is_some(),
            count,
        );
        let (program, frame) = match (checked, program, frame.as_ref()) {
            (Ok(()), Some(program), Some(frame)) => (program, frame),
            (Err(reason), _, _) => return ctx.state.borrow_mut().record_skip(reason),
            _ => return ctx.state.borrow_mut().record_skip(SkipReason::NoShader),
        };

        let blend = ctx.state.borrow().blend;
        let pipeline = match ctx.pipeline(&program, &self.descriptor, blend) {
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
        let encoder = &frame.encoder;

        // 1. 管线和固定功能状态
        encoder.set_render_pipeline_state(&pipeline);
        encoder.set_viewport(metal::MTLViewport {
            originX: viewport.x as f64,
            originY: viewport.y as f64,
            width: viewport.width as f64,
            height: viewport.height as f64,
            znear: 0.0,
            zfar: 1.0,
        });
        encoder.set_scissor_rect(metal::MTLScissorRect {
            x: scissor.x as u64,
            y: scissor.y as u64,
            width: scissor.width as u64,
            height: scissor.height as u64,
        });

        // 2. uniform 块按值拷贝进编码器
        let bytes = uniforms.as_bytes();
        encoder.set_vertex_bytes(UNIFORM_INDEX, UniformBlock::SIZE as u64, bytes.as_ptr() as *const _);
        encoder.set_fragment_bytes(UNIFORM_INDEX, UniformBlock::SIZE as u64, bytes.as_ptr() as *const _);

        // 3. 纹理
        if program.needs_texture {
            if let Some(texture) = &texture {
                encoder.set_fragment_texture(0, Some(&texture.texture));
                encoder.set_fragment_sampler_state(0, Some(&texture.sampler));
                texture.last_used.set(serial);
            }
        }

        // 4. 顶点并绘制
        encoder.set_vertex_buffer(0, Some(&storage.buffer), 0);
        encoder.draw_primitives(primitive_type(mode), first as u64, count as u64);
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
