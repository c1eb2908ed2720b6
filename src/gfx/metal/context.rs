//! Metal 上下文
//!
//! 设备、命令队列、共享绘制状态和管线缓存。Metal 对象自带引用计数，
//! 命令缓冲区会保留它引用的缓冲区和纹理，所以换新存储后旧对象自然活到提交完成。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use metal::{
    CommandBuffer, CommandQueue, Device, MTLBlendFactor, MTLBlendOperation, MTLClearColor, MTLLoadAction,
    MTLPixelFormat, MTLPrimitiveType, MTLStoreAction, MTLVertexFormat, MTLVertexStepFunction, RenderCommandEncoder,
    RenderPipelineDescriptor, RenderPipelineState, TextureRef, VertexDescriptor,
};
use tracing::{debug, info};

use super::shader::MtlProgram;
use super::texture::MtlImage;
use crate::core::config::RenderConfig;
use crate::core::error::{ChartRenderError, GraphicsError, Result};
use crate::renderer::backend::{BlendFactor, BlendMode, DrawMode};
use crate::renderer::buffer::BufferDescriptor;
use crate::renderer::handle::{HandleKind, HandleLedger, Tracked};
use crate::renderer::pipeline::{LayoutKey, PipelineCache, PipelineKey, TopologyKey};
use crate::renderer::state::DrawState;
use crate::renderer::sync::FenceManager;

/// 离屏颜色目标格式
pub const TARGET_FORMAT: MTLPixelFormat = MTLPixelFormat::RGBA8Unorm;

/// macOS GPU 家族 2 起的二维纹理上限
pub const MAX_TEXTURE_SIZE: u32 = 16384;

/// uniform 块所在的 buffer 索引
pub const UNIFORM_INDEX: u64 = 1;

/// 当前绑定，弱引用
#[derive(Default)]
pub struct Bindings {
    pub program: Weak<MtlProgram>,
    pub texture: Weak<MtlImage>,
}

/// 帧内打开的命令缓冲区和渲染编码器
pub struct FrameEncoder {
    pub command_buffer: CommandBuffer,
    pub encoder: RenderCommandEncoder,
}

/// Metal 共享上下文
pub struct MtlContext {
    pub device: Device,
    pub queue: CommandQueue,
    pub renderer_info: String,
    pub ledger: HandleLedger,
    pub state: RefCell<DrawState>,
    pub bindings: RefCell<Bindings>,
    pub frame: RefCell<Option<FrameEncoder>>,
    pipelines: RefCell<PipelineCache<RenderPipelineState>>,
    pub fences: FenceManager,
    next_program_id: Cell<u64>,
    _tracked: Vec<Tracked>,
}

impl MtlContext {
    /// 创建上下文
    ///
    /// # 参数
    ///
    /// * `config` - 初始帧尺寸和清屏颜色
    /// * `ledger` - 设备的句柄账本
    pub fn new(config: &RenderConfig, ledger: HandleLedger) -> Result<Self> {
        info!("Initializing Metal context");

        let device = Device::system_default()
            .ok_or_else(|| GraphicsError::DeviceCreation("no Metal device available".to_string()))?;
        info!(device_name = device.name(), low_power = device.is_low_power(), "Using device");
        let queue = device.new_command_queue();
        let renderer_info = format!("{} (Metal)", device.name());

        let tracked = vec![
            Tracked::new(&ledger, HandleKind::Device),
            Tracked::new(&ledger, HandleKind::Queue),
        ];

        Ok(Self {
            device,
            queue,
            renderer_info,
            ledger,
            state: RefCell::new(DrawState::new(config.width, config.height, config.clear_color)),
            bindings: RefCell::new(Bindings::default()),
            frame: RefCell::new(None),
            pipelines: RefCell::new(PipelineCache::new()),
            fences: FenceManager::new(),
            next_program_id: Cell::new(1),
            _tracked: tracked,
        })
    }

    pub fn next_program_id(&self) -> u64 {
        let id = self.next_program_id.get();
        self.next_program_id.set(id + 1);
        id
    }

    /// 在命令缓冲区上开始一个渲染通道，先用 `clear` 清除目标
    pub fn open_pass(&self, command_buffer: &metal::CommandBufferRef, target: &TextureRef, clear: [f32; 4]) -> RenderCommandEncoder {
        let descriptor = metal::RenderPassDescriptor::new();
        if let Some(attachment) = descriptor.color_attachments().object_at(0) {
            attachment.set_texture(Some(target));
            attachment.set_load_action(MTLLoadAction::Clear);
            attachment.set_clear_color(MTLClearColor::new(
                clear[0] as f64,
                clear[1] as f64,
                clear[2] as f64,
                clear[3] as f64,
            ));
            attachment.set_store_action(MTLStoreAction::Store);
        }
        command_buffer.new_render_command_encoder(descriptor).to_owned()
    }

    /// 取得（必要时创建）管线；图元类型在绘制时指定
    pub fn pipeline(&self, program: &MtlProgram, layout: &BufferDescriptor, blend: BlendMode) -> Result<RenderPipelineState> {
        let key = PipelineKey {
            shader_id: program.id,
            layout: LayoutKey::from(layout),
            topology: TopologyKey::Dynamic,
            blend,
        };
        let mut cache = self.pipelines.borrow_mut();
        let pipeline = cache.get_or_try_insert(key, |_| {
            let pipeline = self.build_pipeline(program, layout, blend)?;
            debug!(shader = program.id, ?blend, "Created Metal pipeline");
            Ok::<_, ChartRenderError>(pipeline)
        })?;
        Ok(pipeline.clone())
    }

    fn build_pipeline(&self, program: &MtlProgram, layout: &BufferDescriptor, blend: BlendMode) -> Result<RenderPipelineState> {
        let vertex_descriptor = VertexDescriptor::new();
        for (index, attr) in layout.attributes.iter().enumerate() {
            if let Some(slot) = vertex_descriptor.attributes().object_at(index as u64) {
                slot.set_format(vertex_format(attr.components));
                slot.set_offset(attr.byte_offset() as u64);
                slot.set_buffer_index(0);
            }
        }
        if let Some(buffer_layout) = vertex_descriptor.layouts().object_at(0) {
            buffer_layout.set_stride(layout.stride_bytes() as u64);
            buffer_layout.set_step_rate(1);
            buffer_layout.set_step_function(MTLVertexStepFunction::PerVertex);
        }

        let descriptor = RenderPipelineDescriptor::new();
        descriptor.set_vertex_function(Some(&program.vertex));
        descriptor.set_fragment_function(Some(&program.fragment));
        descriptor.set_vertex_descriptor(Some(vertex_descriptor));
        let attachment = descriptor
            .color_attachments()
            .object_at(0)
            .ok_or_else(|| GraphicsError::ResourceCreation("missing color attachment descriptor".to_string()))?;
        attachment.set_pixel_format(TARGET_FORMAT);
        match blend.factors() {
            Some(f) => {
                attachment.set_blending_enabled(true);
                attachment.set_rgb_blend_operation(MTLBlendOperation::Add);
                attachment.set_alpha_blend_operation(MTLBlendOperation::Add);
                attachment.set_source_rgb_blend_factor(blend_factor(f.src_color));
                attachment.set_destination_rgb_blend_factor(blend_factor(f.dst_color));
                attachment.set_source_alpha_blend_factor(blend_factor(f.src_alpha));
                attachment.set_destination_alpha_blend_factor(blend_factor(f.dst_alpha));
            }
            None => attachment.set_blending_enabled(false),
        }

        self.device
            .new_render_pipeline_state(&descriptor)
            .map_err(|e| GraphicsError::ResourceCreation(format!("newRenderPipelineState failed: {}", e)).into())
    }

    /// 着色器释放时移除它的全部管线
    pub fn remove_program_pipelines(&self, program_id: u64) {
        if let Ok(mut cache) = self.pipelines.try_borrow_mut() {
            cache.remove_shader(program_id);
        }
    }

    pub fn clear_pipelines(&self) {
        let removed = self.pipelines.borrow_mut().clear();
        if !removed.is_empty() {
            debug!("Dropped {} cached Metal pipelines", removed.len());
        }
    }

    /// 提交一个空命令缓冲区并等待，队列按顺序执行，所以之前的工作也已完成
    pub fn wait_idle(&self) {
        objc::rc::autoreleasepool(|| {
            let command_buffer = self.queue.new_command_buffer();
            command_buffer.commit();
            command_buffer.wait_until_completed();
        });
    }
}

pub fn vertex_format(components: u32) -> MTLVertexFormat {
    match components {
        1 => MTLVertexFormat::Float,
        2 => MTLVertexFormat::Float2,
        3 => MTLVertexFormat::Float3,
        _ => MTLVertexFormat::Float4,
    }
}

pub fn primitive_type(mode: DrawMode) -> MTLPrimitiveType {
    match mode {
        DrawMode::Points => MTLPrimitiveType::Point,
        DrawMode::Lines => MTLPrimitiveType::Line,
        DrawMode::LineStrip => MTLPrimitiveType::LineStrip,
        DrawMode::Triangles => MTLPrimitiveType::Triangle,
        DrawMode::TriangleStrip => MTLPrimitiveType::TriangleStrip,
    }
}

fn blend_factor(factor: BlendFactor) -> MTLBlendFactor {
    match factor {
        BlendFactor::Zero => MTLBlendFactor::Zero,
        BlendFactor::One => MTLBlendFactor::One,
        BlendFactor::SrcAlpha => MTLBlendFactor::SourceAlpha,
        BlendFactor::OneMinusSrcAlpha => MTLBlendFactor::OneMinusSourceAlpha,
        BlendFactor::DstColor => MTLBlendFactor::DestinationColor,
        BlendFactor::DstAlpha => MTLBlendFactor::DestinationAlpha,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tables() {
        assert!(matches!(vertex_format(4), MTLVertexFormat::Float4));
        assert!(matches!(primitive_type(DrawMode::TriangleStrip), MTLPrimitiveType::TriangleStrip));
        assert!(matches!(blend_factor(BlendFactor::OneMinusSrcAlpha), MTLBlendFactor::OneMinusSourceAlpha));
    }
}
