//! OpenGL 上下文
//!
//! 通过 wgpu 的 GL 后端驱动 OpenGL / GLES。wgpu 的句柄自带引用计数，
//! 帧内录制的命令持有它们的 `Rc`，所以换新存储后旧对象会活到帧提交之后。
//!
//! # 初始化流程
//!
//! 1. 创建只启用 GL 的 wgpu 实例
//! 2. 请求适配器（不需要表面）
//! 3. 请求设备和队列，安装未捕获错误回调
//! 4. 创建 uniform / 纹理绑定组布局和两种管线布局

use std::cell::{Cell, RefCell};
use std::num::NonZeroU64;
use std::rc::{Rc, Weak};

use tracing::{debug, info};

use super::shader::GlProgram;
use super::texture::GlImage;
use crate::core::config::RenderConfig;
use crate::core::error::{ChartRenderError, GraphicsError, Result};
use crate::engine_error;
use crate::renderer::backend::{BlendFactor, BlendMode, DrawMode};
use crate::renderer::buffer::BufferDescriptor;
use crate::renderer::handle::{HandleKind, HandleLedger, Tracked};
use crate::renderer::pipeline::{LayoutKey, PipelineCache, PipelineKey, TopologyKey};
use crate::renderer::shader::UniformBlock;
use crate::renderer::state::{DrawState, Rect};
use crate::renderer::sync::FenceManager;

/// 离屏颜色目标格式
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// 只启用 GL 后端的实例
pub fn gl_instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::GL,
        dx12_shader_compiler: Default::default(),
        flags: wgpu::InstanceFlags::default(),
        gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
    })
}

/// 请求一个 GL 适配器
pub fn request_adapter(instance: &wgpu::Instance) -> Option<wgpu::Adapter> {
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
}

/// 在错误作用域里执行 wgpu 调用，把验证错误转成 `Result`
pub fn scoped<T>(device: &wgpu::Device, create: impl FnOnce() -> T) -> std::result::Result<T, String> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(value),
        Some(e) => Err(e.to_string()),
    }
}

/// 录制中的一条命令
pub enum Command {
    /// 以新的清除操作开始一个渲染通道
    Clear([f32; 4]),
    Draw(DrawCommand),
}

/// 一次绘制需要的全部状态
pub struct DrawCommand {
    pub pipeline: Rc<wgpu::RenderPipeline>,
    pub vertex: Rc<wgpu::Buffer>,
    pub texture: Option<Rc<wgpu::BindGroup>>,
    /// uniform 数据在本帧 uniform 区里的偏移
    pub uniform_offset: u32,
    pub viewport: Rect,
    pub scissor: Rect,
    pub first: u32,
    pub count: u32,
}

/// 本帧的录制内容
#[derive(Default)]
pub struct Recording {
    pub commands: Vec<Command>,
    /// 按对齐拼接的 uniform 块
    pub uniforms: Vec<u8>,
}

impl Recording {
    /// 追加一份 uniform 块，返回它的偏移
    pub fn push_uniforms(&mut self, block: &UniformBlock, alignment: usize) -> u32 {
        let offset = crate::renderer::readback::align_up(self.uniforms.len(), alignment);
        self.uniforms.resize(offset, 0);
        self.uniforms.extend_from_slice(block.as_bytes());
        offset as u32
    }
}

/// 当前绑定，弱引用
#[derive(Default)]
pub struct Bindings {
    pub program: Weak<GlProgram>,
    pub texture: Weak<GlImage>,
}

/// OpenGL 共享上下文
pub struct GlContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub renderer_info: String,
    pub max_texture_size: u32,
    pub uniform_alignment: usize,
    pub ledger: HandleLedger,
    pub uniform_layout: wgpu::BindGroupLayout,
    pub texture_layout: wgpu::BindGroupLayout,
    plain_layout: wgpu::PipelineLayout,
    textured_layout: wgpu::PipelineLayout,
    pub state: RefCell<DrawState>,
    pub bindings: RefCell<Bindings>,
    pub recording: RefCell<Recording>,
    pipelines: RefCell<PipelineCache<Rc<wgpu::RenderPipeline>>>,
    pub fences: FenceManager,
    next_program_id: Cell<u64>,
    _tracked: Vec<Tracked>,
}

impl GlContext {
    /// 创建上下文
    ///
    /// # 参数
    ///
    /// * `config` - 初始帧尺寸和清屏颜色
    /// * `ledger` - 设备的句柄账本
    pub fn new(config: &RenderConfig, ledger: HandleLedger) -> Result<Self> {
        info!("Initializing OpenGL context");

        // 1-2. 实例和适配器
        let instance = gl_instance();
        let adapter = request_adapter(&instance)
            .ok_or_else(|| GraphicsError::DeviceCreation("no OpenGL adapter available".to_string()))?;
        let adapter_info = adapter.get_info();
        info!(
            device_name = adapter_info.name.as_str(),
            driver = adapter_info.driver_info.as_str(),
            "Using device"
        );

        // 3. 设备和队列
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("chart_render GL device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_webgl2_defaults().using_resolution(adapter.limits()),
            },
            None,
        ))
        .map_err(|e| GraphicsError::DeviceCreation(format!("request_device failed: {}", e)))?;
        device.on_uncaptured_error(Box::new(|e| {
            engine_error!("Uncaptured wgpu error: {}", e);
        }));

        // 4. 布局
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniforms"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(UniformBlock::SIZE as u64),
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let plain_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("plain"),
            bind_group_layouts: &[&uniform_layout],
            push_constant_ranges: &[],
        });
        let textured_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("textured"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let limits = device.limits();
        let renderer_info = format!("{} ({:?}, {})", adapter_info.name, adapter_info.backend, adapter_info.driver_info);
        debug!(
            max_texture = limits.max_texture_dimension_2d,
            uniform_alignment = limits.min_uniform_buffer_offset_alignment,
            "OpenGL limits"
        );

        let tracked = vec![
            Tracked::new(&ledger, HandleKind::Device),
            Tracked::new(&ledger, HandleKind::Queue),
        ];

        Ok(Self {
            device,
            queue,
            renderer_info,
            max_texture_size: limits.max_texture_dimension_2d,
            uniform_alignment: limits.min_uniform_buffer_offset_alignment.max(16) as usize,
            ledger,
            uniform_layout,
            texture_layout,
            plain_layout,
            textured_layout,
            state: RefCell::new(DrawState::new(config.width, config.height, config.clear_color)),
            bindings: RefCell::new(Bindings::default()),
            recording: RefCell::new(Recording::default()),
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

    /// 取得（必要时创建）管线
    pub fn pipeline(
        &self,
        program: &GlProgram,
        layout: &BufferDescriptor,
        mode: DrawMode,
        blend: BlendMode,
    ) -> Result<Rc<wgpu::RenderPipeline>> {
        let key = PipelineKey {
            shader_id: program.id,
            layout: LayoutKey::from(layout),
            topology: TopologyKey::Mode(mode),
            blend,
        };
        let mut cache = self.pipelines.borrow_mut();
        let pipeline = cache.get_or_try_insert(key, |_| {
            let pipeline = self.build_pipeline(program, layout, mode, blend)?;
            debug!(shader = program.id, ?mode, ?blend, "Created OpenGL pipeline");
            Ok::<_, ChartRenderError>(Rc::new(pipeline))
        })?;
        Ok(pipeline.clone())
    }

    fn build_pipeline(
        &self,
        program: &GlProgram,
        layout: &BufferDescriptor,
        mode: DrawMode,
        blend: BlendMode,
    ) -> Result<wgpu::RenderPipeline> {
        let attributes: Vec<wgpu::VertexAttribute> = layout
            .attributes
            .iter()
            .enumerate()
            .map(|(location, attr)| wgpu::VertexAttribute {
                format: vertex_format(attr.components),
                offset: attr.byte_offset() as u64,
                shader_location: location as u32,
            })
            .collect();
        let pipeline_layout = if program.needs_texture { &self.textured_layout } else { &self.plain_layout };

        scoped(&self.device, || {
            self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("chart_render pipeline"),
                layout: Some(pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.vertex,
                    entry_point: "main",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: layout.stride_bytes() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.fragment,
                    entry_point: "main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: blend_state(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: topology(mode),
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
        })
        .map_err(|e| GraphicsError::ResourceCreation(format!("create_render_pipeline failed: {}", e)).into())
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
            debug!("Dropped {} cached OpenGL pipelines", removed.len());
        }
    }

    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

pub fn vertex_format(components: u32) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

pub fn topology(mode: DrawMode) -> wgpu::PrimitiveTopology {
    match mode {
        DrawMode::Points => wgpu::PrimitiveTopology::PointList,
        DrawMode::Lines => wgpu::PrimitiveTopology::LineList,
        DrawMode::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        DrawMode::Triangles => wgpu::PrimitiveTopology::TriangleList,
        DrawMode::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
    }
}

pub fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    mode.factors().map(|f| wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: blend_factor(f.src_color),
            dst_factor: blend_factor(f.dst_color),
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: blend_factor(f.src_alpha),
            dst_factor: blend_factor(f.dst_alpha),
            operation: wgpu::BlendOperation::Add,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_offsets_are_aligned() {
        let mut recording = Recording::default();
        let block = UniformBlock::default();
        assert_eq!(recording.push_uniforms(&block, 256), 0);
        assert_eq!(recording.push_uniforms(&block, 256), 256);
        assert_eq!(recording.uniforms.len(), 256 + UniformBlock::SIZE);
    }

    #[test]
    fn test_blend_states() {
        assert!(blend_state(BlendMode::None).is_none());
        let alpha = blend_state(BlendMode::Alpha).unwrap();
        assert_eq!(alpha.color.src_factor, wgpu::BlendFactor::SrcAlpha);
        assert_eq!(alpha.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
    }

    #[test]
    fn test_topologies() {
        assert_eq!(topology(DrawMode::LineStrip), wgpu::PrimitiveTopology::LineStrip);
        assert_eq!(vertex_format(2), wgpu::VertexFormat::Float32x2);
    }
}
