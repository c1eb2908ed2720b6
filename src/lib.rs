//! ChartRender - 多后端 2D 渲染层
//!
//! 为金融图表控件提供统一的设备 / 资源 / 着色器 / 缓冲区 / 纹理接口，
//! 在 OpenGL、Vulkan、Metal 和 DirectX 12 上各实现一次。每个后端都渲染到
//! 离屏目标，帧结束后可以把像素读回为 ARGB 数组。
//!
//! # 模块结构
//!
//! - `core`: 日志、配置、错误处理
//! - `renderer`: 与后端无关的渲染契约、资源管理器、后端注册表、回读和文字渲染
//! - `gfx`: 四个后端的原生实现
//!
//! # 使用示例
//!
//! ```no_run
//! use chart_render::core::RenderConfig;
//! use chart_render::renderer::{Backend, BackendRegistry, DrawMode, BufferDescriptor};
//!
//! # fn main() -> chart_render::core::Result<()> {
//! let registry = BackendRegistry::with_default_providers();
//! let config = RenderConfig::default();
//! let mut device = registry.create_device(Backend::Auto, &config)?;
//! device.initialize()?;
//!
//! let mut manager = registry.create_resource_manager(device.backend_type())?;
//! manager.initialize(device.as_ref())?;
//!
//! device.begin_frame()?;
//! let buffer = manager.get_or_create_buffer("triangle", &BufferDescriptor::default())?;
//! if let Some(shader) = manager.get_shader("default") {
//!     shader.borrow_mut().bind();
//! }
//! buffer.borrow_mut().upload(&[0.0; 18], 0, 18);
//! buffer.borrow_mut().draw(DrawMode::Triangles);
//! device.end_frame()?;
//!
//! let (width, height) = device.frame_size();
//! let mut pixels = vec![0u32; (width * height) as usize];
//! device.read_frame_pixels(&mut pixels)?;
//!
//! manager.dispose();
//! device.dispose();
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;

pub use crate::core::{ChartRenderError, Config, RenderConfig, Result};
pub use crate::renderer::{Backend, BackendRegistry, RenderDevice, ResourceManager};
