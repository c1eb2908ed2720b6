//! 渲染器模块
//!
//! 与具体图形 API 无关的渲染契约：设备、资源工厂、着色器、缓冲区、纹理，
//! 以及资源管理器、后端注册表、回读和文字渲染。
//!
//! # 架构设计
//!
//! - `RenderDevice` / `ResourceFactory`：每个后端实现一次，见 `gfx` 模块
//! - `ResourceManager`：按名称缓存资源，跨线程操作在每帧的单一时刻执行
//! - `BackendRegistry`：可用性探测、`Auto` 解析和设备创建
//! - 公共的状态机、同步和管线缓存放在这里，各后端共享

pub mod backend;
pub mod buffer;
pub mod device;
pub mod frame;
pub mod handle;
pub mod pipeline;
pub mod provider;
pub mod readback;
pub mod resource;
pub mod shader;
pub mod state;
pub mod sync;
pub mod text;
pub mod texture;

#[cfg(test)]
pub(crate) mod mock;

pub use backend::{Backend, BlendMode, DrawMode};
pub use buffer::{grow_capacity, Buffer, BufferDescriptor, SharedBuffer, VertexAttribute, VertexSemantic};
pub use device::{RenderDevice, ResourceFactory};
pub use frame::FrameState;
pub use handle::{Handle, HandleKind, HandleLedger};
pub use provider::{BackendProvider, BackendRegistry};
pub use readback::{channels_within, pack_argb, pack_color, unpack_argb};
pub use resource::{RenderThreadQueue, ResourceManager};
pub use shader::{Shader, ShaderSource, SharedShader, UniformValue};
pub use state::FrameStats;
pub use text::{TextRenderer, TextSettings};
pub use texture::{SharedTexture, Texture, TextureDescriptor, TextureFormat};
