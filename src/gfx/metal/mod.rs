//! Metal 后端
//!
//! 仅在 macOS 上编译设备实现；其他平台只保留提供者，报告不可用。
//! 绘制直接编码进帧的渲染编码器，uniform 块通过 `set_vertex_bytes` 传递。

#[cfg(target_os = "macos")]
mod buffer;
#[cfg(target_os = "macos")]
mod context;
#[cfg(target_os = "macos")]
mod device;
mod provider;
#[cfg(target_os = "macos")]
mod shader;
pub mod shaders;
#[cfg(target_os = "macos")]
mod texture;

#[cfg(target_os = "macos")]
pub use device::{MetalDevice, MetalFactory};
pub use provider::MetalProvider;
