//! OpenGL 后端
//!
//! 通过 wgpu 的 GL 后端（Linux 上是 EGL）离屏渲染。绘制先录制成命令列表，
//! 帧结束时回放，uniform 块用动态偏移共享一个缓冲区。

mod buffer;
mod context;
mod device;
mod provider;
mod shader;
pub mod shaders;
mod texture;

pub use device::{OpenGlDevice, OpenGlFactory};
pub use provider::OpenGlProvider;
