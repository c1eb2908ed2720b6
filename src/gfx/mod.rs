//! 图形后端模块
//!
//! `renderer` 中设备 / 资源契约的四份原生实现：
//! - OpenGL：通过 wgpu 的 GL 后端
//! - Vulkan：通过 ash，运行时加载系统或打包的 loader
//! - Metal：macOS 原生
//! - DirectX 12：Windows 原生
//!
//! 每个后端模块都导出一个 provider。Metal 和 DX12 的 provider 在所有平台上都能编译，
//! 只是在不支持的平台上报告不可用；原生实现按平台条件编译。

pub mod dx12;
pub mod glsl;
pub mod metal;
pub mod native;
pub mod opengl;
pub mod vulkan;

pub use dx12::Dx12Provider;
pub use metal::MetalProvider;
pub use opengl::OpenGlProvider;
pub use vulkan::VulkanProvider;
