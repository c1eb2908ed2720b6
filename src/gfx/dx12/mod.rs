//! DirectX 12 后端
//!
//! 仅在 Windows 上编译设备实现；其他平台只保留提供者，报告不可用。
//! uniform 块作为根常量写入，纹理的 SRV 和采样器共用同一个描述符槽位。

#[cfg(target_os = "windows")]
mod buffer;
#[cfg(target_os = "windows")]
mod context;
#[cfg(target_os = "windows")]
mod descriptor;
#[cfg(target_os = "windows")]
mod device;
mod provider;
#[cfg(target_os = "windows")]
mod shader;
pub mod shaders;
#[cfg(target_os = "windows")]
mod texture;

#[cfg(target_os = "windows")]
pub use device::{Dx12Device, Dx12Factory};
pub use provider::Dx12Provider;
