//! Vulkan 后端
//!
//! 基于 `ash` 的离屏实现：
//! - `loader`：系统 / 打包 loader 的探测
//! - `context`：实例、逻辑设备和共享对象，资源通过 `Rc` 共享
//! - `device`：帧生命周期和回读
//! - `shader` / `buffer` / `texture` / `pipeline`：资源和管线
//! - `shaders`：内置着色器注册表（GLSL 450，由 naga 编译）

mod buffer;
mod context;
mod device;
mod loader;
mod pipeline;
mod provider;
mod shader;
pub mod shaders;
mod texture;

pub use device::{VulkanDevice, VulkanFactory};
pub use loader::library_file;
pub use provider::VulkanProvider;
