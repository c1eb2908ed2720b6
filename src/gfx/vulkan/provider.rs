//! Vulkan 后端提供者

use super::device::VulkanDevice;
use super::loader;
use crate::core::config::RenderConfig;
use crate::core::error::Result;
use crate::renderer::backend::Backend;
use crate::renderer::device::RenderDevice;
use crate::renderer::provider::{priority, BackendProvider};

/// Vulkan 后端，可用性取决于 loader 探测
#[derive(Debug, Default)]
pub struct VulkanProvider;

impl VulkanProvider {
    pub fn new() -> Self {
        Self
    }
}

impl BackendProvider for VulkanProvider {
    fn backend_type(&self) -> Backend {
        Backend::Vulkan
    }

    fn is_available(&self) -> bool {
        loader::native_support().is_loaded()
    }

    fn unavailable_reason(&self) -> Option<String> {
        loader::native_support().reason().map(str::to_string)
    }

    fn priority(&self) -> i32 {
        priority::VULKAN
    }

    fn create_device(&self, config: &RenderConfig) -> Result<Box<dyn RenderDevice>> {
        if let Some(err) = loader::native_support().to_error() {
            return Err(err);
        }
        Ok(Box::new(VulkanDevice::new(config)))
    }
}
