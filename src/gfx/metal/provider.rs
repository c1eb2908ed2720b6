//! Metal 后端提供者

use crate::core::config::RenderConfig;
use crate::core::error::Result;
use crate::gfx::native::{self, LoadState};
use crate::renderer::backend::Backend;
use crate::renderer::device::RenderDevice;
use crate::renderer::provider::{priority, BackendProvider};

/// 探测一次系统默认 Metal 设备并缓存结果
pub fn native_support() -> &'static LoadState {
    native::detect_once(Backend::Metal.id(), detect)
}

#[cfg(target_os = "macos")]
fn detect() -> LoadState {
    match metal::Device::system_default() {
        Some(device) => {
            tracing::debug!(device = device.name(), "Metal device found");
            LoadState::Loaded
        }
        None => LoadState::InitFailed("MTLCreateSystemDefaultDevice returned nil".to_string()),
    }
}

#[cfg(not(target_os = "macos"))]
fn detect() -> LoadState {
    LoadState::NotFound("Metal requires macOS".to_string())
}

/// Metal 后端，macOS 上的原生选择
#[derive(Debug, Default)]
pub struct MetalProvider;

impl MetalProvider {
    pub fn new() -> Self {
        Self
    }
}

impl BackendProvider for MetalProvider {
    fn backend_type(&self) -> Backend {
        Backend::Metal
    }

    fn is_available(&self) -> bool {
        native_support().is_loaded()
    }

    fn unavailable_reason(&self) -> Option<String> {
        native_support().reason().map(str::to_string)
    }

    fn priority(&self) -> i32 {
        priority::NATIVE
    }

    #[cfg(target_os = "macos")]
    fn create_device(&self, config: &RenderConfig) -> Result<Box<dyn RenderDevice>> {
        if let Some(err) = native_support().to_error() {
            return Err(err);
        }
        Ok(Box::new(super::device::MetalDevice::new(config)))
    }

    #[cfg(not(target_os = "macos"))]
    fn create_device(&self, _config: &RenderConfig) -> Result<Box<dyn RenderDevice>> {
        Err(native_support()
            .to_error()
            .unwrap_or_else(|| crate::core::error::BackendError::NotRegistered(Backend::Metal).into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_unavailable_off_macos() {
        let provider = MetalProvider::new();
        assert!(!provider.is_available());
        assert!(provider.unavailable_reason().unwrap().contains("macOS"));
        assert!(provider.create_device(&RenderConfig::default()).is_err());
    }
}
