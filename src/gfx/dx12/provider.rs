//! DX12 后端提供者

use crate::core::config::RenderConfig;
use crate::core::error::Result;
use crate::gfx::native::{self, LoadState};
use crate::renderer::backend::Backend;
use crate::renderer::device::RenderDevice;
use crate::renderer::provider::{priority, BackendProvider};

/// 探测一次 d3d12.dll 和默认适配器并缓存结果
pub fn native_support() -> &'static LoadState {
    native::detect_once(Backend::Dx12.id(), detect)
}

#[cfg(target_os = "windows")]
fn detect() -> LoadState {
    use windows::core::s;
    use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
    use windows::Win32::Graphics::Direct3D12::{D3D12CreateDevice, ID3D12Device};
    use windows::Win32::System::LibraryLoader::LoadLibraryA;

    if let Err(e) = unsafe { LoadLibraryA(s!("d3d12.dll")) } {
        return LoadState::NotFound(format!("d3d12.dll not loadable: {:?}", e));
    }
    let mut device: Option<ID3D12Device> = None;
    match unsafe { D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device) } {
        Ok(()) if device.is_some() => {
            tracing::debug!("DX12 test device created");
            LoadState::Loaded
        }
        Ok(()) => LoadState::InitFailed("D3D12CreateDevice returned null".to_string()),
        Err(e) => LoadState::InitFailed(format!("D3D12CreateDevice failed: {:?}", e)),
    }
}

#[cfg(not(target_os = "windows"))]
fn detect() -> LoadState {
    LoadState::NotFound("DirectX 12 requires Windows".to_string())
}

/// DX12 后端，Windows 上的原生选择
#[derive(Debug, Default)]
pub struct Dx12Provider;

impl Dx12Provider {
    pub fn new() -> Self {
        Self
    }
}

impl BackendProvider for Dx12Provider {
    fn backend_type(&self) -> Backend {
        Backend::Dx12
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

    #[cfg(target_os = "windows")]
    fn create_device(&self, config: &RenderConfig) -> Result<Box<dyn RenderDevice>> {
        if let Some(err) = native_support().to_error() {
            return Err(err);
        }
        Ok(Box::new(super::device::Dx12Device::new(config)))
    }

    #[cfg(not(target_os = "windows"))]
    fn create_device(&self, _config: &RenderConfig) -> Result<Box<dyn RenderDevice>> {
        Err(native_support()
            .to_error()
            .unwrap_or_else(|| crate::core::error::BackendError::NotRegistered(Backend::Dx12).into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_unavailable_off_windows() {
        let provider = Dx12Provider::new();
        assert!(!provider.is_available());
        assert!(provider.unavailable_reason().unwrap().contains("Windows"));
        assert!(provider.create_device(&RenderConfig::default()).is_err());
    }
}
