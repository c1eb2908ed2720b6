//! 后端注册与选择
//!
//! 每个后端提供一个 `BackendProvider`，注册表负责可用性查询、
//! `Auto` 解析和设备创建。

use std::collections::BTreeMap;

use super::backend::Backend;
use super::device::RenderDevice;
use super::resource::ResourceManager;
use crate::core::config::RenderConfig;
use crate::core::error::{BackendError, Result};
use crate::{engine_info, engine_warn};

/// 优先级区间
pub mod priority {
    pub const OPENGL: i32 = 50;
    pub const VULKAN: i32 = 100;
    pub const NATIVE: i32 = 150;
}

/// `Auto` 的固定偏好顺序；DX12 只能显式请求
pub const AUTO_ORDER: [Backend; 3] = [Backend::Metal, Backend::Vulkan, Backend::OpenGl];

/// 后端提供者
pub trait BackendProvider {
    fn backend_type(&self) -> Backend;

    /// 是否可用；首次探测后结果被缓存，之后不再有副作用
    fn is_available(&self) -> bool;

    /// 不可用的原因
    fn unavailable_reason(&self) -> Option<String>;

    /// 越大越优先
    fn priority(&self) -> i32 {
        priority::OPENGL
    }

    /// 创建未初始化的设备
    fn create_device(&self, config: &RenderConfig) -> Result<Box<dyn RenderDevice>>;

    fn create_resource_manager(&self) -> ResourceManager {
        ResourceManager::new(self.backend_type())
    }
}

/// 后端注册表
#[derive(Default)]
pub struct BackendRegistry {
    providers: BTreeMap<BackendKey, Box<dyn BackendProvider>>,
}

/// `Backend` 没有 `Ord`，用声明顺序排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BackendKey(u8);

impl From<Backend> for BackendKey {
    fn from(backend: Backend) -> Self {
        BackendKey(match backend {
            Backend::OpenGl => 0,
            Backend::Vulkan => 1,
            Backend::Metal => 2,
            Backend::Dx12 => 3,
            Backend::Auto => 4,
        })
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册四个内置后端
    pub fn with_default_providers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::gfx::opengl::OpenGlProvider::new()));
        registry.register(Box::new(crate::gfx::vulkan::VulkanProvider::new()));
        registry.register(Box::new(crate::gfx::metal::MetalProvider::new()));
        registry.register(Box::new(crate::gfx::dx12::Dx12Provider::new()));
        engine_info!(
            "Registered backend providers: {:?}",
            registry.registered_backends().iter().map(|b| b.name()).collect::<Vec<_>>()
        );
        registry
    }

    /// 注册提供者
    ///
    /// `Auto` 提供者被忽略；同一后端保留优先级更高的提供者。
    pub fn register(&mut self, provider: Box<dyn BackendProvider>) {
        let backend = provider.backend_type();
        if backend == Backend::Auto {
            engine_warn!("Ignoring provider registered for the Auto backend");
            return;
        }
        let key = BackendKey::from(backend);
        if let Some(existing) = self.providers.get(&key) {
            if provider.priority() <= existing.priority() {
                tracing::debug!(
                    "Keeping existing {} provider (priority {} >= {})",
                    backend.name(),
                    existing.priority(),
                    provider.priority()
                );
                return;
            }
            tracing::debug!("Replacing {} provider with higher priority {}", backend.name(), provider.priority());
        }
        self.providers.insert(key, provider);
    }

    fn provider(&self, backend: Backend) -> Option<&dyn BackendProvider> {
        self.providers.get(&BackendKey::from(backend)).map(|p| p.as_ref())
    }

    /// 解析请求的后端
    ///
    /// `Auto` 按 Metal、Vulkan、OpenGL 的顺序选第一个可用的；
    /// 显式后端（包括 DX12）必须已注册且可用。
    pub fn resolve(&self, requested: Backend) -> Result<Backend> {
        if requested == Backend::Auto {
            return AUTO_ORDER
                .iter()
                .copied()
                .find(|b| self.provider(*b).is_some_and(|p| p.is_available()))
                .ok_or_else(|| BackendError::NoneAvailable.into());
        }

        let provider = self.provider(requested).ok_or(BackendError::NotRegistered(requested))?;
        if provider.is_available() {
            Ok(requested)
        } else {
            Err(BackendError::Unavailable {
                backend: requested,
                reason: provider
                    .unavailable_reason()
                    .unwrap_or_else(|| "unknown reason".to_string()),
            }
            .into())
        }
    }

    /// 优先级最高的可用后端
    pub fn detect_best_backend(&self) -> Result<Backend> {
        self.providers
            .values()
            .filter(|p| p.is_available())
            .max_by_key(|p| p.priority())
            .map(|p| p.backend_type())
            .ok_or_else(|| BackendError::NoneAvailable.into())
    }

    pub fn available_backends(&self) -> Vec<Backend> {
        self.providers
            .values()
            .filter(|p| p.is_available())
            .map(|p| p.backend_type())
            .collect()
    }

    pub fn registered_backends(&self) -> Vec<Backend> {
        self.providers.values().map(|p| p.backend_type()).collect()
    }

    /// `Auto` 表示是否有任意可用后端
    pub fn is_backend_available(&self, backend: Backend) -> bool {
        if backend == Backend::Auto {
            return !self.available_backends().is_empty();
        }
        self.provider(backend).is_some_and(|p| p.is_available())
    }

    /// 不可用原因（已注册时）
    pub fn unavailable_reason(&self, backend: Backend) -> Option<String> {
        self.provider(backend).and_then(|p| p.unavailable_reason())
    }

    pub fn clear(&mut self) {
        self.providers.clear();
    }

    /// 解析后端并创建未初始化的设备
    pub fn create_device(&self, requested: Backend, config: &RenderConfig) -> Result<Box<dyn RenderDevice>> {
        let backend = self.resolve(requested)?;
        let provider = self.provider(backend).ok_or(BackendError::NotRegistered(backend))?;
        engine_info!("Creating {} render device (priority {})", backend.name(), provider.priority());
        provider.create_device(config)
    }

    /// 为已解析的后端创建资源管理器
    pub fn create_resource_manager(&self, backend: Backend) -> Result<ResourceManager> {
        let provider = self.provider(backend).ok_or(BackendError::NotRegistered(backend))?;
        Ok(provider.create_resource_manager())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ChartRenderError;
    use crate::renderer::mock::MockDevice;

    struct FakeProvider {
        backend: Backend,
        available: bool,
        priority: i32,
    }

    impl BackendProvider for FakeProvider {
        fn backend_type(&self) -> Backend {
            self.backend
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn unavailable_reason(&self) -> Option<String> {
            (!self.available).then(|| format!("{} is not available", self.backend.id()))
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn create_device(&self, _config: &RenderConfig) -> Result<Box<dyn RenderDevice>> {
            Ok(Box::new(MockDevice::new(self.backend)))
        }
    }

    fn fake(backend: Backend, available: bool, priority: i32) -> Box<dyn BackendProvider> {
        Box::new(FakeProvider { backend, available, priority })
    }

    #[test]
    fn test_auto_prefers_fixed_order() {
        let mut registry = BackendRegistry::new();
        registry.register(fake(Backend::OpenGl, true, priority::OPENGL));
        registry.register(fake(Backend::Vulkan, true, priority::VULKAN));
        registry.register(fake(Backend::Metal, false, priority::NATIVE));
        assert_eq!(registry.resolve(Backend::Auto).unwrap(), Backend::Vulkan);

        registry.register(fake(Backend::Vulkan, false, priority::VULKAN + 1));
        assert_eq!(registry.resolve(Backend::Auto).unwrap(), Backend::OpenGl);
    }

    #[test]
    fn test_auto_picks_metal_when_everything_available() {
        let mut registry = BackendRegistry::new();
        for backend in Backend::CONCRETE {
            registry.register(fake(backend, true, priority::NATIVE));
        }
        assert_eq!(registry.resolve(Backend::Auto).unwrap(), Backend::Metal);
    }

    #[test]
    fn test_auto_with_only_opengl() {
        let mut registry = BackendRegistry::new();
        registry.register(fake(Backend::OpenGl, true, priority::OPENGL));
        registry.register(fake(Backend::Vulkan, false, priority::VULKAN));
        registry.register(fake(Backend::Metal, false, priority::NATIVE));
        assert_eq!(registry.resolve(Backend::Auto).unwrap(), Backend::OpenGl);
    }

    #[test]
    fn test_auto_never_selects_dx12() {
        let mut registry = BackendRegistry::new();
        registry.register(fake(Backend::Dx12, true, priority::NATIVE));
        registry.register(fake(Backend::Vulkan, false, priority::VULKAN));
        assert!(matches!(
            registry.resolve(Backend::Auto),
            Err(ChartRenderError::Backend(BackendError::NoneAvailable))
        ));

        registry.register(fake(Backend::OpenGl, true, priority::OPENGL));
        assert_eq!(registry.resolve(Backend::Auto).unwrap(), Backend::OpenGl);
        assert_eq!(registry.resolve(Backend::Dx12).unwrap(), Backend::Dx12);
    }

    #[test]
    fn test_explicit_unavailable_carries_reason() {
        let mut registry = BackendRegistry::new();
        registry.register(fake(Backend::Dx12, false, priority::NATIVE));
        match registry.resolve(Backend::Dx12) {
            Err(ChartRenderError::Backend(BackendError::Unavailable { backend, reason })) => {
                assert_eq!(backend, Backend::Dx12);
                assert_eq!(reason, "dx12 is not available");
            }
            other => panic!("unexpected {:?}", other.map(|b| b.name())),
        }
        assert!(matches!(
            registry.resolve(Backend::Metal),
            Err(ChartRenderError::Backend(BackendError::NotRegistered(Backend::Metal)))
        ));
    }

    #[test]
    fn test_auto_provider_ignored_and_priority_kept() {
        let mut registry = BackendRegistry::new();
        registry.register(fake(Backend::Auto, true, 999));
        assert!(registry.registered_backends().is_empty());

        registry.register(fake(Backend::OpenGl, true, 60));
        registry.register(fake(Backend::OpenGl, false, 55));
        assert!(registry.is_backend_available(Backend::OpenGl));
    }

    #[test]
    fn test_detect_best_and_queries() {
        let mut registry = BackendRegistry::new();
        assert!(registry.detect_best_backend().is_err());
        assert!(!registry.is_backend_available(Backend::Auto));

        registry.register(fake(Backend::OpenGl, true, priority::OPENGL));
        registry.register(fake(Backend::Vulkan, true, priority::VULKAN));
        registry.register(fake(Backend::Metal, false, priority::NATIVE));
        assert_eq!(registry.detect_best_backend().unwrap(), Backend::Vulkan);
        assert_eq!(registry.available_backends(), vec![Backend::OpenGl, Backend::Vulkan]);
        assert_eq!(registry.registered_backends().len(), 3);
        assert!(registry.is_backend_available(Backend::Auto));

        registry.clear();
        assert!(registry.registered_backends().is_empty());
    }

    #[test]
    fn test_create_device_and_manager() {
        let mut registry = BackendRegistry::new();
        registry.register(fake(Backend::Vulkan, true, priority::VULKAN));
        let device = registry.create_device(Backend::Auto, &RenderConfig::default()).unwrap();
        assert_eq!(device.backend_type(), Backend::Vulkan);
        assert!(!device.is_initialized());
        let manager = registry.create_resource_manager(Backend::Vulkan).unwrap();
        assert_eq!(manager.backend(), Backend::Vulkan);
        assert!(registry.create_resource_manager(Backend::Metal).is_err());
    }
}
