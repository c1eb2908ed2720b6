//! OpenGL 后端提供者

use super::context::{gl_instance, request_adapter};
use super::device::OpenGlDevice;
use crate::core::config::RenderConfig;
use crate::core::error::Result;
use crate::gfx::native::{self, LoadState};
use crate::renderer::backend::Backend;
use crate::renderer::device::RenderDevice;
use crate::renderer::provider::{priority, BackendProvider};

/// 探测一次 GL 适配器并缓存结果
pub fn native_support() -> &'static LoadState {
    native::detect_once(Backend::OpenGl.id(), || match request_adapter(&gl_instance()) {
        Some(adapter) => {
            tracing::debug!(adapter = adapter.get_info().name.as_str(), "OpenGL adapter found");
            LoadState::Loaded
        }
        None => LoadState::NotFound("no OpenGL / GLES adapter could be created".to_string()),
    })
}

/// OpenGL 后端，所有桌面平台的兜底选择
#[derive(Debug, Default)]
pub struct OpenGlProvider;

impl OpenGlProvider {
    pub fn new() -> Self {
        Self
    }
}

impl BackendProvider for OpenGlProvider {
    fn backend_type(&self) -> Backend {
        Backend::OpenGl
    }

    fn is_available(&self) -> bool {
        native_support().is_loaded()
    }

    fn unavailable_reason(&self) -> Option<String> {
        native_support().reason().map(str::to_string)
    }

    fn priority(&self) -> i32 {
        priority::OPENGL
    }

    fn create_device(&self, config: &RenderConfig) -> Result<Box<dyn RenderDevice>> {
        if let Some(err) = native_support().to_error() {
            return Err(err);
        }
        Ok(Box::new(OpenGlDevice::new(config)))
    }
}
