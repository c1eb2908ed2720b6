//! 错误处理模块
//!
//! 定义了渲染层使用的统一错误类型。
//!
//! # 设计原则
//!
//! - 为每种错误类型提供清晰的上下文信息（失败的操作名）
//! - 支持错误链（error source）
//! - 着色器编译失败、被跳过的绘制不是错误，只记录日志
//! - 后端不可用时携带首次探测时缓存的原因

use std::fmt;

use crate::renderer::Backend;

/// 渲染层统一的 Result 类型
pub type Result<T> = std::result::Result<T, ChartRenderError>;

/// 渲染层的错误类型
#[derive(Debug)]
pub enum ChartRenderError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// 后端选择 / 原生库加载错误
    Backend(BackendError),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置项缺失
    MissingField(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备、队列、栅栏、命令对象创建失败
    DeviceCreation(String),

    /// 着色器编译失败（仅在显式要求时作为错误返回）
    ShaderCompilation(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 命令提交或执行失败
    CommandExecution(String),

    /// 像素回读失败
    Readback(String),

    /// 设备尚未初始化（或已释放）
    NotInitialized,

    /// 当前状态下不允许该操作
    InvalidState(String),
}

/// 后端选择相关的错误
#[derive(Debug)]
pub enum BackendError {
    /// 后端在当前系统上不可用
    Unavailable { backend: Backend, reason: String },

    /// 没有为该后端注册 provider
    NotRegistered(Backend),

    /// 没有任何可用的后端
    NoneAvailable,

    /// 原生库未找到
    LibraryNotFound(String),

    /// 原生库已找到但初始化失败
    LibraryInitFailed(String),
}

impl fmt::Display for ChartRenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartRenderError::Config(e) => write!(f, "Configuration error: {}", e),
            ChartRenderError::Graphics(e) => write!(f, "Graphics error: {}", e),
            ChartRenderError::Backend(e) => write!(f, "Backend error: {}", e),
            ChartRenderError::Io(e) => write!(f, "IO error: {}", e),
            ChartRenderError::Log(msg) => write!(f, "Log error: {}", msg),
            ChartRenderError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            ChartRenderError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {}", field),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::ShaderCompilation(msg) => write!(f, "Shader compilation failed: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::Readback(msg) => write!(f, "Pixel readback failed: {}", msg),
            GraphicsError::NotInitialized => write!(f, "Render device is not initialized"),
            GraphicsError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unavailable { backend, reason } => {
                write!(f, "Backend {} is not available: {}", backend.name(), reason)
            }
            BackendError::NotRegistered(backend) => {
                write!(f, "No provider registered for backend {}", backend.name())
            }
            BackendError::NoneAvailable => write!(f, "No rendering backends available"),
            BackendError::LibraryNotFound(msg) => write!(f, "Native library not found: {}", msg),
            BackendError::LibraryInitFailed(msg) => {
                write!(f, "Native library found but failed to initialize: {}", msg)
            }
        }
    }
}

impl std::error::Error for ChartRenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChartRenderError::Io(e) => Some(e),
            ChartRenderError::Config(e) => Some(e),
            ChartRenderError::Graphics(e) => Some(e),
            ChartRenderError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for BackendError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for ChartRenderError {
    fn from(err: std::io::Error) -> Self {
        ChartRenderError::Io(err)
    }
}

impl From<ConfigError> for ChartRenderError {
    fn from(err: ConfigError) -> Self {
        ChartRenderError::Config(err)
    }
}

impl From<GraphicsError> for ChartRenderError {
    fn from(err: GraphicsError) -> Self {
        ChartRenderError::Graphics(err)
    }
}

impl From<BackendError> for ChartRenderError {
    fn from(err: BackendError) -> Self {
        ChartRenderError::Backend(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_message_carries_reason() {
        let err: ChartRenderError = BackendError::Unavailable {
            backend: Backend::Dx12,
            reason: "DirectX 12 requires Windows".to_string(),
        }
        .into();
        let text = err.to_string();
        assert!(text.contains("DirectX 12"));
        assert!(text.contains("requires Windows"));
    }

    #[test]
    fn test_library_errors_are_distinct() {
        let not_found = BackendError::LibraryNotFound("libvulkan.so.1".into()).to_string();
        let init_failed = BackendError::LibraryInitFailed("vkCreateInstance".into()).to_string();
        assert_ne!(not_found, init_failed);
        assert!(not_found.starts_with("Native library not found"));
    }

    #[test]
    fn test_source_chain() {
        let err: ChartRenderError = GraphicsError::NotInitialized.into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
