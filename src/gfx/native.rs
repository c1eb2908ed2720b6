//! 原生库加载
//!
//! 每个后端的原生库只探测一次，结果（包括失败原因）在进程内缓存，之后不再重试。
//!
//! # 探测顺序
//!
//! 1. 标准搜索路径（系统加载器）
//! 2. 打包的副本：`<bundle_dir>/<os>-<arch>/<文件名>`，`bundle_dir` 来自配置
//!    `[native] bundle_dir` 或环境变量 `CHART_RENDER_NATIVE_DIR`。
//!    副本先复制到临时目录再加载；unix 上加载后立即删除临时目录，
//!    其他平台在 `cleanup_extracted_libraries` 时删除。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tempfile::TempDir;

use crate::core::error::{BackendError, ChartRenderError};
use crate::renderer::backend::Backend;

/// 环境变量：打包的原生库目录
pub const NATIVE_DIR_ENV: &str = "CHART_RENDER_NATIVE_DIR";

/// 探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loaded,
    /// 找不到库（例如在非 Windows 上请求 DX12）
    NotFound(String),
    /// 找到了库但初始化失败（驱动或硬件问题）
    InitFailed(String),
}

impl LoadState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadState::Loaded)
    }

    /// 失败原因
    pub fn reason(&self) -> Option<&str> {
        match self {
            LoadState::Loaded => None,
            LoadState::NotFound(reason) | LoadState::InitFailed(reason) => Some(reason),
        }
    }

    /// 转换为错误，已加载时为 `None`
    pub fn to_error(&self) -> Option<ChartRenderError> {
        match self {
            LoadState::Loaded => None,
            LoadState::NotFound(reason) => Some(BackendError::LibraryNotFound(reason.clone()).into()),
            LoadState::InitFailed(reason) => Some(BackendError::LibraryInitFailed(reason.clone()).into()),
        }
    }
}

type StateTable = Mutex<HashMap<&'static str, &'static LoadState>>;

fn states() -> &'static StateTable {
    static STATES: OnceLock<StateTable> = OnceLock::new();
    STATES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn bundle_setting() -> &'static Mutex<Option<PathBuf>> {
    static BUNDLE: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();
    BUNDLE.get_or_init(|| Mutex::new(None))
}

fn extracted_dirs() -> &'static Mutex<Vec<TempDir>> {
    static DIRS: OnceLock<Mutex<Vec<TempDir>>> = OnceLock::new();
    DIRS.get_or_init(|| Mutex::new(Vec::new()))
}

/// 设置打包原生库的根目录（优先于环境变量）
pub fn set_bundle_dir(dir: Option<&str>) {
    let mut setting = bundle_setting().lock().unwrap_or_else(|e| e.into_inner());
    *setting = dir.map(PathBuf::from);
}

fn bundle_dir() -> Option<PathBuf> {
    let configured = bundle_setting().lock().unwrap_or_else(|e| e.into_inner()).clone();
    configured.or_else(|| std::env::var_os(NATIVE_DIR_ENV).map(PathBuf::from))
}

/// 当前平台目录名，例如 `linux-x86_64`
pub fn platform_dir() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// 探测一个后端的原生库，结果缓存
///
/// # 参数
///
/// * `key` - 缓存键（后端 id）
/// * `detect` - 实际探测，只会执行一次
pub fn detect_once(key: &'static str, detect: impl FnOnce() -> LoadState) -> &'static LoadState {
    let cached = states().lock().unwrap_or_else(|e| e.into_inner()).get(key).copied();
    if let Some(state) = cached {
        return state;
    }
    // 探测可能很慢，不持锁执行；并发首探时以先写入者为准
    let state = detect();
    match &state {
        LoadState::Loaded => tracing::info!("Native support for '{}' loaded", key),
        LoadState::NotFound(reason) => tracing::info!("Native support for '{}' not found: {}", key, reason),
        LoadState::InitFailed(reason) => tracing::warn!("Native support for '{}' failed to initialize: {}", key, reason),
    }
    let leaked: &'static LoadState = Box::leak(Box::new(state));
    let mut table = states().lock().unwrap_or_else(|e| e.into_inner());
    *table.entry(key).or_insert(leaked)
}

/// 已缓存的探测结果
pub fn load_state(backend: Backend) -> Option<&'static LoadState> {
    states().lock().unwrap_or_else(|e| e.into_inner()).get(backend.id()).copied()
}

/// 已缓存的失败原因
pub fn load_error(backend: Backend) -> Option<String> {
    load_state(backend).and_then(|s| s.reason().map(str::to_string))
}

/// 打包副本的路径（存在时）
pub fn locate_bundled(file_name: &str) -> Option<PathBuf> {
    let path = bundle_dir()?.join(platform_dir()).join(file_name);
    path.is_file().then_some(path)
}

/// 把打包的库复制到临时目录
///
/// # 返回值
///
/// 临时副本的路径，加载完成后调用 `release_extracted`
pub fn extract_bundled(source: &Path) -> std::io::Result<PathBuf> {
    let dir = tempfile::Builder::new().prefix("chart_render_native").tempdir()?;
    let file_name = source
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bundled path has no file name"))?;
    let target = dir.path().join(file_name);
    std::fs::copy(source, &target)?;
    tracing::debug!("Extracted {} to {}", source.display(), target.display());
    extracted_dirs().lock().unwrap_or_else(|e| e.into_inner()).push(dir);
    Ok(target)
}

/// 库已加载：unix 上已映射的库不依赖文件，临时目录可以立即删除
pub fn release_extracted() {
    if cfg!(unix) {
        cleanup_extracted_libraries();
    }
}

/// 删除所有解包出的临时目录
pub fn cleanup_extracted_libraries() {
    let dirs: Vec<TempDir> = extracted_dirs().lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
    for dir in dirs {
        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            tracing::warn!("Failed to remove extracted library directory {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_runs_once() {
        let first = detect_once("test-detect", || LoadState::NotFound("missing".into()));
        let second = detect_once("test-detect", || LoadState::Loaded);
        assert_eq!(first, second);
        assert_eq!(second.reason(), Some("missing"));
    }

    #[test]
    fn test_load_state_maps_to_error() {
        let err = LoadState::InitFailed("driver".into()).to_error();
        assert!(matches!(err, Some(ChartRenderError::Backend(BackendError::LibraryInitFailed(_)))));
        assert!(LoadState::Loaded.to_error().is_none());
    }

    #[test]
    fn test_extract_bundled_copy() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("libfake.so");
        std::fs::write(&source, b"not a real library").unwrap();
        let copy = extract_bundled(&source).unwrap();
        assert!(copy.is_file());
        assert_ne!(copy, source);
        cleanup_extracted_libraries();
        assert!(!copy.exists());
    }

    #[test]
    fn test_platform_dir() {
        assert!(platform_dir().contains(std::env::consts::ARCH));
    }
}
