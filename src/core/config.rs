//! 配置管理模块
//!
//! 提供渲染层配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [render]
//! backend = "auto"    # opengl, vulkan, metal, dx12, auto
//! width = 800
//! height = 600
//! clear_color = [0.1, 0.1, 0.12, 1.0]
//! validation = false
//!
//! [text]
//! font_path = "assets/fonts/DejaVuSans.ttf"
//! font_size = 14.0
//!
//! [native]
//! bundle_dir = "native"
//!
//! [export]
//! output = "chart.png"
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};
use crate::renderer::Backend;

/// 渲染层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 渲染配置
    #[serde(default)]
    pub render: RenderConfig,

    /// 文字渲染配置
    #[serde(default)]
    pub text: TextConfig,

    /// 原生库配置
    #[serde(default)]
    pub native: NativeConfig,

    /// 导出配置
    #[serde(default)]
    pub export: ExportConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 渲染配置
///
/// 后端创建设备时只看这一节。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// 请求的图形后端
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// 离屏帧宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 离屏帧高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 默认清屏颜色 (RGBA)
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],

    /// 是否启用验证层（仅 Vulkan / DX12 debug layer）
    #[serde(default)]
    pub validation: bool,

    /// 内置原生库目录，由 `[native]` 一节填入
    #[serde(skip)]
    pub bundle_dir: Option<String>,
}

/// 文字渲染配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextConfig {
    /// 字体文件路径，未设置时搜索系统字体
    #[serde(default)]
    pub font_path: Option<String>,

    /// 字号（像素）
    #[serde(default = "default_font_size")]
    pub font_size: f32,
}

/// 原生库配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NativeConfig {
    /// 内置原生库根目录，布局为 `<bundle_dir>/<os>-<arch>/<file>`
    #[serde(default)]
    pub bundle_dir: Option<String>,
}

/// 导出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// PNG 输出路径
    #[serde(default = "default_output")]
    pub output: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_backend() -> Backend { Backend::Auto }
fn default_width() -> u32 { 800 }
fn default_height() -> u32 { 600 }
fn default_clear_color() -> [f32; 4] { [0.1, 0.1, 0.12, 1.0] }
fn default_font_size() -> f32 { 14.0 }
fn default_output() -> String { "chart.png".to_string() }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "chart_render.log".to_string() }

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            width: default_width(),
            height: default_height(),
            clear_color: default_clear_color(),
            validation: false,
            bundle_dir: None,
        }
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: default_font_size(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { output: default_output() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    ///
    /// # 返回值
    ///
    /// 成功返回 `Config` 实例，失败返回错误
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// # 说明
    ///
    /// 支持的参数：
    /// - `--backend <name>`: 按名称选择后端
    /// - `--opengl` / `--vulkan` / `--metal` / `--dx12` / `--auto`
    /// - `--width <value>` / `--height <value>`: 离屏帧尺寸
    /// - `--output <path>`: PNG 输出路径
    /// - `--font <path>`: 字体文件
    ///
    /// 无法解析的值会被忽略，保留原配置。
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        let value_of = |flag: &str| -> Option<&String> {
            args.iter()
                .position(|a| a == flag)
                .and_then(|idx| args.get(idx + 1))
        };

        // 后端开关，后出现的覆盖前面的
        for arg in &args {
            let backend = match arg.as_str() {
                "--opengl" => Some(Backend::OpenGl),
                "--vulkan" => Some(Backend::Vulkan),
                "--metal" => Some(Backend::Metal),
                "--dx12" => Some(Backend::Dx12),
                "--auto" => Some(Backend::Auto),
                _ => None,
            };
            if let Some(backend) = backend {
                self.render.backend = backend;
            }
        }

        if let Some(name) = value_of("--backend") {
            match name.parse::<Backend>() {
                Ok(backend) => self.render.backend = backend,
                Err(e) => tracing::warn!("Ignoring --backend: {}", e),
            }
        }

        if let Some(width) = value_of("--width").and_then(|v| v.parse().ok()) {
            self.render.width = width;
        }

        if let Some(height) = value_of("--height").and_then(|v| v.parse().ok()) {
            self.render.height = height;
        }

        if let Some(output) = value_of("--output") {
            self.export.output = output.clone();
        }

        if let Some(font) = value_of("--font") {
            self.text.font_path = Some(font.clone());
        }
    }

    /// 验证配置的有效性
    ///
    /// # 返回值
    ///
    /// 配置有效返回 `Ok(())`，否则返回错误
    pub fn validate(&self) -> Result<()> {
        if self.render.width == 0 || self.render.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "render.width/height".to_string(),
                reason: "Frame dimensions must be greater than 0".to_string(),
            }.into());
        }

        if self.render.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(ConfigError::InvalidValue {
                field: "render.clear_color".to_string(),
                reason: "Color channels must be within [0, 1]".to_string(),
            }.into());
        }

        if !(self.text.font_size > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "text.font_size".to_string(),
                reason: "Font size must be positive".to_string(),
            }.into());
        }

        if self.export.output.is_empty() {
            return Err(ConfigError::MissingField("export.output".to_string()).into());
        }

        Ok(())
    }

    /// 设备创建所需的渲染配置（带上原生库目录）
    pub fn render_config(&self) -> RenderConfig {
        let mut render = self.render.clone();
        render.bundle_dir = self.native.bundle_dir.clone();
        render
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.render.width, 800);
        assert_eq!(config.render.height, 600);
        assert_eq!(config.render.backend, Backend::Auto);
        assert_eq!(config.render.clear_color, [0.1, 0.1, 0.12, 1.0]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.render.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.render.clear_color = [1.5, 0.0, 0.0, 1.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["app", "--vulkan", "--width", "320", "--height", "abc", "--output", "out.png"]);
        assert_eq!(config.render.backend, Backend::Vulkan);
        assert_eq!(config.render.width, 320);
        assert_eq!(config.render.height, 600);
        assert_eq!(config.export.output, "out.png");

        config.apply_args(["app", "--backend", "metal"]);
        assert_eq!(config.render.backend, Backend::Metal);

        config.apply_args(["app", "--backend", "glide"]);
        assert_eq!(config.render.backend, Backend::Metal);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [render]
            backend = "dx12"
            height = 240

            [native]
            bundle_dir = "natives"
            "#,
        )
        .unwrap();
        assert_eq!(config.render.backend, Backend::Dx12);
        assert_eq!(config.render.width, 800);
        assert_eq!(config.render.height, 240);
        assert_eq!(config.text.font_size, 14.0);
        assert_eq!(config.render_config().bundle_dir.as_deref(), Some("natives"));
    }
}
