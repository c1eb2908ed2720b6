//! 文字渲染
//!
//! 批量绘制：`begin_batch` 之后的 `draw_text` 只生成顶点，
//! `end_batch` 一次性上传图集和顶点并用 `"text"` 着色器绘制。
//! 坐标为像素，左上角原点，`y` 为基线位置。

mod atlas;

pub use atlas::{GlyphAtlas, GlyphInfo, ShelfPacker};

use std::path::Path;
use std::rc::Rc;

use super::backend::DrawMode;
use super::buffer::{BufferDescriptor, SharedBuffer};
use super::device::ResourceFactory;
use super::shader::{orthographic, SharedShader};
use super::texture::{SharedTexture, TextureDescriptor};
use crate::core::config::TextConfig;
use crate::core::error::{ChartRenderError, Result};

/// 文字渲染设置
#[derive(Debug, Clone)]
pub struct TextSettings {
    pub font_path: Option<String>,
    pub font_size: f32,
    /// 直接提供的字体数据，优先于 `font_path`
    pub font_data: Option<Vec<u8>>,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self::from(&TextConfig::default())
    }
}

impl From<&TextConfig> for TextSettings {
    fn from(config: &TextConfig) -> Self {
        Self {
            font_path: config.font_path.clone(),
            font_size: config.font_size,
            font_data: None,
        }
    }
}

/// 常见的系统字体位置
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Geneva.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
    "C:\\Windows\\Fonts\\segoeui.ttf",
];

/// 按设置查找字体数据
pub fn load_font_data(settings: &TextSettings) -> Option<Vec<u8>> {
    if let Some(data) = &settings.font_data {
        return Some(data.clone());
    }
    if let Some(path) = &settings.font_path {
        match std::fs::read(path) {
            Ok(data) => return Some(data),
            Err(e) => tracing::warn!("Cannot read font '{}': {}", path, e),
        }
    }
    SYSTEM_FONTS
        .iter()
        .map(Path::new)
        .filter(|p| p.is_file())
        .find_map(|p| {
            let data = std::fs::read(p).ok()?;
            tracing::debug!("Using system font {}", p.display());
            Some(data)
        })
}

/// 每个字形两个三角形
const VERTICES_PER_GLYPH: usize = 6;
const FLOATS_PER_VERTEX: usize = 8;

/// 文字渲染器
pub struct TextRenderer {
    shader: SharedShader,
    buffer: SharedBuffer,
    texture: SharedTexture,
    atlas: GlyphAtlas,
    font_size: f32,
    scale_factor: f32,
    max_texture_size: u32,
    vertices: Vec<f32>,
    batch_size: Option<(u32, u32)>,
    disposed: bool,
}

impl TextRenderer {
    /// 创建文字渲染器
    ///
    /// # 参数
    ///
    /// * `factory` - 后端资源工厂（创建图集纹理和顶点缓冲区）
    /// * `shader` - `"text"` 着色器
    /// * `settings` - 字体设置
    /// * `max_texture_size` - 图集高度上限
    pub fn new(
        factory: &Rc<dyn ResourceFactory>,
        shader: SharedShader,
        settings: &TextSettings,
        max_texture_size: u32,
    ) -> Result<Self> {
        let font_data = load_font_data(settings)
            .ok_or_else(|| ChartRenderError::Runtime("no usable font found for text rendering".to_string()))?;
        let atlas = GlyphAtlas::new(&font_data, settings.font_size, max_texture_size)
            .map_err(|e| ChartRenderError::Runtime(format!("failed to parse font: {}", e)))?;

        let (w, h) = atlas.size();
        let texture = factory.create_texture(&TextureDescriptor::font_atlas(w, h))?;
        let buffer = factory.create_buffer(&BufferDescriptor::text_buffer(
            VERTICES_PER_GLYPH * FLOATS_PER_VERTEX * 128,
        ))?;

        Ok(Self {
            shader,
            buffer,
            texture,
            atlas,
            font_size: settings.font_size,
            scale_factor: 1.0,
            max_texture_size,
            vertices: Vec::new(),
            batch_size: None,
            disposed: false,
        })
    }

    /// 字号（逻辑像素）
    pub fn set_font_size(&mut self, size: f32) {
        if size > 0.0 && size.is_finite() {
            self.font_size = size;
            self.atlas.set_px(self.font_size * self.scale_factor);
        }
    }

    pub fn font_size(&self) -> f32 {
        self.font_size
    }

    /// HiDPI 缩放，字形按 `font_size * scale_factor` 光栅化
    pub fn set_scale_factor(&mut self, scale: f32) {
        if scale > 0.0 && scale.is_finite() {
            self.scale_factor = scale;
            self.atlas.set_px(self.font_size * self.scale_factor);
        }
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    /// 替换字体
    pub fn set_font_data(&mut self, data: &[u8]) -> Result<()> {
        let atlas = GlyphAtlas::new(data, self.font_size * self.scale_factor, self.max_texture_size)
            .map_err(|e| ChartRenderError::Runtime(format!("failed to parse font: {}", e)))?;
        self.atlas = atlas;
        Ok(())
    }

    /// 开始一批文字，尺寸为当前帧的像素尺寸
    ///
    /// 已在批次中或已释放时返回 `false`
    pub fn begin_batch(&mut self, width: u32, height: u32) -> bool {
        if self.disposed || self.batch_size.is_some() {
            return false;
        }
        self.vertices.clear();
        self.batch_size = Some((width.max(1), height.max(1)));
        true
    }

    pub fn is_in_batch(&self) -> bool {
        self.batch_size.is_some()
    }

    /// 左对齐绘制，`baseline_y` 为基线
    pub fn draw_text(&mut self, text: &str, x: f32, baseline_y: f32, color: [f32; 4]) {
        if self.batch_size.is_none() {
            tracing::debug!("draw_text outside of a batch ignored");
            return;
        }
        let inv_scale = 1.0 / self.scale_factor;
        let (aw, ah) = self.atlas.size();
        let (aw, ah) = (aw as f32, ah as f32);
        let mut pen = x;

        for ch in text.chars() {
            let Some(glyph) = self.atlas.glyph(ch) else {
                continue;
            };
            if glyph.width > 0 && glyph.height > 0 {
                let left = pen + glyph.xmin as f32 * inv_scale;
                let top = baseline_y - (glyph.ymin + glyph.height as i32) as f32 * inv_scale;
                let right = left + glyph.width as f32 * inv_scale;
                let bottom = top + glyph.height as f32 * inv_scale;

                let u0 = glyph.x as f32 / aw;
                let v0 = glyph.y as f32 / ah;
                let u1 = (glyph.x + glyph.width) as f32 / aw;
                let v1 = (glyph.y + glyph.height) as f32 / ah;

                let [r, g, b, a] = color;
                let quad = [
                    [left, top, u0, v0],
                    [right, top, u1, v0],
                    [left, bottom, u0, v1],
                    [right, top, u1, v0],
                    [right, bottom, u1, v1],
                    [left, bottom, u0, v1],
                ];
                for [px, py, u, v] in quad {
                    self.vertices.extend_from_slice(&[px, py, u, v, r, g, b, a]);
                }
            }
            pen += glyph.advance * inv_scale;
        }
    }

    /// 以 `center_x` 为中心绘制
    pub fn draw_text_centered(&mut self, text: &str, center_x: f32, baseline_y: f32, color: [f32; 4]) {
        let width = self.text_width(text);
        self.draw_text(text, center_x - width / 2.0, baseline_y, color);
    }

    /// 右对齐到 `right_x`
    pub fn draw_text_right(&mut self, text: &str, right_x: f32, baseline_y: f32, color: [f32; 4]) {
        let width = self.text_width(text);
        self.draw_text(text, right_x - width, baseline_y, color);
    }

    /// 提交本批文字
    ///
    /// 调用方负责在打开的帧内调用，并设置合适的混合模式。
    pub fn end_batch(&mut self) {
        let Some((width, height)) = self.batch_size.take() else {
            return;
        };
        if self.vertices.is_empty() {
            return;
        }

        if self.atlas.is_dirty() {
            let (aw, ah) = self.atlas.size();
            self.texture.borrow_mut().upload(aw, ah, self.atlas.bitmap());
            self.atlas.mark_clean();
        }

        let mut shader = self.shader.borrow_mut();
        shader.bind();
        shader.set_uniform_matrix4("uProjection", &orthographic(width as f32, height as f32), false);
        shader.set_uniform_vec4("uColor", 1.0, 1.0, 1.0, 1.0);

        let mut texture = self.texture.borrow_mut();
        texture.bind(0);
        {
            let mut buffer = self.buffer.borrow_mut();
            buffer.upload(&self.vertices, 0, self.vertices.len());
            buffer.bind();
            buffer.draw(DrawMode::Triangles);
            buffer.unbind();
        }
        texture.unbind();
        shader.unbind();
        self.vertices.clear();
    }

    /// 文字宽度（逻辑像素）
    pub fn text_width(&mut self, text: &str) -> f32 {
        let inv_scale = 1.0 / self.scale_factor;
        text.chars()
            .filter_map(|ch| self.atlas.glyph(ch))
            .map(|g| g.advance * inv_scale)
            .sum()
    }

    /// 行高（逻辑像素）
    pub fn text_height(&self) -> f32 {
        self.atlas.line_height() / self.scale_factor
    }

    /// 基线以上的高度（逻辑像素）
    pub fn ascent(&self) -> f32 {
        self.atlas.ascent() / self.scale_factor
    }

    /// 释放图集纹理和顶点缓冲区，可重复调用
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.batch_size = None;
        self.vertices.clear();
        self.buffer.borrow_mut().dispose();
        self.texture.borrow_mut().dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::mock::MockFactory;
    use crate::renderer::shader::ShaderSource;

    fn renderer() -> Option<(Rc<MockFactory>, TextRenderer)> {
        let settings = TextSettings::default();
        load_font_data(&settings)?;
        let mock = Rc::new(MockFactory::default());
        let factory: Rc<dyn ResourceFactory> = mock.clone();
        let shader = factory.create_shader(&ShaderSource::glsl("text", "v", "f").with_texture());
        let renderer = TextRenderer::new(&factory, shader, &settings, 4096).ok()?;
        Some((mock, renderer))
    }

    #[test]
    fn test_missing_font_is_an_error() {
        let factory: Rc<dyn ResourceFactory> = Rc::new(MockFactory::default());
        let shader = factory.create_shader(&ShaderSource::glsl("text", "v", "f"));
        let settings = TextSettings {
            font_path: Some("/nonexistent/font.ttf".into()),
            font_size: 12.0,
            font_data: Some(b"not a font".to_vec()),
        };
        assert!(TextRenderer::new(&factory, shader, &settings, 1024).is_err());
    }

    #[test]
    fn test_empty_text_has_zero_width() {
        let Some((_, mut renderer)) = renderer() else {
            return;
        };
        assert_eq!(renderer.text_width(""), 0.0);
        assert!(renderer.text_width("12.50") > 0.0);
        assert!(renderer.text_height() > 0.0);
    }

    #[test]
    fn test_batch_lifecycle() {
        let Some((mock, mut renderer)) = renderer() else {
            return;
        };
        assert!(renderer.begin_batch(200, 100));
        assert!(!renderer.begin_batch(200, 100));
        renderer.draw_text("Hi", 10.0, 20.0, [1.0; 4]);
        assert_eq!(renderer.vertices.len(), 2 * VERTICES_PER_GLYPH * FLOATS_PER_VERTEX);
        renderer.end_batch();
        assert!(!renderer.is_in_batch());
        assert_eq!(mock.draws(), 1);

        renderer.dispose();
        renderer.dispose();
        assert!(!renderer.begin_batch(10, 10));
    }

    #[test]
    fn test_scale_factor_keeps_logical_width() {
        let Some((_, mut renderer)) = renderer() else {
            return;
        };
        let w1 = renderer.text_width("Volume");
        renderer.set_scale_factor(2.0);
        let w2 = renderer.text_width("Volume");
        assert!((w1 - w2).abs() < w1 * 0.1);
    }
}
