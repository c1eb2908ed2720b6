//! 纹理抽象
//!
//! 2D 纹理，主要用于字形图集（R8）和图像（RGBA8）。

use std::cell::RefCell;
use std::rc::Rc;

use super::readback::unpack_argb;

/// 纹理格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8,
    RG8,
    /// 上传时扩展为 RGBA8
    RGB8,
    RGBA8,
    R16F,
    RGBA16F,
    RGBA32F,
}

impl TextureFormat {
    /// 调用方上传数据的每像素字节数
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::RG8 => 2,
            TextureFormat::RGB8 => 3,
            TextureFormat::RGBA8 => 4,
            TextureFormat::R16F => 2,
            TextureFormat::RGBA16F => 8,
            TextureFormat::RGBA32F => 16,
        }
    }

    /// GPU 端实际存储格式
    pub fn storage_format(&self) -> TextureFormat {
        match self {
            TextureFormat::RGB8 => TextureFormat::RGBA8,
            other => *other,
        }
    }
}

/// 采样过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFilter {
    Nearest,
    #[default]
    Linear,
}

/// 寻址模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureWrap {
    Repeat,
    #[default]
    ClampToEdge,
    MirroredRepeat,
}

/// 纹理描述
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub min_filter: TextureFilter,
    pub mag_filter: TextureFilter,
    pub wrap_s: TextureWrap,
    pub wrap_t: TextureWrap,
    pub mipmaps: bool,
}

impl TextureDescriptor {
    /// 字形图集：R8，线性过滤，边缘截断
    pub fn font_atlas(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::R8,
            min_filter: TextureFilter::Linear,
            mag_filter: TextureFilter::Linear,
            wrap_s: TextureWrap::ClampToEdge,
            wrap_t: TextureWrap::ClampToEdge,
            mipmaps: false,
        }
    }

    /// RGBA8，线性过滤，边缘截断
    pub fn rgba(width: u32, height: u32) -> Self {
        Self {
            format: TextureFormat::RGBA8,
            ..Self::font_atlas(width, height)
        }
    }

    /// 上传一整张图所需的字节数
    pub fn upload_size(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.format.bytes_per_pixel()
    }
}

/// 把 RGB8 扩展为 RGBA8（alpha = 255）
pub fn expand_rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgb.len() / 3 * 4);
    for px in rgb.chunks_exact(3) {
        out.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
    out
}

/// 按存储格式准备上传数据
///
/// # 返回值
///
/// 数据长度不足时返回 `None`
pub fn prepare_pixels(format: TextureFormat, width: u32, height: u32, bytes: &[u8]) -> Option<std::borrow::Cow<'_, [u8]>> {
    let needed = width as usize * height as usize * format.bytes_per_pixel();
    if bytes.len() < needed {
        tracing::warn!(
            "Texture upload rejected: {}x{} {:?} needs {} bytes, got {}",
            width, height, format, needed, bytes.len()
        );
        return None;
    }
    let bytes = &bytes[..needed];
    Some(match format {
        TextureFormat::RGB8 => std::borrow::Cow::Owned(expand_rgb_to_rgba(bytes)),
        _ => std::borrow::Cow::Borrowed(bytes),
    })
}

/// ARGB 像素转换为 RGBA8 字节
pub fn argb_to_rgba_bytes(pixels: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len() * 4);
    for &p in pixels {
        let (a, r, g, b) = unpack_argb(p);
        out.extend_from_slice(&[r, g, b, a]);
    }
    out
}

/// 2D 纹理
pub trait Texture {
    fn descriptor(&self) -> &TextureDescriptor;

    /// 按描述中的格式上传整张图，尺寸变化时重建存储
    fn upload(&mut self, width: u32, height: u32, bytes: &[u8]);

    /// 上传 ARGB 像素（要求 RGBA8 格式）
    fn upload_argb(&mut self, width: u32, height: u32, pixels: &[u32]) {
        if self.descriptor().format != TextureFormat::RGBA8 {
            tracing::warn!("upload_argb requires an RGBA8 texture, got {:?}", self.descriptor().format);
            return;
        }
        let bytes = argb_to_rgba_bytes(pixels);
        self.upload(width, height, &bytes);
    }

    /// 绑定到纹理单元
    fn bind(&mut self, unit: u32);

    fn unbind(&mut self);

    /// 释放原生存储，可重复调用
    fn dispose(&mut self);

    fn width(&self) -> u32 {
        self.descriptor().width
    }

    fn height(&self) -> u32 {
        self.descriptor().height
    }

    fn is_initialized(&self) -> bool;
}

/// 资源管理器和调用方共享的纹理
pub type SharedTexture = Rc<RefCell<dyn Texture>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::readback::pack_argb;

    #[test]
    fn test_presets() {
        let atlas = TextureDescriptor::font_atlas(256, 128);
        assert_eq!(atlas.format, TextureFormat::R8);
        assert_eq!(atlas.wrap_s, TextureWrap::ClampToEdge);
        assert_eq!(atlas.upload_size(256, 128), 256 * 128);
        assert_eq!(TextureDescriptor::rgba(2, 2).format, TextureFormat::RGBA8);
    }

    #[test]
    fn test_rgb_expansion() {
        assert_eq!(TextureFormat::RGB8.storage_format(), TextureFormat::RGBA8);
        let out = prepare_pixels(TextureFormat::RGB8, 2, 1, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(&*out, &[1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn test_short_upload_rejected() {
        assert!(prepare_pixels(TextureFormat::RGBA8, 2, 2, &[0; 15]).is_none());
        assert!(prepare_pixels(TextureFormat::R8, 2, 2, &[0; 6]).is_some());
    }

    #[test]
    fn test_argb_conversion() {
        let bytes = argb_to_rgba_bytes(&[pack_argb(0x80, 0x10, 0x20, 0x30)]);
        assert_eq!(bytes, vec![0x10, 0x20, 0x30, 0x80]);
    }
}
