//! 字形图集
//!
//! CPU 端的 R8 位图，用 `fontdue` 光栅化字形，按行（shelf）装箱。
//! 图集宽高都是 2 的幂，装满时高度翻倍，直到设备的最大纹理尺寸。

use std::collections::HashMap;

/// 字形之间的间隔（像素）
const GLYPH_PADDING: u32 = 1;

/// 初始图集尺寸
const INITIAL_WIDTH: u32 = 512;
const INITIAL_HEIGHT: u32 = 128;

/// 行式装箱器
#[derive(Debug, Clone)]
pub struct ShelfPacker {
    width: u32,
    height: u32,
    cursor_x: u32,
    cursor_y: u32,
    row_height: u32,
}

impl ShelfPacker {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cursor_x: GLYPH_PADDING,
            cursor_y: GLYPH_PADDING,
            row_height: 0,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 分配一个矩形，放不下时返回 `None`（不改变状态）
    pub fn allocate(&mut self, w: u32, h: u32) -> Option<(u32, u32)> {
        if w + 2 * GLYPH_PADDING > self.width {
            return None;
        }
        let (mut x, mut y, mut row) = (self.cursor_x, self.cursor_y, self.row_height);
        if x + w + GLYPH_PADDING > self.width {
            y += row + GLYPH_PADDING;
            x = GLYPH_PADDING;
            row = 0;
        }
        if y + h + GLYPH_PADDING > self.height {
            return None;
        }
        self.cursor_x = x + w + GLYPH_PADDING;
        self.cursor_y = y;
        self.row_height = row.max(h);
        Some((x, y))
    }

    /// 高度翻倍，超过 `max_height` 时失败
    pub fn grow(&mut self, max_height: u32) -> bool {
        let next = self.height.saturating_mul(2);
        if next > max_height {
            return false;
        }
        self.height = next;
        true
    }
}

/// 图集中的一个字形（像素单位，未除以缩放）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphInfo {
    /// 位图在图集中的位置
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// 相对笔位置的左偏移
    pub xmin: i32,
    /// 位图底边相对基线的偏移（向上为正）
    pub ymin: i32,
    pub advance: f32,
}

/// 字形图集
pub struct GlyphAtlas {
    font: fontdue::Font,
    /// 光栅化像素尺寸（字号 × 缩放）
    px: f32,
    packer: ShelfPacker,
    max_height: u32,
    bitmap: Vec<u8>,
    glyphs: HashMap<char, Option<GlyphInfo>>,
    dirty: bool,
    full_warned: bool,
}

impl GlyphAtlas {
    /// 从字体数据创建并预光栅化可打印 ASCII
    pub fn new(font_data: &[u8], px: f32, max_texture_size: u32) -> Result<Self, String> {
        let font = fontdue::Font::from_bytes(font_data, fontdue::FontSettings::default())
            .map_err(|e| e.to_string())?;
        let max_height = max_texture_size.max(INITIAL_HEIGHT);
        let width = INITIAL_WIDTH.min(max_texture_size.max(64)).next_power_of_two();
        let mut atlas = Self {
            font,
            px: px.max(1.0),
            packer: ShelfPacker::new(width, INITIAL_HEIGHT),
            max_height,
            bitmap: vec![0; (width * INITIAL_HEIGHT) as usize],
            glyphs: HashMap::new(),
            dirty: true,
            full_warned: false,
        };
        atlas.preload_ascii();
        Ok(atlas)
    }

    fn preload_ascii(&mut self) {
        for code in 32u8..=126 {
            self.glyph(code as char);
        }
    }

    /// 改变光栅化尺寸，清空并重建图集
    pub fn set_px(&mut self, px: f32) {
        let px = px.max(1.0);
        if (px - self.px).abs() < f32::EPSILON {
            return;
        }
        self.px = px;
        let (width, _) = self.packer.size();
        self.packer = ShelfPacker::new(width, INITIAL_HEIGHT);
        self.bitmap = vec![0; (width * INITIAL_HEIGHT) as usize];
        self.glyphs.clear();
        self.full_warned = false;
        self.dirty = true;
        self.preload_ascii();
    }

    pub fn px(&self) -> f32 {
        self.px
    }

    /// 查询字形，首次出现时光栅化
    pub fn glyph(&mut self, ch: char) -> Option<GlyphInfo> {
        if let Some(info) = self.glyphs.get(&ch) {
            return *info;
        }
        let info = self.rasterize(ch);
        self.glyphs.insert(ch, info);
        info
    }

    fn rasterize(&mut self, ch: char) -> Option<GlyphInfo> {
        let (metrics, coverage) = self.font.rasterize(ch, self.px);
        let (w, h) = (metrics.width as u32, metrics.height as u32);

        let (x, y) = if w == 0 || h == 0 {
            // 空白字符只有步进
            (0, 0)
        } else {
            let slot = loop {
                if let Some(slot) = self.packer.allocate(w, h) {
                    break slot;
                }
                if !self.grow() {
                    if !self.full_warned {
                        tracing::warn!("Glyph atlas is full at {:?}; '{}' will not be drawn", self.packer.size(), ch);
                        self.full_warned = true;
                    }
                    return None;
                }
            };
            let atlas_w = self.packer.size().0 as usize;
            for row in 0..h as usize {
                let dst = (slot.1 as usize + row) * atlas_w + slot.0 as usize;
                let src = row * w as usize;
                self.bitmap[dst..dst + w as usize].copy_from_slice(&coverage[src..src + w as usize]);
            }
            self.dirty = true;
            slot
        };

        Some(GlyphInfo {
            x,
            y,
            width: w,
            height: h,
            xmin: metrics.xmin,
            ymin: metrics.ymin,
            advance: metrics.advance_width,
        })
    }

    fn grow(&mut self) -> bool {
        if !self.packer.grow(self.max_height) {
            return false;
        }
        let (w, h) = self.packer.size();
        self.bitmap.resize((w * h) as usize, 0);
        self.dirty = true;
        tracing::debug!("Glyph atlas grown to {}x{}", w, h);
        true
    }

    /// 行高（像素，未除以缩放）
    pub fn line_height(&self) -> f32 {
        self.font
            .horizontal_line_metrics(self.px)
            .map(|m| m.new_line_size)
            .unwrap_or(self.px * 1.2)
    }

    /// 基线以上的高度
    pub fn ascent(&self) -> f32 {
        self.font
            .horizontal_line_metrics(self.px)
            .map(|m| m.ascent)
            .unwrap_or(self.px)
    }

    pub fn size(&self) -> (u32, u32) {
        self.packer.size()
    }

    pub fn bitmap(&self) -> &[u8] {
        &self.bitmap
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shelf_packing_rows() {
        let mut packer = ShelfPacker::new(32, 32);
        assert_eq!(packer.allocate(10, 8), Some((1, 1)));
        assert_eq!(packer.allocate(10, 4), Some((12, 1)));
        // 第三个放不下当前行，换行到最高字形下方
        assert_eq!(packer.allocate(10, 4), Some((1, 10)));
    }

    #[test]
    fn test_shelf_full_and_grow() {
        let mut packer = ShelfPacker::new(16, 16);
        assert!(packer.allocate(12, 12).is_some());
        assert!(packer.allocate(12, 12).is_none());
        assert!(packer.grow(64));
        assert_eq!(packer.size(), (16, 32));
        assert!(packer.allocate(12, 12).is_some());
        assert!(packer.grow(64));
        assert!(!packer.grow(64));
    }

    #[test]
    fn test_too_wide_is_rejected() {
        let mut packer = ShelfPacker::new(16, 16);
        assert!(packer.allocate(15, 2).is_none());
    }
}
