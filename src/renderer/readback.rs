//! 像素回读与 ARGB 转换
//!
//! 各后端把颜色目标复制到 CPU 可见的暂存缓冲区后，统一用这里的函数
//! 把 RGBA / BGRA 行转换为 `a<<24 | r<<16 | g<<8 | b`。第 0 行为顶部。

use crate::core::error::{GraphicsError, Result};

/// 暂存缓冲区中的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
    Rgba,
    Bgra,
}

/// 打包 ARGB
pub fn pack_argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    (a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// 浮点颜色打包为 ARGB（四舍五入到 0..=255）
pub fn pack_color(color: [f32; 4]) -> u32 {
    let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    pack_argb(q(color[3]), q(color[0]), q(color[1]), q(color[2]))
}

/// 拆分 ARGB，返回 `(a, r, g, b)`
pub fn unpack_argb(pixel: u32) -> (u8, u8, u8, u8) {
    ((pixel >> 24) as u8, (pixel >> 16) as u8, (pixel >> 8) as u8, pixel as u8)
}

/// 每个通道的差都不超过 `tolerance`
pub fn channels_within(a: u32, b: u32, tolerance: u8) -> bool {
    let (aa, ar, ag, ab) = unpack_argb(a);
    let (ba, br, bg, bb) = unpack_argb(b);
    [(aa, ba), (ar, br), (ag, bg), (ab, bb)]
        .iter()
        .all(|(x, y)| x.abs_diff(*y) <= tolerance)
}

/// 把按行对齐的 8 位四通道像素转换为 ARGB
///
/// # 参数
///
/// * `src` - 暂存缓冲区内容
/// * `row_pitch` - 每行字节数（>= width * 4，按后端要求对齐）
/// * `width` / `height` - 像素尺寸
/// * `order` - 通道顺序
/// * `out` - 输出，长度至少 `width * height`
pub fn copy_rows_to_argb(
    src: &[u8],
    row_pitch: usize,
    width: u32,
    height: u32,
    order: PixelOrder,
    out: &mut [u32],
) -> Result<()> {
    let width = width as usize;
    let height = height as usize;
    let pixels = width * height;

    if out.len() < pixels {
        return Err(GraphicsError::Readback(format!(
            "destination holds {} pixels, frame needs {}",
            out.len(),
            pixels
        ))
        .into());
    }
    if row_pitch < width * 4 {
        return Err(GraphicsError::Readback(format!(
            "row pitch {} is smaller than row size {}",
            row_pitch,
            width * 4
        ))
        .into());
    }
    if height > 0 && src.len() < row_pitch * (height - 1) + width * 4 {
        return Err(GraphicsError::Readback(format!(
            "staging buffer holds {} bytes, expected {}",
            src.len(),
            row_pitch * height
        ))
        .into());
    }

    for (y, dst_row) in out[..pixels].chunks_exact_mut(width.max(1)).enumerate().take(height) {
        let row = &src[y * row_pitch..y * row_pitch + width * 4];
        for (dst, px) in dst_row.iter_mut().zip(row.chunks_exact(4)) {
            *dst = match order {
                PixelOrder::Rgba => pack_argb(px[3], px[0], px[1], px[2]),
                PixelOrder::Bgra => pack_argb(px[3], px[2], px[1], px[0]),
            };
        }
    }
    Ok(())
}

/// 行对齐（DX12 要求 256 字节）
pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_roundtrip_and_quantize() {
        let p = pack_argb(0xff, 0x12, 0x34, 0x56);
        assert_eq!(p, 0xff123456);
        assert_eq!(unpack_argb(p), (0xff, 0x12, 0x34, 0x56));
        // 0.1 * 255 = 25.5 -> 26
        assert_eq!(pack_color([0.1, 0.1, 0.12, 1.0]), pack_argb(255, 26, 26, 31));
    }

    #[test]
    fn test_channels_within() {
        let a = pack_argb(255, 26, 26, 31);
        assert!(channels_within(a, pack_argb(255, 25, 27, 31), 1));
        assert!(!channels_within(a, pack_argb(255, 24, 26, 31), 1));
    }

    #[test]
    fn test_copy_rows_with_padding() {
        // 2x2，行距 12 字节（4 字节填充）
        let src = [
            1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0, //
            9, 10, 11, 12, 13, 14, 15, 16, 0, 0, 0, 0,
        ];
        let mut out = [0u32; 4];
        copy_rows_to_argb(&src, 12, 2, 2, PixelOrder::Rgba, &mut out).unwrap();
        assert_eq!(out[0], pack_argb(4, 1, 2, 3));
        assert_eq!(out[3], pack_argb(16, 13, 14, 15));

        copy_rows_to_argb(&src, 12, 2, 2, PixelOrder::Bgra, &mut out).unwrap();
        assert_eq!(out[0], pack_argb(4, 3, 2, 1));
    }

    #[test]
    fn test_copy_rows_rejects_small_destination() {
        let src = [0u8; 16];
        let mut out = [0u32; 3];
        assert!(copy_rows_to_argb(&src, 8, 2, 2, PixelOrder::Rgba, &mut out).is_err());
        let mut out = [0u32; 4];
        assert!(copy_rows_to_argb(&src[..10], 8, 2, 2, PixelOrder::Rgba, &mut out).is_err());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(800 * 4, 256), 3328);
        assert_eq!(align_up(256, 256), 256);
    }
}
