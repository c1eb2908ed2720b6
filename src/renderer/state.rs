//! 设备共享的绘制状态
//!
//! 每个后端的上下文里放一份 `DrawState`（`RefCell`），设备的 setter 写它，
//! 缓冲区绘制时读它。坐标一律以左上角为原点。

use super::backend::BlendMode;

/// 像素矩形（左上角原点）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// 与帧边界求交（Vulkan / DX12 / Metal 都要求剪裁矩形在目标内）
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let x0 = self.x.clamp(0, width as i32);
        let y0 = self.y.clamp(0, height as i32);
        let x1 = (self.x + self.width as i32).clamp(0, width as i32);
        let y1 = (self.y + self.height as i32).clamp(0, height as i32);
        Rect::new(x0, y0, (x1 - x0).max(0) as u32, (y1 - y0).max(0) as u32)
    }
}

/// 帧统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// 已完成的帧
    pub frames: u64,
    /// 实际发出的绘制调用
    pub draw_calls: u64,
    /// 被跳过的绘制调用
    pub skipped_draws: u64,
}

/// 绘制被跳过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoFrame,
    NoShader,
    NoTexture,
    Empty,
    Disposed,
}

/// 绘制前的统一检查
///
/// # 参数
///
/// * `in_frame` - 是否有打开的帧
/// * `shader` - 当前程序：`None` 表示没有有效程序，`Some(needs_texture)` 表示有
/// * `texture_bound` - 纹理单元 0 是否有纹理
/// * `count` - 顶点数
pub fn check_draw(in_frame: bool, shader: Option<bool>, texture_bound: bool, count: u32) -> Result<(), SkipReason> {
    if !in_frame {
        return Err(SkipReason::NoFrame);
    }
    let needs_texture = shader.ok_or(SkipReason::NoShader)?;
    if needs_texture && !texture_bound {
        return Err(SkipReason::NoTexture);
    }
    if count == 0 {
        return Err(SkipReason::Empty);
    }
    Ok(())
}

/// 把 `[first, first + count)` 裁剪到已上传的顶点范围内
///
/// # 返回值
///
/// 实际可绘制的顶点数
pub fn clamp_draw_range(first: u32, count: u32, vertex_count: u32) -> u32 {
    count.min(vertex_count.saturating_sub(first))
}

/// 设备级绘制状态
#[derive(Debug, Clone)]
pub struct DrawState {
    /// 离屏帧尺寸（下一帧生效）
    pub frame_width: u32,
    pub frame_height: u32,
    pub viewport: Rect,
    pub scissor_enabled: bool,
    pub scissor: Rect,
    pub blend: BlendMode,
    pub line_width: f32,
    pub max_line_width: f32,
    pub line_smoothing: bool,
    pub depth_test: bool,
    pub clear_color: [f32; 4],
    pub in_frame: bool,
    /// 帧序号，从 1 开始；资源用它判断是否被本帧引用
    pub frame_serial: u64,
    pub stats: FrameStats,
}

impl DrawState {
    pub fn new(width: u32, height: u32, clear_color: [f32; 4]) -> Self {
        Self {
            frame_width: width.max(1),
            frame_height: height.max(1),
            viewport: Rect::full(width, height),
            scissor_enabled: false,
            scissor: Rect::full(width, height),
            blend: BlendMode::default(),
            line_width: 1.0,
            max_line_width: 1.0,
            line_smoothing: false,
            depth_test: false,
            clear_color,
            in_frame: false,
            frame_serial: 0,
            stats: FrameStats::default(),
        }
    }

    /// `set_viewport`：帧外同时设置下一帧的尺寸
    pub fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = Rect::new(x, y, width, height);
        if !self.in_frame && width > 0 && height > 0 {
            self.frame_width = width;
            self.frame_height = height;
        }
    }

    /// 线宽限制在 `[1, max_line_width]`
    pub fn set_line_width(&mut self, width: f32) {
        let clamped = if width.is_finite() { width.clamp(1.0, self.max_line_width.max(1.0)) } else { 1.0 };
        self.line_width = clamped;
    }

    /// 帧开始：视口和剪裁重置为整帧
    pub fn begin(&mut self) {
        self.in_frame = true;
        self.frame_serial += 1;
        self.viewport = Rect::full(self.frame_width, self.frame_height);
        self.scissor = Rect::full(self.frame_width, self.frame_height);
        self.scissor_enabled = false;
    }

    pub fn end(&mut self) {
        if self.in_frame {
            self.in_frame = false;
            self.stats.frames += 1;
        }
    }

    /// 当前生效的剪裁矩形（已与帧求交）
    pub fn effective_scissor(&self) -> Rect {
        if self.scissor_enabled {
            self.scissor.clamp_to(self.frame_width, self.frame_height)
        } else {
            Rect::full(self.frame_width, self.frame_height)
        }
    }

    /// 某个资源在本帧是否已被引用
    pub fn used_this_frame(&self, last_used_serial: u64) -> bool {
        self.in_frame && last_used_serial == self.frame_serial
    }

    pub fn record_draw(&mut self) {
        self.stats.draw_calls += 1;
    }

    pub fn record_skip(&mut self, reason: SkipReason) {
        self.stats.skipped_draws += 1;
        tracing::debug!("Draw skipped: {:?}", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_draw() {
        assert_eq!(check_draw(false, Some(false), false, 3), Err(SkipReason::NoFrame));
        assert_eq!(check_draw(true, None, false, 3), Err(SkipReason::NoShader));
        assert_eq!(check_draw(true, Some(true), false, 3), Err(SkipReason::NoTexture));
        assert_eq!(check_draw(true, Some(false), false, 0), Err(SkipReason::Empty));
        assert_eq!(check_draw(true, Some(true), true, 3), Ok(()));
    }

    #[test]
    fn test_clamp_draw_range() {
        assert_eq!(clamp_draw_range(0, 6, 6), 6);
        assert_eq!(clamp_draw_range(4, 6, 6), 2);
        assert_eq!(clamp_draw_range(9, 3, 6), 0);
    }

    #[test]
    fn test_viewport_sets_frame_size_outside_frame() {
        let mut state = DrawState::new(800, 600, [0.0; 4]);
        state.set_viewport(0, 0, 320, 200);
        assert_eq!((state.frame_width, state.frame_height), (320, 200));

        state.begin();
        state.set_viewport(10, 10, 50, 50);
        assert_eq!((state.frame_width, state.frame_height), (320, 200));
        assert_eq!(state.viewport, Rect::new(10, 10, 50, 50));
    }

    #[test]
    fn test_line_width_clamp() {
        let mut state = DrawState::new(10, 10, [0.0; 4]);
        state.max_line_width = 8.0;
        state.set_line_width(0.2);
        assert_eq!(state.line_width, 1.0);
        state.set_line_width(20.0);
        assert_eq!(state.line_width, 8.0);
        state.set_line_width(f32::NAN);
        assert_eq!(state.line_width, 1.0);
    }

    #[test]
    fn test_frame_serial_tracks_usage() {
        let mut state = DrawState::new(10, 10, [0.0; 4]);
        state.begin();
        let serial = state.frame_serial;
        assert!(state.used_this_frame(serial));
        state.end();
        assert!(!state.used_this_frame(serial));
        assert_eq!(state.stats.frames, 1);
    }

    #[test]
    fn test_scissor_clamped_to_frame() {
        let mut state = DrawState::new(100, 50, [0.0; 4]);
        state.begin();
        state.scissor_enabled = true;
        state.scissor = Rect::new(-10, 40, 50, 50);
        assert_eq!(state.effective_scissor(), Rect::new(0, 40, 40, 10));
    }
}
