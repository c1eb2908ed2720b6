//! 帧生命周期状态机
//!
//! 所有后端共用同一套状态转换：
//!
//! ```text
//! Uninitialized -> Initialized -> (InFrame <-> Initialized) -> Disposed
//! ```
//!
//! `Disposed` 是终止状态，之后不能再次初始化。

use crate::core::error::{GraphicsError, Result};

/// 设备帧状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// 尚未初始化
    Uninitialized,
    /// 已初始化，没有打开的帧
    Initialized,
    /// 正在录制一帧
    InFrame,
    /// 已释放
    Disposed,
}

/// 帧状态跟踪器
///
/// 只负责状态校验，原生命令对象的重置和提交由各后端完成。
#[derive(Debug)]
pub struct FrameTracker {
    state: FrameState,
    frames_completed: u64,
}

impl Default for FrameTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTracker {
    pub fn new() -> Self {
        Self {
            state: FrameState::Uninitialized,
            frames_completed: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// 已初始化且未释放（包括帧内）
    pub fn is_initialized(&self) -> bool {
        matches!(self.state, FrameState::Initialized | FrameState::InFrame)
    }

    pub fn in_frame(&self) -> bool {
        self.state == FrameState::InFrame
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    /// 检查是否需要执行初始化
    ///
    /// # 返回值
    ///
    /// 需要创建原生对象时返回 `Ok(true)`，已初始化返回 `Ok(false)`，已释放返回错误
    pub fn needs_initialize(&self) -> Result<bool> {
        match self.state {
            FrameState::Uninitialized => Ok(true),
            FrameState::Initialized | FrameState::InFrame => Ok(false),
            FrameState::Disposed => Err(GraphicsError::InvalidState(
                "device has been disposed and cannot be re-initialized".to_string(),
            )
            .into()),
        }
    }

    /// 原生对象创建完成后调用
    pub fn mark_initialized(&mut self) {
        if self.state == FrameState::Uninitialized {
            self.state = FrameState::Initialized;
        }
    }

    /// 打开一帧
    ///
    /// # 返回值
    ///
    /// 进入帧内返回 `Ok(true)`；未初始化或已释放时为空操作 `Ok(false)`；
    /// 已在帧内返回 `InvalidState` 错误，当前帧保持不变
    pub fn begin_frame(&mut self) -> Result<bool> {
        match self.state {
            FrameState::Initialized => {
                self.state = FrameState::InFrame;
                Ok(true)
            }
            FrameState::InFrame => Err(GraphicsError::InvalidState(
                "begin_frame called while a frame is already open".to_string(),
            )
            .into()),
            FrameState::Uninitialized | FrameState::Disposed => Ok(false),
        }
    }

    /// 帧开始失败时回退到 `Initialized`
    pub fn abort_frame(&mut self) {
        if self.state == FrameState::InFrame {
            self.state = FrameState::Initialized;
        }
    }

    /// 关闭当前帧
    ///
    /// # 返回值
    ///
    /// 确实关闭了一帧返回 `true`，没有打开的帧返回 `false`
    pub fn end_frame(&mut self) -> bool {
        if self.state == FrameState::InFrame {
            self.state = FrameState::Initialized;
            self.frames_completed += 1;
            true
        } else {
            false
        }
    }

    /// 进入终止状态
    ///
    /// # 返回值
    ///
    /// 返回进入前的状态，调用方据此决定是否需要释放原生对象
    pub fn dispose(&mut self) -> FrameState {
        std::mem::replace(&mut self.state, FrameState::Disposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut tracker = FrameTracker::new();
        assert_eq!(tracker.begin_frame().unwrap(), false);
        assert!(!tracker.end_frame());

        assert!(tracker.needs_initialize().unwrap());
        tracker.mark_initialized();
        assert!(!tracker.needs_initialize().unwrap());
        assert!(tracker.is_initialized());

        assert!(tracker.begin_frame().unwrap());
        assert!(tracker.in_frame());
        assert!(tracker.end_frame());
        assert_eq!(tracker.frames_completed(), 1);
        assert_eq!(tracker.state(), FrameState::Initialized);
    }

    #[test]
    fn test_begin_inside_frame_is_rejected() {
        let mut tracker = FrameTracker::new();
        tracker.mark_initialized();
        tracker.begin_frame().unwrap();
        assert!(tracker.begin_frame().is_err());
        assert!(tracker.in_frame());
    }

    #[test]
    fn test_dispose_is_terminal() {
        let mut tracker = FrameTracker::new();
        tracker.mark_initialized();
        assert_eq!(tracker.dispose(), FrameState::Initialized);
        assert_eq!(tracker.dispose(), FrameState::Disposed);
        assert!(tracker.needs_initialize().is_err());
        assert!(!tracker.is_initialized());
        assert_eq!(tracker.begin_frame().unwrap(), false);
    }

    #[test]
    fn test_abort_frame() {
        let mut tracker = FrameTracker::new();
        tracker.mark_initialized();
        tracker.begin_frame().unwrap();
        tracker.abort_frame();
        assert_eq!(tracker.state(), FrameState::Initialized);
        assert_eq!(tracker.frames_completed(), 0);
    }
}
