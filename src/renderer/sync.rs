//! GPU 同步机制模块
//!
//! 帧级 CPU-GPU 同步：每帧提交时取一个单调递增的 Fence 值，
//! 帧结束时同步等待它完成，然后回收在该帧之前退役的资源。
//!
//! # 使用场景
//!
//! 1. **帧同步**：`end_frame` 阻塞直到 GPU 完成本帧
//! 2. **资源重命名**：帧内被绘制引用过的缓冲区再次上传时换新存储，
//!    旧存储挂到 `RetireQueue` 上，等对应 Fence 值完成后释放

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Fence 值
///
/// 用于 CPU-GPU 同步的单调递增值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个 Fence 值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Fence 管理器
///
/// 跟踪 CPU 侧已发出和 GPU 侧已完成的 Fence 值。
/// DX12 直接把这里的值交给 `ID3D12CommandQueue::Signal`，
/// 其它后端用它给帧编号。
#[derive(Debug, Clone, Default)]
pub struct FenceManager {
    /// 当前 Fence 值（CPU 侧）
    current_value: Arc<AtomicU64>,
    /// 已完成的 Fence 值（GPU 侧）
    completed_value: Arc<AtomicU64>,
}

impl FenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取当前 Fence 值
    pub fn current_value(&self) -> FenceValue {
        FenceValue::new(self.current_value.load(Ordering::Acquire))
    }

    /// 获取已完成的 Fence 值
    pub fn completed_value(&self) -> FenceValue {
        FenceValue::new(self.completed_value.load(Ordering::Acquire))
    }

    /// 获取下一个 Fence 值并递增计数器
    pub fn next_value(&self) -> FenceValue {
        let value = self.current_value.fetch_add(1, Ordering::AcqRel);
        FenceValue::new(value + 1)
    }

    /// 原生等待返回后记录完成值
    pub fn update_completed_value(&self, value: FenceValue) {
        self.completed_value.fetch_max(value.value(), Ordering::AcqRel);
    }

    /// 检查特定 Fence 值是否已完成
    pub fn is_completed(&self, value: FenceValue) -> bool {
        self.completed_value() >= value
    }

    /// 是否有已提交但未确认完成的工作
    pub fn has_pending(&self) -> bool {
        self.completed_value() < self.current_value()
    }
}

/// 退役资源队列
///
/// 资源按退役时的 Fence 值排队，`collect` 释放所有已完成值之前的资源。
pub struct RetireQueue<T> {
    entries: VecDeque<(FenceValue, T)>,
}

impl<T> Default for RetireQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RetireQueue<T> {
    pub fn new() -> Self {
        Self { entries: VecDeque::new() }
    }

    /// 退役一个资源，直到 `until` 完成前都不能释放
    pub fn retire(&mut self, until: FenceValue, resource: T) {
        self.entries.push_back((until, resource));
    }

    /// 取出所有已完成的资源（按退役顺序）
    pub fn collect(&mut self, completed: FenceValue) -> Vec<T> {
        let mut ready = Vec::new();
        while let Some((value, _)) = self.entries.front() {
            if *value > completed {
                break;
            }
            if let Some((_, resource)) = self.entries.pop_front() {
                ready.push(resource);
            }
        }
        ready
    }

    /// 取出全部资源（设备空闲或释放时）
    pub fn drain_all(&mut self) -> Vec<T> {
        self.entries.drain(..).map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_manager() {
        let fences = FenceManager::new();
        let first = fences.next_value();
        let second = fences.next_value();
        assert_eq!(first.value(), 1);
        assert_eq!(second, first.next());
        assert!(fences.has_pending());

        fences.update_completed_value(second);
        fences.update_completed_value(first);
        assert!(fences.is_completed(second));
        assert!(!fences.has_pending());
    }

    #[test]
    fn test_retire_queue_releases_in_order() {
        let mut queue = RetireQueue::new();
        queue.retire(FenceValue::new(1), "a");
        queue.retire(FenceValue::new(2), "b");
        queue.retire(FenceValue::new(3), "c");

        assert!(queue.collect(FenceValue::new(0)).is_empty());
        assert_eq!(queue.collect(FenceValue::new(2)), vec!["a", "b"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_all(), vec!["c"]);
        assert!(queue.is_empty());
    }
}
