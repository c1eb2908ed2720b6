//! 原生句柄与生命周期账本
//!
//! 每个原生对象（设备、缓冲区、纹理、管线……）在创建时向设备的 `HandleLedger`
//! 登记，释放时注销。账本只做计数和校验，原生对象本身由各后端的 RAII 包装持有。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// 原生资源句柄，0 表示"无资源"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(u64);

impl Handle {
    /// 空句柄
    pub const NONE: Handle = Handle(0);

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 原生对象种类，仅用于日志和统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Device,
    Queue,
    CommandPool,
    Fence,
    RenderTarget,
    Staging,
    Shader,
    Pipeline,
    Buffer,
    Texture,
    Sampler,
    DescriptorHeap,
}

#[derive(Default)]
struct LedgerState {
    next: u64,
    live: HashMap<u64, HandleKind>,
    created: u64,
    released: u64,
    double_releases: u64,
}

/// 句柄账本
///
/// 可在设备和其资源之间共享（克隆只复制引用）。
#[derive(Clone, Default)]
pub struct HandleLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl HandleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 登记一个新创建的原生对象
    pub fn register(&self, kind: HandleKind) -> Handle {
        let mut state = self.lock();
        state.next += 1;
        let id = state.next;
        state.live.insert(id, kind);
        state.created += 1;
        Handle(id)
    }

    /// 注销一个原生对象
    ///
    /// # 返回值
    ///
    /// 句柄存活时返回 `true`；空句柄或重复释放返回 `false`，后者计入 `double_releases`
    pub fn release(&self, handle: Handle) -> bool {
        if handle.is_none() {
            return false;
        }
        let mut state = self.lock();
        if state.live.remove(&handle.0).is_some() {
            state.released += 1;
            true
        } else {
            state.double_releases += 1;
            tracing::error!("Native handle {} released twice", handle);
            false
        }
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.lock().live.contains_key(&handle.0)
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// 某一种类的存活数量
    pub fn live_of(&self, kind: HandleKind) -> usize {
        self.lock().live.values().filter(|k| **k == kind).count()
    }

    pub fn created(&self) -> u64 {
        self.lock().created
    }

    pub fn released(&self) -> u64 {
        self.lock().released
    }

    pub fn double_releases(&self) -> u64 {
        self.lock().double_releases
    }
}

impl fmt::Debug for HandleLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("HandleLedger")
            .field("live", &state.live.len())
            .field("created", &state.created)
            .field("released", &state.released)
            .field("double_releases", &state.double_releases)
            .finish()
    }
}

/// 账本登记项，drop 时自动注销
///
/// 后端的 RAII 包装把它作为字段持有，原生对象与登记项同生共死。
pub struct Tracked {
    ledger: HandleLedger,
    handle: Handle,
}

impl Tracked {
    pub fn new(ledger: &HandleLedger, kind: HandleKind) -> Self {
        Self {
            ledger: ledger.clone(),
            handle: ledger.register(kind),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.ledger.release(self.handle);
    }
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tracked({})", self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_release() {
        let ledger = HandleLedger::new();
        let a = ledger.register(HandleKind::Buffer);
        let b = ledger.register(HandleKind::Texture);
        assert_ne!(a, b);
        assert!(!a.is_none());
        assert_eq!(ledger.live_count(), 2);
        assert_eq!(ledger.live_of(HandleKind::Buffer), 1);

        assert!(ledger.release(a));
        assert!(!ledger.release(a));
        assert_eq!(ledger.double_releases(), 1);
        assert_eq!(ledger.live_count(), 1);
        assert_eq!(ledger.created(), 2);
        assert_eq!(ledger.released(), 1);
    }

    #[test]
    fn test_none_handle_is_not_a_double_release() {
        let ledger = HandleLedger::new();
        assert!(!ledger.release(Handle::NONE));
        assert_eq!(ledger.double_releases(), 0);
    }

    #[test]
    fn test_tracked_releases_on_drop() {
        let ledger = HandleLedger::new();
        {
            let tracked = Tracked::new(&ledger, HandleKind::Pipeline);
            assert!(ledger.is_live(tracked.handle()));
        }
        assert_eq!(ledger.live_count(), 0);
        assert_eq!(ledger.double_releases(), 0);
    }
}
