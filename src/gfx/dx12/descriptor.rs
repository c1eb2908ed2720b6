//! DX12 描述符堆
//!
//! 纹理的 SRV 和采样器各放在一个着色器可见的堆里，两者共用同一个槽位下标，
//! 所以一张纹理只需要一个 `SlotAllocator` 槽位。离屏目标的 RTV 放在单独的小堆里。

use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{GraphicsError, Result};

/// 着色器可见堆的槽位数
pub const SHADER_VISIBLE_SLOTS: u32 = 256;

/// 槽位分配器，释放的槽位优先复用
#[derive(Debug, Default)]
pub struct SlotAllocator {
    capacity: u32,
    next: u32,
    free: Vec<u32>,
}

impl SlotAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            next: 0,
            free: Vec::new(),
        }
    }

    pub fn allocate(&mut self) -> Option<u32> {
        if let Some(slot) = self.free.pop() {
            return Some(slot);
        }
        if self.next < self.capacity {
            self.next += 1;
            Some(self.next - 1)
        } else {
            None
        }
    }

    pub fn release(&mut self, slot: u32) {
        if slot < self.next && !self.free.contains(&slot) {
            self.free.push(slot);
        }
    }

    /// 正在使用的槽位数
    pub fn in_use(&self) -> u32 {
        self.next - self.free.len() as u32
    }
}

/// 描述符堆
pub struct DescriptorHeap {
    heap: ID3D12DescriptorHeap,
    increment_size: u32,
    cpu_start: usize,
    gpu_start: Option<u64>,
}

impl DescriptorHeap {
    /// 创建描述符堆
    ///
    /// # 参数
    ///
    /// * `device` - DX12 设备
    /// * `heap_type` - 堆类型
    /// * `count` - 描述符数量
    /// * `shader_visible` - 是否着色器可见（RTV 堆不能可见）
    pub fn new(device: &ID3D12Device, heap_type: D3D12_DESCRIPTOR_HEAP_TYPE, count: u32, shader_visible: bool) -> Result<Self> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type,
            NumDescriptors: count,
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };
        unsafe {
            let heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&desc).map_err(|e| {
                GraphicsError::ResourceCreation(format!("Failed to create descriptor heap ({:?}): {:?}", heap_type, e))
            })?;
            let increment_size = device.GetDescriptorHandleIncrementSize(heap_type);
            let cpu_start = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let gpu_start = shader_visible.then(|| heap.GetGPUDescriptorHandleForHeapStart().ptr);
            Ok(Self {
                heap,
                increment_size,
                cpu_start,
                gpu_start,
            })
        }
    }

    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }

    pub fn cpu_handle(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.cpu_start + (index * self.increment_size) as usize,
        }
    }

    /// 只对着色器可见的堆有效
    pub fn gpu_handle(&self, index: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: self.gpu_start.unwrap_or(0) + (index * self.increment_size) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_reuse() {
        let mut slots = SlotAllocator::new(2);
        assert_eq!(slots.allocate(), Some(0));
        assert_eq!(slots.allocate(), Some(1));
        assert_eq!(slots.allocate(), None);
        slots.release(0);
        slots.release(0);
        assert_eq!(slots.in_use(), 1);
        assert_eq!(slots.allocate(), Some(0));
    }

    #[test]
    fn test_release_unknown_slot_ignored() {
        let mut slots = SlotAllocator::new(4);
        slots.release(3);
        assert_eq!(slots.in_use(), 0);
        assert_eq!(slots.allocate(), Some(0));
    }
}
