//! 顶点缓冲区抽象
//!
//! 缓冲区只保存 `f32` 顶点数据，容量以 float 计。
//! 上传时按需增长（`required + required / 2`），从不收缩。
//!
//! 同步模型是每帧提交一次：帧内已被绘制引用的存储如果再次上传，
//! 会换一块新存储，旧存储等帧的 Fence 完成后再释放。

use std::cell::RefCell;
use std::rc::Rc;

use super::backend::DrawMode;

/// 顶点属性语义，决定各后端的 location / semantic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    Position,
    Color,
    TexCoord,
}

impl VertexSemantic {
    /// HLSL 输入语义名
    pub fn hlsl_name(&self) -> &'static str {
        match self {
            VertexSemantic::Position => "POSITION",
            VertexSemantic::Color => "COLOR",
            VertexSemantic::TexCoord => "TEXCOORD",
        }
    }
}

/// 顶点属性
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub name: String,
    pub semantic: VertexSemantic,
    /// 分量数（1..=4）
    pub components: u32,
    /// 在顶点内的偏移（float 数）
    pub offset: u32,
}

impl VertexAttribute {
    pub fn new(name: impl Into<String>, semantic: VertexSemantic, components: u32, offset: u32) -> Self {
        Self {
            name: name.into(),
            semantic,
            components,
            offset,
        }
    }

    pub fn byte_offset(&self) -> u32 {
        self.offset * 4
    }
}

/// 顶点缓冲区描述
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    /// 属性列表，下标即 shader location
    pub attributes: Vec<VertexAttribute>,
    pub floats_per_vertex: u32,
    /// 初始容量（float 数）
    pub initial_capacity: usize,
    /// 是否频繁更新
    pub dynamic: bool,
}

/// 默认初始容量（float 数）
pub const DEFAULT_CAPACITY: usize = 1024;

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self::position_color_2d(DEFAULT_CAPACITY)
    }
}

impl BufferDescriptor {
    /// `[x, y]`
    pub fn position_only_2d(initial_capacity: usize) -> Self {
        Self {
            attributes: vec![VertexAttribute::new("aPosition", VertexSemantic::Position, 2, 0)],
            floats_per_vertex: 2,
            initial_capacity,
            dynamic: true,
        }
    }

    /// `[x, y, r, g, b, a]`
    pub fn position_color_2d(initial_capacity: usize) -> Self {
        Self {
            attributes: vec![
                VertexAttribute::new("aPosition", VertexSemantic::Position, 2, 0),
                VertexAttribute::new("aColor", VertexSemantic::Color, 4, 2),
            ],
            floats_per_vertex: 6,
            initial_capacity,
            dynamic: true,
        }
    }

    /// `[x, y, u, v, r, g, b, a]`
    pub fn text_buffer(initial_capacity: usize) -> Self {
        Self {
            attributes: vec![
                VertexAttribute::new("aPosition", VertexSemantic::Position, 2, 0),
                VertexAttribute::new("aTexCoord", VertexSemantic::TexCoord, 2, 2),
                VertexAttribute::new("aColor", VertexSemantic::Color, 4, 4),
            ],
            floats_per_vertex: 8,
            initial_capacity,
            dynamic: true,
        }
    }

    pub fn stride_bytes(&self) -> u32 {
        self.floats_per_vertex * 4
    }

    /// 至少一个 float 的初始容量
    pub fn capacity_floats(&self) -> usize {
        self.initial_capacity.max(self.floats_per_vertex as usize).max(1)
    }
}

/// 一次上传的执行计划
///
/// 与原生 API 无关，各后端按计划分配 / 复制。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPlan {
    /// 源数据中要复制的起点
    pub src_start: usize,
    /// 实际复制的 float 数（已裁剪）
    pub floats: usize,
    /// 上传后的容量
    pub capacity: usize,
    /// 是否需要新存储（增长或重命名）
    pub reallocate: bool,
    /// 旧存储是否需要等 Fence 完成后再释放
    pub retire_old: bool,
}

impl UploadPlan {
    /// 计算上传计划
    ///
    /// # 参数
    ///
    /// * `data_len` - 源数据长度
    /// * `offset` / `count` - 调用方请求的源范围，越界时裁剪
    /// * `capacity` - 当前容量（float 数）
    /// * `in_use` - 当前存储是否已被本帧的绘制引用
    pub fn new(data_len: usize, offset: usize, count: usize, capacity: usize, in_use: bool) -> Self {
        let src_start = offset.min(data_len);
        let available = data_len - src_start;
        let floats = if count > available {
            tracing::warn!(
                "Buffer upload clamped: requested {} floats at offset {}, only {} available",
                count, offset, available
            );
            available
        } else {
            count
        };

        let grow = floats > capacity;
        let capacity = if grow { grow_capacity(floats) } else { capacity };
        let reallocate = grow || (in_use && floats > 0);

        Self {
            src_start,
            floats,
            capacity,
            reallocate,
            retire_old: reallocate && in_use,
        }
    }

    pub fn src_range(&self) -> std::ops::Range<usize> {
        self.src_start..self.src_start + self.floats
    }
}

/// 增长后的容量
pub fn grow_capacity(required: usize) -> usize {
    required + required / 2
}

/// 顶点缓冲区
pub trait Buffer {
    fn descriptor(&self) -> &BufferDescriptor;

    /// 上传 `data[offset..offset + count]` 到缓冲区起始处，并设置顶点数
    fn upload(&mut self, data: &[f32], offset: usize, count: usize);

    /// 记录为当前顶点缓冲区（绘制时使用）
    fn bind(&mut self);

    fn unbind(&mut self);

    /// 绘制全部顶点
    fn draw(&mut self, mode: DrawMode) {
        let count = self.vertex_count();
        self.draw_range(mode, 0, count);
    }

    /// 绘制 `[first, first + count)` 范围的顶点
    fn draw_range(&mut self, mode: DrawMode, first: u32, count: u32);

    fn vertex_count(&self) -> u32;

    fn set_vertex_count(&mut self, count: u32);

    /// 容量（float 数）
    fn capacity(&self) -> usize;

    /// 释放原生存储，可重复调用
    fn dispose(&mut self);

    fn is_initialized(&self) -> bool;
}

/// 资源管理器和调用方共享的缓冲区
pub type SharedBuffer = Rc<RefCell<dyn Buffer>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let text = BufferDescriptor::text_buffer(64);
        assert_eq!(text.floats_per_vertex, 8);
        assert_eq!(text.stride_bytes(), 32);
        assert_eq!(text.attributes[2].byte_offset(), 16);
        assert_eq!(BufferDescriptor::position_only_2d(8).attributes.len(), 1);
        assert_eq!(BufferDescriptor::default().initial_capacity, 1024);
        assert_eq!(BufferDescriptor::position_color_2d(0).capacity_floats(), 6);
    }

    #[test]
    fn test_growth_policy() {
        let plan = UploadPlan::new(2000, 0, 2000, 1024, false);
        assert!(plan.reallocate);
        assert!(!plan.retire_old);
        assert_eq!(plan.capacity, 3000);

        // 不收缩
        let plan = UploadPlan::new(12, 0, 12, 3000, false);
        assert_eq!(plan.capacity, 3000);
        assert!(!plan.reallocate);
    }

    #[test]
    fn test_clamp_out_of_range() {
        let plan = UploadPlan::new(10, 4, 100, 1024, false);
        assert_eq!(plan.src_range(), 4..10);

        let plan = UploadPlan::new(10, 50, 4, 1024, false);
        assert_eq!(plan.floats, 0);
    }

    #[test]
    fn test_renaming_when_used_this_frame() {
        let plan = UploadPlan::new(12, 0, 12, 1024, true);
        assert!(plan.reallocate);
        assert!(plan.retire_old);
        assert_eq!(plan.capacity, 1024);

        let plan = UploadPlan::new(0, 0, 0, 1024, true);
        assert!(!plan.reallocate);
    }
}
