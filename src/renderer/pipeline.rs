//! 管线状态缓存
//!
//! Vulkan、DX12、Metal 和 wgpu 都需要把着色器、顶点布局、图元拓扑和混合模式
//! 烘焙进一个管线对象。键在这里统一定义，值由各后端决定。

use std::collections::HashMap;

use super::backend::{BlendMode, DrawMode, TopologyClass};
use super::buffer::{BufferDescriptor, VertexSemantic};

/// 顶点布局签名
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutKey {
    pub stride: u32,
    pub attributes: Vec<(VertexSemantic, u32, u32)>,
}

impl From<&BufferDescriptor> for LayoutKey {
    fn from(desc: &BufferDescriptor) -> Self {
        Self {
            stride: desc.stride_bytes(),
            attributes: desc
                .attributes
                .iter()
                .map(|a| (a.semantic, a.components, a.offset))
                .collect(),
        }
    }
}

/// 拓扑在管线中的粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyKey {
    /// 精确的图元类型（Vulkan / wgpu）
    Mode(DrawMode),
    /// 只区分点 / 线 / 三角形（DX12）
    Class(TopologyClass),
    /// 绘制时指定（Metal）
    Dynamic,
}

/// 管线缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    /// 着色器程序的唯一 id
    pub shader_id: u64,
    pub layout: LayoutKey,
    pub topology: TopologyKey,
    pub blend: BlendMode,
}

/// 管线缓存
pub struct PipelineCache<P> {
    entries: HashMap<PipelineKey, P>,
    misses: u64,
}

impl<P> Default for PipelineCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PipelineCache<P> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            misses: 0,
        }
    }

    pub fn get(&self, key: &PipelineKey) -> Option<&P> {
        self.entries.get(key)
    }

    /// 命中直接返回，否则调用 `create` 并缓存结果；创建失败不缓存
    pub fn get_or_try_insert<E>(
        &mut self,
        key: PipelineKey,
        create: impl FnOnce(&PipelineKey) -> std::result::Result<P, E>,
    ) -> std::result::Result<&P, E> {
        use std::collections::hash_map::Entry;
        match self.entries.entry(key) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let value = create(e.key())?;
                self.misses += 1;
                Ok(e.insert(value))
            }
        }
    }

    /// 移除某个着色器的全部管线（着色器释放时）
    pub fn remove_shader(&mut self, shader_id: u64) -> Vec<P> {
        let keys: Vec<PipelineKey> = self
            .entries
            .keys()
            .filter(|k| k.shader_id == shader_id)
            .cloned()
            .collect();
        keys.iter().filter_map(|k| self.entries.remove(k)).collect()
    }

    /// 清空并返回所有管线，调用方负责销毁
    pub fn clear(&mut self) -> Vec<P> {
        self.entries.drain().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 累计创建次数
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(shader_id: u64, mode: DrawMode, blend: BlendMode) -> PipelineKey {
        PipelineKey {
            shader_id,
            layout: LayoutKey::from(&BufferDescriptor::position_color_2d(16)),
            topology: TopologyKey::Mode(mode),
            blend,
        }
    }

    #[test]
    fn test_cache_hits_and_misses() {
        let mut cache: PipelineCache<u32> = PipelineCache::new();
        let mut created = 0;
        for _ in 0..3 {
            let v = cache
                .get_or_try_insert::<()>(key(1, DrawMode::Lines, BlendMode::Alpha), |_| {
                    created += 1;
                    Ok(7)
                })
                .unwrap();
            assert_eq!(*v, 7);
        }
        assert_eq!(created, 1);

        cache
            .get_or_try_insert::<()>(key(1, DrawMode::Lines, BlendMode::Additive), |_| Ok(8))
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let mut cache: PipelineCache<u32> = PipelineCache::new();
        let k = key(2, DrawMode::Triangles, BlendMode::None);
        assert!(cache.get_or_try_insert(k.clone(), |_| Err("boom")).is_err());
        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn test_remove_shader_and_clear() {
        let mut cache: PipelineCache<u32> = PipelineCache::new();
        cache.get_or_try_insert::<()>(key(1, DrawMode::Lines, BlendMode::Alpha), |_| Ok(1)).unwrap();
        cache.get_or_try_insert::<()>(key(2, DrawMode::Lines, BlendMode::Alpha), |_| Ok(2)).unwrap();
        assert_eq!(cache.remove_shader(1), vec![1]);
        assert_eq!(cache.clear(), vec![2]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_layout_key_distinguishes_formats() {
        let a = LayoutKey::from(&BufferDescriptor::position_color_2d(1));
        let b = LayoutKey::from(&BufferDescriptor::text_buffer(1));
        assert_ne!(a, b);
    }
}
