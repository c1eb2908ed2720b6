//! 渲染设备接口
//!
//! 每个后端实现一次 `RenderDevice`（帧生命周期、状态设置、回读）
//! 和一次 `ResourceFactory`（着色器、缓冲区、纹理的创建和着色器注册表）。
//!
//! # 设计说明
//!
//! 设备、工厂和所有资源共享同一个 `Rc` 上下文，因此它们都是 `!Send`，
//! 只能在渲染线程上使用。跨线程的工作通过 `ResourceManager` 的操作队列投递。

use std::any::Any;
use std::rc::Rc;

use super::backend::{Backend, BlendMode};
use super::buffer::{BufferDescriptor, SharedBuffer};
use super::frame::FrameState;
use super::handle::HandleLedger;
use super::shader::{SharedShader, ShaderSource};
use super::state::FrameStats;
use super::texture::{SharedTexture, TextureDescriptor};
use crate::core::error::{GraphicsError, Result};

/// 后端资源工厂
///
/// 由已初始化的设备提供，资源管理器通过它创建所有 GPU 资源。
pub trait ResourceFactory {
    fn backend(&self) -> Backend;

    /// 编译着色器。编译失败返回一个 `is_valid() == false` 的着色器
    fn create_shader(&self, source: &ShaderSource) -> SharedShader;

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<SharedBuffer>;

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<SharedTexture>;

    /// 后端着色器注册表：内置名称对应的源码
    fn shader_source(&self, name: &str) -> Option<ShaderSource>;

    /// 销毁所有缓存的管线
    fn clear_pipeline_cache(&self);

    /// 等待 GPU 空闲
    fn wait_idle(&self);
}

/// 渲染设备
pub trait RenderDevice {
    /// 创建原生设备、命令对象、Fence 和离屏目标
    ///
    /// 已初始化时为空操作；释放后调用返回错误。
    fn initialize(&mut self) -> Result<()>;

    /// 等待 GPU 完成并释放帧相关的原生对象，可重复调用
    fn dispose(&mut self);

    fn is_initialized(&self) -> bool;

    fn backend_type(&self) -> Backend;

    fn frame_state(&self) -> FrameState;

    /// 开始一帧
    ///
    /// 未初始化时为空操作；帧内再次调用返回 `InvalidState`，当前帧不受影响。
    fn begin_frame(&mut self) -> Result<()>;

    /// 提交并同步等待本帧完成；没有打开的帧时为空操作
    fn end_frame(&mut self) -> Result<()>;

    /// 设置视口（左上角原点）。帧外调用同时决定下一帧的离屏尺寸
    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32);

    fn set_scissor_enabled(&mut self, enabled: bool);

    /// 剪裁矩形（左上角原点）
    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32);

    fn set_blend_mode(&mut self, mode: BlendMode);

    /// 线宽，限制在 `[1, max_line_width()]`
    fn set_line_width(&mut self, width: f32);

    fn set_line_smoothing(&mut self, enabled: bool);

    /// 2D 渲染不使用深度缓冲，只记录状态
    fn set_depth_test_enabled(&mut self, enabled: bool);

    /// 设置清屏颜色；帧内调用会立即清除颜色目标
    fn clear_screen(&mut self, r: f32, g: f32, b: f32, a: f32);

    fn clear_depth(&mut self);

    /// 资源工厂，初始化前为 `None`
    fn resource_factory(&self) -> Option<Rc<dyn ResourceFactory>>;

    fn create_shader(&self, source: &ShaderSource) -> Result<SharedShader> {
        let factory = self.resource_factory().ok_or(GraphicsError::NotInitialized)?;
        Ok(factory.create_shader(source))
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<SharedBuffer> {
        let factory = self.resource_factory().ok_or(GraphicsError::NotInitialized)?;
        factory.create_buffer(descriptor)
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<SharedTexture> {
        let factory = self.resource_factory().ok_or(GraphicsError::NotInitialized)?;
        factory.create_texture(descriptor)
    }

    fn max_line_width(&self) -> f32;

    fn max_texture_size(&self) -> u32;

    /// 适配器 / 驱动描述
    fn renderer_info(&self) -> String;

    /// 当前离屏帧尺寸
    fn frame_size(&self) -> (u32, u32);

    fn supports_pixel_readback(&self) -> bool {
        true
    }

    /// 读取最近完成的一帧，输出 ARGB，第 0 行为顶部
    ///
    /// `pixels.len()` 必须不小于 `width * height`。
    fn read_frame_pixels(&mut self, pixels: &mut [u32]) -> Result<()>;

    fn frame_stats(&self) -> FrameStats;

    /// 原生句柄账本
    fn ledger(&self) -> HandleLedger;

    fn as_any(&self) -> &dyn Any;
}
