//! 后端类型与通用渲染状态枚举
//!
//! 这些枚举与具体图形 API 无关，每个后端再把它们翻译成自己的原生常量。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// OpenGL（通过 wgpu 的 GL 后端）
    OpenGl,
    /// Vulkan
    Vulkan,
    /// Metal（仅 macOS）
    Metal,
    /// DirectX 12（仅 Windows）
    Dx12,
    /// 自动选择
    Auto,
}

impl Backend {
    /// 所有具体后端（不含 `Auto`）
    pub const CONCRETE: [Backend; 4] = [Backend::OpenGl, Backend::Vulkan, Backend::Metal, Backend::Dx12];

    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            Backend::OpenGl => "OpenGL",
            Backend::Vulkan => "Vulkan",
            Backend::Metal => "Metal",
            Backend::Dx12 => "DirectX 12",
            Backend::Auto => "Auto",
        }
    }

    /// 配置文件 / 命令行中使用的小写标识
    pub fn id(&self) -> &'static str {
        match self {
            Backend::OpenGl => "opengl",
            Backend::Vulkan => "vulkan",
            Backend::Metal => "metal",
            Backend::Dx12 => "dx12",
            Backend::Auto => "auto",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opengl" | "gl" => Ok(Backend::OpenGl),
            "vulkan" | "vk" => Ok(Backend::Vulkan),
            "metal" | "mtl" => Ok(Backend::Metal),
            "dx12" | "d3d12" | "directx12" => Ok(Backend::Dx12),
            "auto" => Ok(Backend::Auto),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// 混合因子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    DstAlpha,
}

/// 一组 RGB / Alpha 混合因子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendFactors {
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

/// 混合模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// 不混合，直接覆盖
    None,
    /// 标准 alpha 混合
    #[default]
    Alpha,
    /// 加法混合
    Additive,
    /// 乘法混合
    Multiply,
    /// 预乘 alpha
    PremultipliedAlpha,
}

impl BlendMode {
    /// 混合因子，`None` 返回 `None`（混合关闭）
    pub fn factors(&self) -> Option<BlendFactors> {
        use BlendFactor::*;
        let (src_color, dst_color, src_alpha, dst_alpha) = match self {
            BlendMode::None => return None,
            BlendMode::Alpha => (SrcAlpha, OneMinusSrcAlpha, One, OneMinusSrcAlpha),
            BlendMode::Additive => (SrcAlpha, One, One, One),
            BlendMode::Multiply => (DstColor, Zero, DstAlpha, Zero),
            BlendMode::PremultipliedAlpha => (One, OneMinusSrcAlpha, One, OneMinusSrcAlpha),
        };
        Some(BlendFactors { src_color, dst_color, src_alpha, dst_alpha })
    }
}

/// 图元绘制模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawMode {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
}

/// 图元拓扑大类（DX12 PSO 只区分这一层）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyClass {
    Point,
    Line,
    Triangle,
}

impl DrawMode {
    pub fn topology_class(&self) -> TopologyClass {
        match self {
            DrawMode::Points => TopologyClass::Point,
            DrawMode::Lines | DrawMode::LineStrip => TopologyClass::Line,
            DrawMode::Triangles | DrawMode::TriangleStrip => TopologyClass::Triangle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse_and_serde() {
        assert_eq!("Vulkan".parse::<Backend>(), Ok(Backend::Vulkan));
        assert_eq!("d3d12".parse::<Backend>(), Ok(Backend::Dx12));
        assert!("glide".parse::<Backend>().is_err());

        #[derive(Deserialize)]
        struct Wrap {
            b: Backend,
        }
        let w: Wrap = toml::from_str("b = \"opengl\"").unwrap();
        assert_eq!(w.b, Backend::OpenGl);
        for backend in Backend::CONCRETE {
            assert_eq!(backend.id().parse::<Backend>(), Ok(backend));
        }
    }

    #[test]
    fn test_blend_factors() {
        assert_eq!(BlendMode::default(), BlendMode::Alpha);
        assert!(BlendMode::None.factors().is_none());

        let additive = BlendMode::Additive.factors().unwrap();
        assert_eq!(additive.src_color, BlendFactor::SrcAlpha);
        assert_eq!(additive.dst_color, BlendFactor::One);
        assert_eq!(additive.src_alpha, BlendFactor::One);

        let multiply = BlendMode::Multiply.factors().unwrap();
        assert_eq!(multiply.dst_alpha, BlendFactor::Zero);
        assert_eq!(multiply.src_alpha, BlendFactor::DstAlpha);
    }

    #[test]
    fn test_topology_class() {
        assert_eq!(DrawMode::LineStrip.topology_class(), TopologyClass::Line);
        assert_eq!(DrawMode::TriangleStrip.topology_class(), TopologyClass::Triangle);
        assert_eq!(DrawMode::Points.topology_class(), TopologyClass::Point);
    }
}
