//! 着色器抽象
//!
//! 每个着色器程序只有一个固定的 uniform 块：正交投影矩阵加一个颜色。
//! 各后端用自己的方式把它送进 GPU（push constant、root constant、
//! `set_vertex_bytes` 或 uniform buffer），但内存布局完全一致。

use bytemuck::{Pod, Zeroable};
use nalgebra::Matrix4;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// 内置着色器名称：顶点色 × uColor
pub const SHADER_DEFAULT: &str = "default";
/// 内置着色器名称：只用 uColor
pub const SHADER_SIMPLE: &str = "simple";
/// 内置着色器名称：字形图集采样
pub const SHADER_TEXT: &str = "text";

/// 所有内置着色器
pub const BUILTIN_SHADERS: [&str; 3] = [SHADER_DEFAULT, SHADER_SIMPLE, SHADER_TEXT];

/// 着色器共享的 uniform 块
///
/// 80 字节，`projection` 为列主序。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBlock {
    pub projection: [f32; 16],
    pub color: [f32; 4],
}

impl Default for UniformBlock {
    fn default() -> Self {
        Self {
            projection: IDENTITY,
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Uniform 值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// 列主序 4x4 矩阵
    Mat4([f32; 16]),
}

impl UniformBlock {
    /// 字节大小（push constant / root constant 范围）
    pub const SIZE: usize = std::mem::size_of::<UniformBlock>();

    /// 按名称写入 uniform
    ///
    /// # 返回值
    ///
    /// 名称被识别并写入时返回 `true`。采样器 uniform 和未知名称返回 `false`。
    pub fn set(&mut self, name: &str, value: UniformValue) -> bool {
        match (name, value) {
            ("uProjection" | "projection", UniformValue::Mat4(m)) => {
                self.projection = m;
                true
            }
            ("uColor" | "color" | "uniformColor", UniformValue::Vec4(c)) => {
                self.color = c;
                true
            }
            ("uColor" | "color" | "uniformColor", UniformValue::Vec3([r, g, b])) => {
                self.color = [r, g, b, 1.0];
                true
            }
            // 采样器绑定由纹理单元决定
            ("uTexture", _) => false,
            _ => {
                tracing::trace!("Ignoring uniform '{}' ({:?})", name, value);
                false
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// 作为 32 位常量序列（DX12 root constants）
    pub fn as_words(&self) -> &[u32] {
        bytemuck::cast_slice(bytemuck::bytes_of(self))
    }
}

/// 像素坐标的正交投影（左上角为原点）
pub fn orthographic(width: f32, height: f32) -> [f32; 16] {
    let m = Matrix4::new_orthographic(0.0, width.max(1.0), height.max(1.0), 0.0, -1.0, 1.0);
    let mut out = [0.0f32; 16];
    out.copy_from_slice(m.as_slice());
    out
}

/// 转置 4x4 矩阵（行主序 <-> 列主序）
pub fn transpose4(m: &[f32; 16]) -> [f32; 16] {
    let mut out = [0.0f32; 16];
    for row in 0..4 {
        for col in 0..4 {
            out[col * 4 + row] = m[row * 4 + col];
        }
    }
    out
}

/// 各后端的着色器代码
#[derive(Debug, Clone)]
pub enum ShaderCode {
    /// GLSL 顶点 + 片元源码（OpenGL / Vulkan）
    Glsl { vertex: String, fragment: String },
    /// 预编译 SPIR-V（Vulkan）
    SpirV { vertex: Vec<u8>, fragment: Vec<u8> },
    /// 单个 HLSL 源文件，包含两个入口（DX12）
    Hlsl { source: String, vertex_entry: String, fragment_entry: String },
    /// 单个 MSL 源文件，包含两个入口（Metal）
    Msl { source: String, vertex_entry: String, fragment_entry: String },
}

impl ShaderCode {
    pub fn kind(&self) -> &'static str {
        match self {
            ShaderCode::Glsl { .. } => "GLSL",
            ShaderCode::SpirV { .. } => "SPIR-V",
            ShaderCode::Hlsl { .. } => "HLSL",
            ShaderCode::Msl { .. } => "MSL",
        }
    }
}

/// 着色器源
#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub name: String,
    pub code: ShaderCode,
    /// 片元阶段是否采样纹理单元 0
    pub needs_texture: bool,
}

impl ShaderSource {
    pub fn glsl(name: impl Into<String>, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: ShaderCode::Glsl { vertex: vertex.into(), fragment: fragment.into() },
            needs_texture: false,
        }
    }

    pub fn spirv(name: impl Into<String>, vertex: Vec<u8>, fragment: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            code: ShaderCode::SpirV { vertex, fragment },
            needs_texture: false,
        }
    }

    pub fn hlsl(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: ShaderCode::Hlsl {
                source: source.into(),
                vertex_entry: "VSMain".to_string(),
                fragment_entry: "PSMain".to_string(),
            },
            needs_texture: false,
        }
    }

    pub fn msl(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: ShaderCode::Msl {
                source: source.into(),
                vertex_entry: "vertexMain".to_string(),
                fragment_entry: "fragmentMain".to_string(),
            },
            needs_texture: false,
        }
    }

    /// 标记片元阶段需要纹理
    pub fn with_texture(mut self) -> Self {
        self.needs_texture = true;
        self
    }
}

/// 着色器程序
///
/// 编译失败不是错误：`is_valid()` 返回 `false`，绑定它会清除当前程序，
/// 之后的绘制被跳过并计数。
pub trait Shader {
    /// 注册名称
    fn name(&self) -> &str;

    /// 是否编译成功且未释放
    fn is_valid(&self) -> bool;

    /// 设为当前程序
    fn bind(&mut self);

    /// 如果当前程序是自己，则清除
    fn unbind(&mut self);

    /// 写入 uniform，绑定后设置的值对下一次绘制生效
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    /// 释放原生对象，可重复调用
    fn dispose(&mut self);

    /// 编译日志（失败时）
    fn compile_log(&self) -> Option<&str>;

    fn as_any(&self) -> &dyn Any;

    fn set_uniform_int(&mut self, name: &str, value: i32) {
        self.set_uniform(name, UniformValue::Int(value));
    }

    fn set_uniform_float(&mut self, name: &str, value: f32) {
        self.set_uniform(name, UniformValue::Float(value));
    }

    fn set_uniform_vec2(&mut self, name: &str, x: f32, y: f32) {
        self.set_uniform(name, UniformValue::Vec2([x, y]));
    }

    fn set_uniform_vec3(&mut self, name: &str, x: f32, y: f32, z: f32) {
        self.set_uniform(name, UniformValue::Vec3([x, y, z]));
    }

    fn set_uniform_vec4(&mut self, name: &str, x: f32, y: f32, z: f32, w: f32) {
        self.set_uniform(name, UniformValue::Vec4([x, y, z, w]));
    }

    /// `transpose` 为 `true` 时 `matrix` 按行主序解释
    fn set_uniform_matrix4(&mut self, name: &str, matrix: &[f32; 16], transpose: bool) {
        let m = if transpose { transpose4(matrix) } else { *matrix };
        self.set_uniform(name, UniformValue::Mat4(m));
    }
}

/// 资源管理器和调用方共享的着色器
pub type SharedShader = Rc<RefCell<dyn Shader>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_block_layout() {
        assert_eq!(UniformBlock::SIZE, 80);
        assert_eq!(UniformBlock::default().as_words().len(), 20);
        assert_eq!(UniformBlock::default().color, [1.0; 4]);
    }

    #[test]
    fn test_uniform_names() {
        let mut block = UniformBlock::default();
        assert!(block.set("uColor", UniformValue::Vec4([0.5, 0.25, 0.0, 1.0])));
        assert_eq!(block.color, [0.5, 0.25, 0.0, 1.0]);
        assert!(block.set("color", UniformValue::Vec3([1.0, 0.0, 0.0])));
        assert_eq!(block.color, [1.0, 0.0, 0.0, 1.0]);

        let ortho = orthographic(100.0, 50.0);
        assert!(block.set("projection", UniformValue::Mat4(ortho)));
        assert_eq!(block.projection, ortho);

        assert!(!block.set("uTexture", UniformValue::Int(0)));
        assert!(!block.set("uTime", UniformValue::Float(1.0)));
        // 类型不匹配不写入
        assert!(!block.set("uColor", UniformValue::Float(1.0)));
    }

    #[test]
    fn test_orthographic_maps_pixels_to_clip_space() {
        let m = Matrix4::from_column_slice(&orthographic(200.0, 100.0));
        let top_left = m * nalgebra::Vector4::new(0.0, 0.0, 0.0, 1.0);
        let bottom_right = m * nalgebra::Vector4::new(200.0, 100.0, 0.0, 1.0);
        assert!((top_left.x + 1.0).abs() < 1e-6 && (top_left.y - 1.0).abs() < 1e-6);
        assert!((bottom_right.x - 1.0).abs() < 1e-6 && (bottom_right.y + 1.0).abs() < 1e-6);
        assert!(top_left.z.abs() < 1e-6);
    }

    #[test]
    fn test_transpose() {
        let mut rows = [0.0f32; 16];
        rows[3] = 7.0; // 第 0 行第 3 列
        let cols = transpose4(&rows);
        assert_eq!(cols[12], 7.0);
        assert_eq!(transpose4(&cols), rows);
    }

    #[test]
    fn test_shader_source_builders() {
        let text = ShaderSource::hlsl(SHADER_TEXT, "float4 PSMain() : SV_TARGET { return 1; }").with_texture();
        assert!(text.needs_texture);
        assert_eq!(text.code.kind(), "HLSL");
        let simple = ShaderSource::glsl(SHADER_SIMPLE, "void main(){}", "void main(){}");
        assert!(!simple.needs_texture);
    }
}
