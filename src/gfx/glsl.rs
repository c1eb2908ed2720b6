//! GLSL 前端
//!
//! 用 `naga` 解析并验证 GLSL。Vulkan 后端把结果写成 SPIR-V，
//! OpenGL 后端只用它来提前得到可读的编译日志。

use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use naga::{Module, ShaderStage};

/// 解析并验证一个阶段
///
/// # 返回值
///
/// 失败时返回编译日志
pub fn parse(stage: ShaderStage, source: &str) -> Result<(Module, ModuleInfo), String> {
    let mut frontend = glsl::Frontend::default();
    let module = frontend
        .parse(&glsl::Options::from(stage), source)
        .map_err(|e| format!("{:?} shader parse error: {:?}", stage, e))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::PUSH_CONSTANT)
        .validate(&module)
        .map_err(|e| format!("{:?} shader validation error: {:?}", stage, e))?;
    Ok((module, info))
}

/// GLSL 编译为 SPIR-V 字
///
/// 写出时翻转 Y（GL 裁剪空间到 Vulkan 裁剪空间），两种 API 共用同一个投影矩阵。
pub fn to_spirv(stage: ShaderStage, source: &str) -> Result<Vec<u32>, String> {
    let (module, info) = parse(stage, source)?;
    let mut options = spv::Options::default();
    options.flags.insert(spv::WriterFlags::ADJUST_COORDINATE_SPACE);
    spv::write_vec(&module, &info, &options, None).map_err(|e| format!("{:?} SPIR-V generation error: {}", stage, e))
}

/// 字节形式的 SPIR-V 转为字（小端）
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, String> {
    if bytes.len() % 4 != 0 || bytes.len() < 20 {
        return Err(format!("SPIR-V blob has invalid length {}", bytes.len()));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if words[0] != 0x0723_0203 {
        return Err(format!("SPIR-V magic mismatch: {:#010x}", words[0]));
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r#"#version 450
layout(location = 0) in vec2 aPosition;
layout(push_constant) uniform PushConstants { mat4 uProjection; vec4 uColor; } pc;
void main() {
    gl_Position = pc.uProjection * vec4(aPosition, 0.0, 1.0);
}
"#;

    #[test]
    fn test_valid_glsl_compiles() {
        let words = to_spirv(ShaderStage::Vertex, VERTEX).unwrap();
        assert_eq!(words[0], 0x0723_0203);
    }

    #[test]
    fn test_invalid_glsl_reports_log() {
        let err = to_spirv(ShaderStage::Fragment, "#version 450\nvoid main() { undefined_call(); }").unwrap_err();
        assert!(err.contains("Fragment"));
    }

    #[test]
    fn test_spirv_words_checks_magic() {
        assert!(spirv_words(&[0u8; 20]).is_err());
        let mut blob = 0x0723_0203u32.to_le_bytes().to_vec();
        blob.extend_from_slice(&[0u8; 16]);
        assert_eq!(spirv_words(&blob).unwrap().len(), 5);
        assert!(spirv_words(&blob[..7]).is_err());
    }
}
