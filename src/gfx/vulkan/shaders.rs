//! Vulkan 着色器注册表
//!
//! GLSL 450，运行时由 `naga` 编译为 SPIR-V。uniform 块通过 push constant 传入，
//! 纹理和采样器分开绑定在 set 0 的 binding 0 / 1。

use crate::renderer::shader::{ShaderSource, SHADER_DEFAULT, SHADER_SIMPLE, SHADER_TEXT};

const DEFAULT_VERTEX: &str = r#"#version 450
layout(location = 0) in vec2 aPosition;
layout(location = 1) in vec4 aColor;

layout(push_constant) uniform PushConstants {
    mat4 uProjection;
    vec4 uColor;
} pc;

layout(location = 0) out vec4 vColor;

void main() {
    gl_Position = pc.uProjection * vec4(aPosition, 0.0, 1.0);
    gl_PointSize = 1.0;
    vColor = aColor * pc.uColor;
}
"#;

const DEFAULT_FRAGMENT: &str = r#"#version 450
layout(location = 0) in vec4 vColor;
layout(location = 0) out vec4 fragColor;

void main() {
    fragColor = vColor;
}
"#;

const SIMPLE_VERTEX: &str = r#"#version 450
layout(location = 0) in vec2 aPosition;

layout(push_constant) uniform PushConstants {
    mat4 uProjection;
    vec4 uColor;
} pc;

void main() {
    gl_Position = pc.uProjection * vec4(aPosition, 0.0, 1.0);
    gl_PointSize = 1.0;
}
"#;

const SIMPLE_FRAGMENT: &str = r#"#version 450
layout(push_constant) uniform PushConstants {
    mat4 uProjection;
    vec4 uColor;
} pc;

layout(location = 0) out vec4 fragColor;

void main() {
    fragColor = pc.uColor;
}
"#;

const TEXT_VERTEX: &str = r#"#version 450
layout(location = 0) in vec2 aPosition;
layout(location = 1) in vec2 aTexCoord;
layout(location = 2) in vec4 aColor;

layout(push_constant) uniform PushConstants {
    mat4 uProjection;
    vec4 uColor;
} pc;

layout(location = 0) out vec2 vTexCoord;
layout(location = 1) out vec4 vColor;

void main() {
    gl_Position = pc.uProjection * vec4(aPosition, 0.0, 1.0);
    vTexCoord = aTexCoord;
    vColor = aColor * pc.uColor;
}
"#;

const TEXT_FRAGMENT: &str = r#"#version 450
layout(location = 0) in vec2 vTexCoord;
layout(location = 1) in vec4 vColor;

layout(set = 0, binding = 0) uniform texture2D uTexture;
layout(set = 0, binding = 1) uniform sampler uSampler;

layout(location = 0) out vec4 fragColor;

void main() {
    float alpha = texture(sampler2D(uTexture, uSampler), vTexCoord).r;
    if (alpha < 0.01) {
        discard;
    }
    fragColor = vec4(vColor.rgb, vColor.a * alpha);
}
"#;

/// 按逻辑名称查找内置着色器
pub fn source(name: &str) -> Option<ShaderSource> {
    match name {
        SHADER_DEFAULT => Some(ShaderSource::glsl(name, DEFAULT_VERTEX, DEFAULT_FRAGMENT)),
        SHADER_SIMPLE => Some(ShaderSource::glsl(name, SIMPLE_VERTEX, SIMPLE_FRAGMENT)),
        SHADER_TEXT => Some(ShaderSource::glsl(name, TEXT_VERTEX, TEXT_FRAGMENT).with_texture()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::glsl;
    use crate::renderer::shader::{ShaderCode, BUILTIN_SHADERS};

    #[test]
    fn test_builtin_shaders_compile_to_spirv() {
        for name in BUILTIN_SHADERS {
            let source = source(name).unwrap();
            let ShaderCode::Glsl { vertex, fragment } = &source.code else {
                panic!("expected GLSL for {}", name);
            };
            glsl::to_spirv(naga::ShaderStage::Vertex, vertex).unwrap();
            glsl::to_spirv(naga::ShaderStage::Fragment, fragment).unwrap();
        }
    }

    #[test]
    fn test_only_text_samples() {
        assert!(source(SHADER_TEXT).unwrap().needs_texture);
        assert!(!source(SHADER_DEFAULT).unwrap().needs_texture);
        assert!(source("missing").is_none());
    }
}
