//! Metal 着色器注册表
//!
//! 每个着色器是一个 MSL 源文件，入口为 `vertexMain` / `fragmentMain`。
//! 顶点属性来自 buffer 0，uniform 块通过 `set_vertex_bytes` 放在 buffer 1。

use crate::renderer::shader::{ShaderSource, SHADER_DEFAULT, SHADER_SIMPLE, SHADER_TEXT};

const DEFAULT_SOURCE: &str = r#"#include <metal_stdlib>
using namespace metal;

struct Uniforms {
    float4x4 projection;
    float4 color;
};

struct VertexIn {
    float2 position [[attribute(0)]];
    float4 color [[attribute(1)]];
};

struct VertexOut {
    float4 position [[position]];
    float4 color;
    float pointSize [[point_size]];
};

vertex VertexOut vertexMain(VertexIn in [[stage_in]], constant Uniforms& u [[buffer(1)]]) {
    VertexOut out;
    out.position = u.projection * float4(in.position, 0.0, 1.0);
    out.color = in.color * u.color;
    out.pointSize = 1.0;
    return out;
}

fragment float4 fragmentMain(VertexOut in [[stage_in]]) {
    return in.color;
}
"#;

const SIMPLE_SOURCE: &str = r#"#include <metal_stdlib>
using namespace metal;

struct Uniforms {
    float4x4 projection;
    float4 color;
};

struct VertexIn {
    float2 position [[attribute(0)]];
};

struct VertexOut {
    float4 position [[position]];
    float pointSize [[point_size]];
};

vertex VertexOut vertexMain(VertexIn in [[stage_in]], constant Uniforms& u [[buffer(1)]]) {
    VertexOut out;
    out.position = u.projection * float4(in.position, 0.0, 1.0);
    out.pointSize = 1.0;
    return out;
}

fragment float4 fragmentMain(VertexOut in [[stage_in]], constant Uniforms& u [[buffer(1)]]) {
    return u.color;
}
"#;

const TEXT_SOURCE: &str = r#"#include <metal_stdlib>
using namespace metal;

struct Uniforms {
    float4x4 projection;
    float4 color;
};

struct VertexIn {
    float2 position [[attribute(0)]];
    float2 texCoord [[attribute(1)]];
    float4 color [[attribute(2)]];
};

struct VertexOut {
    float4 position [[position]];
    float2 texCoord;
    float4 color;
};

vertex VertexOut vertexMain(VertexIn in [[stage_in]], constant Uniforms& u [[buffer(1)]]) {
    VertexOut out;
    out.position = u.projection * float4(in.position, 0.0, 1.0);
    out.texCoord = in.texCoord;
    out.color = in.color * u.color;
    return out;
}

fragment float4 fragmentMain(VertexOut in [[stage_in]],
                             texture2d<float> fontTexture [[texture(0)]],
                             sampler fontSampler [[sampler(0)]]) {
    float alpha = fontTexture.sample(fontSampler, in.texCoord).r;
    if (alpha < 0.01) {
        discard_fragment();
    }
    return float4(in.color.rgb, in.color.a * alpha);
}
"#;

/// 按逻辑名称查找内置着色器
pub fn source(name: &str) -> Option<ShaderSource> {
    match name {
        SHADER_DEFAULT => Some(ShaderSource::msl(name, DEFAULT_SOURCE)),
        SHADER_SIMPLE => Some(ShaderSource::msl(name, SIMPLE_SOURCE)),
        SHADER_TEXT => Some(ShaderSource::msl(name, TEXT_SOURCE).with_texture()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::shader::{ShaderCode, BUILTIN_SHADERS};

    #[test]
    fn test_registry_entries() {
        for name in BUILTIN_SHADERS {
            let source = source(name).unwrap();
            let ShaderCode::Msl { source, vertex_entry, fragment_entry } = &source.code else {
                panic!("expected MSL for {}", name);
            };
            assert!(source.contains(&format!("vertex VertexOut {}", vertex_entry)));
            assert!(source.contains(fragment_entry.as_str()));
        }
        assert!(source(SHADER_TEXT).unwrap().needs_texture);
    }
}
