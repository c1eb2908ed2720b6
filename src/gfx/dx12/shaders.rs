//! DX12 着色器注册表
//!
//! HLSL 源码，入口 `VSMain` / `PSMain`。uniform 块作为 20 个 32 位
//! root constant 绑定在 b0，纹理在 t0，采样器在 s0。

use crate::renderer::shader::{ShaderSource, SHADER_DEFAULT, SHADER_SIMPLE, SHADER_TEXT};

const DEFAULT_SOURCE: &str = r#"
cbuffer Uniforms : register(b0)
{
    column_major float4x4 projection;
    float4 color;
};

struct VSInput
{
    float2 position : POSITION;
    float4 color : COLOR;
};

struct PSInput
{
    float4 position : SV_POSITION;
    float4 color : COLOR;
};

PSInput VSMain(VSInput input)
{
    PSInput output;
    output.position = mul(projection, float4(input.position, 0.0, 1.0));
    output.color = input.color * color;
    return output;
}

float4 PSMain(PSInput input) : SV_TARGET
{
    return input.color;
}
"#;

const SIMPLE_SOURCE: &str = r#"
cbuffer Uniforms : register(b0)
{
    column_major float4x4 projection;
    float4 color;
};

struct VSInput
{
    float2 position : POSITION;
};

struct PSInput
{
    float4 position : SV_POSITION;
};

PSInput VSMain(VSInput input)
{
    PSInput output;
    output.position = mul(projection, float4(input.position, 0.0, 1.0));
    return output;
}

float4 PSMain(PSInput input) : SV_TARGET
{
    return color;
}
"#;

const TEXT_SOURCE: &str = r#"
cbuffer Uniforms : register(b0)
{
    column_major float4x4 projection;
    float4 color;
};

Texture2D fontTexture : register(t0);
SamplerState fontSampler : register(s0);

struct VSInput
{
    float2 position : POSITION;
    float2 texCoord : TEXCOORD;
    float4 color : COLOR;
};

struct PSInput
{
    float4 position : SV_POSITION;
    float2 texCoord : TEXCOORD;
    float4 color : COLOR;
};

PSInput VSMain(VSInput input)
{
    PSInput output;
    output.position = mul(projection, float4(input.position, 0.0, 1.0));
    output.texCoord = input.texCoord;
    output.color = input.color * color;
    return output;
}

float4 PSMain(PSInput input) : SV_TARGET
{
    float alpha = fontTexture.Sample(fontSampler, input.texCoord).r;
    clip(alpha - 0.01);
    return float4(input.color.rgb, input.color.a * alpha);
}
"#;

/// 按逻辑名称查找内置着色器
pub fn source(name: &str) -> Option<ShaderSource> {
    match name {
        SHADER_DEFAULT => Some(ShaderSource::hlsl(name, DEFAULT_SOURCE)),
        SHADER_SIMPLE => Some(ShaderSource::hlsl(name, SIMPLE_SOURCE)),
        SHADER_TEXT => Some(ShaderSource::hlsl(name, TEXT_SOURCE).with_texture()),
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
            let ShaderCode::Hlsl { source, vertex_entry, fragment_entry } = source(name).unwrap().code else {
                panic!("expected HLSL for {}", name);
            };
            assert!(source.contains(&vertex_entry));
            assert!(source.contains(&fragment_entry));
            assert!(source.contains("register(b0)"));
        }
        assert!(source("missing").is_none());
    }
}
