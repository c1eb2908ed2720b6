//! Vulkan 图形管线创建
//!
//! 视口、剪裁和线宽是动态状态；着色器、顶点布局、拓扑和混合模式烘焙进管线，
//! 由上下文的管线缓存按键复用。

use ash::vk;

use super::context::VkContext;
use super::shader::VkProgram;
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend::{BlendFactor, BlendMode, DrawMode};
use crate::renderer::buffer::BufferDescriptor;

/// 创建图形管线
///
/// # 参数
///
/// * `program` - 已编译的着色器模块
/// * `layout` - 顶点布局，属性下标即 location
/// * `mode` - 图元拓扑
/// * `blend` - 混合模式
pub fn build(
    ctx: &VkContext,
    program: &VkProgram,
    layout: &BufferDescriptor,
    mode: DrawMode,
    blend: BlendMode,
) -> Result<vk::Pipeline> {
    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(program.vertex)
            .name(entry)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(program.fragment)
            .name(entry)
            .build(),
    ];

    let bindings = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: layout.stride_bytes(),
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attributes: Vec<vk::VertexInputAttributeDescription> = layout
        .attributes
        .iter()
        .enumerate()
        .map(|(location, attr)| vk::VertexInputAttributeDescription {
            location: location as u32,
            binding: 0,
            format: vertex_format(attr.components),
            offset: attr.byte_offset(),
        })
        .collect();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder().topology(topology(mode));
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample =
        vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let blend_attachments = [blend_attachment(blend)];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

    let dynamic_states = [
        vk::DynamicState::VIEWPORT,
        vk::DynamicState::SCISSOR,
        vk::DynamicState::LINE_WIDTH,
    ];
    let dynamic = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic)
        .layout(ctx.pipeline_layout())
        .render_pass(ctx.render_pass())
        .subpass(0)
        .build();

    let pipelines = unsafe { ctx.device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None) }
        .map_err(|(_, e)| GraphicsError::ResourceCreation(format!("vkCreateGraphicsPipelines failed: {}", e)))?;
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GraphicsError::ResourceCreation("vkCreateGraphicsPipelines returned nothing".to_string()).into())
}

fn vertex_format(components: u32) -> vk::Format {
    match components {
        1 => vk::Format::R32_SFLOAT,
        2 => vk::Format::R32G32_SFLOAT,
        3 => vk::Format::R32G32B32_SFLOAT,
        _ => vk::Format::R32G32B32A32_SFLOAT,
    }
}

fn topology(mode: DrawMode) -> vk::PrimitiveTopology {
    match mode {
        DrawMode::Points => vk::PrimitiveTopology::POINT_LIST,
        DrawMode::Lines => vk::PrimitiveTopology::LINE_LIST,
        DrawMode::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        DrawMode::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        DrawMode::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
    }
}

fn blend_attachment(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let builder = vk::PipelineColorBlendAttachmentState::builder().color_write_mask(vk::ColorComponentFlags::RGBA);
    match mode.factors() {
        None => builder.blend_enable(false).build(),
        Some(f) => builder
            .blend_enable(true)
            .src_color_blend_factor(blend_factor(f.src_color))
            .dst_color_blend_factor(blend_factor(f.dst_color))
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(blend_factor(f.src_alpha))
            .dst_alpha_blend_factor(blend_factor(f.dst_alpha))
            .alpha_blend_op(vk::BlendOp::ADD)
            .build(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_formats() {
        assert_eq!(vertex_format(2), vk::Format::R32G32_SFLOAT);
        assert_eq!(vertex_format(4), vk::Format::R32G32B32A32_SFLOAT);
    }

    #[test]
    fn test_blend_attachment() {
        let off = blend_attachment(BlendMode::None);
        assert_eq!(off.blend_enable, vk::FALSE);
        let additive = blend_attachment(BlendMode::Additive);
        assert_eq!(additive.blend_enable, vk::TRUE);
        assert_eq!(additive.dst_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(additive.src_alpha_blend_factor, vk::BlendFactor::ONE);
    }

    #[test]
    fn test_strip_topologies() {
        assert_eq!(topology(DrawMode::LineStrip), vk::PrimitiveTopology::LINE_STRIP);
        assert_eq!(topology(DrawMode::TriangleStrip), vk::PrimitiveTopology::TRIANGLE_STRIP);
    }
}
