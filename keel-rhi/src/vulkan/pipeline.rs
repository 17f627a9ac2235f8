//! Pipeline layout and pipeline construction on top of dynamic rendering.

use std::ffi::CString;
use ash::vk;
use keel_core::collections::SmallVec;
use keel_core::log;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{RenderPipelineBuild, MAX_COLOR_ATTACHMENTS, MAX_VERTEX_ATTRIBUTES, MAX_VERTEX_BUFFERS};
use super::convert;

/// State every graphics pipeline takes from the command buffer instead of baking it in.
const DYNAMIC_STATES: [vk::DynamicState; 7] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::STENCIL_REFERENCE,
    vk::DynamicState::STENCIL_COMPARE_MASK,
    vk::DynamicState::STENCIL_WRITE_MASK,
    vk::DynamicState::BLEND_CONSTANTS,
    vk::DynamicState::DEPTH_BIAS,
];

pub(crate) const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::ALL_GRAPHICS.as_raw() | vk::ShaderStageFlags::COMPUTE.as_raw(),
);

/// One layout shared by all pipelines: no descriptor sets, one push-constant range.
pub(crate) fn create_pipeline_layout(device: &ash::Device, push_constants_size: u32) -> RhiResult<vk::PipelineLayout> {
    let range = vk::PushConstantRange::default()
        .stage_flags(PUSH_CONSTANT_STAGES)
        .offset(0)
        .size(push_constants_size);
    let ranges = if push_constants_size > 0 { std::slice::from_ref(&range) } else { &[] };
    let layout_info = vk::PipelineLayoutCreateInfo::default().push_constant_ranges(ranges);
    Ok(unsafe { device.create_pipeline_layout(&layout_info, None)? })
}

fn entry_name(entry_point: &str) -> RhiResult<CString> {
    CString::new(entry_point).map_err(|_| RhiError::out_of_range(format!("entry point `{entry_point}` contains NUL")))
}

#[profiling::function]
pub(crate) fn create_graphics_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    layout: vk::PipelineLayout,
    build: &RenderPipelineBuild<'_, vk::ShaderModule>,
) -> RhiResult<vk::Pipeline> {
    let desc = build.desc;
    let dynamic = build.dynamic;

    let mut names: SmallVec<[CString; 3]> = SmallVec::new();
    let mut modules: SmallVec<[(vk::ShaderStageFlags, vk::ShaderModule); 3]> = SmallVec::new();
    let mut push_stage = |stage: vk::ShaderStageFlags, (module, entry): (&vk::ShaderModule, &str)| -> RhiResult<()> {
        names.push(entry_name(entry)?);
        modules.push((stage, *module));
        Ok(())
    };
    push_stage(vk::ShaderStageFlags::VERTEX, build.vertex)?;
    if let Some(geometry) = build.geometry {
        push_stage(vk::ShaderStageFlags::GEOMETRY, geometry)?;
    }
    push_stage(vk::ShaderStageFlags::FRAGMENT, build.fragment)?;

    let shader_stages: SmallVec<[vk::PipelineShaderStageCreateInfo; 3]> = modules
        .iter()
        .zip(names.iter())
        .map(|(&(stage, module), name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage)
                .module(module)
                .name(name)
        })
        .collect();

    let bindings: SmallVec<[vk::VertexInputBindingDescription; MAX_VERTEX_BUFFERS]> = desc
        .vertex_input
        .bindings
        .iter()
        .enumerate()
        .map(|(index, binding)| vk::VertexInputBindingDescription {
            binding: index as u32,
            stride: binding.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        })
        .collect();
    let attributes: SmallVec<[vk::VertexInputAttributeDescription; MAX_VERTEX_ATTRIBUTES]> = desc
        .vertex_input
        .attributes
        .iter()
        .map(|attribute| vk::VertexInputAttributeDescription {
            location: attribute.location,
            binding: attribute.binding,
            format: convert::vertex_format(attribute.format),
            offset: attribute.offset,
        })
        .collect();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert::topology(dynamic.topology));

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(convert::polygon_mode(desc.polygon_mode))
        .cull_mode(convert::cull_mode(desc.cull_mode))
        .front_face(convert::front_face(desc.front_face_winding))
        .depth_bias_enable(dynamic.depth_bias_enable)
        .line_width(1.0);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(convert::sample_count(dynamic.samples));

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(desc.depth_format.is_some())
        .depth_write_enable(desc.depth_format.is_some() && dynamic.depth_write_enable)
        .depth_compare_op(convert::compare_op(dynamic.depth_compare_op))
        .stencil_test_enable(desc.stencil_format.is_some())
        .front(convert::stencil_face(&dynamic.stencil_front))
        .back(convert::stencil_face(&dynamic.stencil_back));

    let blend_attachments: SmallVec<[vk::PipelineColorBlendAttachmentState; MAX_COLOR_ATTACHMENTS]> = desc
        .color_attachments
        .iter()
        .map(|attachment| {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(attachment.blend_enabled)
                .src_color_blend_factor(convert::blend_factor(attachment.src_rgb_blend_factor))
                .dst_color_blend_factor(convert::blend_factor(attachment.dst_rgb_blend_factor))
                .color_blend_op(convert::blend_op(attachment.rgb_blend_op))
                .src_alpha_blend_factor(convert::blend_factor(attachment.src_alpha_blend_factor))
                .dst_alpha_blend_factor(convert::blend_factor(attachment.dst_alpha_blend_factor))
                .alpha_blend_op(convert::blend_op(attachment.alpha_blend_op))
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        })
        .collect();
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

    let color_formats: SmallVec<[vk::Format; MAX_COLOR_ATTACHMENTS]> = desc
        .color_attachments
        .iter()
        .map(|attachment| convert::texture_format(attachment.format))
        .collect();
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
    if let Some(depth_format) = desc.depth_format {
        rendering_info = rendering_info.depth_attachment_format(convert::texture_format(depth_format));
    }
    if let Some(stencil_format) = desc.stencil_format {
        rendering_info = rendering_info.stencil_attachment_format(convert::texture_format(stencil_format));
    }

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe { device.create_graphics_pipelines(cache, &[pipeline_info], None) }
        .map_err(|(_, err)| RhiError::from(err))?;
    let pipeline = pipelines
        .first()
        .copied()
        .ok_or_else(|| RhiError::runtime(format!("pipeline `{}` was not created", desc.debug_name)))?;

    log::debug!("graphics pipeline `{}` built ({:?})", desc.debug_name, dynamic.topology);
    Ok(pipeline)
}

#[profiling::function]
pub(crate) fn create_compute_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    layout: vk::PipelineLayout,
    shader: vk::ShaderModule,
    entry_point: &str,
) -> RhiResult<vk::Pipeline> {
    let name = entry_name(entry_point)?;
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(shader)
        .name(&name);
    let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);

    let pipelines = unsafe { device.create_compute_pipelines(cache, &[pipeline_info], None) }
        .map_err(|(_, err)| RhiError::from(err))?;
    pipelines
        .first()
        .copied()
        .ok_or_else(|| RhiError::runtime("compute pipeline was not created"))
}
