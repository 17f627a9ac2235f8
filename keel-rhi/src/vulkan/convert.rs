//! Mapping from the API-neutral descriptions to Vulkan enums and flags.

use ash::vk;
use enumflags2::BitFlags;
use crate::barrier::{PipelineStage, PipelineStages, TextureLayout};
use crate::buffer::BufferUsage;
use crate::pipeline::{
    BlendFactor, BlendOp, CompareOp, CullMode, IndexFormat, PolygonMode, StencilFaceOps, StencilOp, Topology,
    VertexFormat, WindingMode,
};
use crate::render_pass::{Color, LoadOp, StoreOp};
use crate::sampler::{SamplerFilter, SamplerMip, SamplerWrap};
use crate::shader::ShaderStage;
use crate::texture::{TextureFormat, TextureType, TextureUsage};

pub(crate) fn texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R_UN8 => vk::Format::R8_UNORM,
        TextureFormat::R_UI16 => vk::Format::R16_UINT,
        TextureFormat::R_UN16 => vk::Format::R16_UNORM,
        TextureFormat::R_F16 => vk::Format::R16_SFLOAT,
        TextureFormat::R_F32 => vk::Format::R32_SFLOAT,
        TextureFormat::RG_UN8 => vk::Format::R8G8_UNORM,
        TextureFormat::RG_UI16 => vk::Format::R16G16_UINT,
        TextureFormat::RG_UN16 => vk::Format::R16G16_UNORM,
        TextureFormat::RG_F16 => vk::Format::R16G16_SFLOAT,
        TextureFormat::RG_F32 => vk::Format::R32G32_SFLOAT,
        TextureFormat::RGBA_UN8 => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::RGBA_UI32 => vk::Format::R32G32B32A32_UINT,
        TextureFormat::RGBA_F16 => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::RGBA_F32 => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::RGBA_SRGB8 => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::BGRA_UN8 => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::BGRA_SRGB8 => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::ETC2_RGB8 => vk::Format::ETC2_R8G8B8_UNORM_BLOCK,
        TextureFormat::ETC2_SRGB8 => vk::Format::ETC2_R8G8B8_SRGB_BLOCK,
        TextureFormat::BC7_RGBA => vk::Format::BC7_UNORM_BLOCK,
        TextureFormat::Z_UN16 => vk::Format::D16_UNORM,
        TextureFormat::Z_UN24 => vk::Format::X8_D24_UNORM_PACK32,
        TextureFormat::Z_F32 => vk::Format::D32_SFLOAT,
        TextureFormat::Z_UN24_S_UI8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

/// Inverse of [`texture_format`] for the formats a surface can report.
pub fn texture_format_from_vk(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::B8G8R8A8_UNORM => Some(TextureFormat::BGRA_UN8),
        vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::BGRA_SRGB8),
        vk::Format::R8G8B8A8_UNORM => Some(TextureFormat::RGBA_UN8),
        vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::RGBA_SRGB8),
        vk::Format::R16G16B16A16_SFLOAT => Some(TextureFormat::RGBA_F16),
        _ => None,
    }
}

pub(crate) fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    match (format.is_depth(), format.has_stencil()) {
        (true, true) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        (true, false) => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub(crate) fn image_type(texture_type: TextureType) -> vk::ImageType {
    match texture_type {
        TextureType::Texture2D | TextureType::Cube => vk::ImageType::TYPE_2D,
        TextureType::Texture3D => vk::ImageType::TYPE_3D,
    }
}

pub(crate) fn view_type(texture_type: TextureType, num_layers: u32) -> vk::ImageViewType {
    match texture_type {
        TextureType::Texture2D if num_layers > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureType::Texture2D => vk::ImageViewType::TYPE_2D,
        TextureType::Texture3D => vk::ImageViewType::TYPE_3D,
        TextureType::Cube => vk::ImageViewType::CUBE,
    }
}

pub(crate) fn image_usage(usage: BitFlags<TextureUsage>, format: TextureFormat, memoryless: bool) -> vk::ImageUsageFlags {
    let mut flags = if memoryless {
        vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
    } else {
        vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST
    };
    if usage.contains(TextureUsage::Sampled) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::Storage) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::Attachment) {
        flags |= if format.is_depth_or_stencil() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };
    }
    flags
}

pub(crate) fn sample_count(samples: u32) -> vk::SampleCountFlags {
    match samples {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

pub(crate) fn buffer_usage(usage: BitFlags<BufferUsage>, device_address: bool) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    for bit in usage.iter() {
        flags |= match bit {
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
            BufferUsage::Indirect => vk::BufferUsageFlags::INDIRECT_BUFFER,
        };
    }
    if device_address {
        flags |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    flags
}

pub(crate) fn pipeline_stage(stage: PipelineStage) -> vk::PipelineStageFlags2 {
    match stage {
        PipelineStage::TopOfPipe => vk::PipelineStageFlags2::TOP_OF_PIPE,
        PipelineStage::Host => vk::PipelineStageFlags2::HOST,
        PipelineStage::Transfer => vk::PipelineStageFlags2::TRANSFER,
        PipelineStage::VertexAttributeInput => vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
        PipelineStage::IndexInput => vk::PipelineStageFlags2::INDEX_INPUT,
        PipelineStage::VertexShader => vk::PipelineStageFlags2::VERTEX_SHADER,
        PipelineStage::FragmentShader => vk::PipelineStageFlags2::FRAGMENT_SHADER,
        PipelineStage::ComputeShader => vk::PipelineStageFlags2::COMPUTE_SHADER,
        PipelineStage::GeometryShader => vk::PipelineStageFlags2::GEOMETRY_SHADER,
        PipelineStage::ColorAttachmentOutput => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        PipelineStage::EarlyFragmentTests => vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
        PipelineStage::LateFragmentTests => vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
        PipelineStage::BottomOfPipe => vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        PipelineStage::AllCommands => vk::PipelineStageFlags2::ALL_COMMANDS,
    }
}

pub(crate) fn pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags2 {
    stages.iter().fold(vk::PipelineStageFlags2::empty(), |acc, s| acc | pipeline_stage(s))
}

pub(crate) fn image_layout(layout: TextureLayout) -> vk::ImageLayout {
    match layout {
        TextureLayout::Undefined => vk::ImageLayout::UNDEFINED,
        TextureLayout::General => vk::ImageLayout::GENERAL,
        TextureLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        TextureLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        TextureLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        TextureLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        TextureLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        TextureLayout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Accesses a layout implies on the side of a barrier that uses it.
pub(crate) fn layout_access(layout: TextureLayout) -> vk::AccessFlags2 {
    match layout {
        TextureLayout::Undefined | TextureLayout::Present => vk::AccessFlags2::NONE,
        TextureLayout::General => vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        TextureLayout::TransferSrc => vk::AccessFlags2::TRANSFER_READ,
        TextureLayout::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
        TextureLayout::ShaderReadOnly => vk::AccessFlags2::SHADER_SAMPLED_READ,
        TextureLayout::ColorAttachment => {
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
        }
        TextureLayout::DepthStencilAttachment => {
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
    }
}

pub(crate) fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        // LOAD_OP_NONE needs VK_EXT_load_store_op_none.
        LoadOp::Invalid | LoadOp::DontCare | LoadOp::None => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub(crate) fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::None => vk::AttachmentStoreOp::NONE,
        // The resolve target receives the result, the multisampled image is discarded.
        StoreOp::DontCare | StoreOp::MsaaResolve => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub(crate) fn clear_color(color: Color) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: [color.r, color.g, color.b, color.a] },
    }
}

pub(crate) fn clear_depth_stencil(depth: f32, stencil: u32) -> vk::ClearValue {
    vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
    }
}

pub(crate) fn topology(topology: Topology) -> vk::PrimitiveTopology {
    match topology {
        Topology::Point => vk::PrimitiveTopology::POINT_LIST,
        Topology::Line => vk::PrimitiveTopology::LINE_LIST,
        Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        Topology::Triangle => vk::PrimitiveTopology::TRIANGLE_LIST,
        Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub(crate) fn compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::AlwaysPass => vk::CompareOp::ALWAYS,
    }
}

pub(crate) fn stencil_op(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::IncrementWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::DecrementWrap => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

/// Masks and reference are dynamic state and left at zero here.
pub(crate) fn stencil_face(ops: &StencilFaceOps) -> vk::StencilOpState {
    vk::StencilOpState::default()
        .fail_op(stencil_op(ops.fail_op))
        .pass_op(stencil_op(ops.pass_op))
        .depth_fail_op(stencil_op(ops.depth_fail_op))
        .compare_op(compare_op(ops.compare_op))
}

pub(crate) fn blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub(crate) fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFactor::SrcAlphaSaturated => vk::BlendFactor::SRC_ALPHA_SATURATE,
        BlendFactor::BlendColor => vk::BlendFactor::CONSTANT_COLOR,
        BlendFactor::OneMinusBlendColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::BlendAlpha => vk::BlendFactor::CONSTANT_ALPHA,
        BlendFactor::OneMinusBlendAlpha => vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA,
    }
}

pub(crate) fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub(crate) fn front_face(winding: WindingMode) -> vk::FrontFace {
    match winding {
        WindingMode::Ccw => vk::FrontFace::COUNTER_CLOCKWISE,
        WindingMode::Cw => vk::FrontFace::CLOCKWISE,
    }
}

pub(crate) fn polygon_mode(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
    }
}

pub(crate) fn index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::UInt16 => vk::IndexType::UINT16,
        IndexFormat::UInt32 => vk::IndexType::UINT32,
    }
}

pub(crate) fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float1 => vk::Format::R32_SFLOAT,
        VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Int1 => vk::Format::R32_SINT,
        VertexFormat::Int2 => vk::Format::R32G32_SINT,
        VertexFormat::Int3 => vk::Format::R32G32B32_SINT,
        VertexFormat::Int4 => vk::Format::R32G32B32A32_SINT,
        VertexFormat::UInt1 => vk::Format::R32_UINT,
        VertexFormat::UInt2 => vk::Format::R32G32_UINT,
        VertexFormat::UInt3 => vk::Format::R32G32B32_UINT,
        VertexFormat::UInt4 => vk::Format::R32G32B32A32_UINT,
        VertexFormat::Byte4Norm => vk::Format::R8G8B8A8_SNORM,
        VertexFormat::UByte4Norm => vk::Format::R8G8B8A8_UNORM,
        VertexFormat::HalfFloat2 => vk::Format::R16G16_SFLOAT,
        VertexFormat::HalfFloat4 => vk::Format::R16G16B16A16_SFLOAT,
    }
}

pub(crate) fn shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub(crate) fn filter(filter: SamplerFilter) -> vk::Filter {
    match filter {
        SamplerFilter::Nearest => vk::Filter::NEAREST,
        SamplerFilter::Linear => vk::Filter::LINEAR,
    }
}

pub(crate) fn mipmap_mode(mip: SamplerMip) -> vk::SamplerMipmapMode {
    match mip {
        SamplerMip::Nearest | SamplerMip::Disabled => vk::SamplerMipmapMode::NEAREST,
        SamplerMip::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub(crate) fn address_mode(wrap: SamplerWrap) -> vk::SamplerAddressMode {
    match wrap {
        SamplerWrap::Repeat => vk::SamplerAddressMode::REPEAT,
        SamplerWrap::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        SamplerWrap::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_sets_fold_into_one_mask() {
        let stages = PipelineStages::from(PipelineStage::FragmentShader | PipelineStage::ComputeShader);
        assert_eq!(
            pipeline_stages(stages),
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER
        );
        assert_eq!(pipeline_stages(PipelineStages::empty()), vk::PipelineStageFlags2::empty());
    }

    #[test]
    fn depth_formats_pick_depth_aspects() {
        assert_eq!(aspect_mask(TextureFormat::Z_F32), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_mask(TextureFormat::Z_UN24_S_UI8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_mask(TextureFormat::RGBA_UN8), vk::ImageAspectFlags::COLOR);
        let usage = image_usage(TextureUsage::Attachment.into(), TextureFormat::Z_F32, true);
        assert!(usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT));
        assert!(!usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn surface_formats_round_trip() {
        for format in [TextureFormat::BGRA_UN8, TextureFormat::BGRA_SRGB8, TextureFormat::RGBA_UN8] {
            assert_eq!(texture_format_from_vk(texture_format(format)), Some(format));
        }
        assert_eq!(texture_format_from_vk(vk::Format::D32_SFLOAT), None);
    }
}
