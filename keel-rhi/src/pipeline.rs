//! Pipeline descriptions and the per-draw dynamic state.

use derive_builder::Builder;
use keel_core::collections::SmallVec;
use crate::error::{RhiError, RhiResult};
use crate::handle::ShaderModuleHandle;
use crate::texture::TextureFormat;

pub const MAX_COLOR_ATTACHMENTS: usize = 4;
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;
pub const MAX_VERTEX_BUFFERS: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Topology {
    Point,
    Line,
    LineStrip,
    #[default]
    Triangle,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    #[default]
    AlwaysPass,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturated,
    BlendColor,
    OneMinusBlendColor,
    BlendAlpha,
    OneMinusBlendAlpha,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WindingMode {
    #[default]
    Ccw,
    Cw,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    UInt16,
    UInt32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float1,
    Float2,
    Float3,
    Float4,
    Int1,
    Int2,
    Int3,
    Int4,
    UInt1,
    UInt2,
    UInt3,
    UInt4,
    Byte4Norm,
    UByte4Norm,
    HalfFloat2,
    HalfFloat4,
}

impl VertexFormat {
    pub fn size_in_bytes(self) -> u32 {
        match self {
            VertexFormat::Float1 | VertexFormat::Int1 | VertexFormat::UInt1 => 4,
            VertexFormat::Float2 | VertexFormat::Int2 | VertexFormat::UInt2 => 8,
            VertexFormat::Float3 | VertexFormat::Int3 | VertexFormat::UInt3 => 12,
            VertexFormat::Float4 | VertexFormat::Int4 | VertexFormat::UInt4 => 16,
            VertexFormat::Byte4Norm | VertexFormat::UByte4Norm | VertexFormat::HalfFloat2 => 4,
            VertexFormat::HalfFloat4 => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexInputBinding {
    pub stride: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexInput {
    pub attributes: SmallVec<[VertexAttribute; 8]>,
    pub bindings: SmallVec<[VertexInputBinding; 2]>,
}

impl VertexInput {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Implemented by `#[derive(VertexLayout)]` for `#[repr(C)]` vertex structs.
pub trait VertexLayout {
    fn vertex_input() -> VertexInput;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorAttachment {
    pub format: TextureFormat,
    pub blend_enabled: bool,
    pub rgb_blend_op: BlendOp,
    pub alpha_blend_op: BlendOp,
    pub src_rgb_blend_factor: BlendFactor,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_rgb_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
}

impl ColorAttachment {
    pub fn new(format: TextureFormat) -> Self {
        Self {
            format,
            blend_enabled: false,
            rgb_blend_op: BlendOp::Add,
            alpha_blend_op: BlendOp::Add,
            src_rgb_blend_factor: BlendFactor::One,
            src_alpha_blend_factor: BlendFactor::One,
            dst_rgb_blend_factor: BlendFactor::Zero,
            dst_alpha_blend_factor: BlendFactor::Zero,
        }
    }

    /// Classic premultiplied-free alpha blending.
    pub fn alpha_blended(format: TextureFormat) -> Self {
        Self {
            blend_enabled: true,
            src_rgb_blend_factor: BlendFactor::SrcAlpha,
            src_alpha_blend_factor: BlendFactor::SrcAlpha,
            dst_rgb_blend_factor: BlendFactor::OneMinusSrcAlpha,
            dst_alpha_blend_factor: BlendFactor::OneMinusSrcAlpha,
            ..Self::new(format)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilStateDesc {
    pub stencil_failure_op: StencilOp,
    pub depth_failure_op: StencilOp,
    pub depth_stencil_pass_op: StencilOp,
    pub stencil_compare_op: CompareOp,
    pub read_mask: u32,
    pub write_mask: u32,
}

impl Default for StencilStateDesc {
    fn default() -> Self {
        Self {
            stencil_failure_op: StencilOp::Keep,
            depth_failure_op: StencilOp::Keep,
            depth_stencil_pass_op: StencilOp::Keep,
            stencil_compare_op: CompareOp::AlwaysPass,
            read_mask: !0,
            write_mask: !0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub compare_op: CompareOp,
    pub depth_write_enabled: bool,
    pub back_face_stencil: StencilStateDesc,
    pub front_face_stencil: StencilStateDesc,
}

/// Static description of a graphics pipeline. Per-draw state lives in [`DynamicState`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Builder)]
#[builder(setter(into))]
pub struct RenderPipelineDesc {
    #[builder(default)]
    pub vertex_input: VertexInput,
    pub vertex_shader: ShaderModuleHandle,
    #[builder(default)]
    pub geometry_shader: ShaderModuleHandle,
    pub fragment_shader: ShaderModuleHandle,
    #[builder(default)]
    pub color_attachments: SmallVec<[ColorAttachment; MAX_COLOR_ATTACHMENTS]>,
    #[builder(default)]
    pub depth_format: Option<TextureFormat>,
    #[builder(default)]
    pub stencil_format: Option<TextureFormat>,
    #[builder(default)]
    pub cull_mode: CullMode,
    #[builder(default)]
    pub front_face_winding: WindingMode,
    #[builder(default)]
    pub polygon_mode: PolygonMode,
    #[builder(default)]
    pub debug_name: String,
}

impl RenderPipelineDesc {
    #[inline]
    pub fn num_color_attachments(&self) -> usize {
        self.color_attachments.len()
    }

    /// The description with its debug name stripped: pipelines equal under this key share
    /// native objects.
    pub fn cache_key(&self) -> RenderPipelineDesc {
        RenderPipelineDesc { debug_name: String::new(), ..self.clone() }
    }

    pub(crate) fn validate(&self) -> RhiResult<()> {
        if self.vertex_shader.is_empty() || self.fragment_shader.is_empty() {
            return Err(RhiError::out_of_range(format!(
                "render pipeline `{}` needs vertex and fragment shaders", self.debug_name
            )));
        }
        if self.color_attachments.len() > MAX_COLOR_ATTACHMENTS {
            return Err(RhiError::out_of_range(format!(
                "render pipeline `{}` has {} colour attachments (max {MAX_COLOR_ATTACHMENTS})",
                self.debug_name,
                self.color_attachments.len()
            )));
        }
        if self.color_attachments.iter().any(|a| a.format.is_depth_or_stencil()) {
            return Err(RhiError::out_of_range(format!(
                "render pipeline `{}` uses a depth format as a colour attachment", self.debug_name
            )));
        }
        if self.depth_format.is_some_and(|f| !f.is_depth()) {
            return Err(RhiError::out_of_range(format!(
                "render pipeline `{}` has a non-depth depth format", self.debug_name
            )));
        }
        if self.vertex_input.attributes.len() > MAX_VERTEX_ATTRIBUTES
            || self.vertex_input.bindings.len() > MAX_VERTEX_BUFFERS
        {
            return Err(RhiError::out_of_range(format!(
                "render pipeline `{}` exceeds the vertex input limits", self.debug_name
            )));
        }
        if let Some(attr) = self
            .vertex_input
            .attributes
            .iter()
            .find(|a| a.binding as usize >= self.vertex_input.bindings.len())
        {
            return Err(RhiError::out_of_range(format!(
                "render pipeline `{}` attribute {} reads unknown binding {}",
                self.debug_name, attr.location, attr.binding
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Builder)]
#[builder(setter(into))]
pub struct ComputePipelineDesc {
    pub compute_shader: ShaderModuleHandle,
    #[builder(default)]
    pub debug_name: String,
}

/// Stencil ops for one face, as tracked by the recorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilFaceOps {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareOp,
}

impl Default for StencilFaceOps {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            compare_op: CompareOp::AlwaysPass,
        }
    }
}

impl From<&StencilStateDesc> for StencilFaceOps {
    fn from(desc: &StencilStateDesc) -> Self {
        Self {
            fail_op: desc.stencil_failure_op,
            pass_op: desc.depth_stencil_pass_op,
            depth_fail_op: desc.depth_failure_op,
            compare_op: desc.stencil_compare_op,
        }
    }
}

/// Per-draw pipeline parameters. Together with a [`RenderPipelineDesc`] it keys the pipeline
/// cache, so every field here selects a distinct native pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DynamicState {
    pub topology: Topology,
    pub depth_bias_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: CompareOp,
    pub stencil_front: StencilFaceOps,
    pub stencil_back: StencilFaceOps,
    pub samples: u32,
}

impl Default for DynamicState {
    fn default() -> Self {
        Self {
            topology: Topology::Triangle,
            depth_bias_enable: false,
            depth_write_enable: false,
            depth_compare_op: CompareOp::AlwaysPass,
            stencil_front: StencilFaceOps::default(),
            stencil_back: StencilFaceOps::default(),
            samples: 1,
        }
    }
}

/// Everything a backend needs to compile one render pipeline variant.
pub struct RenderPipelineBuild<'a, S> {
    pub desc: &'a RenderPipelineDesc,
    pub dynamic: &'a DynamicState,
    pub vertex: (&'a S, &'a str),
    pub geometry: Option<(&'a S, &'a str)>,
    pub fragment: (&'a S, &'a str),
}

/// A pooled render pipeline. Native variants live in the device's pipeline cache under `key`.
pub struct RenderPipeline {
    pub(crate) key: RenderPipelineDesc,
    pub(crate) debug_name: String,
}

impl RenderPipeline {
    #[inline]
    pub fn desc(&self) -> &RenderPipelineDesc { &self.key }

    #[inline]
    pub fn debug_name(&self) -> &str { &self.debug_name }

    #[inline]
    pub fn has_depth_attachment(&self) -> bool { self.key.depth_format.is_some() }
}

/// A pooled compute pipeline, built eagerly at creation.
pub struct ComputePipeline<N> {
    pub(crate) native: N,
    pub(crate) debug_name: String,
}

impl<N> ComputePipeline<N> {
    #[inline]
    pub fn native(&self) -> &N { &self.native }

    #[inline]
    pub fn debug_name(&self) -> &str { &self.debug_name }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;

    fn shaders() -> (ShaderModuleHandle, ShaderModuleHandle) {
        (Handle::new(0, 1), Handle::new(1, 1))
    }

    #[test]
    fn cache_key_ignores_debug_name() {
        let (vs, fs) = shaders();
        let a = RenderPipelineDescBuilder::default()
            .vertex_shader(vs)
            .fragment_shader(fs)
            .color_attachments(SmallVec::from_slice(&[ColorAttachment::new(TextureFormat::BGRA_UN8)]))
            .debug_name("a")
            .build()
            .unwrap();
        let b = RenderPipelineDesc { debug_name: "b".into(), ..a.clone() };
        assert_ne!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn validation_limits() {
        let (vs, fs) = shaders();
        let mut desc = RenderPipelineDescBuilder::default()
            .vertex_shader(vs)
            .fragment_shader(fs)
            .build()
            .unwrap();
        assert!(desc.validate().is_ok());

        desc.depth_format = Some(TextureFormat::RGBA_UN8);
        assert!(desc.validate().is_err());
        desc.depth_format = Some(TextureFormat::Z_F32);
        assert!(desc.validate().is_ok());

        desc.vertex_input.attributes.push(VertexAttribute {
            location: 0,
            binding: 0,
            format: VertexFormat::Float3,
            offset: 0,
        });
        assert!(desc.validate().is_err());
        desc.vertex_input.bindings.push(VertexInputBinding { stride: 12 });
        assert!(desc.validate().is_ok());

        desc.color_attachments = SmallVec::from_elem(ColorAttachment::new(TextureFormat::RGBA_UN8), 5);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn dynamic_state_distinguishes_topology() {
        let triangles = DynamicState::default();
        let lines = DynamicState { topology: Topology::Line, ..triangles };
        assert_ne!(triangles, lines);
    }
}
