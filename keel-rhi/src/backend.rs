//! The seam between the device-level bookkeeping and a concrete graphics API.
//!
//! A [`Backend`] creates and destroys native objects and turns encoders into submissions. It
//! never sees handles: the device resolves them first and passes native references down.

use std::fmt::Debug;
use std::hash::Hash;
use std::ptr::NonNull;
use keel_core::collections::SmallVec;
use crate::barrier::TextureBarrier;
use crate::buffer::BufferDesc;
use crate::error::RhiResult;
use crate::pipeline::{IndexFormat, RenderPipelineBuild, MAX_COLOR_ATTACHMENTS};
use crate::render_pass::{AttachmentDesc, Color, QueueType, ScissorRect, Viewport};
use crate::sampler::SamplerDesc;
use crate::shader::ShaderModuleDesc;
use crate::texture::{Dimensions, TextureDesc, TextureFormat, TextureRangeDesc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceLimits {
    pub max_push_constants_size: u32,
    pub max_anisotropy: f32,
    pub max_texture_dimension_2d: u32,
    pub max_color_attachments: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_push_constants_size: 128,
            max_anisotropy: 16.0,
            max_texture_dimension_2d: 16384,
            max_color_attachments: MAX_COLOR_ATTACHMENTS as u32,
        }
    }
}

/// A freshly created native buffer.
pub struct BufferAllocation<N> {
    pub buffer: N,
    /// Persistent host mapping of the whole buffer, for host-visible storage.
    pub mapped: Option<NonNull<u8>>,
    /// Shader-visible device address, or 0.
    pub gpu_address: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

pub struct ColorTarget<'a, T> {
    pub texture: &'a T,
    pub format: TextureFormat,
    pub resolve: Option<&'a T>,
    pub attachment: AttachmentDesc,
}

pub struct DepthTarget<'a, T> {
    pub texture: &'a T,
    pub format: TextureFormat,
    pub depth: AttachmentDesc,
    pub stencil: AttachmentDesc,
}

/// Everything needed to open a dynamic-rendering pass.
pub struct RenderingInfo<'a, T> {
    pub color: SmallVec<[ColorTarget<'a, T>; MAX_COLOR_ATTACHMENTS]>,
    pub depth: Option<DepthTarget<'a, T>>,
    pub render_area: ScissorRect,
}

/// A copy of tightly packed texels into `range`.
pub struct TextureUpload<'a, T> {
    pub texture: &'a T,
    pub format: TextureFormat,
    pub range: TextureRangeDesc,
    /// Moves the whole texture into `TransferDst`.
    pub before: TextureBarrier<'a, T>,
    /// Moves it on once the copy is done; `None` leaves it in `TransferDst`.
    pub after: Option<TextureBarrier<'a, T>>,
}

/// Regeneration of mips 1.. of every layer by repeated linear downsampling of mip 0.
pub struct MipmapGeneration<'a, T> {
    pub texture: &'a T,
    pub dimensions: Dimensions,
    pub num_mip_levels: u32,
    pub num_layers: u32,
    /// Moves the whole texture into `TransferDst`.
    pub before: TextureBarrier<'a, T>,
    /// Final transition of every level; `None` leaves them all in `TransferDst`.
    pub after: Option<TextureBarrier<'a, T>>,
}

/// Command stream of one recording session.
pub trait CommandEncoder<B: Backend>: Send {
    fn texture_barrier(&mut self, barrier: &TextureBarrier<'_, B::Texture>);

    fn begin_rendering(&mut self, info: &RenderingInfo<'_, B::Texture>);
    fn end_rendering(&mut self);

    fn set_viewport(&mut self, viewport: &Viewport);
    fn set_scissor(&mut self, rect: &ScissorRect);

    fn bind_pipeline(&mut self, bind_point: PipelineBindPoint, pipeline: B::Pipeline);
    fn bind_vertex_buffer(&mut self, index: u32, buffer: &B::Buffer, offset: u64);
    fn bind_index_buffer(&mut self, buffer: &B::Buffer, offset: u64, format: IndexFormat);
    fn push_constants(&mut self, offset: u32, data: &[u8]);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, base_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        base_instance: u32,
    );
    fn draw_indirect(&mut self, buffer: &B::Buffer, offset: u64, draw_count: u32, stride: u32);
    fn draw_indexed_indirect(&mut self, buffer: &B::Buffer, offset: u64, draw_count: u32, stride: u32);
    fn dispatch(&mut self, groups: Dimensions);

    fn set_stencil_reference(&mut self, front: u32, back: u32);
    fn set_stencil_compare_mask(&mut self, front: u32, back: u32);
    fn set_stencil_write_mask(&mut self, front: u32, back: u32);
    fn set_blend_constants(&mut self, color: Color);
    fn set_depth_bias(&mut self, constant_factor: f32, slope_factor: f32, clamp: f32);

    fn push_debug_label(&mut self, label: &str, color: Color);
    fn insert_debug_label(&mut self, label: &str, color: Color);
    fn pop_debug_label(&mut self);
}

/// One concrete graphics API.
pub trait Backend: Send + Sync + Sized + 'static {
    type Buffer: Send + Sync + 'static;
    type Texture: Send + Sync + 'static;
    type Sampler: Send + Sync + 'static;
    type ShaderModule: Send + Sync + 'static;
    /// Native pipelines are shared between recorders by value.
    type Pipeline: Copy + Eq + Hash + Debug + Send + Sync + 'static;
    type Encoder: CommandEncoder<Self>;
    /// A submitted encoder plus whatever signals its completion.
    type Submission: Send + 'static;

    fn name(&self) -> &str;
    fn limits(&self) -> DeviceLimits;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<BufferAllocation<Self::Buffer>>;
    fn destroy_buffer(&self, buffer: Self::Buffer);
    /// Write into a buffer that is not host-mapped, going through a staging copy.
    fn upload_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> RhiResult<()>;
    /// Read back a buffer that is not host-mapped.
    fn read_buffer(&self, buffer: &Self::Buffer, offset: u64, out: &mut [u8]) -> RhiResult<()>;
    fn flush_mapped_memory(&self, buffer: &Self::Buffer, offset: u64, size: u64) -> RhiResult<()>;

    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<Self::Texture>;
    fn destroy_texture(&self, texture: Self::Texture);
    /// Copy `data` into a texture and wait for the copy, barriers included.
    fn upload_texture(&self, upload: &TextureUpload<'_, Self::Texture>, data: &[u8]) -> RhiResult<()>;
    /// Rebuild a texture's mip chain from mip 0 and wait for it.
    fn generate_mipmap(&self, mips: &MipmapGeneration<'_, Self::Texture>) -> RhiResult<()>;

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<Self::Sampler>;
    fn destroy_sampler(&self, sampler: Self::Sampler);

    fn create_shader_module(&self, desc: &ShaderModuleDesc<'_>) -> RhiResult<Self::ShaderModule>;
    fn destroy_shader_module(&self, module: Self::ShaderModule);

    fn create_render_pipeline(&self, build: &RenderPipelineBuild<'_, Self::ShaderModule>) -> RhiResult<Self::Pipeline>;
    fn create_compute_pipeline(
        &self,
        shader: &Self::ShaderModule,
        entry_point: &str,
        debug_name: &str,
    ) -> RhiResult<Self::Pipeline>;
    fn destroy_pipeline(&self, pipeline: Self::Pipeline);

    fn begin_encoder(&self) -> RhiResult<Self::Encoder>;
    /// Discard an encoder that will never be submitted.
    fn abandon_encoder(&self, encoder: Self::Encoder);
    fn submit(&self, encoder: Self::Encoder, queue: QueueType) -> RhiResult<Self::Submission>;
    fn is_complete(&self, submission: &Self::Submission) -> bool;
    fn wait(&self, submission: &Self::Submission) -> RhiResult<()>;
    /// Release the per-submission objects of a completed submission.
    fn retire(&self, submission: Self::Submission);
    fn wait_idle(&self) -> RhiResult<()>;
}
