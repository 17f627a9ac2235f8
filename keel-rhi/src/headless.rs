//! A backend without a GPU.
//!
//! Objects are plain ids, buffer memory lives on the heap, and encoders append to a command
//! log that can be inspected after submission. Texture uploads and mip generation run outside
//! any encoder and land in a separate log of immediate commands. Submissions complete
//! immediately unless the backend is created with manual completion, in which case tests
//! signal them one by one with [`HeadlessBackend::complete`].

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use keel_core::collections::hashmap::HashMap;
use keel_core::collections::hashset::HashSet;
use keel_core::log;
use crate::backend::{
    Backend, BufferAllocation, CommandEncoder, DeviceLimits, MipmapGeneration, PipelineBindPoint, RenderingInfo,
    TextureUpload,
};
use crate::barrier::{PipelineStages, TextureBarrier, TextureLayout};
use crate::buffer::{BufferDesc, StorageType};
use crate::device::DeviceConfig;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{DynamicState, IndexFormat, RenderPipelineBuild};
use crate::render_pass::{Color, QueueType, ScissorRect, Viewport};
use crate::sampler::SamplerDesc;
use crate::shader::ShaderModuleDesc;
use crate::texture::{Dimensions, TextureDesc};

/// Heap memory standing in for a buffer allocation. Its address is stable for the buffer's
/// whole life, which is what mapped pointers rely on.
pub struct HostMemory {
    bytes: NonNull<[u8]>,
}

// SAFETY: the allocation is uniquely owned; shared access goes through bounds-checked copies.
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

impl HostMemory {
    fn zeroed(size: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; size].into_boxed_slice();
        Self { bytes: NonNull::from(Box::leak(boxed)) }
    }

    #[inline]
    fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    fn as_ptr(&self) -> NonNull<u8> {
        self.bytes.cast()
    }

    fn range_check(&self, offset: u64, len: usize) -> RhiResult<usize> {
        let offset = usize::try_from(offset).map_err(|_| RhiError::out_of_range("offset overflows usize"))?;
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(offset),
            _ => Err(RhiError::out_of_range(format!(
                "{len} bytes at {offset} exceed the {}-byte allocation",
                self.len()
            ))),
        }
    }

    fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        let offset = self.range_check(offset, data.len())?;
        // SAFETY: range checked above; the allocation outlives `self`.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.as_ptr().as_ptr().add(offset), data.len()) };
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> RhiResult<()> {
        let offset = self.range_check(offset, out.len())?;
        // SAFETY: see `write`.
        unsafe { std::ptr::copy_nonoverlapping(self.as_ptr().as_ptr().add(offset), out.as_mut_ptr(), out.len()) };
        Ok(())
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        // SAFETY: `bytes` came from `Box::leak` in `zeroed` and is released exactly once.
        unsafe { drop(Box::from_raw(self.bytes.as_ptr())) };
    }
}

pub struct HeadlessBuffer {
    pub id: u64,
    memory: HostMemory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeadlessTexture {
    pub id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeadlessSampler {
    pub id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeadlessShaderModule {
    pub id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeadlessPipeline {
    pub id: u64,
}

/// One recorded command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Barrier {
        texture: u64,
        old_layout: TextureLayout,
        new_layout: TextureLayout,
        src_stage: PipelineStages,
        dst_stage: PipelineStages,
    },
    BeginRendering {
        color: Vec<u64>,
        resolve: Vec<u64>,
        depth: Option<u64>,
        render_area: ScissorRect,
    },
    EndRendering,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    BindPipeline(PipelineBindPoint, HeadlessPipeline),
    BindVertexBuffer { index: u32, buffer: u64, offset: u64 },
    BindIndexBuffer { buffer: u64, offset: u64, format: IndexFormat },
    PushConstants { offset: u32, data: Vec<u8> },
    Draw { vertex_count: u32, instance_count: u32, first_vertex: u32, base_instance: u32 },
    DrawIndexed { index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, base_instance: u32 },
    DrawIndirect { buffer: u64, offset: u64, draw_count: u32, stride: u32 },
    DrawIndexedIndirect { buffer: u64, offset: u64, draw_count: u32, stride: u32 },
    Dispatch(Dimensions),
    StencilReference { front: u32, back: u32 },
    StencilCompareMask { front: u32, back: u32 },
    StencilWriteMask { front: u32, back: u32 },
    BlendConstants(Color),
    DepthBias { constant_factor: f32, slope_factor: f32, clamp: f32 },
    PushDebugLabel(String),
    InsertDebugLabel(String),
    PopDebugLabel,
    CopyToTexture { texture: u64, layer: u32, mip_level: u32, offset: [u32; 3], extent: Dimensions, data: Vec<u8> },
    BlitMip { texture: u64, layer: u32, src_level: u32, dst_level: u32 },
}

impl Command {
    fn barrier(barrier: &TextureBarrier<'_, HeadlessTexture>) -> Self {
        Command::Barrier {
            texture: barrier.texture.id,
            old_layout: barrier.old_layout,
            new_layout: barrier.new_layout,
            src_stage: barrier.src_stage,
            dst_stage: barrier.dst_stage,
        }
    }
}

pub struct HeadlessEncoder {
    commands: Vec<Command>,
}

impl HeadlessEncoder {
    #[inline]
    pub fn commands(&self) -> &[Command] { &self.commands }
}

impl CommandEncoder<HeadlessBackend> for HeadlessEncoder {
    fn texture_barrier(&mut self, barrier: &TextureBarrier<'_, HeadlessTexture>) {
        self.commands.push(Command::barrier(barrier));
    }

    fn begin_rendering(&mut self, info: &RenderingInfo<'_, HeadlessTexture>) {
        self.commands.push(Command::BeginRendering {
            color: info.color.iter().map(|target| target.texture.id).collect(),
            resolve: info.color.iter().filter_map(|target| target.resolve.map(|t| t.id)).collect(),
            depth: info.depth.as_ref().map(|target| target.texture.id),
            render_area: info.render_area,
        });
    }

    fn end_rendering(&mut self) {
        self.commands.push(Command::EndRendering);
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.commands.push(Command::SetViewport(*viewport));
    }

    fn set_scissor(&mut self, rect: &ScissorRect) {
        self.commands.push(Command::SetScissor(*rect));
    }

    fn bind_pipeline(&mut self, bind_point: PipelineBindPoint, pipeline: HeadlessPipeline) {
        self.commands.push(Command::BindPipeline(bind_point, pipeline));
    }

    fn bind_vertex_buffer(&mut self, index: u32, buffer: &HeadlessBuffer, offset: u64) {
        self.commands.push(Command::BindVertexBuffer { index, buffer: buffer.id, offset });
    }

    fn bind_index_buffer(&mut self, buffer: &HeadlessBuffer, offset: u64, format: IndexFormat) {
        self.commands.push(Command::BindIndexBuffer { buffer: buffer.id, offset, format });
    }

    fn push_constants(&mut self, offset: u32, data: &[u8]) {
        self.commands.push(Command::PushConstants { offset, data: data.to_vec() });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, base_instance: u32) {
        self.commands.push(Command::Draw { vertex_count, instance_count, first_vertex, base_instance });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        base_instance: u32,
    ) {
        self.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            base_instance,
        });
    }

    fn draw_indirect(&mut self, buffer: &HeadlessBuffer, offset: u64, draw_count: u32, stride: u32) {
        self.commands.push(Command::DrawIndirect { buffer: buffer.id, offset, draw_count, stride });
    }

    fn draw_indexed_indirect(&mut self, buffer: &HeadlessBuffer, offset: u64, draw_count: u32, stride: u32) {
        self.commands.push(Command::DrawIndexedIndirect { buffer: buffer.id, offset, draw_count, stride });
    }

    fn dispatch(&mut self, groups: Dimensions) {
        self.commands.push(Command::Dispatch(groups));
    }

    fn set_stencil_reference(&mut self, front: u32, back: u32) {
        self.commands.push(Command::StencilReference { front, back });
    }

    fn set_stencil_compare_mask(&mut self, front: u32, back: u32) {
        self.commands.push(Command::StencilCompareMask { front, back });
    }

    fn set_stencil_write_mask(&mut self, front: u32, back: u32) {
        self.commands.push(Command::StencilWriteMask { front, back });
    }

    fn set_blend_constants(&mut self, color: Color) {
        self.commands.push(Command::BlendConstants(color));
    }

    fn set_depth_bias(&mut self, constant_factor: f32, slope_factor: f32, clamp: f32) {
        self.commands.push(Command::DepthBias { constant_factor, slope_factor, clamp });
    }

    fn push_debug_label(&mut self, label: &str, _color: Color) {
        self.commands.push(Command::PushDebugLabel(label.to_owned()));
    }

    fn insert_debug_label(&mut self, label: &str, _color: Color) {
        self.commands.push(Command::InsertDebugLabel(label.to_owned()));
    }

    fn pop_debug_label(&mut self) {
        self.commands.push(Command::PopDebugLabel);
    }
}

/// Submission number, starting at 1 in submission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeadlessSubmission {
    pub index: u64,
}

/// Live object counts and build totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub live_buffers: usize,
    pub live_textures: usize,
    pub live_samplers: usize,
    pub live_shader_modules: usize,
    pub live_pipelines: usize,
    pub pipelines_built: usize,
    pub submissions: u64,
}

pub struct HeadlessBackend {
    limits: DeviceLimits,
    auto_complete: bool,
    next_id: AtomicU64,
    stats: Mutex<HeadlessStats>,
    signaled: Mutex<HashSet<u64>>,
    submitted: Mutex<Vec<Vec<Command>>>,
    immediate: Mutex<Vec<Command>>,
    pipeline_states: Mutex<HashMap<HeadlessPipeline, Option<DynamicState>>>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(true)
    }
}

impl HeadlessBackend {
    pub fn new(auto_complete: bool) -> Self {
        Self {
            limits: DeviceLimits::default(),
            auto_complete,
            next_id: AtomicU64::new(1),
            stats: Mutex::new(HeadlessStats::default()),
            signaled: Mutex::new(HashSet::default()),
            submitted: Mutex::new(Vec::new()),
            immediate: Mutex::new(Vec::new()),
            pipeline_states: Mutex::new(HashMap::default()),
        }
    }

    /// Submissions stay pending until [`complete`](Self::complete) is called.
    pub fn manual() -> Self {
        Self::new(false)
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.headless_auto_complete)
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Signal submission `index` (1-based, in submission order).
    pub fn complete(&self, index: u64) {
        self.signaled.lock().insert(index);
    }

    /// Signal every submission made so far.
    pub fn complete_all(&self) {
        let submitted = self.stats.lock().submissions;
        self.signaled.lock().extend(1..=submitted);
    }

    pub fn stats(&self) -> HeadlessStats {
        *self.stats.lock()
    }

    /// Commands of submission `index`.
    pub fn submitted_commands(&self, index: u64) -> Option<Vec<Command>> {
        let position = usize::try_from(index.checked_sub(1)?).ok()?;
        self.submitted.lock().get(position).cloned()
    }

    /// Every upload and mip generation command so far, in order.
    pub fn immediate_commands(&self) -> Vec<Command> {
        self.immediate.lock().clone()
    }

    /// Dynamic state a render pipeline was compiled for; `None` inside for compute pipelines.
    pub fn pipeline_state(&self, pipeline: HeadlessPipeline) -> Option<Option<DynamicState>> {
        self.pipeline_states.lock().get(&pipeline).copied()
    }
}

impl Backend for HeadlessBackend {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type Sampler = HeadlessSampler;
    type ShaderModule = HeadlessShaderModule;
    type Pipeline = HeadlessPipeline;
    type Encoder = HeadlessEncoder;
    type Submission = HeadlessSubmission;

    fn name(&self) -> &str {
        "headless"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<BufferAllocation<HeadlessBuffer>> {
        let size = usize::try_from(desc.size).map_err(|_| RhiError::out_of_range("buffer too large for host memory"))?;
        let buffer = HeadlessBuffer { id: self.next_id(), memory: HostMemory::zeroed(size) };
        let mapped = (desc.storage == StorageType::HostVisible).then(|| buffer.memory.as_ptr());
        let gpu_address = if desc.wants_device_address() { buffer.id << 32 } else { 0 };
        self.stats.lock().live_buffers += 1;
        Ok(BufferAllocation { buffer, mapped, gpu_address })
    }

    fn destroy_buffer(&self, buffer: HeadlessBuffer) {
        log::trace!("headless buffer {} destroyed", buffer.id);
        self.stats.lock().live_buffers -= 1;
    }

    fn upload_buffer(&self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        buffer.memory.write(offset, data)
    }

    fn read_buffer(&self, buffer: &HeadlessBuffer, offset: u64, out: &mut [u8]) -> RhiResult<()> {
        buffer.memory.read(offset, out)
    }

    fn flush_mapped_memory(&self, buffer: &HeadlessBuffer, offset: u64, size: u64) -> RhiResult<()> {
        let len = usize::try_from(size).map_err(|_| RhiError::out_of_range("flush size overflows usize"))?;
        buffer.memory.range_check(offset, len).map(|_| ())
    }

    fn create_texture(&self, _desc: &TextureDesc) -> RhiResult<HeadlessTexture> {
        self.stats.lock().live_textures += 1;
        Ok(HeadlessTexture { id: self.next_id() })
    }

    fn destroy_texture(&self, texture: HeadlessTexture) {
        log::trace!("headless texture {} destroyed", texture.id);
        self.stats.lock().live_textures -= 1;
    }

    fn upload_texture(&self, upload: &TextureUpload<'_, HeadlessTexture>, data: &[u8]) -> RhiResult<()> {
        let range = &upload.range;
        let mut commands = vec![Command::barrier(&upload.before)];
        let mut rest = data;
        for layer in range.layers() {
            for level in range.levels() {
                let extent = range.extent_at(level);
                let size = usize::try_from(upload.format.image_size(extent))
                    .map_err(|_| RhiError::out_of_range("texture upload too large for host memory"))?;
                if size > rest.len() {
                    return Err(RhiError::out_of_range("texture upload data is shorter than its range"));
                }
                let (bytes, tail) = rest.split_at(size);
                rest = tail;
                commands.push(Command::CopyToTexture {
                    texture: upload.texture.id,
                    layer,
                    mip_level: level,
                    offset: range.offset_at(level),
                    extent,
                    data: bytes.to_vec(),
                });
            }
        }
        commands.extend(upload.after.as_ref().map(Command::barrier));
        self.immediate.lock().extend(commands);
        Ok(())
    }

    fn generate_mipmap(&self, mips: &MipmapGeneration<'_, HeadlessTexture>) -> RhiResult<()> {
        let mut immediate = self.immediate.lock();
        immediate.push(Command::barrier(&mips.before));
        for layer in 0..mips.num_layers {
            for level in 1..mips.num_mip_levels {
                immediate.push(Command::BlitMip {
                    texture: mips.texture.id,
                    layer,
                    src_level: level - 1,
                    dst_level: level,
                });
            }
        }
        immediate.extend(mips.after.as_ref().map(Command::barrier));
        Ok(())
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> RhiResult<HeadlessSampler> {
        self.stats.lock().live_samplers += 1;
        Ok(HeadlessSampler { id: self.next_id() })
    }

    fn destroy_sampler(&self, _sampler: HeadlessSampler) {
        self.stats.lock().live_samplers -= 1;
    }

    fn create_shader_module(&self, _desc: &ShaderModuleDesc<'_>) -> RhiResult<HeadlessShaderModule> {
        self.stats.lock().live_shader_modules += 1;
        Ok(HeadlessShaderModule { id: self.next_id() })
    }

    fn destroy_shader_module(&self, _module: HeadlessShaderModule) {
        self.stats.lock().live_shader_modules -= 1;
    }

    fn create_render_pipeline(&self, build: &RenderPipelineBuild<'_, HeadlessShaderModule>) -> RhiResult<HeadlessPipeline> {
        let pipeline = HeadlessPipeline { id: self.next_id() };
        self.pipeline_states.lock().insert(pipeline, Some(*build.dynamic));
        let mut stats = self.stats.lock();
        stats.live_pipelines += 1;
        stats.pipelines_built += 1;
        Ok(pipeline)
    }

    fn create_compute_pipeline(
        &self,
        _shader: &HeadlessShaderModule,
        _entry_point: &str,
        _debug_name: &str,
    ) -> RhiResult<HeadlessPipeline> {
        let pipeline = HeadlessPipeline { id: self.next_id() };
        self.pipeline_states.lock().insert(pipeline, None);
        let mut stats = self.stats.lock();
        stats.live_pipelines += 1;
        stats.pipelines_built += 1;
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: HeadlessPipeline) {
        self.pipeline_states.lock().remove(&pipeline);
        self.stats.lock().live_pipelines -= 1;
    }

    fn begin_encoder(&self) -> RhiResult<HeadlessEncoder> {
        Ok(HeadlessEncoder { commands: Vec::new() })
    }

    fn abandon_encoder(&self, encoder: HeadlessEncoder) {
        log::trace!("headless encoder abandoned with {} commands", encoder.commands.len());
    }

    fn submit(&self, encoder: HeadlessEncoder, queue: QueueType) -> RhiResult<HeadlessSubmission> {
        let mut submitted = self.submitted.lock();
        log::trace!("headless submission of {} commands to {queue:?}", encoder.commands.len());
        submitted.push(encoder.commands);
        let index = submitted.len() as u64;
        self.stats.lock().submissions = index;
        Ok(HeadlessSubmission { index })
    }

    fn is_complete(&self, submission: &HeadlessSubmission) -> bool {
        self.auto_complete || self.signaled.lock().contains(&submission.index)
    }

    fn wait(&self, submission: &HeadlessSubmission) -> RhiResult<()> {
        self.complete(submission.index);
        Ok(())
    }

    fn retire(&self, submission: HeadlessSubmission) {
        log::trace!("headless submission {} retired", submission.index);
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.complete_all();
        Ok(())
    }
}
