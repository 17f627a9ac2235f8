//! The command recorder.
//!
//! A [`CommandBuffer`] is acquired from a [`Device`] in the recording state and consumed by
//! [`Device::submit`]. Between the two it tracks whether a render pass is open, which render
//! pipeline is current, which native pipeline was bound last and the dynamic state that
//! selects pipeline variants. Misuse (drawing outside a pass, nesting passes, mismatched
//! attachments) is a fault reported through `verify!`; the offending call is then skipped.

use keel_core::collections::SmallVec;
use keel_core::log;
use crate::backend::{Backend, ColorTarget, CommandEncoder, DepthTarget, PipelineBindPoint, RenderingInfo};
use crate::buffer::BufferUsage;
use crate::device::Device;
use crate::handle::{BufferHandle, ComputePipelineHandle, RenderPipelineHandle, TextureHandle};
use crate::pipeline::{DepthStencilState, DynamicState, IndexFormat, StencilFaceOps, Topology};
use crate::render_pass::{Color, Dependencies, Framebuffer, RenderPass, ScissorRect, StoreOp, Viewport};
use crate::submit::SessionId;
use crate::synchronization::{self, TextureState, TextureUse};
use crate::texture::{Dimensions, Texture};
use crate::utility::verify;

/// Byte size of one non-indexed indirect draw record.
pub const DRAW_INDIRECT_STRIDE: u32 = 16;
/// Byte size of one indexed indirect draw record.
pub const DRAW_INDEXED_INDIRECT_STRIDE: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Recording,
    Rendering,
}

pub struct CommandBuffer<'d, B: Backend> {
    device: &'d Device<B>,
    encoder: Option<B::Encoder>,
    state: RecorderState,
    framebuffer: Framebuffer,
    current_pipeline: RenderPipelineHandle,
    last_bound: Option<B::Pipeline>,
    last_bound_compute: Option<B::Pipeline>,
    dynamic: DynamicState,
    session: SessionId,
}

impl<'d, B: Backend> CommandBuffer<'d, B> {
    pub(crate) fn new(device: &'d Device<B>, encoder: B::Encoder, session: SessionId) -> Self {
        Self {
            device,
            encoder: Some(encoder),
            session,
            state: RecorderState::Recording,
            framebuffer: Framebuffer::default(),
            current_pipeline: RenderPipelineHandle::EMPTY,
            last_bound: None,
            last_bound_compute: None,
            dynamic: DynamicState::default(),
        }
    }

    #[inline]
    pub fn state(&self) -> RecorderState { self.state }

    #[inline]
    pub(crate) fn session(&self) -> SessionId { self.session }

    #[inline]
    pub fn is_rendering(&self) -> bool { self.state == RecorderState::Rendering }

    #[inline]
    pub fn dynamic_state(&self) -> &DynamicState { &self.dynamic }

    /// The native pipeline the encoder has bound for graphics, if any.
    #[inline]
    pub fn last_bound_pipeline(&self) -> Option<B::Pipeline> { self.last_bound }

    /// Move a texture into the shader-read layout. Multisampled textures are left alone.
    pub fn transition_to_shader_read_only(&mut self, texture: TextureHandle) {
        profiling::scope!("transition_to_shader_read_only");

        let Some(encoder) = self.encoder.as_mut() else { return };
        let textures = self.device.textures.read();
        let Some(tex) = textures.get(texture) else {
            verify!(false, "cannot transition stale texture {texture:?}");
            return;
        };
        if let Some(barrier) = synchronization::transition(tex, TextureUse::ShaderRead) {
            encoder.texture_barrier(&barrier);
        }
    }

    pub fn push_debug_group_label(&mut self, label: &str, color: Color) {
        if !self.device.config().debug_labels {
            return;
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.push_debug_label(label, color);
        }
    }

    pub fn insert_debug_event_label(&mut self, label: &str, color: Color) {
        if !self.device.config().debug_labels {
            return;
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.insert_debug_label(label, color);
        }
    }

    pub fn pop_debug_group_label(&mut self) {
        if !self.device.config().debug_labels {
            return;
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.pop_debug_label();
        }
    }

    pub fn bind_compute_pipeline(&mut self, handle: ComputePipelineHandle) {
        profiling::scope!("bind_compute_pipeline");

        if !verify!(handle.is_valid(), "binding an empty compute pipeline") {
            return;
        }
        if !verify!(!self.is_rendering(), "compute pipelines cannot be bound inside a render pass") {
            return;
        }
        let Some(pipeline) = self.device.compute_pipelines.read().get(handle).map(|p| p.native) else {
            verify!(false, "compute pipeline {handle:?} is stale");
            return;
        };
        let Some(encoder) = self.encoder.as_mut() else { return };
        if self.last_bound_compute != Some(pipeline) {
            self.last_bound_compute = Some(pipeline);
            encoder.bind_pipeline(PipelineBindPoint::Compute, pipeline);
        }
    }

    /// Dispatch compute work. Every dependency must be a storage texture; each is moved to
    /// the general layout first.
    #[profiling::function]
    pub fn dispatch_thread_groups(&mut self, groups: Dimensions, deps: &Dependencies) {
        if !verify!(!self.is_rendering(), "dispatch inside a render pass") {
            return;
        }
        let Some(encoder) = self.encoder.as_mut() else { return };

        let textures = self.device.textures.read();
        for handle in deps.iter() {
            let Some(tex) = textures.get(handle) else {
                verify!(false, "compute dependency {handle:?} is stale");
                continue;
            };
            if !verify!(tex.is_storage(), "compute dependency `{}` lacks storage usage", tex.name()) {
                continue;
            }
            if let Some(barrier) = synchronization::transition(tex, TextureUse::Storage) {
                encoder.texture_barrier(&barrier);
            }
        }
        drop(textures);

        encoder.dispatch(groups);
    }

    /// Open a render pass over `framebuffer`.
    ///
    /// All attachments must share one size and mip level; the viewport and scissor are set to
    /// that mip's extent.
    #[profiling::function]
    pub fn begin_rendering(&mut self, pass: &RenderPass, framebuffer: &Framebuffer) {
        if !verify!(!self.is_rendering(), "begin_rendering called twice without end_rendering") {
            return;
        }
        if !verify!(
            pass.num_color_attachments() == framebuffer.num_color_attachments(),
            "render pass has {} colour attachments, framebuffer has {}",
            pass.num_color_attachments(),
            framebuffer.num_color_attachments()
        ) {
            return;
        }

        let device = self.device;
        let Some(encoder) = self.encoder.as_mut() else { return };
        let textures = device.textures.read();

        let mut info = RenderingInfo {
            color: SmallVec::new(),
            depth: None,
            render_area: ScissorRect::default(),
        };
        let mut samples = 1;
        let mut extent: Option<(Dimensions, u32)> = None;

        let mut same_extent = |tex: &Texture<B::Texture>, level: u32| -> bool {
            let dims = tex.dimensions();
            match extent {
                None => {
                    extent = Some((dims, level));
                    true
                }
                Some((first, first_level)) => {
                    let matches = verify!(
                        dims.width == first.width && dims.height == first.height,
                        "attachment `{}` is {}x{}, expected {}x{}",
                        tex.name(),
                        dims.width,
                        dims.height,
                        first.width,
                        first.height
                    ) && verify!(
                        level == first_level,
                        "attachment `{}` renders mip {level}, expected mip {first_level}",
                        tex.name()
                    );
                    extent = Some((dims, level));
                    matches
                }
            }
        };

        for (attachment, desc) in framebuffer.color.iter().zip(&pass.color) {
            let Some(tex) = textures.get(attachment.texture) else {
                verify!(false, "colour attachment {:?} is stale", attachment.texture);
                return;
            };
            if !verify!(
                !tex.format().is_depth_or_stencil(),
                "colour attachment `{}` has a depth/stencil format",
                tex.name()
            ) {
                return;
            }
            if !same_extent(tex, desc.level) {
                return;
            }
            samples = tex.num_samples();

            let resolve = if desc.store_op == StoreOp::MsaaResolve {
                if !verify!(samples > 1, "MSAA resolve of single-sampled attachment `{}`", tex.name()) {
                    return;
                }
                let Some(resolve) = textures.get(attachment.resolve_texture) else {
                    verify!(false, "attachment `{}` resolves but has no resolve texture", tex.name());
                    return;
                };
                Some(resolve.native())
            } else {
                None
            };

            info.color.push(ColorTarget {
                texture: tex.native(),
                format: tex.format(),
                resolve,
                attachment: *desc,
            });
        }

        if let Some(depth) = framebuffer.depth_stencil {
            let Some(tex) = textures.get(depth.texture) else {
                verify!(false, "depth attachment {:?} is stale", depth.texture);
                return;
            };
            if !verify!(tex.format().is_depth_or_stencil(), "depth attachment `{}` has a colour format", tex.name()) {
                return;
            }
            if !same_extent(tex, pass.depth.level) {
                return;
            }
            info.depth = Some(DepthTarget {
                texture: tex.native(),
                format: tex.format(),
                depth: pass.depth,
                stencil: pass.stencil,
            });
        }

        // Layout transitions, colour first and depth last.
        for attachment in &framebuffer.color {
            for handle in [attachment.texture, attachment.resolve_texture] {
                if let Some(barrier) = textures
                    .get(handle)
                    .and_then(|tex| synchronization::transition(tex, TextureUse::ColorAttachment))
                {
                    encoder.texture_barrier(&barrier);
                }
            }
        }
        if let Some(barrier) = framebuffer
            .depth_stencil
            .and_then(|depth| textures.get(depth.texture))
            .and_then(|tex| synchronization::transition(tex, TextureUse::DepthStencilAttachment))
        {
            encoder.texture_barrier(&barrier);
        }

        let (dims, level) = extent.unwrap_or((Dimensions::new(1, 1, 1), 0));
        let size = dims.at_mip(level);
        info.render_area = ScissorRect::new(size.width, size.height);

        encoder.begin_rendering(&info);
        drop(info);
        drop(textures);

        self.state = RecorderState::Rendering;
        self.framebuffer = framebuffer.clone();
        self.dynamic.depth_bias_enable = false;
        self.dynamic.samples = samples;

        self.bind_viewport(&Viewport::new(size.width as f32, size.height as f32));
        self.bind_scissor_rect(&ScissorRect::new(size.width, size.height));
    }

    /// Close the open render pass. Attachments are tracked in their attachment layouts
    /// afterwards.
    #[profiling::function]
    pub fn end_rendering(&mut self) {
        if !verify!(self.is_rendering(), "end_rendering without begin_rendering") {
            return;
        }
        self.state = RecorderState::Recording;
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.end_rendering();
        }

        let framebuffer = std::mem::take(&mut self.framebuffer);
        let textures = self.device.textures.read();
        for attachment in &framebuffer.color {
            for handle in [attachment.texture, attachment.resolve_texture] {
                if let Some(tex) = textures.get(handle) {
                    synchronization::set_state(tex, TextureState::color_after_rendering());
                }
            }
        }
        if let Some(tex) = framebuffer.depth_stencil.and_then(|depth| textures.get(depth.texture)) {
            synchronization::set_state(tex, TextureState::depth_after_rendering());
        }
    }

    pub fn bind_viewport(&mut self, viewport: &Viewport) {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.set_viewport(viewport);
        }
    }

    pub fn bind_scissor_rect(&mut self, rect: &ScissorRect) {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.set_scissor(rect);
        }
    }

    /// Make `handle` the current render pipeline. The native pipeline is resolved at the next
    /// draw, once the dynamic state is known.
    pub fn bind_render_pipeline(&mut self, handle: RenderPipelineHandle) {
        if !verify!(handle.is_valid(), "binding an empty render pipeline") {
            return;
        }
        self.current_pipeline = handle;

        let pipelines = self.device.render_pipelines.read();
        let Some(pipeline) = pipelines.get(handle) else {
            verify!(false, "render pipeline {handle:?} is stale");
            return;
        };
        let pass_has_depth = self.framebuffer.depth_stencil.is_some();
        if !verify!(
            pipeline.has_depth_attachment() == pass_has_depth,
            "render pipeline `{}` and the active framebuffer disagree on a depth attachment",
            pipeline.debug_name()
        ) {
            log::warn!("Make sure your render pass and render pipeline both have matching depth attachments");
        }
    }

    pub fn bind_depth_stencil_state(&mut self, desc: &DepthStencilState) {
        self.dynamic.depth_write_enable = desc.depth_write_enabled;
        self.dynamic.depth_compare_op = desc.compare_op;
        self.dynamic.stencil_front = StencilFaceOps::from(&desc.front_face_stencil);
        self.dynamic.stencil_back = StencilFaceOps::from(&desc.back_face_stencil);

        let Some(encoder) = self.encoder.as_mut() else { return };
        let (front, back) = (&desc.front_face_stencil, &desc.back_face_stencil);
        encoder.set_stencil_reference(front.read_mask, back.read_mask);
        encoder.set_stencil_compare_mask(0xFF, 0xFF);
        encoder.set_stencil_write_mask(front.write_mask, back.write_mask);
    }

    pub fn bind_vertex_buffer(&mut self, index: u32, buffer: BufferHandle, offset: u64) {
        if !verify!(buffer.is_valid(), "binding an empty vertex buffer") {
            return;
        }
        let Some(encoder) = self.encoder.as_mut() else { return };
        let buffers = self.device.buffers.read();
        let Some(buf) = buffers.get(buffer) else {
            verify!(false, "vertex buffer {buffer:?} is stale");
            return;
        };
        verify!(buf.usage().contains(BufferUsage::Vertex), "buffer `{}` lacks vertex usage", buf.name());
        encoder.bind_vertex_buffer(index, buf.native(), offset);
    }

    /// Write push constants at `offset`. Data past the device limit is dropped with a warning.
    pub fn push_constants(&mut self, data: &[u8], offset: u32) {
        if !verify!(data.len() % 4 == 0, "push constant size {} is not a multiple of 4", data.len()) {
            return;
        }
        let max = self.device.limits().max_push_constants_size;
        let end = offset as u64 + data.len() as u64;
        let data = if end > max as u64 {
            log::warn!("Push constants size exceeded {end} (max {max} bytes)");
            &data[..max.saturating_sub(offset) as usize]
        } else {
            data
        };
        if data.is_empty() {
            return;
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.push_constants(offset, data);
        }
    }

    #[profiling::function]
    pub fn draw(&mut self, topology: Topology, vertex_start: u32, vertex_count: u32) {
        if !self.verify_rendering("draw") || vertex_count == 0 {
            return;
        }
        self.dynamic.topology = topology;
        if !self.bind_graphics_pipeline() {
            return;
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.draw(vertex_count, 1, vertex_start, 0);
        }
    }

    #[profiling::function]
    pub fn draw_indexed(
        &mut self,
        topology: Topology,
        index_count: u32,
        index_format: IndexFormat,
        index_buffer: BufferHandle,
        index_buffer_offset: u64,
    ) {
        if !self.verify_rendering("draw_indexed") || index_count == 0 {
            return;
        }
        self.dynamic.topology = topology;
        if !self.bind_graphics_pipeline() {
            return;
        }
        let Some(encoder) = self.encoder.as_mut() else { return };
        let buffers = self.device.buffers.read();
        let Some(index) = buffers.get(index_buffer) else {
            verify!(false, "index buffer {index_buffer:?} is stale");
            return;
        };
        encoder.bind_index_buffer(index.native(), index_buffer_offset, index_format);
        encoder.draw_indexed(index_count, 1, 0, 0, 0);
    }

    /// `stride` 0 means tightly packed records.
    #[profiling::function]
    pub fn draw_indirect(
        &mut self,
        topology: Topology,
        indirect_buffer: BufferHandle,
        indirect_buffer_offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        if !self.verify_rendering("draw_indirect") || draw_count == 0 {
            return;
        }
        self.dynamic.topology = topology;
        if !self.bind_graphics_pipeline() {
            return;
        }
        let Some(encoder) = self.encoder.as_mut() else { return };
        let buffers = self.device.buffers.read();
        let Some(indirect) = buffers.get(indirect_buffer) else {
            verify!(false, "indirect buffer {indirect_buffer:?} is stale");
            return;
        };
        let stride = if stride == 0 { DRAW_INDIRECT_STRIDE } else { stride };
        encoder.draw_indirect(indirect.native(), indirect_buffer_offset, draw_count, stride);
    }

    /// `stride` 0 means tightly packed records.
    #[profiling::function]
    #[allow(clippy::too_many_arguments)]
    pub fn draw_indexed_indirect(
        &mut self,
        topology: Topology,
        index_format: IndexFormat,
        index_buffer: BufferHandle,
        indirect_buffer: BufferHandle,
        indirect_buffer_offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        if !self.verify_rendering("draw_indexed_indirect") || draw_count == 0 {
            return;
        }
        self.dynamic.topology = topology;
        if !self.bind_graphics_pipeline() {
            return;
        }
        let Some(encoder) = self.encoder.as_mut() else { return };
        let buffers = self.device.buffers.read();
        let (Some(index), Some(indirect)) = (buffers.get(index_buffer), buffers.get(indirect_buffer)) else {
            verify!(false, "index {index_buffer:?} or indirect {indirect_buffer:?} buffer is stale");
            return;
        };
        let stride = if stride == 0 { DRAW_INDEXED_INDIRECT_STRIDE } else { stride };
        encoder.bind_index_buffer(index.native(), 0, index_format);
        encoder.draw_indexed_indirect(indirect.native(), indirect_buffer_offset, draw_count, stride);
    }

    pub fn set_stencil_reference_values(&mut self, front: u32, back: u32) {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.set_stencil_reference(front, back);
        }
    }

    pub fn set_blend_color(&mut self, color: Color) {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.set_blend_constants(color);
        }
    }

    /// Set depth bias factors; this also switches draws to the depth-biased pipeline variant
    /// until the next `begin_rendering`.
    pub fn set_depth_bias(&mut self, depth_bias: f32, slope_scale: f32, clamp: f32) {
        self.dynamic.depth_bias_enable = true;
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.set_depth_bias(depth_bias, slope_scale, clamp);
        }
    }

    fn verify_rendering(&self, call: &str) -> bool {
        verify!(self.is_rendering(), "{call} outside of a render pass")
    }

    /// Resolve the current pipeline for the current dynamic state and bind it if it differs
    /// from the last native pipeline bound.
    fn bind_graphics_pipeline(&mut self) -> bool {
        if !verify!(self.current_pipeline.is_valid(), "draw without a bound render pipeline") {
            return false;
        }
        let pipeline = match self.device.resolve_render_pipeline(self.current_pipeline, &self.dynamic) {
            Ok(Some(pipeline)) => pipeline,
            Ok(None) => {
                verify!(false, "render pipeline {:?} is stale", self.current_pipeline);
                return false;
            }
            Err(err) => {
                log::error!("failed to build render pipeline variant: {err}");
                return false;
            }
        };

        if self.last_bound != Some(pipeline) {
            self.last_bound = Some(pipeline);
            if let Some(encoder) = self.encoder.as_mut() {
                encoder.bind_pipeline(PipelineBindPoint::Graphics, pipeline);
            }
        }
        true
    }

    /// Close recording, moving `present` into the present layout, and hand back the encoder.
    pub(crate) fn finish(mut self, present: Option<TextureHandle>) -> Option<B::Encoder> {
        if !verify!(!self.is_rendering(), "submitting a command buffer with an open render pass") {
            self.end_rendering();
        }
        let mut encoder = self.encoder.take()?;
        if let Some(handle) = present {
            let textures = self.device.textures.read();
            match textures.get(handle) {
                Some(tex) => {
                    if let Some(barrier) = synchronization::transition(tex, TextureUse::Present) {
                        encoder.texture_barrier(&barrier);
                    }
                }
                None => {
                    verify!(false, "present texture {handle:?} is stale");
                }
            }
        }
        Some(encoder)
    }
}

impl<B: Backend> Drop for CommandBuffer<'_, B> {
    fn drop(&mut self) {
        let Some(encoder) = self.encoder.take() else { return };
        if !std::thread::panicking() {
            verify!(!self.is_rendering(), "command buffer dropped inside a render pass");
        }
        self.device.abandon_command_buffer(self.session, encoder);
    }
}
