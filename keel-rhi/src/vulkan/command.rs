//! Command pools, fences and the encoder that records into a Vulkan command buffer.

use std::ffi::CString;
use ash::vk;
use keel_core::collections::SmallVec;
use keel_core::log;
use keel_rhi_derive::DeviceObject;
use crate::backend::{CommandEncoder, PipelineBindPoint, RenderingInfo};
use crate::barrier::{PipelineStages, TextureBarrier, TextureLayout};
use crate::pipeline::{IndexFormat, MAX_COLOR_ATTACHMENTS};
use crate::render_pass::{Color, ScissorRect, Viewport};
use crate::texture::Dimensions;
use super::{convert, VulkanBackend, VulkanBuffer, VulkanTexture};
use super::DeviceObject as _;

/// Command buffer pool. Each recording session gets its own so recording never contends.
#[DeviceObject]
pub(crate) struct CommandPool {
    pool: vk::CommandPool,
}

impl CommandPool {
    pub(crate) fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self, vk::Result> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe { device.create_command_pool(&create_info, None)? };
        Ok(Self { pool, device: device.clone() })
    }

    pub(crate) fn allocate(&self) -> Result<vk::CommandBuffer, vk::Result> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device().allocate_command_buffers(&alloc_info)? };
        buffers.first().copied().ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    }

    pub(crate) fn reset(&self) -> Result<(), vk::Result> {
        unsafe { self.device().reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty()) }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device().destroy_command_pool(self.pool, None) }
    }
}

#[DeviceObject]
pub(crate) struct Fence {
    fence: vk::Fence,
}

impl Fence {
    pub(crate) fn new(device: &ash::Device) -> Result<Self, vk::Result> {
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None)? };
        Ok(Self { fence, device: device.clone() })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::Fence { self.fence }

    pub(crate) fn is_signaled(&self) -> bool {
        unsafe { self.device().get_fence_status(self.fence) }.unwrap_or_else(|err| {
            log::error!("fence status query failed: {err}");
            false
        })
    }

    pub(crate) fn wait(&self) -> Result<(), vk::Result> {
        unsafe { self.device().wait_for_fences(&[self.fence], true, u64::MAX) }
    }

    pub(crate) fn reset(&self) -> Result<(), vk::Result> {
        unsafe { self.device().reset_fences(&[self.fence]) }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device().destroy_fence(self.fence, None) }
    }
}

/// A submitted command buffer. Dropping it frees the buffer, so only retire it once the
/// fence has signalled.
pub struct VulkanSubmission {
    pub(crate) _pool: CommandPool,
    pub(crate) fence: Fence,
}

/// Records into one primary command buffer.
pub struct VulkanEncoder {
    pub(crate) pool: CommandPool,
    pub(crate) cmd: vk::CommandBuffer,
    layout: vk::PipelineLayout,
    push_constant_stages: vk::ShaderStageFlags,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl VulkanEncoder {
    pub(crate) fn new(
        device: &ash::Device,
        queue_family: u32,
        layout: vk::PipelineLayout,
        push_constant_stages: vk::ShaderStageFlags,
        debug_utils: Option<ash::ext::debug_utils::Device>,
    ) -> Result<Self, vk::Result> {
        let pool = CommandPool::new(device, queue_family, vk::CommandPoolCreateFlags::TRANSIENT)?;
        let cmd = pool.allocate()?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin_info)? };
        Ok(Self { pool, cmd, layout, push_constant_stages, debug_utils })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer { self.cmd }

    #[inline]
    fn device(&self) -> &ash::Device { self.pool.device() }

    fn debug_label(label: &str, color: Color) -> (CString, [f32; 4]) {
        let name = CString::new(label.replace('\0', " ")).unwrap_or_default();
        (name, [color.r, color.g, color.b, color.a])
    }
}

/// Whole-texture layout transition, all mips and layers.
pub(crate) fn record_texture_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    barrier: &TextureBarrier<'_, VulkanTexture>,
) {
    let all_levels = vk::ImageSubresourceRange::default()
        .aspect_mask(barrier.texture.aspect)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS);
    record_layout_barrier(
        device,
        cmd,
        barrier.texture.image,
        all_levels,
        (barrier.old_layout, barrier.src_stage),
        (barrier.new_layout, barrier.dst_stage),
    );
}

/// Layout transition of part of an image, from `(layout, stages)` to `(layout, stages)`.
pub(crate) fn record_layout_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    (old_layout, src_stage): (TextureLayout, PipelineStages),
    (new_layout, dst_stage): (TextureLayout, PipelineStages),
) {
    let image_barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(convert::pipeline_stages(src_stage))
        .src_access_mask(convert::layout_access(old_layout))
        .dst_stage_mask(convert::pipeline_stages(dst_stage))
        .dst_access_mask(convert::layout_access(new_layout))
        .old_layout(convert::image_layout(old_layout))
        .new_layout(convert::image_layout(new_layout))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range);
    let dependency = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&image_barrier));
    unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) }
}

impl CommandEncoder<VulkanBackend> for VulkanEncoder {
    fn texture_barrier(&mut self, barrier: &TextureBarrier<'_, VulkanTexture>) {
        record_texture_barrier(self.device(), self.cmd, barrier);
    }

    fn begin_rendering(&mut self, info: &RenderingInfo<'_, VulkanTexture>) {
        let color: SmallVec<[vk::RenderingAttachmentInfo; MAX_COLOR_ATTACHMENTS]> = info
            .color
            .iter()
            .map(|target| {
                let attachment = &target.attachment;
                let mut vk_info = vk::RenderingAttachmentInfo::default()
                    .image_view(target.texture.attachment_view(attachment.level, attachment.layer))
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(convert::load_op(attachment.load_op))
                    .store_op(convert::store_op(attachment.store_op))
                    .clear_value(convert::clear_color(attachment.clear_color));
                if let Some(resolve) = target.resolve {
                    vk_info = vk_info
                        .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                        .resolve_image_view(resolve.attachment_view(attachment.level, attachment.layer))
                        .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                }
                vk_info
            })
            .collect();

        let depth = info.depth.as_ref().map(|target| {
            vk::RenderingAttachmentInfo::default()
                .image_view(target.texture.attachment_view(target.depth.level, target.depth.layer))
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(convert::load_op(target.depth.load_op))
                .store_op(convert::store_op(target.depth.store_op))
                .clear_value(convert::clear_depth_stencil(target.depth.clear_depth, target.stencil.clear_stencil))
        });
        let stencil = info.depth.as_ref().filter(|target| target.format.has_stencil()).map(|target| {
            vk::RenderingAttachmentInfo::default()
                .image_view(target.texture.attachment_view(target.depth.level, target.depth.layer))
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(convert::load_op(target.stencil.load_op))
                .store_op(convert::store_op(target.stencil.store_op))
                .clear_value(convert::clear_depth_stencil(target.depth.clear_depth, target.stencil.clear_stencil))
        });

        let area = info.render_area;
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: area.x as i32, y: area.y as i32 },
                extent: vk::Extent2D { width: area.width, height: area.height },
            })
            .layer_count(1)
            .color_attachments(&color);
        if let Some(depth) = depth.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }
        if let Some(stencil) = stencil.as_ref() {
            rendering_info = rendering_info.stencil_attachment(stencil);
        }
        unsafe { self.device().cmd_begin_rendering(self.cmd, &rendering_info) }
    }

    fn end_rendering(&mut self) {
        unsafe { self.device().cmd_end_rendering(self.cmd) }
    }

    /// Vulkan's clip space points Y down; a negative-height viewport keeps Y up.
    fn set_viewport(&mut self, viewport: &Viewport) {
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y + viewport.height,
            width: viewport.width,
            height: -viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device().cmd_set_viewport(self.cmd, 0, &[vk_viewport]) }
    }

    fn set_scissor(&mut self, rect: &ScissorRect) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: rect.x as i32, y: rect.y as i32 },
            extent: vk::Extent2D { width: rect.width, height: rect.height },
        };
        unsafe { self.device().cmd_set_scissor(self.cmd, 0, &[scissor]) }
    }

    fn bind_pipeline(&mut self, bind_point: PipelineBindPoint, pipeline: vk::Pipeline) {
        let bind_point = match bind_point {
            PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
        };
        unsafe { self.device().cmd_bind_pipeline(self.cmd, bind_point, pipeline) }
    }

    fn bind_vertex_buffer(&mut self, index: u32, buffer: &VulkanBuffer, offset: u64) {
        unsafe { self.device().cmd_bind_vertex_buffers(self.cmd, index, &[buffer.buffer], &[offset]) }
    }

    fn bind_index_buffer(&mut self, buffer: &VulkanBuffer, offset: u64, format: IndexFormat) {
        unsafe { self.device().cmd_bind_index_buffer(self.cmd, buffer.buffer, offset, convert::index_type(format)) }
    }

    fn push_constants(&mut self, offset: u32, data: &[u8]) {
        unsafe {
            self.device().cmd_push_constants(self.cmd, self.layout, self.push_constant_stages, offset, data)
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, base_instance: u32) {
        unsafe { self.device().cmd_draw(self.cmd, vertex_count, instance_count, first_vertex, base_instance) }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        base_instance: u32,
    ) {
        unsafe {
            self.device().cmd_draw_indexed(self.cmd, index_count, instance_count, first_index, vertex_offset, base_instance)
        }
    }

    fn draw_indirect(&mut self, buffer: &VulkanBuffer, offset: u64, draw_count: u32, stride: u32) {
        unsafe { self.device().cmd_draw_indirect(self.cmd, buffer.buffer, offset, draw_count, stride) }
    }

    fn draw_indexed_indirect(&mut self, buffer: &VulkanBuffer, offset: u64, draw_count: u32, stride: u32) {
        unsafe { self.device().cmd_draw_indexed_indirect(self.cmd, buffer.buffer, offset, draw_count, stride) }
    }

    fn dispatch(&mut self, groups: Dimensions) {
        unsafe { self.device().cmd_dispatch(self.cmd, groups.width, groups.height, groups.depth) }
    }

    fn set_stencil_reference(&mut self, front: u32, back: u32) {
        unsafe {
            self.device().cmd_set_stencil_reference(self.cmd, vk::StencilFaceFlags::FRONT, front);
            self.device().cmd_set_stencil_reference(self.cmd, vk::StencilFaceFlags::BACK, back);
        }
    }

    fn set_stencil_compare_mask(&mut self, front: u32, back: u32) {
        unsafe {
            self.device().cmd_set_stencil_compare_mask(self.cmd, vk::StencilFaceFlags::FRONT, front);
            self.device().cmd_set_stencil_compare_mask(self.cmd, vk::StencilFaceFlags::BACK, back);
        }
    }

    fn set_stencil_write_mask(&mut self, front: u32, back: u32) {
        unsafe {
            self.device().cmd_set_stencil_write_mask(self.cmd, vk::StencilFaceFlags::FRONT, front);
            self.device().cmd_set_stencil_write_mask(self.cmd, vk::StencilFaceFlags::BACK, back);
        }
    }

    fn set_blend_constants(&mut self, color: Color) {
        unsafe { self.device().cmd_set_blend_constants(self.cmd, &[color.r, color.g, color.b, color.a]) }
    }

    fn set_depth_bias(&mut self, constant_factor: f32, slope_factor: f32, clamp: f32) {
        unsafe { self.device().cmd_set_depth_bias(self.cmd, constant_factor, clamp, slope_factor) }
    }

    fn push_debug_label(&mut self, label: &str, color: Color) {
        let Some(debug_utils) = self.debug_utils.as_ref() else {
            return;
        };
        let (name, color) = Self::debug_label(label, color);
        let info = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
        unsafe { debug_utils.cmd_begin_debug_utils_label(self.cmd, &info) }
    }

    fn insert_debug_label(&mut self, label: &str, color: Color) {
        let Some(debug_utils) = self.debug_utils.as_ref() else {
            return;
        };
        let (name, color) = Self::debug_label(label, color);
        let info = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
        unsafe { debug_utils.cmd_insert_debug_utils_label(self.cmd, &info) }
    }

    fn pop_debug_label(&mut self) {
        if let Some(debug_utils) = self.debug_utils.as_ref() {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.cmd) }
        }
    }
}

/// Records and submits a one-off command buffer, then blocks until the GPU finishes.
/// Used for staging copies.
pub(crate) struct ImmediateCommandEncoder {
    pool: CommandPool,
    cmd: vk::CommandBuffer,
    fence: Fence,
}

impl ImmediateCommandEncoder {
    pub(crate) fn new(device: &ash::Device, queue_family: u32) -> Result<Self, vk::Result> {
        let pool = CommandPool::new(device, queue_family, vk::CommandPoolCreateFlags::TRANSIENT)?;
        let cmd = pool.allocate()?;
        let fence = Fence::new(device)?;
        Ok(Self { pool, cmd, fence })
    }

    pub(crate) fn submit_and_wait<F>(&self, queue: vk::Queue, record: F) -> Result<(), vk::Result>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = self.pool.device();
        let cmd = self.cmd;
        self.pool.reset()?;

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin_info)? };
        record(device, cmd);
        unsafe { device.end_command_buffer(cmd)? };

        let cmd_info = vk::CommandBufferSubmitInfo::default().command_buffer(cmd);
        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(std::slice::from_ref(&cmd_info));

        unsafe { device.queue_submit2(queue, &[submit_info], self.fence.handle())? };
        self.fence.wait()?;
        self.fence.reset()
    }
}
