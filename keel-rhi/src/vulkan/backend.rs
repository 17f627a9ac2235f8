use std::ptr::NonNull;
use std::sync::Arc;
use ash::vk;
use parking_lot::Mutex;
use keel_core::log;
use crate::backend::{Backend, BufferAllocation, DeviceLimits, MipmapGeneration, TextureUpload};
use crate::barrier::{PipelineStage, PipelineStages, TextureLayout};
use crate::buffer::BufferDesc;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{RenderPipelineBuild, MAX_COLOR_ATTACHMENTS};
use crate::render_pass::QueueType;
use crate::sampler::{SamplerDesc, SamplerMip};
use crate::shader::ShaderModuleDesc;
use crate::texture::{Dimensions, TextureDesc};
use super::command::{
    record_layout_barrier, record_texture_barrier, Fence, ImmediateCommandEncoder, VulkanEncoder, VulkanSubmission,
};
use super::memory::{VulkanBuffer, VulkanTexture};
use super::pipeline::{create_compute_pipeline, create_graphics_pipeline, create_pipeline_layout, PUSH_CONSTANT_STAGES};
use super::{convert, set_debug_name, VulkanContext};

/// [`Backend`] implementation on a [`VulkanContext`].
///
/// Every queue type is served by the context's single universal queue.
pub struct VulkanBackend {
    context: Arc<VulkanContext>,
    name: String,
    limits: DeviceLimits,
    pipeline_layout: vk::PipelineLayout,
    pipeline_cache: vk::PipelineCache,
    /// Locked after `immediate` when both are needed.
    queue: Mutex<vk::Queue>,
    immediate: Mutex<ImmediateCommandEncoder>,
}

impl VulkanBackend {
    pub fn new(context: Arc<VulkanContext>) -> RhiResult<Self> {
        let device = context.device();
        let physical_device = context.physical_device();
        let properties = physical_device.properties();

        let limits = DeviceLimits {
            max_push_constants_size: properties.limits.max_push_constants_size,
            max_anisotropy: properties.limits.max_sampler_anisotropy,
            max_texture_dimension_2d: properties.limits.max_image_dimension2_d,
            max_color_attachments: properties.limits.max_color_attachments.min(MAX_COLOR_ATTACHMENTS as u32),
        };

        let pipeline_layout = create_pipeline_layout(device, limits.max_push_constants_size)?;
        let cache_info = vk::PipelineCacheCreateInfo::default();
        let pipeline_cache = match unsafe { device.create_pipeline_cache(&cache_info, None) } {
            Ok(cache) => cache,
            Err(err) => {
                unsafe { device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(err.into());
            }
        };
        let immediate = match ImmediateCommandEncoder::new(device, physical_device.queue_family()) {
            Ok(immediate) => immediate,
            Err(err) => {
                unsafe {
                    device.destroy_pipeline_cache(pipeline_cache, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                }
                return Err(err.into());
            }
        };

        log::info!("vulkan backend ready on `{}`", physical_device.name());
        Ok(Self {
            name: format!("vulkan ({})", physical_device.name()),
            queue: Mutex::new(context.queue()),
            context,
            limits,
            pipeline_layout,
            pipeline_cache,
            immediate: Mutex::new(immediate),
        })
    }

    #[inline]
    pub fn context(&self) -> &VulkanContext { &self.context }

    #[inline]
    fn device(&self) -> &ash::Device { self.context.device() }

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        self.context.physical_device().memory_properties()
    }

    /// Temporary host-visible buffer along with its persistent mapping.
    fn create_staging(&self, name: &str, size: u64) -> RhiResult<(VulkanBuffer, NonNull<u8>)> {
        let desc = BufferDesc::new(name, size).host_visible();
        let (staging, mapped, _) = VulkanBuffer::new(self.device(), self.memory_properties(), &desc, false)?;
        match mapped {
            Some(ptr) => Ok((staging, ptr)),
            None => {
                staging.destroy(self.device());
                Err(RhiError::runtime(format!("staging buffer `{name}` has no host mapping")))
            }
        }
    }

    fn copy_and_wait(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> RhiResult<()> {
        let immediate = self.immediate.lock();
        let queue = self.queue.lock();
        immediate.submit_and_wait(*queue, record).map_err(RhiError::from)
    }
}

fn mip_layers(aspect: vk::ImageAspectFlags, level: u32, layer: u32, count: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(aspect)
        .mip_level(level)
        .base_array_layer(layer)
        .layer_count(count)
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            if let Err(err) = device.device_wait_idle() {
                log::error!("vulkan backend failed to go idle: {err}");
            }
            device.destroy_pipeline_cache(self.pipeline_cache, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

impl Backend for VulkanBackend {
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type Sampler = vk::Sampler;
    type ShaderModule = vk::ShaderModule;
    type Pipeline = vk::Pipeline;
    type Encoder = VulkanEncoder;
    type Submission = VulkanSubmission;

    fn name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<BufferAllocation<VulkanBuffer>> {
        let device_address =
            desc.wants_device_address() && self.context.physical_device().supports_buffer_device_address();
        let (buffer, mapped, gpu_address) =
            VulkanBuffer::new(self.device(), self.memory_properties(), desc, device_address)?;
        set_debug_name(self.context.debug_utils(), buffer.buffer, &desc.name);
        Ok(BufferAllocation { buffer, mapped, gpu_address })
    }

    fn destroy_buffer(&self, buffer: VulkanBuffer) {
        buffer.destroy(self.device());
    }

    #[profiling::function]
    fn upload_buffer(&self, buffer: &VulkanBuffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        let size = data.len() as u64;
        if size == 0 {
            return Ok(());
        }
        let (staging, ptr) = self.create_staging("staging.upload", size)?;
        // SAFETY: the staging allocation is at least `size` bytes and stays mapped until destroyed.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };
        let region = vk::BufferCopy { src_offset: 0, dst_offset: offset, size };
        let result = self.copy_and_wait(|device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region])
        });
        staging.destroy(self.device());
        result
    }

    #[profiling::function]
    fn read_buffer(&self, buffer: &VulkanBuffer, offset: u64, out: &mut [u8]) -> RhiResult<()> {
        let size = out.len() as u64;
        if size == 0 {
            return Ok(());
        }
        let (staging, ptr) = self.create_staging("staging.read", size)?;
        let region = vk::BufferCopy { src_offset: offset, dst_offset: 0, size };
        let result = self.copy_and_wait(|device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, buffer.buffer, staging.buffer, &[region])
        });
        if result.is_ok() {
            // SAFETY: the staging allocation is at least `size` bytes and the copy has finished.
            unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr().cast_const(), out.as_mut_ptr(), out.len()) };
        }
        staging.destroy(self.device());
        result
    }

    fn flush_mapped_memory(&self, buffer: &VulkanBuffer, offset: u64, size: u64) -> RhiResult<()> {
        if buffer.coherent || size == 0 {
            return Ok(());
        }
        // Non-coherent ranges must be aligned to the atom size.
        let atom = self.context.physical_device().properties().limits.non_coherent_atom_size.max(1);
        let start = offset / atom * atom;
        let end = (offset + size).div_ceil(atom) * atom;
        let range = vk::MappedMemoryRange::default()
            .memory(buffer.memory)
            .offset(start)
            .size(if end >= buffer.size { vk::WHOLE_SIZE } else { end - start });
        Ok(unsafe { self.device().flush_mapped_memory_ranges(&[range])? })
    }

    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<VulkanTexture> {
        let texture = VulkanTexture::new(self.device(), self.memory_properties(), desc)?;
        set_debug_name(self.context.debug_utils(), texture.image, &desc.name);
        Ok(texture)
    }

    fn destroy_texture(&self, texture: VulkanTexture) {
        texture.destroy(self.device());
    }

    #[profiling::function]
    fn upload_texture(&self, upload: &TextureUpload<'_, VulkanTexture>, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let texture = upload.texture;
        let range = &upload.range;

        let mut regions = Vec::with_capacity((range.num_layers * range.num_mip_levels) as usize);
        let mut buffer_offset = 0;
        for layer in range.layers() {
            for level in range.levels() {
                let extent = range.extent_at(level);
                let [x, y, z] = range.offset_at(level);
                regions.push(
                    vk::BufferImageCopy::default()
                        .buffer_offset(buffer_offset)
                        .image_subresource(mip_layers(texture.aspect, level, layer, 1))
                        .image_offset(vk::Offset3D { x: x as i32, y: y as i32, z: z as i32 })
                        .image_extent(vk::Extent3D { width: extent.width, height: extent.height, depth: extent.depth }),
                );
                buffer_offset += upload.format.image_size(extent);
            }
        }
        if buffer_offset != data.len() as u64 {
            return Err(RhiError::out_of_range(format!(
                "texture upload has {} bytes, its range needs {buffer_offset}",
                data.len()
            )));
        }

        let (staging, ptr) = self.create_staging("staging.texture", buffer_offset)?;
        // SAFETY: the staging allocation is `data.len()` bytes and stays mapped until destroyed.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };
        let result = self.copy_and_wait(|device, cmd| {
            record_texture_barrier(device, cmd, &upload.before);
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    texture.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &regions,
                )
            };
            if let Some(after) = &upload.after {
                record_texture_barrier(device, cmd, after);
            }
        });
        staging.destroy(self.device());
        result
    }

    #[profiling::function]
    fn generate_mipmap(&self, mips: &MipmapGeneration<'_, VulkanTexture>) -> RhiResult<()> {
        let texture = mips.texture;
        let transfer = PipelineStages::from(PipelineStage::Transfer);
        let (final_layout, final_stages) = mips
            .after
            .as_ref()
            .map_or((TextureLayout::TransferDst, transfer), |after| (after.new_layout, after.dst_stage));
        let levels = |base: u32, count: u32| {
            vk::ImageSubresourceRange::default()
                .aspect_mask(texture.aspect)
                .base_mip_level(base)
                .level_count(count)
                .base_array_layer(0)
                .layer_count(mips.num_layers)
        };
        let corner = |extent: Dimensions| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: extent.depth as i32,
        };

        self.copy_and_wait(|device, cmd| {
            record_texture_barrier(device, cmd, &mips.before);
            for level in 1..mips.num_mip_levels {
                // The previous level has been written; read from it.
                record_layout_barrier(
                    device,
                    cmd,
                    texture.image,
                    levels(level - 1, 1),
                    (TextureLayout::TransferDst, transfer),
                    (TextureLayout::TransferSrc, transfer),
                );
                let blit = vk::ImageBlit {
                    src_subresource: mip_layers(texture.aspect, level - 1, 0, mips.num_layers),
                    src_offsets: [vk::Offset3D::default(), corner(mips.dimensions.at_mip(level - 1))],
                    dst_subresource: mip_layers(texture.aspect, level, 0, mips.num_layers),
                    dst_offsets: [vk::Offset3D::default(), corner(mips.dimensions.at_mip(level))],
                };
                unsafe {
                    device.cmd_blit_image(
                        cmd,
                        texture.image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        texture.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    )
                };
            }

            let last = mips.num_mip_levels - 1;
            record_layout_barrier(
                device,
                cmd,
                texture.image,
                levels(0, last),
                (TextureLayout::TransferSrc, transfer),
                (final_layout, final_stages),
            );
            record_layout_barrier(
                device,
                cmd,
                texture.image,
                levels(last, 1),
                (TextureLayout::TransferDst, transfer),
                (final_layout, final_stages),
            );
        })
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<vk::Sampler> {
        let anisotropy = desc.max_anisotropic > 1;
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(convert::filter(desc.mag_filter))
            .min_filter(convert::filter(desc.min_filter))
            .mipmap_mode(convert::mipmap_mode(desc.mip_map))
            .address_mode_u(convert::address_mode(desc.wrap_u))
            .address_mode_v(convert::address_mode(desc.wrap_v))
            .address_mode_w(convert::address_mode(desc.wrap_w))
            .anisotropy_enable(anisotropy)
            .max_anisotropy(f32::from(desc.max_anisotropic))
            .compare_enable(desc.depth_compare_enabled)
            .compare_op(convert::compare_op(desc.depth_compare_op))
            .min_lod(f32::from(desc.mip_lod_min))
            .max_lod(if desc.mip_map == SamplerMip::Disabled { 0.25 } else { f32::from(desc.mip_lod_max) });
        let sampler = unsafe { self.device().create_sampler(&info, None)? };
        set_debug_name(self.context.debug_utils(), sampler, &desc.name);
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device().destroy_sampler(sampler, None) }
    }

    fn create_shader_module(&self, desc: &ShaderModuleDesc<'_>) -> RhiResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(desc.spirv);
        let module = unsafe { self.device().create_shader_module(&info, None)? };
        set_debug_name(self.context.debug_utils(), module, &desc.name);
        log::trace!("shader module `{}` created for stage {:?}", desc.name, convert::shader_stage(desc.stage));
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device().destroy_shader_module(module, None) }
    }

    fn create_render_pipeline(&self, build: &RenderPipelineBuild<'_, vk::ShaderModule>) -> RhiResult<vk::Pipeline> {
        let pipeline = create_graphics_pipeline(self.device(), self.pipeline_cache, self.pipeline_layout, build)?;
        set_debug_name(self.context.debug_utils(), pipeline, &build.desc.debug_name);
        Ok(pipeline)
    }

    fn create_compute_pipeline(
        &self,
        shader: &vk::ShaderModule,
        entry_point: &str,
        debug_name: &str,
    ) -> RhiResult<vk::Pipeline> {
        let pipeline =
            create_compute_pipeline(self.device(), self.pipeline_cache, self.pipeline_layout, *shader, entry_point)?;
        set_debug_name(self.context.debug_utils(), pipeline, debug_name);
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device().destroy_pipeline(pipeline, None) }
    }

    fn begin_encoder(&self) -> RhiResult<VulkanEncoder> {
        Ok(VulkanEncoder::new(
            self.device(),
            self.context.physical_device().queue_family(),
            self.pipeline_layout,
            PUSH_CONSTANT_STAGES,
            self.context.debug_utils().cloned(),
        )?)
    }

    fn abandon_encoder(&self, encoder: VulkanEncoder) {
        // Never submitted, so the pool can go right away.
        drop(encoder);
    }

    #[profiling::function]
    fn submit(&self, encoder: VulkanEncoder, queue: QueueType) -> RhiResult<VulkanSubmission> {
        let device = self.device();
        unsafe { device.end_command_buffer(encoder.cmd)? };
        let fence = Fence::new(device)?;

        let cmd_info = vk::CommandBufferSubmitInfo::default().command_buffer(encoder.cmd);
        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(std::slice::from_ref(&cmd_info));
        unsafe { device.queue_submit2(*self.queue.lock(), &[submit_info], fence.handle())? };
        log::trace!("submitted command buffer on the {queue:?} queue");

        Ok(VulkanSubmission { _pool: encoder.pool, fence })
    }

    fn is_complete(&self, submission: &VulkanSubmission) -> bool {
        submission.fence.is_signaled()
    }

    fn wait(&self, submission: &VulkanSubmission) -> RhiResult<()> {
        Ok(submission.fence.wait()?)
    }

    fn retire(&self, submission: VulkanSubmission) {
        drop(submission);
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let _queue = self.queue.lock();
        Ok(unsafe { self.device().device_wait_idle()? })
    }
}
