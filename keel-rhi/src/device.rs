//! The device: owner of every pool, the pipeline cache and the deferred destruction queue.

use std::ops::RangeBounds;
use std::sync::{Arc, Weak};
use derive_builder::Builder;
use parking_lot::{Mutex, RwLock};
use keel_core::log;
use crate::backend::{Backend, DeviceLimits, MipmapGeneration, TextureUpload};
use crate::buffer::{Buffer, BufferDesc, MappedPtr, StorageType};
use crate::command::CommandBuffer;
use crate::defer_release::{DeferReleaseQueue, LastFreedStats};
use crate::error::{RhiError, RhiResult};
use crate::handle::*;
use crate::holder::{HandleOwner, Holder};
use crate::pipeline::{ComputePipeline, ComputePipelineDesc, DynamicState, RenderPipeline, RenderPipelineBuild, RenderPipelineDesc};
use crate::pipeline_cache::{PipelineCache, PipelineCacheStats};
use crate::pool::Pool;
use crate::render_pass::QueueType;
use crate::sampler::{Sampler, SamplerDesc};
use crate::shader::{ShaderModule, ShaderModuleDesc, ShaderStage};
use crate::submit::{SessionId, SubmissionTracker, SubmitId};
use crate::synchronization::{self, TextureState};
use crate::texture::{Dimensions, Texture, TextureDesc, TextureRangeDesc};
use crate::utility::normalize_range_u64;

/// Device-wide options.
#[derive(Clone, Debug, Builder)]
#[builder(setter(into), default)]
pub struct DeviceConfig {
    pub name: String,
    /// Forward debug labels to the backend.
    pub debug_labels: bool,
    /// Lower the push-constant ceiling below what the backend reports.
    #[builder(setter(into, strip_option))]
    pub max_push_constants_size: Option<u32>,
    /// Headless submissions signal immediately instead of waiting for `complete`.
    pub headless_auto_complete: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "keel device".to_owned(),
            debug_labels: cfg!(feature = "validation"),
            max_push_constants_size: None,
            headless_auto_complete: true,
        }
    }
}

type ResourcePool<T, V> = RwLock<Pool<T, V>>;

/// Handle-based front end over one backend.
///
/// Created as an `Arc` so holders can keep a weak reference back to it. Each pool, the
/// pipeline cache, the submission tracker and the deferred queue sit behind their own lock;
/// when several are needed they are taken as render pipelines, shader modules, pipeline cache.
pub struct Device<B: Backend> {
    this: Weak<Device<B>>,
    backend: B,
    config: DeviceConfig,
    limits: DeviceLimits,

    pub(crate) buffers: ResourcePool<BufferTag, Buffer<B::Buffer>>,
    pub(crate) textures: ResourcePool<TextureTag, Texture<B::Texture>>,
    samplers: ResourcePool<SamplerTag, Sampler<B::Sampler>>,
    shader_modules: ResourcePool<ShaderModuleTag, ShaderModule<B::ShaderModule>>,
    pub(crate) render_pipelines: ResourcePool<RenderPipelineTag, RenderPipeline>,
    pub(crate) compute_pipelines: ResourcePool<ComputePipelineTag, ComputePipeline<B::Pipeline>>,

    pipeline_cache: PipelineCache<B::Pipeline>,
    submissions: Mutex<SubmissionTracker<B::Submission>>,
    deferred: Mutex<DeferReleaseQueue<B>>,
}

impl<B: Backend> Device<B> {
    pub fn new(backend: B, config: DeviceConfig) -> Arc<Self> {
        let mut limits = backend.limits();
        if let Some(max) = config.max_push_constants_size {
            limits.max_push_constants_size = limits.max_push_constants_size.min(max);
        }
        log::info!("device `{}` created on the {} backend", config.name, backend.name());

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            backend,
            config,
            limits,
            buffers: RwLock::default(),
            textures: RwLock::default(),
            samplers: RwLock::default(),
            shader_modules: RwLock::default(),
            render_pipelines: RwLock::default(),
            compute_pipelines: RwLock::default(),
            pipeline_cache: PipelineCache::default(),
            submissions: Mutex::new(SubmissionTracker::default()),
            deferred: Mutex::new(DeferReleaseQueue::default()),
        })
    }

    #[inline]
    pub fn backend(&self) -> &B { &self.backend }

    #[inline]
    pub fn config(&self) -> &DeviceConfig { &self.config }

    #[inline]
    pub fn limits(&self) -> DeviceLimits { self.limits }

    fn holder<T: 'static>(&self, handle: Handle<T>) -> Holder<T>
    where
        Self: HandleOwner<T>,
    {
        Holder::from_weak(&self.this, handle)
    }

    /// Queue native teardown behind every submission and open recording that may still use
    /// the resource.
    fn defer(&self, task: impl FnOnce(&B) + Send + 'static) {
        // Held across the push so no session can end between reading and queuing.
        let submissions = self.submissions.lock();
        self.deferred.lock().push(submissions.release_point(), Box::new(task));
    }

    // ---------------------------------------------------------------------------------------
    // Buffers

    #[profiling::function]
    pub fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<Holder<BufferTag>> {
        if desc.size == 0 {
            return Err(RhiError::out_of_range(format!("buffer `{}` has zero size", desc.name)));
        }
        if desc.usage.is_empty() {
            return Err(RhiError::out_of_range(format!("buffer `{}` has no usage", desc.name)));
        }
        if desc.storage == StorageType::Memoryless {
            return Err(RhiError::out_of_range(format!("buffer `{}` cannot be memoryless", desc.name)));
        }
        if desc.data.is_some_and(|data| data.len() as u64 > desc.size) {
            return Err(RhiError::out_of_range(format!(
                "initial data of buffer `{}` is larger than the buffer", desc.name
            )));
        }

        let allocation = self.backend.create_buffer(desc)?;
        let buffer = Buffer {
            native: allocation.buffer,
            name: desc.name.clone(),
            size: desc.size,
            usage: desc.usage,
            storage: desc.storage,
            // SAFETY: backends map the whole allocation until `destroy_buffer`.
            mapped: allocation.mapped.map(|ptr| unsafe { MappedPtr::new(ptr) }),
            gpu_address: allocation.gpu_address,
        };

        if let Some(data) = desc.data {
            if let Err(err) = self.write_buffer(&buffer, 0, data) {
                self.backend.destroy_buffer(buffer.native);
                return Err(err);
            }
        }

        log::trace!("buffer `{}` created ({} bytes, {:?})", desc.name, desc.size, desc.storage);
        let handle = self.buffers.write().add(buffer);
        Ok(self.holder(handle))
    }

    pub fn destroy_buffer(&self, handle: BufferHandle) {
        let Some(buffer) = self.buffers.write().remove(handle) else {
            return;
        };
        log::trace!("buffer `{}` destroyed.", buffer.name);
        let native = buffer.native;
        self.defer(move |backend| backend.destroy_buffer(native));
    }

    fn write_buffer(&self, buffer: &Buffer<B::Buffer>, offset: u64, data: &[u8]) -> RhiResult<()> {
        if buffer.write_mapped(offset, data) {
            return Ok(());
        }
        self.backend.upload_buffer(&buffer.native, offset, data)
    }

    /// Copy `data` into the buffer at `offset`. Host-visible buffers are written through their
    /// mapping, others through the backend's staging path.
    #[profiling::function]
    pub fn upload(&self, handle: BufferHandle, data: &[u8], offset: u64) -> RhiResult<()> {
        let buffers = self.buffers.read();
        let buffer = buffers
            .get(handle)
            .ok_or_else(|| RhiError::out_of_range(format!("upload to stale buffer {handle:?}")))?;
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| RhiError::out_of_range("upload range overflows"))?;
        normalize_range_u64(offset..end, buffer.size)?;
        self.write_buffer(buffer, offset, data)
    }

    /// Read `out.len()` bytes back from `offset`.
    pub fn download(&self, handle: BufferHandle, offset: u64, out: &mut [u8]) -> RhiResult<()> {
        let buffers = self.buffers.read();
        let buffer = buffers
            .get(handle)
            .ok_or_else(|| RhiError::out_of_range(format!("download from stale buffer {handle:?}")))?;
        let end = offset
            .checked_add(out.len() as u64)
            .ok_or_else(|| RhiError::out_of_range("download range overflows"))?;
        normalize_range_u64(offset..end, buffer.size)?;
        if buffer.read_mapped(offset, out) {
            return Ok(());
        }
        self.backend.read_buffer(&buffer.native, offset, out)
    }

    /// Host pointer of a host-visible buffer.
    pub fn mapped_ptr(&self, handle: BufferHandle) -> Option<MappedPtr> {
        self.buffers.read().get(handle).and_then(|buffer| buffer.mapped)
    }

    /// Shader-visible address of the byte at `offset`, for buffers created with one.
    pub fn gpu_address(&self, handle: BufferHandle, offset: u64) -> Option<u64> {
        let buffers = self.buffers.read();
        let buffer = buffers.get(handle)?;
        if buffer.gpu_address == 0 || offset >= buffer.size {
            return None;
        }
        Some(buffer.gpu_address + offset)
    }

    pub fn flush_mapped_memory(&self, handle: BufferHandle, range: impl RangeBounds<u64>) -> RhiResult<()> {
        let buffers = self.buffers.read();
        let buffer = buffers
            .get(handle)
            .ok_or_else(|| RhiError::out_of_range(format!("flush of stale buffer {handle:?}")))?;
        if buffer.mapped.is_none() {
            return Err(RhiError::out_of_range(format!("buffer `{}` is not host-visible", buffer.name)));
        }
        let (offset, size) = normalize_range_u64(range, buffer.size)?;
        self.backend.flush_mapped_memory(&buffer.native, offset, size)
    }

    pub fn buffer_size(&self, handle: BufferHandle) -> Option<u64> {
        self.buffers.read().get(handle).map(|buffer| buffer.size)
    }

    // ---------------------------------------------------------------------------------------
    // Textures and samplers

    #[profiling::function]
    pub fn create_texture(&self, desc: &TextureDesc) -> RhiResult<Holder<TextureTag>> {
        desc.validate()?;
        let max = self.limits.max_texture_dimension_2d;
        if desc.dimensions.width > max || desc.dimensions.height > max {
            return Err(RhiError::out_of_range(format!(
                "texture `{}` exceeds the {max}px dimension limit", desc.name
            )));
        }
        let native = self.backend.create_texture(desc)?;
        log::trace!("texture `{}` created ({:?})", desc.name, desc.format);
        let handle = self.textures.write().add(Texture::new(native, desc, false));
        Ok(self.holder(handle))
    }

    /// Wrap a native texture owned elsewhere, e.g. a swapchain image. The device tracks its
    /// layout but never destroys the native object.
    pub fn register_external_texture(&self, native: B::Texture, desc: &TextureDesc) -> RhiResult<Holder<TextureTag>> {
        desc.validate()?;
        log::trace!("external texture `{}` registered", desc.name);
        let handle = self.textures.write().add(Texture::new(native, desc, true));
        Ok(self.holder(handle))
    }

    pub fn destroy_texture(&self, handle: TextureHandle) {
        let Some(texture) = self.textures.write().remove(handle) else {
            return;
        };
        log::trace!("texture `{}` destroyed.", texture.name);
        if texture.swapchain {
            return;
        }
        let native = texture.native;
        self.defer(move |backend| backend.destroy_texture(native));
    }

    pub fn texture_state(&self, handle: TextureHandle) -> Option<TextureState> {
        self.textures.read().get(handle).map(|texture| texture.state())
    }

    pub fn texture_dimensions(&self, handle: TextureHandle) -> Option<Dimensions> {
        self.textures.read().get(handle).map(|texture| texture.dimensions())
    }

    pub fn find_texture(&self, name: &str) -> Option<TextureHandle> {
        self.textures.read().find(|texture| texture.name() == name)
    }

    /// Copy tightly packed texels into `range` and wait for the copy. Sampled textures end up
    /// in the shader-read layout, storage-only ones in `General`.
    #[profiling::function]
    pub fn upload_texture(&self, handle: TextureHandle, range: &TextureRangeDesc, data: &[u8]) -> RhiResult<()> {
        let textures = self.textures.read();
        let texture = textures
            .get(handle)
            .ok_or_else(|| RhiError::out_of_range(format!("upload to stale texture {handle:?}")))?;
        if texture.is_swapchain() || texture.num_samples() > 1 || texture.format().has_stencil() {
            return Err(RhiError::out_of_range(format!("texture `{}` cannot be uploaded to", texture.name())));
        }
        texture.validate_range(range)?;
        let expected = range.data_size(texture.format());
        if data.len() as u64 != expected {
            return Err(RhiError::out_of_range(format!(
                "upload to `{}` has {} bytes, the range needs {expected}",
                texture.name(),
                data.len()
            )));
        }

        let mut state = texture.state.lock();
        let (before, after, next) = synchronization::transfer_write(texture, *state);
        let upload = TextureUpload {
            texture: texture.native(),
            format: texture.format(),
            range: *range,
            before,
            after,
        };
        self.backend.upload_texture(&upload, data)?;
        *state = next;

        log::trace!("uploaded {} bytes to texture `{}`", data.len(), texture.name());
        Ok(())
    }

    /// Rebuild mips 1.. of every layer from mip 0. Textures with a single level are left alone.
    #[profiling::function]
    pub fn generate_mipmap(&self, handle: TextureHandle) -> RhiResult<()> {
        let textures = self.textures.read();
        let texture = textures
            .get(handle)
            .ok_or_else(|| RhiError::out_of_range(format!("mipmap generation for stale texture {handle:?}")))?;
        if texture.num_mip_levels() <= 1 {
            log::debug!("texture `{}` has no mips to generate", texture.name());
            return Ok(());
        }
        let format = texture.format();
        if texture.is_swapchain() || format.is_compressed() || format.is_depth_or_stencil() {
            return Err(RhiError::out_of_range(format!(
                "cannot generate mips of texture `{}` ({format:?})", texture.name()
            )));
        }

        let mut state = texture.state.lock();
        let (before, after, next) = synchronization::transfer_write(texture, *state);
        let mips = MipmapGeneration {
            texture: texture.native(),
            dimensions: texture.dimensions(),
            num_mip_levels: texture.num_mip_levels(),
            num_layers: texture.num_layers(),
            before,
            after,
        };
        self.backend.generate_mipmap(&mips)?;
        *state = next;

        log::trace!("generated {} mips of texture `{}`", texture.num_mip_levels() - 1, texture.name());
        Ok(())
    }

    pub fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<Holder<SamplerTag>> {
        desc.validate(self.limits.max_anisotropy)?;
        let native = self.backend.create_sampler(desc)?;
        log::trace!("sampler `{}` created", desc.name);
        let handle = self.samplers.write().add(Sampler { native, name: desc.name.clone() });
        Ok(self.holder(handle))
    }

    pub fn destroy_sampler(&self, handle: SamplerHandle) {
        let Some(sampler) = self.samplers.write().remove(handle) else {
            return;
        };
        log::trace!("sampler `{}` destroyed.", sampler.name);
        let native = sampler.native;
        self.defer(move |backend| backend.destroy_sampler(native));
    }

    // ---------------------------------------------------------------------------------------
    // Shaders and pipelines

    pub fn create_shader_module(&self, desc: &ShaderModuleDesc<'_>) -> RhiResult<Holder<ShaderModuleTag>> {
        desc.validate()?;
        let native = self.backend.create_shader_module(desc)?;
        log::trace!("shader module `{}` created", desc.name);
        let handle = self.shader_modules.write().add(ShaderModule {
            native,
            name: desc.name.clone(),
            stage: desc.stage,
            entry_point: desc.entry_point.clone(),
        });
        Ok(self.holder(handle))
    }

    pub fn destroy_shader_module(&self, handle: ShaderModuleHandle) {
        let Some(module) = self.shader_modules.write().remove(handle) else {
            return;
        };
        log::trace!("shader module `{}` destroyed.", module.name);
        let native = module.native;
        self.defer(move |backend| backend.destroy_shader_module(native));
    }

    /// Register a render pipeline. Native pipelines are built lazily, one per dynamic state
    /// seen at draw time.
    pub fn create_render_pipeline(&self, desc: &RenderPipelineDesc) -> RhiResult<Holder<RenderPipelineTag>> {
        desc.validate()?;
        {
            let modules = self.shader_modules.read();
            let stages = [
                (desc.vertex_shader, ShaderStage::Vertex),
                (desc.fragment_shader, ShaderStage::Fragment),
                (desc.geometry_shader, ShaderStage::Geometry),
            ];
            for (handle, stage) in stages {
                if handle.is_empty() && stage == ShaderStage::Geometry {
                    continue;
                }
                match modules.get(handle) {
                    Some(module) if module.stage == stage => {}
                    Some(module) => {
                        return Err(RhiError::out_of_range(format!(
                            "render pipeline `{}` uses {:?} module `{}` as its {stage:?} shader",
                            desc.debug_name, module.stage, module.name
                        )));
                    }
                    None => {
                        return Err(RhiError::out_of_range(format!(
                            "render pipeline `{}` references a stale {stage:?} shader", desc.debug_name
                        )));
                    }
                }
            }
        }

        let key = desc.cache_key();
        let mut pipelines = self.render_pipelines.write();
        self.pipeline_cache.acquire(&key);
        let handle = pipelines.add(RenderPipeline { key, debug_name: desc.debug_name.clone() });
        drop(pipelines);

        log::trace!("render pipeline `{}` created", desc.debug_name);
        Ok(self.holder(handle))
    }

    /// Forget a render pipeline. Its native variants go away with the last handle sharing
    /// the same description.
    pub fn destroy_render_pipeline(&self, handle: RenderPipelineHandle) {
        let mut pipelines = self.render_pipelines.write();
        let Some(pipeline) = pipelines.remove(handle) else {
            return;
        };
        let evicted = self.pipeline_cache.release(&pipeline.key);
        drop(pipelines);

        log::trace!("render pipeline `{}` destroyed, evicting {} variants.", pipeline.debug_name, evicted.len());
        if !evicted.is_empty() {
            self.defer(move |backend| {
                for native in evicted {
                    backend.destroy_pipeline(native);
                }
            });
        }
    }

    /// Build a compute pipeline. Compute pipelines have no dynamic state, so this happens
    /// immediately.
    pub fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> RhiResult<Holder<ComputePipelineTag>> {
        let native = {
            let modules = self.shader_modules.read();
            let module = modules.get(desc.compute_shader).ok_or_else(|| {
                RhiError::out_of_range(format!("compute pipeline `{}` references a stale shader", desc.debug_name))
            })?;
            if module.stage != ShaderStage::Compute {
                return Err(RhiError::out_of_range(format!(
                    "compute pipeline `{}` uses {:?} module `{}`",
                    desc.debug_name, module.stage, module.name
                )));
            }
            self.backend.create_compute_pipeline(&module.native, &module.entry_point, &desc.debug_name)?
        };

        log::debug!("compute pipeline `{}` built", desc.debug_name);
        let handle = self.compute_pipelines.write().add(ComputePipeline {
            native,
            debug_name: desc.debug_name.clone(),
        });
        Ok(self.holder(handle))
    }

    pub fn destroy_compute_pipeline(&self, handle: ComputePipelineHandle) {
        let Some(pipeline) = self.compute_pipelines.write().remove(handle) else {
            return;
        };
        log::trace!("compute pipeline `{}` destroyed.", pipeline.debug_name);
        let native = pipeline.native;
        self.defer(move |backend| backend.destroy_pipeline(native));
    }

    /// Native pipeline for `handle` under `dynamic`, building the variant on first use.
    /// `Ok(None)` means the handle is stale.
    pub(crate) fn resolve_render_pipeline(
        &self,
        handle: RenderPipelineHandle,
        dynamic: &DynamicState,
    ) -> RhiResult<Option<B::Pipeline>> {
        let pipelines = self.render_pipelines.read();
        let Some(pipeline) = pipelines.get(handle) else {
            return Ok(None);
        };
        self.pipeline_cache
            .get_or_build(
                &pipeline.key,
                dynamic,
                || self.build_render_pipeline(pipeline, dynamic),
                |duplicate| self.backend.destroy_pipeline(duplicate),
            )
            .map(Some)
    }

    #[profiling::function]
    fn build_render_pipeline(&self, pipeline: &RenderPipeline, dynamic: &DynamicState) -> RhiResult<B::Pipeline> {
        let modules = self.shader_modules.read();
        let stage = |handle: ShaderModuleHandle| {
            modules
                .get(handle)
                .map(|module| (&module.native, module.entry_point.as_str()))
                .ok_or_else(|| {
                    RhiError::runtime(format!("render pipeline `{}` lost its shader {handle:?}", pipeline.debug_name))
                })
        };

        let build = RenderPipelineBuild {
            desc: &pipeline.key,
            dynamic,
            vertex: stage(pipeline.key.vertex_shader)?,
            geometry: if pipeline.key.geometry_shader.is_valid() {
                Some(stage(pipeline.key.geometry_shader)?)
            } else {
                None
            },
            fragment: stage(pipeline.key.fragment_shader)?,
        };
        let native = self.backend.create_render_pipeline(&build)?;
        log::debug!("render pipeline `{}` built for {dynamic:?}", pipeline.debug_name);
        Ok(native)
    }

    pub fn pipeline_cache_stats(&self) -> PipelineCacheStats {
        self.pipeline_cache.stats()
    }

    // ---------------------------------------------------------------------------------------
    // Recording and submission

    /// Start a recording session. Destruction work whose submissions have completed runs
    /// first.
    #[profiling::function]
    pub fn acquire_command_buffer(&self) -> RhiResult<CommandBuffer<'_, B>> {
        self.collect_garbage();
        let encoder = self.backend.begin_encoder()?;
        let session = self.submissions.lock().begin_recording();
        Ok(CommandBuffer::new(self, encoder, session))
    }

    /// Submit a recording to `queue`, transitioning `present` for presentation first.
    #[profiling::function]
    pub fn submit(
        &self,
        command_buffer: CommandBuffer<'_, B>,
        queue: QueueType,
        present: Option<TextureHandle>,
    ) -> RhiResult<SubmitId> {
        let session = command_buffer.session();
        let Some(encoder) = command_buffer.finish(present) else {
            return Err(RhiError::runtime("command buffer has no encoder"));
        };

        let submission = match self.backend.submit(encoder, queue) {
            Ok(submission) => submission,
            Err(err) => {
                self.end_session(session, None);
                return Err(err);
            }
        };

        let mut tracker = self.submissions.lock();
        let id = tracker.push(submission);
        tracker.end_recording(session);
        self.deferred.lock().session_ended(session, Some(id));
        drop(tracker);
        log::trace!("submission {id} queued on {queue:?}");
        Ok(id)
    }

    pub(crate) fn abandon_command_buffer(&self, session: SessionId, encoder: B::Encoder) {
        self.end_session(session, None);
        self.backend.abandon_encoder(encoder);
    }

    fn end_session(&self, session: SessionId, submitted: Option<SubmitId>) {
        let mut tracker = self.submissions.lock();
        tracker.end_recording(session);
        self.deferred.lock().session_ended(session, submitted);
    }

    /// Retire completed submissions and run every destruction they unblocked.
    #[profiling::function]
    pub fn collect_garbage(&self) -> LastFreedStats {
        let completed = self
            .submissions
            .lock()
            .poll(|submission| self.backend.is_complete(submission), |submission| self.backend.retire(submission));

        let (ready, stats) = {
            let mut deferred = self.deferred.lock();
            let ready = deferred.take_ready(completed);
            (ready, deferred.last_freed())
        };
        for task in ready {
            task(&self.backend);
        }
        if stats.freed > 0 {
            log::trace!("released {} deferred objects through {}", stats.freed, stats.completed_through);
        }
        stats
    }

    /// Block until submission `id` completes.
    pub fn wait(&self, id: SubmitId) -> RhiResult<()> {
        {
            let tracker = self.submissions.lock();
            if let Some(submission) = tracker.find(id) {
                self.backend.wait(submission)?;
            }
        }
        self.collect_garbage();
        Ok(())
    }

    pub fn wait_idle(&self) -> RhiResult<()> {
        self.backend.wait_idle()?;
        self.collect_garbage();
        Ok(())
    }

    #[inline]
    pub fn pending_destructions(&self) -> usize {
        self.deferred.lock().len()
    }

    #[inline]
    pub fn last_freed_stats(&self) -> LastFreedStats {
        self.deferred.lock().last_freed()
    }

    pub fn completed_through(&self) -> SubmitId {
        self.submissions.lock().completed_through()
    }

    pub fn submissions_in_flight(&self) -> usize {
        self.submissions.lock().pending()
    }
}

macro_rules! impl_handle_owner {
    ($($name:ident),+ $(,)?) => {
        $crate::paste! {
            $(
                impl<B: Backend> HandleOwner<[<$name Tag>]> for Device<B> {
                    fn destroy_handle(&self, handle: Handle<[<$name Tag>]>) {
                        self.[<destroy_ $name:snake>](handle);
                    }
                }
            )+
        }
    };
}

impl_handle_owner!(Buffer, Texture, Sampler, ShaderModule, RenderPipeline, ComputePipeline);

impl<B: Backend> Drop for Device<B> {
    fn drop(&mut self) {
        if let Err(err) = self.backend.wait_idle() {
            log::error!("device `{}` failed to go idle: {err}", self.config.name);
        }

        let backend = &self.backend;
        self.submissions.get_mut().poll(|_| true, |submission| backend.retire(submission));
        for task in self.deferred.get_mut().take_all() {
            task(backend);
        }

        let leaked = self.buffers.get_mut().len()
            + self.textures.get_mut().len()
            + self.samplers.get_mut().len()
            + self.shader_modules.get_mut().len()
            + self.render_pipelines.get_mut().len()
            + self.compute_pipelines.get_mut().len();
        if leaked > 0 {
            log::warn!("device `{}` dropped with {leaked} live resources", self.config.name);
            for (handle, texture) in self.textures.get_mut().iter() {
                log::debug!("  texture `{}` {handle:?}", texture.name());
            }
        }

        for native in self.pipeline_cache.drain() {
            backend.destroy_pipeline(native);
        }
        self.render_pipelines.get_mut().drain();
        for pipeline in self.compute_pipelines.get_mut().drain() {
            backend.destroy_pipeline(pipeline.native);
        }
        for module in self.shader_modules.get_mut().drain() {
            backend.destroy_shader_module(module.native);
        }
        for sampler in self.samplers.get_mut().drain() {
            backend.destroy_sampler(sampler.native);
        }
        for texture in self.textures.get_mut().drain() {
            if !texture.swapchain {
                backend.destroy_texture(texture.native);
            }
        }
        for buffer in self.buffers.get_mut().drain() {
            backend.destroy_buffer(buffer.native);
        }
        log::info!("device `{}` destroyed", self.config.name);
    }
}
