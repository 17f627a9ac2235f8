//! Keel RHI (Render Hardware Interface).
//!
//! A handle-based layer over an explicit graphics API: generational resource pools, RAII
//! holders, deferred destruction gated on submission completion, a command recorder that
//! tracks texture layouts, and a cache of native pipelines keyed by dynamic state. Vulkan is
//! the production backend; the headless backend runs everything without a GPU.

extern crate self as keel_rhi;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod device;
pub mod error;
pub mod handle;
pub mod headless;
pub mod holder;
pub mod pipeline;
pub mod pipeline_cache;
pub mod pool;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod submit;
pub mod synchronization;
pub mod texture;
#[cfg(feature = "vulkan")]
pub mod vulkan;
mod barrier;
mod defer_release;
mod utility;

pub(crate) use paste::paste;

pub use memoffset;
pub use keel_rhi_derive::VertexLayout;

pub use backend::{
    Backend, BufferAllocation, CommandEncoder, DeviceLimits, MipmapGeneration, PipelineBindPoint, RenderingInfo, TextureUpload,
};
pub use barrier::{PipelineStage, PipelineStages, TextureBarrier, TextureLayout};
pub use buffer::{Buffer, BufferDesc, BufferUsage, MappedPtr, StorageType};
pub use command::{CommandBuffer, RecorderState};
pub use defer_release::LastFreedStats;
pub use device::{Device, DeviceConfig, DeviceConfigBuilder, DeviceConfigBuilderError};
pub use error::{ErrorCode, RhiError, RhiResult};
pub use handle::{
    BufferHandle, ComputePipelineHandle, Handle, RenderPipelineHandle, SamplerHandle, ShaderModuleHandle,
    TextureHandle,
};
pub use headless::HeadlessBackend;
pub use holder::{HandleOwner, Holder};
pub use pipeline::{
    BlendFactor, BlendOp, ColorAttachment, CompareOp, ComputePipelineDesc, ComputePipelineDescBuilder, CullMode,
    DepthStencilState, DynamicState, IndexFormat, PolygonMode, RenderPipelineDesc, RenderPipelineDescBuilder,
    RenderPipelineDescBuilderError, StencilOp, StencilStateDesc, Topology, VertexAttribute, VertexFormat,
    VertexInput, VertexInputBinding, VertexLayout, WindingMode,
};
pub use pipeline_cache::PipelineCacheStats;
pub use render_pass::{
    AttachmentDesc, Color, Dependencies, Framebuffer, FramebufferAttachment, LoadOp, QueueType, RenderPass,
    ScissorRect, StoreOp, Viewport,
};
pub use sampler::{SamplerDesc, SamplerFilter, SamplerMip, SamplerWrap};
pub use shader::{ShaderModuleDesc, ShaderStage};
pub use submit::SubmitId;
pub use synchronization::{TextureState, TextureUse};
pub use texture::{Dimensions, Texture, TextureDesc, TextureFormat, TextureRangeDesc, TextureType, TextureUsage};
