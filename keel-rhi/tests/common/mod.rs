#![allow(dead_code)]

use std::sync::Arc;
use keel_rhi::handle::{RenderPipelineTag, ShaderModuleTag};
use keel_rhi::shader::SPIRV_MAGIC;
use keel_rhi::{
    ColorAttachment, Device, DeviceConfig, DeviceConfigBuilder, HeadlessBackend, Holder, RenderPipelineDescBuilder,
    ShaderModuleDesc, ShaderStage, TextureFormat, VertexInput,
};

pub type HeadlessDevice = Arc<Device<HeadlessBackend>>;

pub const STUB_SPIRV: [u32; 5] = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config(auto_complete: bool) -> DeviceConfig {
    DeviceConfigBuilder::default()
        .name("test device")
        .debug_labels(true)
        .headless_auto_complete(auto_complete)
        .build()
        .unwrap()
}

pub fn device() -> HeadlessDevice {
    init_logger();
    let config = config(true);
    Device::new(HeadlessBackend::from_config(&config), config)
}

/// Submissions stay pending until the test signals them.
pub fn manual_device() -> HeadlessDevice {
    init_logger();
    let config = config(false);
    Device::new(HeadlessBackend::from_config(&config), config)
}

pub struct Shaders {
    pub vertex: Holder<ShaderModuleTag>,
    pub fragment: Holder<ShaderModuleTag>,
}

pub fn shaders(device: &HeadlessDevice) -> Shaders {
    Shaders {
        vertex: device
            .create_shader_module(&ShaderModuleDesc::new("test.vert", ShaderStage::Vertex, &STUB_SPIRV))
            .unwrap(),
        fragment: device
            .create_shader_module(&ShaderModuleDesc::new("test.frag", ShaderStage::Fragment, &STUB_SPIRV))
            .unwrap(),
    }
}

pub fn render_pipeline(
    device: &HeadlessDevice,
    shaders: &Shaders,
    name: &str,
    vertex_input: VertexInput,
) -> Holder<RenderPipelineTag> {
    let desc = RenderPipelineDescBuilder::default()
        .vertex_input(vertex_input)
        .vertex_shader(shaders.vertex.handle())
        .fragment_shader(shaders.fragment.handle())
        .color_attachments(keel_core::collections::smallvec![ColorAttachment::new(TextureFormat::RGBA_UN8)])
        .debug_name(name)
        .build()
        .unwrap();
    device.create_render_pipeline(&desc).unwrap()
}
