//! Renders a colored triangle into an offscreen target for a number of frames.

use std::path::Path;
use anyhow::Context;
use keel_core::collections::smallvec;
use keel_rhi::shader::SPIRV_MAGIC;
use keel_rhi::{
    AttachmentDesc, Backend, BufferDesc, Color, ColorAttachment, Device, Framebuffer, QueueType, RenderPass,
    RenderPipelineDescBuilder, ShaderModuleDesc, ShaderStage, TextureDesc, TextureFormat, Topology, VertexLayout,
};

const TARGET_SIZE: u32 = 512;

#[repr(C)]
#[derive(Clone, Copy, VertexLayout)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 4],
}

const VERTICES: [Vertex; 3] = [
    Vertex { position: [-0.5, -0.5, 0.0], color: [1.0, 0.0, 0.0, 1.0] },
    Vertex { position: [0.5, -0.5, 0.0], color: [0.0, 1.0, 0.0, 1.0] },
    Vertex { position: [0.0, 0.5, 0.0], color: [0.0, 0.0, 1.0, 1.0] },
];

/// View a slice of plain-old-data as bytes.
fn as_bytes<T: Copy>(values: &[T]) -> &[u8] {
    // SAFETY: `T: Copy` values without padding reads; the slice covers exactly the input.
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), std::mem::size_of_val(values)) }
}

/// SPIR-V for `stage`, read from `<dir>/triangle.<stage>.spv`. Without a directory a
/// header-only module is used, which only the headless backend accepts.
fn load_spirv(dir: Option<&Path>, stage: &str) -> anyhow::Result<Vec<u32>> {
    let Some(dir) = dir else {
        return Ok(vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
    };
    let path = dir.join(format!("triangle.{stage}.spv"));
    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    anyhow::ensure!(bytes.len() % 4 == 0, "{} is not a whole number of SPIR-V words", path.display());
    Ok(bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

#[profiling::function]
pub fn run<B: Backend>(device: &Device<B>, frames: u32, shader_dir: Option<&Path>) -> anyhow::Result<()> {
    let target = device.create_texture(&TextureDesc::new_attachment(
        "triangle.target",
        TARGET_SIZE,
        TARGET_SIZE,
        TextureFormat::RGBA_UN8,
    ))?;
    let vertex_buffer = device.create_buffer(
        &BufferDesc::vertex("triangle.vertices", std::mem::size_of_val(&VERTICES) as u64)
            .with_data(as_bytes(&VERTICES)),
    )?;

    let vs_code = load_spirv(shader_dir, "vert")?;
    let fs_code = load_spirv(shader_dir, "frag")?;
    let vs = device.create_shader_module(&ShaderModuleDesc::new("triangle.vert", ShaderStage::Vertex, &vs_code))?;
    let fs = device.create_shader_module(&ShaderModuleDesc::new("triangle.frag", ShaderStage::Fragment, &fs_code))?;

    let pipeline_desc = RenderPipelineDescBuilder::default()
        .vertex_input(Vertex::vertex_input())
        .vertex_shader(vs.handle())
        .fragment_shader(fs.handle())
        .color_attachments(smallvec![ColorAttachment::new(TextureFormat::RGBA_UN8)])
        .debug_name("triangle")
        .build()?;
    let pipeline = device.create_render_pipeline(&pipeline_desc)?;

    let pass = RenderPass::new(&[AttachmentDesc::clear(Color::new(0.2, 0.3, 0.8, 1.0))]);
    let framebuffer = Framebuffer::new(&[target.handle()]).with_debug_name("triangle");

    for frame in 0..frames {
        profiling::scope!("frame");

        let mut cmd = device.acquire_command_buffer()?;
        cmd.push_debug_group_label("triangle", Color::new(1.0, 0.5, 0.0, 1.0));
        cmd.begin_rendering(&pass, &framebuffer);
        cmd.bind_render_pipeline(pipeline.handle());
        cmd.bind_vertex_buffer(0, vertex_buffer.handle(), 0);
        cmd.push_constants(&(frame as f32).to_le_bytes(), 0);
        cmd.draw(Topology::Triangle, 0, 3);
        cmd.end_rendering();
        cmd.transition_to_shader_read_only(target.handle());
        cmd.pop_debug_group_label();

        let id = device.submit(cmd, QueueType::Graphics, None)?;
        log::debug!("frame {frame} submitted as {id}");

        device.collect_garbage();
        profiling::finish_frame!();
    }

    device.wait_idle()?;
    let stats = device.pipeline_cache_stats();
    log::info!(
        "{frames} frames: {} graphics pipeline(s), {} cache hits, {} misses",
        stats.graphic_pipeline_count, stats.hits, stats.misses
    );
    Ok(())
}
