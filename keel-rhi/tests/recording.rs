mod common;

use keel_rhi::headless::{Command, HeadlessTexture};
use keel_rhi::{
    AttachmentDesc, BufferDesc, Color, ComputePipelineDescBuilder, Dependencies, Device, Dimensions, Framebuffer,
    HeadlessBackend, PipelineBindPoint, QueueType, RecorderState, RenderPass, ScissorRect, ShaderModuleDesc,
    ShaderStage, TextureDesc, TextureFormat, TextureLayout, TextureState, TextureUsage, Topology, VertexFormat, VertexInput,
    VertexLayout,
};

#[repr(C)]
#[derive(Clone, Copy, VertexLayout)]
struct Vertex {
    position: [f32; 3],
    uv: [f32; 2],
    color: [u8; 4],
}

fn clear_pass() -> RenderPass {
    RenderPass::new(&[AttachmentDesc::clear(Color::new(0.0, 0.0, 0.0, 1.0))])
}

fn count(commands: &[Command], matches: impl Fn(&Command) -> bool) -> usize {
    commands.iter().filter(|command| matches(command)).count()
}

fn is_graphics_bind(command: &Command) -> bool {
    matches!(command, Command::BindPipeline(PipelineBindPoint::Graphics, _))
}

#[test]
fn derived_vertex_layout_is_interleaved() {
    let input = Vertex::vertex_input();
    assert_eq!(input.bindings.len(), 1);
    assert_eq!(input.bindings[0].stride, 24);

    let layout: Vec<_> = input.attributes.iter().map(|a| (a.location, a.format, a.offset)).collect();
    assert_eq!(
        layout,
        vec![
            (0, VertexFormat::Float3, 0),
            (1, VertexFormat::Float2, 12),
            (2, VertexFormat::UByte4Norm, 20),
        ]
    );
}

#[test]
fn triangle_builds_one_pipeline_and_binds_it_once() {
    let device = common::device();
    let shaders = common::shaders(&device);
    let pipeline = common::render_pipeline(&device, &shaders, "triangle", Vertex::vertex_input());
    let target = device
        .create_texture(&TextureDesc::new_attachment("target", 512, 512, TextureFormat::RGBA_UN8))
        .unwrap();
    let vertices = device.create_buffer(&BufferDesc::vertex("vertices", 3 * 24)).unwrap();

    let mut cmd = device.acquire_command_buffer().unwrap();
    assert_eq!(cmd.state(), RecorderState::Recording);
    cmd.push_debug_group_label("triangle", Color::new(1.0, 0.0, 0.0, 1.0));
    cmd.begin_rendering(&clear_pass(), &Framebuffer::new(&[target.handle()]));
    assert!(cmd.is_rendering());
    cmd.bind_render_pipeline(pipeline.handle());
    cmd.bind_vertex_buffer(0, vertices.handle(), 0);
    cmd.draw(Topology::Triangle, 0, 3);
    let bound = cmd.last_bound_pipeline();
    cmd.draw(Topology::Triangle, 0, 3);
    assert_eq!(cmd.last_bound_pipeline(), bound);
    cmd.end_rendering();
    cmd.pop_debug_group_label();
    let id = device.submit(cmd, QueueType::Graphics, None).unwrap();

    let commands = device.backend().submitted_commands(id.value()).unwrap();
    assert_eq!(commands.first(), Some(&Command::PushDebugLabel("triangle".to_owned())));
    assert!(commands.iter().any(|command| matches!(
        command,
        Command::Barrier { old_layout: TextureLayout::Undefined, new_layout: TextureLayout::ColorAttachment, .. }
    )));
    assert!(commands.iter().any(|command| matches!(
        command,
        Command::BeginRendering { render_area, .. } if *render_area == ScissorRect::new(512, 512)
    )));
    assert_eq!(count(&commands, is_graphics_bind), 1);
    assert_eq!(count(&commands, |c| matches!(c, Command::Draw { vertex_count: 3, .. })), 2);
    assert_eq!(device.backend().stats().pipelines_built, 1);
    assert_eq!(
        device.texture_state(target.handle()).map(|state| state.layout),
        Some(TextureLayout::ColorAttachment)
    );

    // A second frame reuses the cached native pipeline.
    let mut cmd = device.acquire_command_buffer().unwrap();
    cmd.begin_rendering(&clear_pass(), &Framebuffer::new(&[target.handle()]));
    cmd.bind_render_pipeline(pipeline.handle());
    cmd.draw(Topology::Triangle, 0, 3);
    cmd.end_rendering();
    device.submit(cmd, QueueType::Graphics, None).unwrap();

    let stats = device.pipeline_cache_stats();
    assert_eq!(device.backend().stats().pipelines_built, 1);
    assert_eq!(stats.graphic_pipeline_count, 1);
    assert_eq!(stats.misses, 1);
    assert!(stats.hits >= 2);
}

#[test]
fn equal_descriptions_share_variants_and_topology_splits_them() {
    let device = common::device();
    let shaders = common::shaders(&device);
    let first = common::render_pipeline(&device, &shaders, "first", VertexInput::default());
    let second = common::render_pipeline(&device, &shaders, "second", VertexInput::default());
    let target = device
        .create_texture(&TextureDesc::new_attachment("target", 64, 64, TextureFormat::RGBA_UN8))
        .unwrap();

    let mut cmd = device.acquire_command_buffer().unwrap();
    cmd.begin_rendering(&clear_pass(), &Framebuffer::new(&[target.handle()]));
    cmd.bind_render_pipeline(first.handle());
    cmd.draw(Topology::Triangle, 0, 3);
    let triangles = cmd.last_bound_pipeline();
    cmd.bind_render_pipeline(second.handle());
    cmd.draw(Topology::Triangle, 0, 3);
    cmd.bind_render_pipeline(first.handle());
    cmd.draw(Topology::Triangle, 0, 3);
    assert_eq!(cmd.last_bound_pipeline(), triangles);
    assert_eq!(device.backend().stats().pipelines_built, 1);

    cmd.draw(Topology::Line, 0, 2);
    assert_ne!(cmd.last_bound_pipeline(), triangles);
    assert_eq!(cmd.dynamic_state().topology, Topology::Line);
    cmd.end_rendering();
    let id = device.submit(cmd, QueueType::Graphics, None).unwrap();

    // Switching between handles that share a variant never rebinds natively.
    let commands = device.backend().submitted_commands(id.value()).unwrap();
    assert_eq!(count(&commands, is_graphics_bind), 2);
    assert_eq!(device.backend().stats().pipelines_built, 2);
    assert_eq!(device.pipeline_cache_stats().graphic_pipeline_count, 2);

    // Variants live until the last handle with that description is gone.
    drop(first);
    device.wait_idle().unwrap();
    assert_eq!(device.backend().stats().live_pipelines, 2);
    drop(second);
    device.wait_idle().unwrap();
    assert_eq!(device.backend().stats().live_pipelines, 0);
    assert_eq!(device.pipeline_cache_stats().graphic_pipeline_count, 0);
}

#[test]
fn depth_bias_selects_its_own_variant_until_the_next_pass() {
    let device = common::device();
    let shaders = common::shaders(&device);
    let pipeline = common::render_pipeline(&device, &shaders, "biased", VertexInput::default());
    let target = device
        .create_texture(&TextureDesc::new_attachment("target", 32, 32, TextureFormat::RGBA_UN8))
        .unwrap();
    let framebuffer = Framebuffer::new(&[target.handle()]);

    let mut cmd = device.acquire_command_buffer().unwrap();
    cmd.begin_rendering(&clear_pass(), &framebuffer);
    cmd.bind_render_pipeline(pipeline.handle());
    cmd.draw(Topology::Triangle, 0, 3);
    let plain = cmd.last_bound_pipeline().unwrap();
    cmd.set_depth_bias(1.0, 2.0, 0.0);
    cmd.draw(Topology::Triangle, 0, 3);
    let biased = cmd.last_bound_pipeline().unwrap();
    cmd.end_rendering();

    assert_ne!(plain, biased);
    let backend = device.backend();
    assert_eq!(backend.pipeline_state(plain).flatten().map(|s| s.depth_bias_enable), Some(false));
    assert_eq!(backend.pipeline_state(biased).flatten().map(|s| s.depth_bias_enable), Some(true));

    cmd.begin_rendering(&clear_pass(), &framebuffer);
    assert!(!cmd.dynamic_state().depth_bias_enable);
    cmd.bind_render_pipeline(pipeline.handle());
    cmd.draw(Topology::Triangle, 0, 3);
    assert_eq!(cmd.last_bound_pipeline(), Some(plain));
    cmd.end_rendering();
    let id = device.submit(cmd, QueueType::Graphics, None).unwrap();

    let commands = backend.submitted_commands(id.value()).unwrap();
    assert_eq!(count(&commands, is_graphics_bind), 3);
    assert!(commands.contains(&Command::DepthBias { constant_factor: 1.0, slope_factor: 2.0, clamp: 0.0 }));
    assert_eq!(backend.stats().pipelines_built, 2);
}

#[test]
fn push_constants_past_the_limit_are_truncated() {
    common::init_logger();
    let config = keel_rhi::DeviceConfigBuilder::default()
        .name("small push constants")
        .max_push_constants_size(64u32)
        .build()
        .unwrap();
    let device = Device::new(HeadlessBackend::from_config(&config), config);
    assert_eq!(device.limits().max_push_constants_size, 64);

    let mut cmd = device.acquire_command_buffer().unwrap();
    cmd.push_constants(&[1u8; 80], 0);
    cmd.push_constants(&[2u8; 8], 60);
    cmd.push_constants(&[3u8; 4], 64);
    let id = device.submit(cmd, QueueType::Graphics, None).unwrap();

    let commands = device.backend().submitted_commands(id.value()).unwrap();
    let pushes: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            Command::PushConstants { offset, data } => Some((*offset, data.len())),
            _ => None,
        })
        .collect();
    assert_eq!(pushes, vec![(0, 64), (60, 4)]);
}

#[test]
fn sampling_and_presenting_move_texture_layouts() {
    let device = common::device();
    let offscreen = device
        .create_texture(&TextureDesc::new_attachment("offscreen", 64, 64, TextureFormat::RGBA_UN8))
        .unwrap();
    let swapchain = device
        .register_external_texture(
            HeadlessTexture { id: 4_242 },
            &TextureDesc::new_attachment("swapchain", 64, 64, TextureFormat::BGRA_UN8).with_usage(TextureUsage::Attachment),
        )
        .unwrap();

    let mut cmd = device.acquire_command_buffer().unwrap();
    cmd.begin_rendering(&clear_pass(), &Framebuffer::new(&[offscreen.handle()]));
    cmd.end_rendering();
    cmd.transition_to_shader_read_only(offscreen.handle());
    cmd.begin_rendering(&clear_pass(), &Framebuffer::new(&[swapchain.handle()]));
    cmd.end_rendering();
    let id = device.submit(cmd, QueueType::Graphics, Some(swapchain.handle())).unwrap();

    assert_eq!(
        device.texture_state(offscreen.handle()).map(|state| state.layout),
        Some(TextureLayout::ShaderReadOnly)
    );
    assert_eq!(
        device.texture_state(swapchain.handle()).map(|state| state.layout),
        Some(TextureLayout::Present)
    );

    let commands = device.backend().submitted_commands(id.value()).unwrap();
    assert!(matches!(
        commands.last(),
        Some(Command::Barrier {
            texture: 4_242,
            old_layout: TextureLayout::ColorAttachment,
            new_layout: TextureLayout::Present,
            ..
        })
    ));
    assert!(commands.iter().any(|command| matches!(
        command,
        Command::Barrier { old_layout: TextureLayout::ColorAttachment, new_layout: TextureLayout::ShaderReadOnly, .. }
    )));
}

#[test]
fn multisampled_targets_resolve_and_skip_shader_reads() {
    let device = common::device();
    let msaa = device
        .create_texture(
            &TextureDesc::new_attachment("msaa", 32, 32, TextureFormat::RGBA_UN8)
                .with_usage(TextureUsage::Attachment)
                .with_samples(4),
        )
        .unwrap();
    let resolved = device
        .create_texture(&TextureDesc::new_attachment("resolved", 32, 32, TextureFormat::RGBA_UN8))
        .unwrap();

    let pass = RenderPass::new(&[
        AttachmentDesc::clear(Color::BLACK).with_store_op(keel_rhi::StoreOp::MsaaResolve)
    ]);
    let mut framebuffer = Framebuffer::new(&[msaa.handle()]);
    framebuffer.color[0] = framebuffer.color[0].with_resolve(resolved.handle());

    let mut cmd = device.acquire_command_buffer().unwrap();
    cmd.begin_rendering(&pass, &framebuffer);
    assert_eq!(cmd.dynamic_state().samples, 4);
    cmd.end_rendering();
    cmd.transition_to_shader_read_only(msaa.handle());
    let id = device.submit(cmd, QueueType::Graphics, None).unwrap();

    let commands = device.backend().submitted_commands(id.value()).unwrap();
    let begin = commands.iter().find_map(|command| match command {
        Command::BeginRendering { resolve, .. } => Some(resolve.len()),
        _ => None,
    });
    assert_eq!(begin, Some(1));
    assert_eq!(
        device.texture_state(msaa.handle()).map(|state| state.layout),
        Some(TextureLayout::ColorAttachment)
    );
    assert_eq!(device.texture_state(resolved.handle()), Some(TextureState::color_after_rendering()));
}

#[test]
fn render_area_follows_the_attachment_mip() {
    let device = common::device();
    let target = device
        .create_texture(&TextureDesc::new_attachment("mipped", 64, 64, TextureFormat::RGBA_UN8).with_mip_levels(3))
        .unwrap();

    let pass = RenderPass::new(&[AttachmentDesc::clear(Color::BLACK).with_level(2)]);
    let mut cmd = device.acquire_command_buffer().unwrap();
    cmd.begin_rendering(&pass, &Framebuffer::new(&[target.handle()]));
    cmd.end_rendering();
    let id = device.submit(cmd, QueueType::Graphics, None).unwrap();

    let commands = device.backend().submitted_commands(id.value()).unwrap();
    assert!(commands.contains(&Command::SetScissor(ScissorRect::new(16, 16))));
}

#[test]
fn compute_dispatch_moves_dependencies_to_general() {
    let device = common::device();
    let module = device
        .create_shader_module(&ShaderModuleDesc::new("blur.comp", ShaderStage::Compute, &common::STUB_SPIRV))
        .unwrap();
    let desc = ComputePipelineDescBuilder::default()
        .compute_shader(module.handle())
        .debug_name("blur")
        .build()
        .unwrap();
    let pipeline = device.create_compute_pipeline(&desc).unwrap();
    let image = device
        .create_texture(
            &TextureDesc::new_2d("image", 64, 64, TextureFormat::RGBA_F16)
                .with_usage(TextureUsage::Storage | TextureUsage::Sampled),
        )
        .unwrap();

    let mut cmd = device.acquire_command_buffer().unwrap();
    cmd.bind_compute_pipeline(pipeline.handle());
    cmd.bind_compute_pipeline(pipeline.handle());
    cmd.dispatch_thread_groups(Dimensions::new(8, 8, 1), &Dependencies::new(&[image.handle()]));
    let id = device.submit(cmd, QueueType::Compute, None).unwrap();

    let commands = device.backend().submitted_commands(id.value()).unwrap();
    assert_eq!(count(&commands, |c| matches!(c, Command::BindPipeline(PipelineBindPoint::Compute, _))), 1);
    assert!(commands.iter().any(|command| matches!(
        command,
        Command::Barrier { old_layout: TextureLayout::Undefined, new_layout: TextureLayout::General, .. }
    )));
    assert_eq!(commands.last(), Some(&Command::Dispatch(Dimensions::new(8, 8, 1))));

    // Shader stages must match their slot.
    let shaders = common::shaders(&device);
    let wrong = ComputePipelineDescBuilder::default().compute_shader(shaders.vertex.handle()).build().unwrap();
    assert!(device.create_compute_pipeline(&wrong).is_err());
}

#[test]
fn abandoned_recordings_release_their_slot() {
    let device = common::manual_device();
    let buffer = device.create_buffer(&BufferDesc::vertex("kept", 16)).unwrap();
    let cmd = device.acquire_command_buffer().unwrap();
    drop(buffer);
    assert_eq!(device.pending_destructions(), 1);
    drop(cmd);

    // Abandoning lifts the recorder's hold; the next collection frees the buffer.
    assert_eq!(device.pending_destructions(), 1);
    device.collect_garbage();
    assert_eq!(device.pending_destructions(), 0);
    assert_eq!(device.backend().stats().live_buffers, 0);
}

#[cfg(debug_assertions)]
mod faults {
    use super::*;

    #[test]
    #[should_panic(expected = "end_rendering without begin_rendering")]
    fn end_without_begin() {
        let device = common::device();
        let mut cmd = device.acquire_command_buffer().unwrap();
        cmd.end_rendering();
    }

    #[test]
    #[should_panic(expected = "begin_rendering called twice")]
    fn nested_begin() {
        let device = common::device();
        let target = device
            .create_texture(&TextureDesc::new_attachment("target", 8, 8, TextureFormat::RGBA_UN8))
            .unwrap();
        let framebuffer = Framebuffer::new(&[target.handle()]);
        let mut cmd = device.acquire_command_buffer().unwrap();
        cmd.begin_rendering(&clear_pass(), &framebuffer);
        cmd.begin_rendering(&clear_pass(), &framebuffer);
    }

    #[test]
    #[should_panic(expected = "draw outside of a render pass")]
    fn draw_outside_pass() {
        let device = common::device();
        let mut cmd = device.acquire_command_buffer().unwrap();
        cmd.draw(Topology::Triangle, 0, 3);
    }

    #[test]
    #[should_panic(expected = "expected 16x16")]
    fn mismatched_attachment_sizes() {
        let device = common::device();
        let small = device
            .create_texture(&TextureDesc::new_attachment("small", 16, 16, TextureFormat::RGBA_UN8))
            .unwrap();
        let large = device
            .create_texture(&TextureDesc::new_attachment("large", 32, 32, TextureFormat::RGBA_UN8))
            .unwrap();
        let pass = RenderPass::new(&[AttachmentDesc::clear(Color::BLACK), AttachmentDesc::load()]);
        let mut cmd = device.acquire_command_buffer().unwrap();
        cmd.begin_rendering(&pass, &Framebuffer::new(&[small.handle(), large.handle()]));
    }
}
