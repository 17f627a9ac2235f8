mod common;

use keel_rhi::headless::Command;
use keel_rhi::{Dimensions, PipelineStage, TextureDesc, TextureFormat, TextureLayout, TextureRangeDesc, TextureUsage};

fn copies(commands: &[Command]) -> Vec<(u32, u32, Dimensions, usize)> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::CopyToTexture { layer, mip_level, extent, data, .. } => {
                Some((*layer, *mip_level, *extent, data.len()))
            }
            _ => None,
        })
        .collect()
}

fn blits(commands: &[Command]) -> Vec<(u32, u32, u32)> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::BlitMip { layer, src_level, dst_level, .. } => Some((*layer, *src_level, *dst_level)),
            _ => None,
        })
        .collect()
}

#[test]
fn upload_lands_in_transfer_dst_then_moves_to_shader_read() {
    let device = common::device();
    let texture = device
        .create_texture(&TextureDesc::new_2d("albedo", 4, 4, TextureFormat::RGBA_UN8))
        .unwrap();
    let data: Vec<u8> = (0..64).collect();

    device
        .upload_texture(texture.handle(), &TextureRangeDesc::new(Dimensions::new(4, 4, 1)), &data)
        .unwrap();

    let commands = device.backend().immediate_commands();
    assert_eq!(commands.len(), 3);
    assert!(matches!(
        commands[0],
        Command::Barrier { old_layout: TextureLayout::Undefined, new_layout: TextureLayout::TransferDst, .. }
    ));
    assert!(matches!(
        &commands[1],
        Command::CopyToTexture { offset: [0, 0, 0], data: copied, .. } if *copied == data
    ));
    match &commands[2] {
        Command::Barrier { old_layout, new_layout, src_stage, .. } => {
            assert_eq!(*old_layout, TextureLayout::TransferDst);
            assert_eq!(*new_layout, TextureLayout::ShaderReadOnly);
            assert!(src_stage.contains(PipelineStage::Transfer));
        }
        other => panic!("expected a barrier, got {other:?}"),
    }
    assert_eq!(
        device.texture_state(texture.handle()).map(|state| state.layout),
        Some(TextureLayout::ShaderReadOnly)
    );
}

#[test]
fn upload_covers_every_layer_and_level_of_the_range() {
    let device = common::device();
    let cube = device
        .create_texture(&TextureDesc::new_cube("sky", 8, TextureFormat::RGBA_UN8).with_full_mip_chain())
        .unwrap();
    let range = TextureRangeDesc::new(Dimensions::new(8, 8, 1)).with_layers(2, 2).with_mip_levels(0, 4);
    let per_layer = (64 + 16 + 4 + 1) * 4;
    assert!(device.upload_texture(cube.handle(), &range, &vec![0; per_layer]).is_err());

    device.upload_texture(cube.handle(), &range, &vec![1; per_layer * 2]).unwrap();

    let copied = copies(&device.backend().immediate_commands());
    assert_eq!(copied.len(), 8);
    assert_eq!(copied[0], (2, 0, Dimensions::new(8, 8, 1), 256));
    assert_eq!(copied[1], (2, 1, Dimensions::new(4, 4, 1), 64));
    assert_eq!(copied[7], (3, 3, Dimensions::new(1, 1, 1), 4));
}

#[test]
fn partial_uploads_must_fit_the_texture() {
    let device = common::device();
    let texture = device
        .create_texture(&TextureDesc::new_2d("atlas", 4, 4, TextureFormat::RGBA_UN8).with_mip_levels(2))
        .unwrap();

    device.upload_texture(texture.handle(), &TextureRangeDesc::rect(1, 1, 2, 2), &[0; 16]).unwrap();
    assert!(matches!(
        device.backend().immediate_commands()[1],
        Command::CopyToTexture { offset: [1, 1, 0], .. }
    ));

    assert!(device.upload_texture(texture.handle(), &TextureRangeDesc::rect(3, 3, 2, 2), &[0; 16]).is_err());
    assert!(device.upload_texture(texture.handle(), &TextureRangeDesc::rect(0, 0, 2, 2), &[0; 15]).is_err());
    // Several levels at once must cover whole mips.
    let partial = TextureRangeDesc::rect(0, 0, 2, 2).with_mip_levels(0, 2);
    assert!(device.upload_texture(texture.handle(), &partial, &[0; 20]).is_err());
    let stale = texture.handle();
    drop(texture);
    assert!(device.upload_texture(stale, &TextureRangeDesc::rect(0, 0, 1, 1), &[0; 4]).is_err());
}

#[test]
fn multisampled_and_stencil_textures_reject_uploads() {
    let device = common::device();
    let msaa = device
        .create_texture(
            &TextureDesc::new_attachment("msaa", 4, 4, TextureFormat::RGBA_UN8)
                .with_usage(TextureUsage::Attachment)
                .with_samples(4),
        )
        .unwrap();
    let depth = device
        .create_texture(&TextureDesc::new_attachment("depth", 4, 4, TextureFormat::Z_UN24_S_UI8))
        .unwrap();
    let range = TextureRangeDesc::new(Dimensions::new(4, 4, 1));

    assert!(device.upload_texture(msaa.handle(), &range, &[0; 64]).is_err());
    assert!(device.upload_texture(depth.handle(), &range, &[0; 64]).is_err());
    assert!(device.backend().immediate_commands().is_empty());
}

#[test]
fn compressed_uploads_are_sized_in_blocks() {
    let device = common::device();
    let texture = device
        .create_texture(&TextureDesc::new_2d("bc7", 8, 8, TextureFormat::BC7_RGBA))
        .unwrap();
    let range = TextureRangeDesc::new(Dimensions::new(8, 8, 1));

    assert!(device.upload_texture(texture.handle(), &range, &[0; 256]).is_err());
    device.upload_texture(texture.handle(), &range, &[0; 64]).unwrap();
}

#[test]
fn mipmap_generation_blits_each_level_from_the_previous_one() {
    let device = common::device();
    let texture = device
        .create_texture(&TextureDesc::new_2d("mipped", 16, 16, TextureFormat::RGBA_UN8).with_full_mip_chain())
        .unwrap();

    device.generate_mipmap(texture.handle()).unwrap();

    let commands = device.backend().immediate_commands();
    assert_eq!(blits(&commands), vec![(0, 0, 1), (0, 1, 2), (0, 2, 3), (0, 3, 4)]);
    assert!(matches!(
        commands.first(),
        Some(Command::Barrier { new_layout: TextureLayout::TransferDst, .. })
    ));
    assert!(matches!(
        commands.last(),
        Some(Command::Barrier { new_layout: TextureLayout::ShaderReadOnly, .. })
    ));
    assert_eq!(
        device.texture_state(texture.handle()).map(|state| state.layout),
        Some(TextureLayout::ShaderReadOnly)
    );
}

#[test]
fn mipmap_generation_runs_per_layer() {
    let device = common::device();
    let cube = device
        .create_texture(&TextureDesc::new_cube("irradiance", 16, TextureFormat::RGBA_F16).with_mip_levels(3))
        .unwrap();

    device.generate_mipmap(cube.handle()).unwrap();

    let blitted = blits(&device.backend().immediate_commands());
    assert_eq!(blitted.len(), 12);
    assert_eq!(blitted[2], (1, 0, 1));
}

#[test]
fn single_level_textures_have_nothing_to_generate() {
    let device = common::device();
    let texture = device
        .create_texture(&TextureDesc::new_2d("flat", 16, 16, TextureFormat::RGBA_UN8))
        .unwrap();

    device.generate_mipmap(texture.handle()).unwrap();
    assert!(device.backend().immediate_commands().is_empty());
    assert_eq!(
        device.texture_state(texture.handle()).map(|state| state.layout),
        Some(TextureLayout::Undefined)
    );
}

#[test]
fn mipmap_generation_rejects_formats_that_cannot_be_filtered() {
    let device = common::device();
    let compressed = device
        .create_texture(&TextureDesc::new_2d("bc7", 16, 16, TextureFormat::BC7_RGBA).with_mip_levels(2))
        .unwrap();
    let depth = device
        .create_texture(&TextureDesc::new_2d("shadow", 16, 16, TextureFormat::Z_F32).with_mip_levels(2))
        .unwrap();

    assert!(device.generate_mipmap(compressed.handle()).is_err());
    assert!(device.generate_mipmap(depth.handle()).is_err());
    assert!(device.backend().immediate_commands().is_empty());
}
