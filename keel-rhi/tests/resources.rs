mod common;

use keel_rhi::headless::HeadlessTexture;
use keel_rhi::{BufferDesc, BufferUsage, QueueType, SubmitId, TextureDesc, TextureFormat, TextureLayout};

#[test]
fn live_handles_are_distinct_and_dead_ones_stay_dead() {
    let device = common::device();

    let first = device.create_buffer(&BufferDesc::vertex("first", 64)).unwrap();
    let second = device.create_buffer(&BufferDesc::vertex("second", 64)).unwrap();
    assert_ne!(first.handle(), second.handle());

    let stale = first.handle();
    drop(first);
    assert_eq!(device.buffer_size(stale), None);
    assert!(device.upload(stale, &[0; 4], 0).is_err());

    // The freed slot is reused under a new generation.
    let third = device.create_buffer(&BufferDesc::vertex("third", 32)).unwrap();
    assert_eq!(third.handle().index(), stale.index());
    assert_ne!(third.handle(), stale);
    assert_eq!(device.buffer_size(stale), None);
    assert_eq!(device.buffer_size(third.handle()), Some(32));
}

#[test]
fn destruction_waits_for_every_earlier_submission() {
    let device = common::manual_device();
    let backend = device.backend();

    let buffer = device.create_buffer(&BufferDesc::vertex("in flight", 128)).unwrap();
    let first = device.submit(device.acquire_command_buffer().unwrap(), QueueType::Graphics, None).unwrap();
    drop(buffer);
    let second = device.submit(device.acquire_command_buffer().unwrap(), QueueType::Graphics, None).unwrap();
    assert_eq!(first.value(), 1);
    assert_eq!(second.value(), 2);
    assert_eq!(device.pending_destructions(), 1);

    // Out of order: the later submission signals first.
    backend.complete(second.value());
    device.collect_garbage();
    assert_eq!(device.completed_through(), SubmitId::NONE);
    assert_eq!(device.pending_destructions(), 1);
    assert_eq!(backend.stats().live_buffers, 1);

    backend.complete(first.value());
    let stats = device.collect_garbage();
    assert_eq!(stats.freed, 1);
    assert_eq!(stats.completed_through, second);
    assert_eq!(device.pending_destructions(), 0);
    assert_eq!(backend.stats().live_buffers, 0);
}

#[test]
fn destroying_while_recording_waits_for_that_recording() {
    let device = common::manual_device();
    let backend = device.backend();

    let texture = device
        .create_texture(&TextureDesc::new_2d("sampled", 16, 16, TextureFormat::RGBA_UN8))
        .unwrap();
    let cmd = device.acquire_command_buffer().unwrap();
    drop(texture);
    let id = device.submit(cmd, QueueType::Graphics, None).unwrap();

    device.collect_garbage();
    assert_eq!(backend.stats().live_textures, 1);

    device.wait(id).unwrap();
    assert_eq!(backend.stats().live_textures, 0);
}

#[test]
fn a_later_recording_finishing_first_does_not_release_early() {
    let device = common::manual_device();
    let backend = device.backend();

    let buffer = device.create_buffer(&BufferDesc::vertex("held", 64)).unwrap();
    let older = device.acquire_command_buffer().unwrap();
    drop(buffer);
    let newer = device.acquire_command_buffer().unwrap();
    let newer_id = device.submit(newer, QueueType::Graphics, None).unwrap();

    backend.complete(newer_id.value());
    device.collect_garbage();
    assert_eq!(device.completed_through(), newer_id);
    assert_eq!(device.pending_destructions(), 1);
    assert_eq!(backend.stats().live_buffers, 1);

    let older_id = device.submit(older, QueueType::Graphics, None).unwrap();
    assert!(older_id > newer_id);
    device.collect_garbage();
    assert_eq!(backend.stats().live_buffers, 1);

    backend.complete(older_id.value());
    let stats = device.collect_garbage();
    assert_eq!(stats.freed, 1);
    assert_eq!(device.pending_destructions(), 0);
    assert_eq!(backend.stats().live_buffers, 0);
}

#[test]
fn open_recordings_submitted_in_reverse_order_both_hold_the_release() {
    let device = common::manual_device();
    let backend = device.backend();

    let texture = device
        .create_texture(&TextureDesc::new_2d("shared", 8, 8, TextureFormat::RGBA_UN8))
        .unwrap();
    let first = device.acquire_command_buffer().unwrap();
    let second = device.acquire_command_buffer().unwrap();
    drop(texture);

    let second_id = device.submit(second, QueueType::Graphics, None).unwrap();
    let first_id = device.submit(first, QueueType::Graphics, None).unwrap();
    assert_eq!(second_id.value(), 1);
    assert_eq!(first_id.value(), 2);

    backend.complete(second_id.value());
    device.collect_garbage();
    assert_eq!(backend.stats().live_textures, 1);

    backend.complete(first_id.value());
    device.collect_garbage();
    assert_eq!(device.completed_through(), first_id);
    assert_eq!(backend.stats().live_textures, 0);
}

#[test]
fn abandoned_recordings_stop_holding_destructions() {
    let device = common::manual_device();
    let backend = device.backend();

    let buffer = device.create_buffer(&BufferDesc::vertex("dropped", 16)).unwrap();
    let cmd = device.acquire_command_buffer().unwrap();
    drop(buffer);
    device.collect_garbage();
    assert_eq!(backend.stats().live_buffers, 1);

    drop(cmd);
    device.collect_garbage();
    assert_eq!(device.pending_destructions(), 0);
    assert_eq!(backend.stats().live_buffers, 0);
}

#[test]
fn destruction_without_submissions_is_immediate() {
    let device = common::manual_device();
    let sampler = device.create_sampler(&keel_rhi::SamplerDesc::default()).unwrap();
    drop(sampler);
    device.collect_garbage();
    assert_eq!(device.backend().stats().live_samplers, 0);
}

#[test]
fn host_visible_upload_reads_back() {
    let device = common::device();
    let buffer = device
        .create_buffer(&BufferDesc::new("readback", 256).with_usage(BufferUsage::Storage).host_visible())
        .unwrap();
    assert!(device.mapped_ptr(buffer.handle()).is_some());

    let data: Vec<u8> = (0..=255).collect();
    device.upload(buffer.handle(), &data, 0).unwrap();
    device.flush_mapped_memory(buffer.handle(), ..).unwrap();

    let mut out = vec![0u8; 256];
    device.download(buffer.handle(), 0, &mut out).unwrap();
    assert_eq!(out, data);

    let mut tail = [0u8; 4];
    device.download(buffer.handle(), 252, &mut tail).unwrap();
    assert_eq!(tail, [252, 253, 254, 255]);
    assert!(device.download(buffer.handle(), 253, &mut tail).is_err());
}

#[test]
fn device_local_buffers_take_the_staging_path() {
    let device = common::device();
    let data = [7u8; 48];
    let buffer = device
        .create_buffer(&BufferDesc::vertex("staged", 64).with_data(&data))
        .unwrap();
    assert!(device.mapped_ptr(buffer.handle()).is_none());
    assert!(device.flush_mapped_memory(buffer.handle(), ..).is_err());

    let mut out = [0u8; 48];
    device.download(buffer.handle(), 0, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn invalid_descriptions_are_rejected() {
    let device = common::device();
    assert!(device.create_buffer(&BufferDesc::vertex("empty", 0)).is_err());
    assert!(device
        .create_buffer(&BufferDesc::vertex("small", 4).with_data(&[0; 8]))
        .is_err());
    assert!(device
        .create_texture(&TextureDesc::new_2d("huge", 1 << 20, 4, TextureFormat::RGBA_UN8))
        .is_err());
    assert_eq!(device.backend().stats().live_buffers, 0);
}

#[test]
fn external_textures_are_never_destroyed_natively() {
    let device = common::device();
    let owned = device
        .create_texture(&TextureDesc::new_attachment("owned", 8, 8, TextureFormat::RGBA_UN8))
        .unwrap();
    let external = device
        .register_external_texture(
            HeadlessTexture { id: 9_999 },
            &TextureDesc::new_attachment("swapchain", 8, 8, TextureFormat::BGRA_UN8),
        )
        .unwrap();
    assert_eq!(device.find_texture("swapchain"), Some(external.handle()));
    assert_eq!(
        device.texture_state(external.handle()).map(|state| state.layout),
        Some(TextureLayout::Undefined)
    );

    drop(external);
    device.wait_idle().unwrap();
    assert_eq!(device.backend().stats().live_textures, 1);
    drop(owned);
    device.wait_idle().unwrap();
    assert_eq!(device.backend().stats().live_textures, 0);
}

#[test]
fn holders_outliving_the_device_do_nothing() {
    let device = common::device();
    let buffer = device.create_buffer(&BufferDesc::vertex("orphan", 16)).unwrap();
    drop(device);
    assert!(buffer.is_valid());
    drop(buffer);
}
