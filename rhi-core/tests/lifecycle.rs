mod common;

use common::*;
use rhi_core::{
    command::{BindingResource, RecorderState},
    device::{DeviceDescriptor, DeviceFlags},
    hal::{empty::Command, BindlessTable, BufferUses, TextureUses},
    track::{MipMask, TextureSelector},
};

#[test]
fn full_cycle() {
    let device = device();
    let fence = device.create_fence().unwrap();
    let pipeline = compute_pipeline(&device, "clear");

    let mut recorder = recorder(&device, "cycle");
    assert_eq!(recorder.state(), RecorderState::Idle);
    recorder.begin();
    assert_eq!(recorder.state(), RecorderState::Recording);
    recorder.begin_compute_scope(&pipeline);
    assert_eq!(recorder.state(), RecorderState::InsideComputeScope);
    recorder.bind_bindless_table(0, BindlessTable::Resources);
    recorder.set_push_constants(0, &[1, 2, 3, 4]);
    recorder.dispatch([1, 1, 1]);
    recorder.end_compute_scope();
    recorder.end();
    assert_eq!(recorder.state(), RecorderState::Ended);

    let index = recorder.commit(Some(&fence));
    assert_eq!(index, 1);
    assert_eq!(recorder.state(), RecorderState::Submitted);
    assert_eq!(recorder.submission_index(), Some(1));
    assert_eq!(fence.last_signal_value(), 1);
    assert_eq!(fence.completed_value(), 1);

    // device fence, recorder fence, caller fence
    assert_eq!(submissions(&device)[0].signals, [1, 1, 1]);

    recorder.block_until_completed();
    assert!(recorder.is_completed());
    recorder.reset();
    assert_eq!(recorder.state(), RecorderState::Idle);
    assert!(recorder.tracker().is_empty());

    recorder.begin();
    recorder.end();
    assert_eq!(recorder.commit(Some(&fence)), 2);
    assert_eq!(submissions(&device)[1].signals, [2, 2, 2]);
    assert!(fence.wait(2, Some(0)));
}

#[test]
fn reset_discards_recording() {
    let device = device();
    let data = buffer(&device, "data", BufferUses::COPY_SRC | BufferUses::COPY_DST);
    let scratch = buffer(&device, "scratch", BufferUses::COPY_DST);
    let region = rhi_core::hal::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: 4,
    };

    let mut recorder = recorder(&device, "discarded");
    recorder.begin();
    recorder.copy_buffer_to_buffer(&data, &scratch, region);
    assert_eq!(recorder.tracker().len(), 2);
    recorder.reset();
    assert_eq!(recorder.state(), RecorderState::Idle);
    assert!(recorder.tracker().is_empty());
    // resetting an idle recorder does nothing
    recorder.reset();

    recorder.begin();
    recorder.end();
    recorder.reset();
    assert!(submissions(&device).is_empty());
}

#[test]
fn reset_after_held_submission_completes() {
    let device = device();
    let mut recorder = recorder(&device, "held");
    device.queue_as_hal(|queue| queue.hold_signals(true));

    recorder.begin();
    recorder.end();
    recorder.commit(None);
    assert!(!recorder.is_completed());
    assert_eq!(device.last_completed_submission_index(), 0);

    assert_eq!(device.queue_as_hal(|queue| queue.release_held()), 2);
    assert!(recorder.is_completed());
    assert_eq!(device.last_completed_submission_index(), 1);
    recorder.reset();
    assert_eq!(recorder.state(), RecorderState::Idle);
}

#[test]
#[should_panic(expected = "still executing")]
fn reset_while_executing() {
    let device = device();
    let mut recorder = recorder(&device, "busy");
    device.queue_as_hal(|queue| queue.hold_signals(true));
    recorder.begin();
    recorder.end();
    recorder.commit(None);
    recorder.reset();
}

#[test]
#[should_panic(expected = "`draw` is not allowed while the recorder is Ended")]
fn draw_while_ended() {
    let device = device();
    let mut recorder = recorder(&device, "late");
    recorder.begin();
    recorder.end();
    recorder.draw(0..3, 0..1);
}

#[test]
#[should_panic(expected = "`draw` is not allowed while the recorder is Recording")]
fn draw_outside_of_scope() {
    let device = device();
    let mut recorder = recorder(&device, "loose");
    recorder.begin();
    recorder.draw(0..3, 0..1);
}

#[test]
#[should_panic(expected = "`begin` is not allowed while the recorder is Ended")]
fn begin_twice_without_reset() {
    let device = device();
    let mut recorder = recorder(&device, "twice");
    recorder.begin();
    recorder.end();
    recorder.begin();
}

#[test]
#[should_panic(expected = "`begin_compute_scope` opens a scope while the recorder is already InsideRenderScope")]
fn nested_scope() {
    let device = device();
    let pipeline = compute_pipeline(&device, "nested");
    let mut recorder = recorder(&device, "nesting");
    recorder.begin();
    recorder.begin_render_scope(&rhi_core::command::RenderTargets {
        label: None,
        extent: extent(),
        color_targets: &[],
        depth_stencil_target: None,
    });
    recorder.begin_compute_scope(&pipeline);
}

#[test]
#[should_panic(expected = "`end` is not allowed while the recorder is InsideComputeScope")]
fn end_inside_scope() {
    let device = device();
    let pipeline = compute_pipeline(&device, "open");
    let mut recorder = recorder(&device, "open");
    recorder.begin();
    recorder.begin_compute_scope(&pipeline);
    recorder.end();
}

#[test]
#[should_panic(expected = "push constant range 12..20 exceeds the 16 byte limit")]
fn push_constants_beyond_pipeline_block() {
    let device = device();
    let pipeline = compute_pipeline(&device, "small");
    let mut recorder = recorder(&device, "constants");
    recorder.begin();
    recorder.begin_compute_scope(&pipeline);
    recorder.set_push_constants(12, &[0; 8]);
}

#[test]
#[should_panic(expected = "push constant range 120..136 exceeds the 128 byte limit")]
fn push_constants_beyond_limit() {
    let device = device();
    let mut recorder = recorder(&device, "constants");
    recorder.begin();
    recorder.begin_render_scope(&rhi_core::command::RenderTargets {
        label: None,
        extent: extent(),
        color_targets: &[],
        depth_stencil_target: None,
    });
    recorder.set_push_constants(120, &[0; 16]);
}

#[test]
#[should_panic(expected = "mip level 5 is out of range")]
fn selector_out_of_range() {
    let device = device();
    let texture = texture(&device, "small", 4, 1, TextureUses::RESOURCE);
    let pipeline = compute_pipeline(&device, "sample");
    let mut recorder = recorder(&device, "selector");
    recorder.begin();
    recorder.begin_compute_scope(&pipeline);
    recorder.bind_resource_for_read(
        0,
        BindingResource::Texture {
            texture: &texture,
            selector: Some(TextureSelector {
                mips: MipMask::single(5),
                ..Default::default()
            }),
        },
    );
}

#[test]
#[should_panic(expected = "vertex range 3..0 is reversed")]
#[allow(clippy::reversed_empty_ranges)]
fn draw_with_reversed_range() {
    let device = device();
    let mut recorder = recorder(&device, "reversed");
    recorder.begin();
    recorder.begin_render_scope(&rhi_core::command::RenderTargets {
        label: None,
        extent: extent(),
        color_targets: &[],
        depth_stencil_target: None,
    });
    recorder.draw(3..0, 0..1);
}

#[test]
#[should_panic(expected = "instance range 2..1 is reversed")]
#[allow(clippy::reversed_empty_ranges)]
fn draw_indexed_with_reversed_instances() {
    let device = device();
    let mut recorder = recorder(&device, "reversed");
    recorder.begin();
    recorder.begin_render_scope(&rhi_core::command::RenderTargets {
        label: None,
        extent: extent(),
        color_targets: &[],
        depth_stencil_target: None,
    });
    recorder.draw_indexed(0..6, 0, 2..1);
}

#[test]
#[should_panic(expected = "ending a debug marker that was never started")]
fn unbalanced_debug_marker() {
    let device = device();
    let mut recorder = recorder(&device, "markers");
    recorder.begin();
    recorder.end_debug_marker();
}

#[test]
fn debug_markers_follow_device_flags() {
    for (flags, expected) in [
        (DeviceFlags::DEBUG_MARKERS, 3),
        (DeviceFlags::empty(), 0),
    ] {
        let device = device_with(DeviceDescriptor {
            flags,
            ..Default::default()
        });
        let mut recorder = recorder(&device, "markers");
        recorder.begin();
        recorder.begin_debug_marker("frame");
        recorder.insert_debug_marker("halfway");
        recorder.end_debug_marker();
        recorder.end();
        recorder.commit(None);

        let markers = last_commands(&device)
            .into_iter()
            .filter(|c| match *c {
                Command::BeginDebugMarker(_)
                | Command::InsertDebugMarker(_)
                | Command::EndDebugMarker => true,
                _ => false,
            })
            .count();
        assert_eq!(markers, expected);
    }
}

#[test]
fn dropping_recorder_in_flight() {
    let device = device();
    let mut recorder = recorder(&device, "dropped");
    recorder.begin();
    recorder.end();
    recorder.commit(None);
    drop(recorder);
    assert!(device.maintain(true));
}
