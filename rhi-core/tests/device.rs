mod common;

use common::*;
use rhi_core::{
    command::BindingResource,
    descriptor::CapacityError,
    device::{DeviceDescriptor, DeviceFlags},
    hal::{self, empty::DescriptorKind, BufferUses, TextureUses},
    resource::CreateResourceError,
};

fn small_tables() -> DeviceDescriptor<'static> {
    DeviceDescriptor {
        label: Some("small"),
        resource_table_capacity: 2,
        sampler_table_capacity: 1,
        flags: DeviceFlags::all(),
        trace_path: None,
    }
}

#[test]
fn resource_table_exhaustion() {
    let device = device_with(small_tables());
    let visible = BufferUses::STORAGE_READ | BufferUses::SHADER_VISIBLE;

    let first = buffer(&device, "first", visible);
    let second = buffer(&device, "second", visible);
    assert_eq!(first.descriptor_index(), Some(0));
    assert_eq!(second.descriptor_index(), Some(1));

    let third = device.create_buffer(&hal::BufferDescriptor {
        label: Some("third"),
        size: 16,
        usage: visible,
    });
    assert!(matches!(
        third,
        Err(CreateResourceError::Capacity(CapacityError { capacity: 2 }))
    ));

    // buffers outside of the table are not affected
    let hidden = buffer(&device, "hidden", BufferUses::COPY_DST);
    assert_eq!(hidden.descriptor_index(), None);

    drop(first);
    let again = buffer(&device, "again", visible);
    assert_eq!(again.descriptor_index(), Some(0));
    assert_eq!(device.descriptor_table_usage(), (2, 0));
}

#[test]
fn descriptors_are_written_on_creation() {
    let device = device_with(DeviceDescriptor {
        resource_table_capacity: 3,
        ..small_tables()
    });
    let storage = buffer(
        &device,
        "storage",
        BufferUses::STORAGE_READ_WRITE | BufferUses::SHADER_VISIBLE,
    );
    let albedo = texture(&device, "albedo", 1, 1, TextureUses::RESOURCE);
    let scratch = texture(&device, "scratch", 1, 1, TextureUses::STORAGE_READ_WRITE);
    let sampler = device
        .create_sampler(&hal::SamplerDescriptor {
            label: Some("linear"),
            mag_filter: hal::FilterMode::Linear,
            min_filter: hal::FilterMode::Linear,
            mipmap_filter: hal::FilterMode::Nearest,
            address_modes: [hal::AddressMode::Repeat; 3],
            lod_clamp: None,
        })
        .unwrap();
    assert_eq!(sampler.descriptor_index(), 0);
    assert!(device
        .create_sampler(&hal::SamplerDescriptor {
            label: Some("one too many"),
            mag_filter: hal::FilterMode::Nearest,
            min_filter: hal::FilterMode::Nearest,
            mipmap_filter: hal::FilterMode::Nearest,
            address_modes: [hal::AddressMode::ClampToEdge; 3],
            lod_clamp: None,
        })
        .is_err());

    let writes = device.as_hal().descriptor_writes();
    let summary = writes
        .iter()
        .map(|w| (w.index, w.resource.as_str(), w.kind.clone()))
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        [
            (0, "storage", DescriptorKind::Buffer { writable: true }),
            (1, "albedo", DescriptorKind::Texture { writable: false }),
            (2, "scratch", DescriptorKind::Texture { writable: true }),
            (0, "linear", DescriptorKind::Sampler),
        ]
    );
    assert_eq!(storage.descriptor_index(), Some(0));
    assert_eq!(albedo.descriptor_index(), Some(1));
    assert_eq!(scratch.descriptor_index(), Some(2));
}

#[test]
fn texture_creation_limits() {
    let device = device();
    let desc = |mip_level_count, depth_or_array_layers| hal::TextureDescriptor {
        label: Some("limits"),
        size: hal::Extent3d {
            width: 4,
            height: 4,
            depth_or_array_layers,
        },
        mip_level_count,
        format: hal::TextureFormat::R8Unorm,
        usage: TextureUses::RESOURCE,
    };
    assert!(matches!(
        device.create_texture(&desc(0, 1)),
        Err(CreateResourceError::ZeroMipLevels(_))
    ));
    assert!(matches!(
        device.create_texture(&desc(1, 33)),
        Err(CreateResourceError::TooManySubresources { count: 33, .. })
    ));
    assert!(device.create_texture(&desc(1, 32)).is_ok());
}

#[test]
fn pipeline_push_constant_limit() {
    let device = device();
    let result = device.create_compute_pipeline(&hal::ComputePipelineDescriptor {
        label: Some("greedy"),
        push_constant_size: 256,
    });
    assert!(matches!(
        result,
        Err(CreateResourceError::PushConstantsTooLarge { size: 256, .. })
    ));
}

#[test]
fn resources_outlive_their_submission() {
    let device = device_with(small_tables());
    let pipeline = compute_pipeline(&device, "write");
    let target = buffer(
        &device,
        "target",
        BufferUses::STORAGE_READ_WRITE | BufferUses::SHADER_VISIBLE,
    );
    let live_before = device.as_hal().live_object_count();

    device.queue_as_hal(|queue| queue.hold_signals(true));
    let mut recorder = recorder(&device, "keepalive");
    recorder.begin();
    recorder.begin_compute_scope(&pipeline);
    recorder.bind_resource_for_write(0, BindingResource::buffer(&target));
    recorder.dispatch([1, 1, 1]);
    recorder.end_compute_scope();
    recorder.end();
    recorder.commit(None);

    drop(target);
    assert!(!device.maintain(false));
    assert_eq!(device.as_hal().live_object_count(), live_before);
    assert_eq!(device.descriptor_table_usage(), (1, 0));

    device.queue_as_hal(|queue| queue.release_held());
    assert!(device.maintain(false));
    assert_eq!(device.as_hal().live_object_count(), live_before - 1);
    assert_eq!(device.descriptor_table_usage(), (0, 0));

    recorder.reset();
}

#[cfg(feature = "trace")]
#[test]
fn trace_records_submissions() {
    let dir = std::env::temp_dir().join(format!("rhi-trace-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let device = device_with(DeviceDescriptor {
        trace_path: Some(&dir),
        flags: DeviceFlags::all(),
        ..Default::default()
    });
    let pipeline = compute_pipeline(&device, "traced");
    let data = buffer(&device, "data", BufferUses::STORAGE_READ);

    let mut recorder = recorder(&device, "traced");
    recorder.begin();
    recorder.begin_compute_scope(&pipeline);
    recorder.bind_resource_for_read(0, BindingResource::buffer(&data));
    recorder.set_push_constants(0, &[7; 4]);
    recorder.dispatch([1, 1, 1]);
    recorder.end_compute_scope();
    recorder.end();
    recorder.commit(None);

    let trace = std::fs::read_to_string(dir.join("trace.ron")).unwrap();
    assert!(trace.contains("Init"));
    assert!(trace.contains("CreateBuffer"));
    assert!(trace.contains("Submit"));
    assert!(trace.contains("Dispatch"));
    assert!(dir.join("push1.bin").exists());
}
