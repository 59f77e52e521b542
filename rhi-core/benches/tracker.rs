use std::{sync::Arc, time::Duration};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rhi_core::{
    command::{BindingResource, RecorderDescriptor},
    device::{Device, DeviceDescriptor, DeviceFlags},
    hal::{self, empty},
    resource::{Buffer, Texture},
    track::TextureSelector,
};

fn dispatch_count() -> usize {
    // On CI we only want to run a very lightweight version of the benchmark
    // to ensure that it does not break.
    if std::env::var("RHI_TESTING").is_ok() {
        8
    } else {
        10_000
    }
}

const RESOURCES_PER_DISPATCH: usize = 4;

struct TrackerState {
    device: Arc<Device<empty::Api>>,
    buffers: Vec<Arc<Buffer<empty::Api>>>,
    textures: Vec<Arc<Texture<empty::Api>>>,
}

impl TrackerState {
    fn new() -> Self {
        let device = Device::new(
            empty::Device::default(),
            empty::Queue::default(),
            &DeviceDescriptor {
                label: Some("Tracker Device"),
                flags: DeviceFlags::empty(),
                ..Default::default()
            },
        )
        .unwrap();

        let count = dispatch_count() * RESOURCES_PER_DISPATCH / 2;
        let buffers = (0..count)
            .map(|i| {
                device
                    .create_buffer(&hal::BufferDescriptor {
                        label: Some(&format!("Buffer{i}")),
                        size: 16,
                        usage: hal::BufferUses::STORAGE_READ_WRITE,
                    })
                    .unwrap()
            })
            .collect();
        let textures = (0..count)
            .map(|i| {
                device
                    .create_texture(&hal::TextureDescriptor {
                        label: Some(&format!("Texture{i}")),
                        size: hal::Extent3d {
                            width: 16,
                            height: 16,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 4,
                        format: hal::TextureFormat::Rgba8Unorm,
                        usage: hal::TextureUses::RESOURCE | hal::TextureUses::STORAGE_READ_WRITE,
                    })
                    .unwrap()
            })
            .collect();

        Self {
            device,
            buffers,
            textures,
        }
    }
}

fn run_bench(ctx: &mut Criterion) {
    let state = TrackerState::new();
    let pipeline = state
        .device
        .create_compute_pipeline(&hal::ComputePipelineDescriptor {
            label: Some("Bench Pipeline"),
            push_constant_size: 0,
        })
        .unwrap();
    let mut recorder = state
        .device
        .create_command_recorder(&RecorderDescriptor {
            label: Some("Bench Recorder"),
            ..Default::default()
        })
        .unwrap();

    let dispatches = dispatch_count();
    let mut group = ctx.benchmark_group("Tracker: Record");
    group.throughput(Throughput::Elements(dispatches as _));
    group.bench_function(format!("{dispatches} dispatches"), |b| {
        b.iter(|| {
            recorder.begin();
            for (buffers, textures) in state
                .buffers
                .chunks(RESOURCES_PER_DISPATCH / 2)
                .zip(state.textures.chunks(RESOURCES_PER_DISPATCH / 2))
            {
                recorder.begin_compute_scope(&pipeline);
                for (slot, buffer) in buffers.iter().enumerate() {
                    recorder.bind_resource_for_write(slot as u32, BindingResource::buffer(buffer));
                }
                for (slot, texture) in textures.iter().enumerate() {
                    recorder.bind_resource_for_read(
                        (buffers.len() + slot) as u32,
                        BindingResource::Texture {
                            texture,
                            selector: Some(TextureSelector::ALL),
                        },
                    );
                }
                recorder.dispatch([1, 1, 1]);
                recorder.end_compute_scope();
            }
            recorder.end();
            recorder.commit(None);
            recorder.block_until_completed();
            recorder.reset();
        });
    });
    group.finish();
}

criterion_group! {
    name = tracker;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = run_bench,
}
criterion_main!(tracker);
