#![allow(dead_code)]

use std::sync::Arc;

use rhi_core::{
    command::{CommandRecorder, RecorderDescriptor},
    device::{Device, DeviceDescriptor, DeviceFlags},
    hal::{self, empty},
    resource::{Buffer, ComputePipeline, RenderPipeline, Texture},
};

pub type Api = empty::Api;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn device_with(desc: DeviceDescriptor) -> Arc<Device<Api>> {
    init_logger();
    Device::new(empty::Device::default(), empty::Queue::default(), &desc).unwrap()
}

pub fn device() -> Arc<Device<Api>> {
    device_with(DeviceDescriptor {
        label: Some("test"),
        flags: DeviceFlags::all(),
        ..Default::default()
    })
}

pub fn recorder(device: &Arc<Device<Api>>, label: &str) -> CommandRecorder<Api> {
    device
        .create_command_recorder(&RecorderDescriptor {
            label: Some(label),
            ..Default::default()
        })
        .unwrap()
}

pub fn buffer(device: &Arc<Device<Api>>, label: &str, usage: hal::BufferUses) -> Arc<Buffer<Api>> {
    device
        .create_buffer(&hal::BufferDescriptor {
            label: Some(label),
            size: 256,
            usage,
        })
        .unwrap()
}

pub fn texture(
    device: &Arc<Device<Api>>,
    label: &str,
    mip_level_count: u32,
    array_layer_count: u32,
    usage: hal::TextureUses,
) -> Arc<Texture<Api>> {
    device
        .create_texture(&hal::TextureDescriptor {
            label: Some(label),
            size: hal::Extent3d {
                width: 64,
                height: 64,
                depth_or_array_layers: array_layer_count,
            },
            mip_level_count,
            format: hal::TextureFormat::Rgba8Unorm,
            usage,
        })
        .unwrap()
}

pub fn render_pipeline(
    device: &Arc<Device<Api>>,
    label: &str,
    push_constant_size: u32,
) -> Arc<RenderPipeline<Api>> {
    device
        .create_render_pipeline(&hal::RenderPipelineDescriptor {
            label: Some(label),
            color_formats: &[hal::TextureFormat::Rgba8Unorm],
            depth_stencil_format: None,
            push_constant_size,
        })
        .unwrap()
}

pub fn compute_pipeline(device: &Arc<Device<Api>>, label: &str) -> Arc<ComputePipeline<Api>> {
    device
        .create_compute_pipeline(&hal::ComputePipelineDescriptor {
            label: Some(label),
            push_constant_size: 16,
        })
        .unwrap()
}

pub fn upload(mip_level: u32) -> hal::BufferTextureCopy {
    hal::BufferTextureCopy {
        buffer_offset: 0,
        bytes_per_row: None,
        texture_mip_level: mip_level,
        texture_array_layer: 0,
        texture_origin: hal::Origin3d::default(),
        size: hal::Extent3d {
            width: 64 >> mip_level,
            height: 64 >> mip_level,
            depth_or_array_layers: 1,
        },
    }
}

pub fn extent() -> hal::Extent3d {
    hal::Extent3d {
        width: 64,
        height: 64,
        depth_or_array_layers: 1,
    }
}

pub fn submissions(device: &Device<Api>) -> Vec<empty::Submission> {
    device.queue_as_hal(|queue| queue.submissions().to_vec())
}

/// Commands of the most recent submission.
pub fn last_commands(device: &Device<Api>) -> Vec<empty::Command> {
    submissions(device)
        .pop()
        .map(|submission| submission.commands)
        .unwrap_or_default()
}

pub fn texture_barrier(
    resource: &str,
    mip_level: u32,
    array_layer: u32,
    usage: std::ops::Range<hal::ResourceState>,
) -> empty::BarrierRecord {
    empty::BarrierRecord {
        resource: resource.to_string(),
        range: Some(hal::SubresourceRange::single(mip_level, array_layer)),
        usage,
    }
}

pub fn buffer_barrier(
    resource: &str,
    usage: std::ops::Range<hal::ResourceState>,
) -> empty::BarrierRecord {
    empty::BarrierRecord {
        resource: resource.to_string(),
        range: None,
        usage,
    }
}
