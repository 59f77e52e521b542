use std::{
    fmt,
    mem::ManuallyDrop,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use hal::{Device as _, ResourceState};
use thiserror::Error;

use crate::{
    descriptor::{CapacityError, DescriptorIndex},
    device::Device,
    error::fatal_on_error,
    track::{mask::MAX_MASK_BITS, TextureSelector},
};

/// Process-unique identity of a resource.
///
/// Unlike native handles these are never reused, so a recorder can key
/// its tracker on them without worrying about a resource being destroyed
/// and another one landing at the same address.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug, Error)]
pub enum CreateResourceError {
    #[error(transparent)]
    Device(#[from] hal::DeviceError),
    #[error("not enough descriptor slots: {0}")]
    Capacity(#[from] CapacityError),
    #[error("texture {label:?} has {count} {what}, at most {max} can be tracked")]
    TooManySubresources {
        label: String,
        what: &'static str,
        count: u32,
        max: u32,
    },
    #[error("texture {0:?} needs at least one mip level")]
    ZeroMipLevels(String),
    #[error("pipeline {label:?} declares {size} bytes of push constants, at most {max} are supported")]
    PushConstantsTooLarge {
        label: String,
        size: u32,
        max: usize,
    },
}

/// A GPU buffer.
///
/// Buffers are tracked as a whole: every use covers all of its bytes.
pub struct Buffer<A: hal::Api> {
    pub(crate) raw: ManuallyDrop<A::Buffer>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) id: ResourceId,
    pub(crate) label: String,
    pub(crate) size: hal::BufferAddress,
    pub(crate) usage: hal::BufferUses,
    pub(crate) descriptor: Option<DescriptorIndex>,
}

impl<A: hal::Api> Buffer<A> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> hal::BufferAddress {
        self.size
    }

    pub fn usage(&self) -> hal::BufferUses {
        self.usage
    }

    /// The state a buffer rests in outside of recordings.
    pub fn default_state(&self) -> ResourceState {
        ResourceState::Common
    }

    /// Slot of this buffer in the device's resource table, if it is shader visible.
    pub fn descriptor_index(&self) -> Option<DescriptorIndex> {
        self.descriptor
    }

    pub fn as_hal(&self) -> &A::Buffer {
        &self.raw
    }
}

impl<A: hal::Api> Drop for Buffer<A> {
    fn drop(&mut self) {
        log::trace!("Destroy raw Buffer {:?}", self.label);
        if let Some(index) = self.descriptor.take() {
            self.device.tables.lock().resources.deallocate(index);
        }
        unsafe {
            let raw = ManuallyDrop::take(&mut self.raw);
            self.device.raw.destroy_buffer(raw);
        }
    }
}

impl<A: hal::Api> fmt::Debug for Buffer<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("size", &self.size)
            .finish()
    }
}

pub(crate) fn validate_texture_descriptor(
    desc: &hal::TextureDescriptor,
) -> Result<(), CreateResourceError> {
    let label = || desc.label.unwrap_or_default().to_string();
    if desc.mip_level_count == 0 {
        return Err(CreateResourceError::ZeroMipLevels(label()));
    }
    for (what, count) in [
        ("mip levels", desc.mip_level_count),
        ("array layers", desc.array_layer_count()),
    ] {
        if count > MAX_MASK_BITS {
            return Err(CreateResourceError::TooManySubresources {
                label: label(),
                what,
                count,
                max: MAX_MASK_BITS,
            });
        }
    }
    Ok(())
}

/// A GPU texture.
///
/// Every (mip, layer) pair is tracked on its own.
pub struct Texture<A: hal::Api> {
    pub(crate) raw: ManuallyDrop<A::Texture>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) id: ResourceId,
    pub(crate) label: String,
    pub(crate) size: hal::Extent3d,
    pub(crate) format: hal::TextureFormat,
    pub(crate) usage: hal::TextureUses,
    pub(crate) mip_level_count: u32,
    pub(crate) array_layer_count: u32,
    pub(crate) descriptor: Option<DescriptorIndex>,
}

impl<A: hal::Api> Texture<A> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> hal::Extent3d {
        self.size
    }

    pub fn format(&self) -> hal::TextureFormat {
        self.format
    }

    pub fn usage(&self) -> hal::TextureUses {
        self.usage
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn array_layer_count(&self) -> u32 {
        self.array_layer_count
    }

    /// The state a texture rests in outside of recordings.
    pub fn default_state(&self) -> ResourceState {
        self.usage.default_state()
    }

    /// Returns true if this texture is handed to the presentation engine
    /// at the end of every recording.
    pub fn is_swapchain(&self) -> bool {
        self.usage.contains(hal::TextureUses::PRESENT)
    }

    pub fn descriptor_index(&self) -> Option<DescriptorIndex> {
        self.descriptor
    }

    /// Returns true if `selector` names a mip or layer this texture lacks.
    pub fn selector_exceeds(&self, selector: &TextureSelector) -> bool {
        selector.mips.exceeds(self.mip_level_count)
            || selector.layers.exceeds(self.array_layer_count)
    }

    pub fn as_hal(&self) -> &A::Texture {
        &self.raw
    }
}

impl<A: hal::Api> Drop for Texture<A> {
    fn drop(&mut self) {
        log::trace!("Destroy raw Texture {:?}", self.label);
        if let Some(index) = self.descriptor.take() {
            self.device.tables.lock().resources.deallocate(index);
        }
        unsafe {
            let raw = ManuallyDrop::take(&mut self.raw);
            self.device.raw.destroy_texture(raw);
        }
    }
}

impl<A: hal::Api> fmt::Debug for Texture<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("mip_level_count", &self.mip_level_count)
            .field("array_layer_count", &self.array_layer_count)
            .finish()
    }
}

/// A sampler, addressed through the device's sampler table.
#[derive(Debug)]
pub struct Sampler<A: hal::Api> {
    pub(crate) raw: ManuallyDrop<A::Sampler>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) descriptor: DescriptorIndex,
}

impl<A: hal::Api> Sampler<A> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn descriptor_index(&self) -> DescriptorIndex {
        self.descriptor
    }
}

impl<A: hal::Api> Drop for Sampler<A> {
    fn drop(&mut self) {
        log::trace!("Destroy raw Sampler {:?}", self.label);
        self.device.tables.lock().samplers.deallocate(self.descriptor);
        unsafe {
            let raw = ManuallyDrop::take(&mut self.raw);
            self.device.raw.destroy_sampler(raw);
        }
    }
}

#[derive(Debug)]
pub struct RenderPipeline<A: hal::Api> {
    pub(crate) raw: ManuallyDrop<A::RenderPipeline>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) push_constant_size: u32,
}

impl<A: hal::Api> RenderPipeline<A> {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<A: hal::Api> Drop for RenderPipeline<A> {
    fn drop(&mut self) {
        log::trace!("Destroy raw RenderPipeline {:?}", self.label);
        unsafe {
            let raw = ManuallyDrop::take(&mut self.raw);
            self.device.raw.destroy_render_pipeline(raw);
        }
    }
}

#[derive(Debug)]
pub struct ComputePipeline<A: hal::Api> {
    pub(crate) raw: ManuallyDrop<A::ComputePipeline>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) push_constant_size: u32,
}

impl<A: hal::Api> ComputePipeline<A> {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<A: hal::Api> Drop for ComputePipeline<A> {
    fn drop(&mut self) {
        log::trace!("Destroy raw ComputePipeline {:?}", self.label);
        unsafe {
            let raw = ManuallyDrop::take(&mut self.raw);
            self.device.raw.destroy_compute_pipeline(raw);
        }
    }
}

/// A timeline fence the caller can have signaled by a submission.
#[derive(Debug)]
pub struct Fence<A: hal::Api> {
    pub(crate) raw: ManuallyDrop<A::Fence>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) last_signal: AtomicU64,
}

impl<A: hal::Api> Fence<A> {
    /// Reserves the value the next submission will signal.
    pub(crate) fn next_signal_value(&self) -> hal::FenceValue {
        self.last_signal.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The value the most recent submission signaling this fence will set.
    pub fn last_signal_value(&self) -> hal::FenceValue {
        self.last_signal.load(Ordering::Acquire)
    }

    pub fn completed_value(&self) -> hal::FenceValue {
        fatal_on_error!(
            unsafe { self.device.raw.get_fence_value(&self.raw) },
            "reading a fence value"
        )
    }

    /// Blocks until the fence reaches `value`, or the timeout elapses.
    pub fn wait(&self, value: hal::FenceValue, timeout_ms: Option<u32>) -> bool {
        fatal_on_error!(
            unsafe { self.device.raw.wait(&self.raw, value, timeout_ms) },
            "waiting for fence value {}",
            value
        )
    }
}

impl<A: hal::Api> Drop for Fence<A> {
    fn drop(&mut self) {
        unsafe {
            let raw = ManuallyDrop::take(&mut self.raw);
            self.device.raw.destroy_fence(raw);
        }
    }
}
