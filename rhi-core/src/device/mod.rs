use std::{
    fmt,
    mem::ManuallyDrop,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bitflags::bitflags;
use hal::{Device as _, Queue as _};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    command::{CommandRecorder, RecorderDescriptor},
    descriptor::{CapacityError, DescriptorIndex, FreeList},
    error::fatal_on_error,
    resource::{
        self, Buffer, ComputePipeline, CreateResourceError, Fence, RenderPipeline, ResourceId,
        Sampler, Texture,
    },
    Label, LabelHelpers, SubmissionIndex,
};

pub(crate) mod life;
#[cfg(feature = "trace")]
pub(crate) mod trace;

pub(crate) use life::SubmittedResources;

/// Default size of the shader resource table.
pub const DEFAULT_RESOURCE_TABLE_CAPACITY: u32 = 65536;
/// Default size of the sampler table, the D3D12 limit for shader visible heaps.
pub const DEFAULT_SAMPLER_TABLE_CAPACITY: u32 = 2048;

bitflags! {
    /// Debugging behaviors of a device.
    pub struct DeviceFlags: u32 {
        /// Check every recorded operation against the resource it touches,
        /// e.g. that a selector names existing mips and layers.
        const VALIDATION = 1 << 0;
        /// Forward debug markers to the backend. Without this flag they are
        /// dropped when recorded.
        const DEBUG_MARKERS = 1 << 1;
    }
}

impl DeviceFlags {
    /// Default flags for the build: everything on in debug builds.
    pub fn from_build_config() -> Self {
        if cfg!(debug_assertions) {
            Self::all()
        } else {
            Self::empty()
        }
    }

    /// Parses a comma separated list like `validation,markers`.
    ///
    /// Unknown names are ignored.
    pub fn from_comma_list(string: &str) -> Self {
        let mut flags = Self::empty();
        for name in string.split(',').map(str::trim) {
            flags |= match name.to_lowercase().as_str() {
                "validation" => Self::VALIDATION,
                "markers" | "debug_markers" => Self::DEBUG_MARKERS,
                "all" => Self::all(),
                "none" => Self::empty(),
                other => {
                    log::warn!("Unknown device flag {:?}", other);
                    Self::empty()
                }
            };
        }
        flags
    }

    /// Get a set of device flags from the environment variable `RHI_DEBUG`.
    pub fn from_env() -> Option<Self> {
        std::env::var("RHI_DEBUG")
            .ok()
            .as_deref()
            .map(Self::from_comma_list)
    }

    /// `RHI_DEBUG` if set, the build defaults otherwise.
    pub fn from_env_or_build_config() -> Self {
        Self::from_env().unwrap_or_else(Self::from_build_config)
    }
}

#[derive(Clone, Debug)]
pub struct DeviceDescriptor<'a> {
    pub label: Label<'a>,
    /// Number of slots in the shader resource table.
    ///
    /// Every shader visible buffer and texture takes one slot for its whole
    /// lifetime. Creation fails with a capacity error when all are taken.
    pub resource_table_capacity: u32,
    /// Number of slots in the sampler table.
    pub sampler_table_capacity: u32,
    pub flags: DeviceFlags,
    /// Directory to write a RON trace of every submission to. Only used
    /// with the `trace` feature.
    pub trace_path: Option<&'a Path>,
}

impl Default for DeviceDescriptor<'_> {
    fn default() -> Self {
        Self {
            label: None,
            resource_table_capacity: DEFAULT_RESOURCE_TABLE_CAPACITY,
            sampler_table_capacity: DEFAULT_SAMPLER_TABLE_CAPACITY,
            flags: DeviceFlags::from_env_or_build_config(),
            trace_path: None,
        }
    }
}

/// The bindless tables shared by every resource of a device.
#[derive(Debug)]
pub(crate) struct DescriptorTables {
    pub resources: FreeList,
    pub samplers: FreeList,
}

/// Structure describing a logical device.
///
/// The hal queue and the descriptor tables are the only state shared
/// between recorders, and each sits behind its own lock.
pub struct Device<A: hal::Api> {
    pub(crate) raw: A::Device,
    pub(crate) queue: Mutex<A::Queue>,
    /// Signaled with the submission index after each submission completes.
    pub(crate) fence: ManuallyDrop<A::Fence>,
    pub(crate) active_submission_index: AtomicU64,
    pub(crate) tables: Mutex<DescriptorTables>,
    pub(crate) life_tracker: Mutex<life::LifetimeTracker<A>>,
    pub(crate) label: String,
    pub(crate) flags: DeviceFlags,
    #[cfg(feature = "trace")]
    pub(crate) trace: Option<Mutex<trace::Trace>>,
}

impl<A: hal::Api> Device<A> {
    pub fn new(
        raw: A::Device,
        queue: A::Queue,
        desc: &DeviceDescriptor,
    ) -> Result<Arc<Self>, hal::DeviceError> {
        #[cfg(not(feature = "trace"))]
        if let Some(_) = desc.trace_path {
            log::error!("Feature 'trace' is not enabled");
        }
        let fence = unsafe { raw.create_fence() }?;

        log::info!(
            "Creating device {:?} with {} resource and {} sampler slots, flags {:?}",
            desc.label.unwrap_or_default(),
            desc.resource_table_capacity,
            desc.sampler_table_capacity,
            desc.flags,
        );

        Ok(Arc::new(Self {
            raw,
            queue: Mutex::new(queue),
            fence: ManuallyDrop::new(fence),
            active_submission_index: AtomicU64::new(0),
            tables: Mutex::new(DescriptorTables {
                resources: FreeList::new(desc.resource_table_capacity),
                samplers: FreeList::new(desc.sampler_table_capacity),
            }),
            life_tracker: Mutex::new(life::LifetimeTracker::new()),
            label: desc.label.to_string_or_default(),
            flags: desc.flags,
            #[cfg(feature = "trace")]
            trace: desc.trace_path.and_then(|path| match trace::Trace::new(path) {
                Ok(mut trace) => {
                    trace.add(trace::Action::Init {
                        label: desc.label.to_string_or_default(),
                        resource_table_capacity: desc.resource_table_capacity,
                        sampler_table_capacity: desc.sampler_table_capacity,
                    });
                    Some(Mutex::new(trace))
                }
                Err(e) => {
                    log::error!("Unable to start a trace in '{:?}': {:?}", path, e);
                    None
                }
            }),
        }))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn flags(&self) -> DeviceFlags {
        self.flags
    }

    pub fn as_hal(&self) -> &A::Device {
        &self.raw
    }

    /// Runs `hal_queue_callback` with exclusive access to the hal queue.
    pub fn queue_as_hal<F, R>(&self, hal_queue_callback: F) -> R
    where
        F: FnOnce(&mut A::Queue) -> R,
    {
        hal_queue_callback(&mut self.queue.lock())
    }

    /// Number of allocated slots in the resource and the sampler table.
    pub fn descriptor_table_usage(&self) -> (usize, usize) {
        let tables = self.tables.lock();
        (tables.resources.len(), tables.samplers.len())
    }

    fn allocate_resource_slot(&self, needed: bool) -> Result<Option<DescriptorIndex>, CapacityError> {
        if !needed {
            return Ok(None);
        }
        match self.tables.lock().resources.allocate() {
            Ok(index) => Ok(Some(index)),
            Err(err) => {
                log::warn!("Unable to allocate a resource descriptor: {}", err);
                Err(err)
            }
        }
    }

    fn free_resource_slot(&self, index: Option<DescriptorIndex>) {
        if let Some(index) = index {
            self.tables.lock().resources.deallocate(index);
        }
    }

    pub fn create_buffer(
        self: &Arc<Self>,
        desc: &hal::BufferDescriptor,
    ) -> Result<Arc<Buffer<A>>, CreateResourceError> {
        profiling::scope!("Device::create_buffer");
        let descriptor =
            self.allocate_resource_slot(desc.usage.intersects(hal::BufferUses::SHADER_VISIBLE))?;
        let raw = match unsafe { self.raw.create_buffer(desc) } {
            Ok(raw) => raw,
            Err(err) => {
                self.free_resource_slot(descriptor);
                return Err(err.into());
            }
        };
        if let Some(index) = descriptor {
            let writable = desc.usage.contains(hal::BufferUses::STORAGE_READ_WRITE);
            unsafe { self.raw.write_buffer_descriptor(index, &raw, writable) };
        }

        let buffer = Buffer {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            id: ResourceId::next(),
            label: desc.label.to_string_or_default(),
            size: desc.size,
            usage: desc.usage,
            descriptor,
        };
        log::trace!("Created {:?}", buffer);

        #[cfg(feature = "trace")]
        if let Some(ref trace) = self.trace {
            trace.lock().add(trace::Action::CreateBuffer {
                id: buffer.id,
                label: buffer.label.clone(),
                size: buffer.size,
                usage: buffer.usage,
            });
        }

        Ok(Arc::new(buffer))
    }

    pub fn create_texture(
        self: &Arc<Self>,
        desc: &hal::TextureDescriptor,
    ) -> Result<Arc<Texture<A>>, CreateResourceError> {
        profiling::scope!("Device::create_texture");
        resource::validate_texture_descriptor(desc)?;
        let descriptor =
            self.allocate_resource_slot(desc.usage.intersects(hal::TextureUses::SHADER_VISIBLE))?;
        let raw = match unsafe { self.raw.create_texture(desc) } {
            Ok(raw) => raw,
            Err(err) => {
                self.free_resource_slot(descriptor);
                return Err(err.into());
            }
        };
        if let Some(index) = descriptor {
            let writable = desc.usage.contains(hal::TextureUses::STORAGE_READ_WRITE);
            unsafe { self.raw.write_texture_descriptor(index, &raw, writable) };
        }

        let texture = Texture {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            id: ResourceId::next(),
            label: desc.label.to_string_or_default(),
            size: desc.size,
            format: desc.format,
            usage: desc.usage,
            mip_level_count: desc.mip_level_count,
            array_layer_count: desc.array_layer_count(),
            descriptor,
        };
        log::trace!("Created {:?}", texture);

        #[cfg(feature = "trace")]
        if let Some(ref trace) = self.trace {
            trace.lock().add(trace::Action::CreateTexture {
                id: texture.id,
                label: texture.label.clone(),
                size: texture.size,
                format: texture.format,
                usage: texture.usage,
                mip_level_count: texture.mip_level_count,
            });
        }

        Ok(Arc::new(texture))
    }

    pub fn create_sampler(
        self: &Arc<Self>,
        desc: &hal::SamplerDescriptor,
    ) -> Result<Arc<Sampler<A>>, CreateResourceError> {
        let descriptor = self.tables.lock().samplers.allocate()?;
        let raw = match unsafe { self.raw.create_sampler(desc) } {
            Ok(raw) => raw,
            Err(err) => {
                self.tables.lock().samplers.deallocate(descriptor);
                return Err(err.into());
            }
        };
        unsafe { self.raw.write_sampler_descriptor(descriptor, &raw) };

        Ok(Arc::new(Sampler {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: desc.label.to_string_or_default(),
            descriptor,
        }))
    }

    fn check_push_constant_size(label: Label, size: u32) -> Result<(), CreateResourceError> {
        if size as usize > hal::MAX_PUSH_CONSTANT_SIZE {
            return Err(CreateResourceError::PushConstantsTooLarge {
                label: label.to_string_or_default(),
                size,
                max: hal::MAX_PUSH_CONSTANT_SIZE,
            });
        }
        Ok(())
    }

    pub fn create_render_pipeline(
        self: &Arc<Self>,
        desc: &hal::RenderPipelineDescriptor,
    ) -> Result<Arc<RenderPipeline<A>>, CreateResourceError> {
        Self::check_push_constant_size(desc.label, desc.push_constant_size)?;
        let raw = unsafe { self.raw.create_render_pipeline(desc) }?;
        Ok(Arc::new(RenderPipeline {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: desc.label.to_string_or_default(),
            push_constant_size: desc.push_constant_size,
        }))
    }

    pub fn create_compute_pipeline(
        self: &Arc<Self>,
        desc: &hal::ComputePipelineDescriptor,
    ) -> Result<Arc<ComputePipeline<A>>, CreateResourceError> {
        Self::check_push_constant_size(desc.label, desc.push_constant_size)?;
        let raw = unsafe { self.raw.create_compute_pipeline(desc) }?;
        Ok(Arc::new(ComputePipeline {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: desc.label.to_string_or_default(),
            push_constant_size: desc.push_constant_size,
        }))
    }

    pub fn create_fence(self: &Arc<Self>) -> Result<Arc<Fence<A>>, CreateResourceError> {
        let raw = unsafe { self.raw.create_fence() }?;
        Ok(Arc::new(Fence {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            last_signal: AtomicU64::new(0),
        }))
    }

    pub fn create_command_recorder(
        self: &Arc<Self>,
        desc: &RecorderDescriptor,
    ) -> Result<CommandRecorder<A>, CreateResourceError> {
        CommandRecorder::new(self, desc)
    }

    /// Submits one finished command buffer.
    ///
    /// `signals` are set in addition to the device fence. `resources` stay
    /// alive until the returned submission index completes.
    pub(crate) fn submit(
        &self,
        label: &str,
        command_buffer: &A::CommandBuffer,
        signals: &[(&A::Fence, hal::FenceValue)],
        resources: SubmittedResources<A>,
    ) -> SubmissionIndex {
        profiling::scope!("Device::submit");
        let mut queue = self.queue.lock();
        let index = self.active_submission_index.fetch_add(1, Ordering::AcqRel) + 1;

        let mut all_signals = SmallVec::<[(&A::Fence, hal::FenceValue); 3]>::new();
        all_signals.push((&*self.fence, index));
        all_signals.extend_from_slice(signals);

        fatal_on_error!(
            unsafe { queue.submit(&[command_buffer], &all_signals) },
            "submitting {:?} as submission {}",
            label,
            index
        );
        log::debug!("Submitted {:?} as submission {}", label, index);

        if !resources.is_empty() {
            self.life_tracker.lock().track_submission(index, resources);
        }
        index
    }

    /// Index of the most recent submission.
    pub fn last_submission_index(&self) -> SubmissionIndex {
        self.active_submission_index.load(Ordering::Acquire)
    }

    /// Index of the most recent submission the GPU has finished.
    pub fn last_completed_submission_index(&self) -> SubmissionIndex {
        fatal_on_error!(
            unsafe { self.raw.get_fence_value(&self.fence) },
            "reading the fence of device {:?}",
            self.label
        )
    }

    /// Check this device for completed submissions, releasing what they kept alive.
    ///
    /// With `wait`, blocks until every submission made so far is done.
    /// Returns true if nothing is left in flight.
    ///
    /// Resources in flight hold the device, so it is only dropped after a
    /// `maintain` released them.
    pub fn maintain(&self, wait: bool) -> bool {
        profiling::scope!("Device::maintain");
        if wait {
            let target = self.last_submission_index();
            fatal_on_error!(
                unsafe { self.raw.wait(&self.fence, target, None) },
                "waiting for submission {} on device {:?}",
                target,
                self.label
            );
        }
        let last_done = self.last_completed_submission_index();
        let (released, queue_empty) = {
            let mut life_tracker = self.life_tracker.lock();
            let released = life_tracker.triage_submissions(last_done);
            (released, life_tracker.queue_empty())
        };
        // Dropped outside of the lock: destruction takes the table lock.
        drop(released);
        queue_empty
    }
}

impl<A: hal::Api> Drop for Device<A> {
    fn drop(&mut self) {
        log::info!("Destroying device {:?}", self.label);
        unsafe {
            let fence = ManuallyDrop::take(&mut self.fence);
            self.raw.destroy_fence(fence);
        }
    }
}

impl<A: hal::Api> fmt::Debug for Device<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Device")
            .field("label", &self.label)
            .field("flags", &self.flags)
            .field(
                "active_submission_index",
                &self.active_submission_index.load(Ordering::Relaxed),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_from_comma_list() {
        assert_eq!(
            DeviceFlags::from_comma_list("validation, markers"),
            DeviceFlags::all()
        );
        assert_eq!(
            DeviceFlags::from_comma_list("Validation"),
            DeviceFlags::VALIDATION
        );
        assert_eq!(DeviceFlags::from_comma_list("bogus"), DeviceFlags::empty());
        assert_eq!(DeviceFlags::from_comma_list("none"), DeviceFlags::empty());
    }
}
