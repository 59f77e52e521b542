/*! Command Recording

A [`CommandRecorder`] turns resource-aware calls into encoder calls. Every
call that touches a buffer or a texture reports the state it needs to the
recorder's [`UsageTracker`], and the barriers it synthesizes are logged in
front of the call, batched.

Commands are not encoded right away. They go into a deferred log that is
replayed when a render or compute scope is entered and when the recording
ends. Barriers synthesized inside of a scope are collected on the side and
placed in one batch right before the scope's begin entry, since passes
cannot contain barriers on every backend.

Hoisting means nothing can be ordered between two commands of one scope.
A resource written by one dispatch and read by the next inside the same
scope gets its barrier before the pass, not between the two. Such a
second transition is logged as a warning. Split the work into two scopes
when the order matters.

## Lifecycle

```text
Idle --begin--> Recording --begin_*_scope--> Inside*Scope
                    ^ |  <--end_*_scope--------'
                    | `--end--> Ended --commit--> Submitted
                    `------------reset------------------'
```

Any call made in a state that does not allow it is a broken contract and
panics after logging the offending operation.
*/

mod deferred;
mod replay;

use std::{iter, mem, mem::ManuallyDrop, ops::Range, sync::Arc};

use arrayvec::ArrayVec;
use fxhash::FxHashSet;
use hal::{CommandEncoder as _, Device as _, ResourceState};
use smallvec::SmallVec;

use self::deferred::{
    BarrierBatch, BufferTransition, CommandLog, DeferredCommand, LoggedDepthStencil,
    LoggedTarget, TextureTransition,
};
use crate::{
    device::{Device, DeviceFlags, SubmittedResources},
    error::{fatal_on_error, misuse, StateError},
    resource::{
        Buffer, ComputePipeline, CreateResourceError, Fence, RenderPipeline, ResourceId, Texture,
    },
    track::{
        mask::MAX_MASK_BITS, LayerMask, MipMask, PendingTransition, SubresourceKey,
        TextureSelector, UsageTracker,
    },
    Label, LabelHelpers, SubmissionIndex, MAX_COLOR_ATTACHMENTS, MAX_PUSH_CONSTANT_SIZE,
};

#[cfg(feature = "trace")]
use crate::device::trace;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RecorderState {
    Idle,
    Recording,
    InsideRenderScope,
    InsideComputeScope,
    Ended,
    Submitted,
}

#[derive(Clone, Debug, Default)]
pub struct RecorderDescriptor<'a> {
    pub label: Label<'a>,
    /// At the end of a recording, return every used resource that is not a
    /// swapchain image to its default state.
    pub restore_default_states: bool,
}

/// A color attachment of a render scope.
#[derive(Clone, Debug)]
pub struct ColorTarget<A: hal::Api> {
    pub texture: Arc<Texture<A>>,
    pub mip_level: u32,
    pub array_layer: u32,
    pub load_op: hal::LoadOp<[f32; 4]>,
    pub store: bool,
}

#[derive(Clone, Debug)]
pub struct DepthStencilTarget<A: hal::Api> {
    pub texture: Arc<Texture<A>>,
    pub mip_level: u32,
    pub array_layer: u32,
    pub depth_load_op: hal::LoadOp<f32>,
    pub stencil_load_op: hal::LoadOp<u32>,
    pub store: bool,
}

#[derive(Clone, Debug)]
pub struct RenderTargets<'a, A: hal::Api> {
    pub label: Label<'a>,
    pub extent: hal::Extent3d,
    pub color_targets: &'a [ColorTarget<A>],
    pub depth_stencil_target: Option<DepthStencilTarget<A>>,
}

/// A resource bound to a shader slot.
#[derive(Debug)]
pub enum BindingResource<'a, A: hal::Api> {
    Buffer {
        buffer: &'a Arc<Buffer<A>>,
        offset: hal::BufferAddress,
    },
    /// A texture, restricted to the selected subresources. `None` selects all of them.
    Texture {
        texture: &'a Arc<Texture<A>>,
        selector: Option<TextureSelector>,
    },
}

impl<'a, A: hal::Api> BindingResource<'a, A> {
    pub fn buffer(buffer: &'a Arc<Buffer<A>>) -> Self {
        Self::Buffer { buffer, offset: 0 }
    }

    pub fn texture(texture: &'a Arc<Texture<A>>) -> Self {
        Self::Texture {
            texture,
            selector: None,
        }
    }
}

/// Resources referenced by the current recording, each kept once.
#[derive(Debug)]
struct UsedResources<A: hal::Api> {
    ids: FxHashSet<ResourceId>,
    buffers: Vec<Arc<Buffer<A>>>,
    textures: Vec<Arc<Texture<A>>>,
    render_pipelines: Vec<Arc<RenderPipeline<A>>>,
    compute_pipelines: Vec<Arc<ComputePipeline<A>>>,
}

impl<A: hal::Api> UsedResources<A> {
    fn new() -> Self {
        Self {
            ids: FxHashSet::default(),
            buffers: Vec::new(),
            textures: Vec::new(),
            render_pipelines: Vec::new(),
            compute_pipelines: Vec::new(),
        }
    }

    fn add_buffer(&mut self, buffer: &Arc<Buffer<A>>) {
        if self.ids.insert(buffer.id()) {
            self.buffers.push(Arc::clone(buffer));
        }
    }

    fn add_texture(&mut self, texture: &Arc<Texture<A>>) {
        if self.ids.insert(texture.id()) {
            self.textures.push(Arc::clone(texture));
        }
    }

    fn add_render_pipeline(&mut self, pipeline: &Arc<RenderPipeline<A>>) {
        if !self.render_pipelines.iter().any(|p| Arc::ptr_eq(p, pipeline)) {
            self.render_pipelines.push(Arc::clone(pipeline));
        }
    }

    fn add_compute_pipeline(&mut self, pipeline: &Arc<ComputePipeline<A>>) {
        if !self.compute_pipelines.iter().any(|p| Arc::ptr_eq(p, pipeline)) {
            self.compute_pipelines.push(Arc::clone(pipeline));
        }
    }

    fn take_submitted(&mut self) -> SubmittedResources<A> {
        self.ids.clear();
        SubmittedResources {
            buffers: mem::take(&mut self.buffers),
            textures: mem::take(&mut self.textures),
            render_pipelines: mem::take(&mut self.render_pipelines),
            compute_pipelines: mem::take(&mut self.compute_pipelines),
        }
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.buffers.clear();
        self.textures.clear();
        self.render_pipelines.clear();
        self.compute_pipelines.clear();
    }
}

/// Bookkeeping of the open render or compute scope.
#[derive(Debug)]
struct Scope<A: hal::Api> {
    /// Position of the scope's begin entry in the log.
    begin_index: usize,
    barriers: BarrierBatch<A>,
    transitioned: FxHashSet<SubresourceKey>,
}

/// Records GPU work for one queue, synthesizing the barriers it needs.
///
/// A recorder is reused across frames: `begin`, record, `end`, `commit`,
/// then `reset` once the submission completed.
pub struct CommandRecorder<A: hal::Api> {
    device: Arc<Device<A>>,
    encoder: ManuallyDrop<A::CommandEncoder>,
    /// Signaled with `fence_value` when the last commit completes.
    fence: ManuallyDrop<A::Fence>,
    fence_value: hal::FenceValue,
    command_buffer: Option<A::CommandBuffer>,
    submission_index: Option<SubmissionIndex>,
    state: RecorderState,
    label: String,
    restore_default_states: bool,
    tracker: UsageTracker,
    log: CommandLog<A>,
    /// Barriers synthesized outside of scopes, logged before the next command.
    pending: BarrierBatch<A>,
    scope: Option<Scope<A>>,
    used: UsedResources<A>,
    scratch: Vec<PendingTransition>,
    marker_depth: u32,
    push_constant_limit: usize,
    #[cfg(feature = "trace")]
    trace_commands: Vec<trace::Command>,
}

impl<A: hal::Api> CommandRecorder<A> {
    pub(crate) fn new(
        device: &Arc<Device<A>>,
        desc: &RecorderDescriptor,
    ) -> Result<Self, CreateResourceError> {
        let encoder = unsafe {
            device
                .raw
                .create_command_encoder(&hal::CommandEncoderDescriptor { label: desc.label })
        }?;
        let fence = match unsafe { device.raw.create_fence() } {
            Ok(fence) => fence,
            Err(err) => {
                unsafe { device.raw.destroy_command_encoder(encoder) };
                return Err(err.into());
            }
        };

        Ok(Self {
            device: Arc::clone(device),
            encoder: ManuallyDrop::new(encoder),
            fence: ManuallyDrop::new(fence),
            fence_value: 0,
            command_buffer: None,
            submission_index: None,
            state: RecorderState::Idle,
            label: desc.label.to_string_or_default(),
            restore_default_states: desc.restore_default_states,
            tracker: UsageTracker::new(),
            log: CommandLog::new(),
            pending: BarrierBatch::new(),
            scope: None,
            used: UsedResources::new(),
            scratch: Vec::new(),
            marker_depth: 0,
            push_constant_limit: MAX_PUSH_CONSTANT_SIZE,
            #[cfg(feature = "trace")]
            trace_commands: Vec::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn device(&self) -> &Arc<Device<A>> {
        &self.device
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Last known states of everything used in the current recording.
    pub fn tracker(&self) -> &UsageTracker {
        &self.tracker
    }

    /// Device submission index of the last commit, if any.
    pub fn submission_index(&self) -> Option<SubmissionIndex> {
        self.submission_index
    }

    /// Returns true if the last commit finished executing, or nothing was committed.
    pub fn is_completed(&self) -> bool {
        let value = fatal_on_error!(
            unsafe { self.device.raw.get_fence_value(&self.fence) },
            "reading the fence of recorder {:?}",
            self.label
        );
        value >= self.fence_value
    }

    fn set_state(&mut self, state: RecorderState) {
        log::debug!("Recorder {:?}: {:?} -> {:?}", self.label, self.state, state);
        self.state = state;
    }

    #[track_caller]
    fn illegal(&self, operation: &'static str) -> ! {
        misuse(
            &self.label,
            StateError::IllegalOperation {
                operation,
                state: self.state,
            },
        )
    }

    #[track_caller]
    fn expect_state(&self, operation: &'static str, expected: RecorderState) {
        if self.state != expected {
            self.illegal(operation);
        }
    }

    #[track_caller]
    fn expect_any_scope(&self, operation: &'static str) {
        match self.state {
            RecorderState::InsideRenderScope | RecorderState::InsideComputeScope => {}
            _ => self.illegal(operation),
        }
    }

    #[track_caller]
    fn expect_open(&self, operation: &'static str) {
        match self.state {
            RecorderState::Recording
            | RecorderState::InsideRenderScope
            | RecorderState::InsideComputeScope => {}
            _ => self.illegal(operation),
        }
    }

    #[track_caller]
    fn check_subresource(&self, texture: &Texture<A>, mip_level: u32, array_layer: u32) {
        for (what, index, count) in [
            ("mip level", mip_level, texture.mip_level_count()),
            ("array layer", array_layer, texture.array_layer_count()),
        ] {
            if index >= count {
                misuse(
                    &self.label,
                    StateError::SubresourceOutOfRange {
                        what,
                        index,
                        count,
                        label: texture.label().to_string(),
                    },
                );
            }
        }
    }

    #[track_caller]
    fn check_selector(&self, texture: &Texture<A>, selector: &TextureSelector) {
        if !self.device.flags.contains(DeviceFlags::VALIDATION)
            || !texture.selector_exceeds(selector)
        {
            return;
        }
        let highest = |bits: u32| MAX_MASK_BITS - 1 - bits.leading_zeros();
        let (what, index, count) = if selector.mips.exceeds(texture.mip_level_count()) {
            (
                "mip level",
                highest(selector.mips.bits()),
                texture.mip_level_count(),
            )
        } else {
            (
                "array layer",
                highest(selector.layers.bits()),
                texture.array_layer_count(),
            )
        };
        misuse(
            &self.label,
            StateError::SubresourceOutOfRange {
                what,
                index,
                count,
                label: texture.label().to_string(),
            },
        );
    }

    /// Picks the batch a new barrier goes to: the open scope's, or the
    /// one flushed before the next command.
    fn batch_for(&mut self, transition: &PendingTransition) -> &mut BarrierBatch<A> {
        match self.scope {
            Some(ref mut scope) => {
                if !transition.is_hazard() && !scope.transitioned.insert(transition.key) {
                    log::warn!(
                        "Recorder {:?}: {:?} changes state more than once inside one scope",
                        self.label,
                        transition.key
                    );
                }
                &mut scope.barriers
            }
            None => &mut self.pending,
        }
    }

    fn use_buffer(&mut self, buffer: &Arc<Buffer<A>>, state: ResourceState, is_write: bool) {
        strict_assert!(state.is_buffer_state());
        self.used.add_buffer(buffer);
        if let Some(transition) =
            self.tracker
                .record_buffer_use(buffer.id(), buffer.default_state(), state, is_write)
        {
            let barrier = BufferTransition {
                buffer: Arc::clone(buffer),
                usage: transition.usage.clone(),
            };
            self.batch_for(&transition).buffers.push(barrier);
        }
    }

    fn use_texture(
        &mut self,
        texture: &Arc<Texture<A>>,
        selector: TextureSelector,
        state: ResourceState,
        is_write: bool,
    ) {
        self.used.add_texture(texture);
        let mut transitions = mem::take(&mut self.scratch);
        self.tracker.record_texture_use(
            texture.id(),
            selector,
            texture.mip_level_count(),
            texture.array_layer_count(),
            texture.default_state(),
            state,
            is_write,
            &mut transitions,
        );
        for transition in transitions.drain(..) {
            let barrier = TextureTransition {
                texture: Arc::clone(texture),
                range: transition.key.range(),
                usage: transition.usage.clone(),
            };
            self.batch_for(&transition).textures.push(barrier);
        }
        self.scratch = transitions;
    }

    fn flush_barriers(&mut self) {
        let count = self.pending.len();
        if let Some(command) = self.pending.take_command() {
            log::trace!("Recorder {:?}: batching {} barriers", self.label, count);
            self.log.append(command);
        }
    }

    /// Logs `command`. Outside of scopes, pending barriers go first.
    fn record(&mut self, command: DeferredCommand<A>) {
        if self.scope.is_none() {
            self.flush_barriers();
        }
        self.log.append(command);
    }

    /// Encodes everything logged so far and empties the log.
    fn replay_log(&mut self) {
        if self.log.is_empty() {
            return;
        }
        log::trace!(
            "Recorder {:?}: replaying {} commands",
            self.label,
            self.log.len()
        );
        #[cfg(feature = "trace")]
        if let Some(ref trace) = self.device.trace {
            let mut trace = trace.lock();
            self.trace_commands
                .extend(self.log.commands().iter().map(|c| c.to_trace(&mut trace)));
        }
        unsafe { replay::replay::<A>(&mut *self.encoder, self.log.commands()) };
        self.log.clear();
    }

    fn enter_scope(&mut self, operation: &'static str, state: RecorderState) {
        match self.state {
            RecorderState::Recording => {}
            RecorderState::InsideRenderScope | RecorderState::InsideComputeScope => misuse(
                &self.label,
                StateError::NestedScope {
                    operation,
                    state: self.state,
                },
            ),
            _ => self.illegal(operation),
        }
        self.flush_barriers();
        self.replay_log();
        self.scope = Some(Scope {
            begin_index: self.log.len(),
            barriers: BarrierBatch::new(),
            transitioned: FxHashSet::default(),
        });
        self.set_state(state);
    }

    fn exit_scope(&mut self, end: DeferredCommand<A>) {
        self.log.append(end);
        if let Some(mut scope) = self.scope.take() {
            let count = scope.barriers.len();
            if let Some(batch) = scope.barriers.take_command() {
                log::trace!(
                    "Recorder {:?}: hoisting {} barriers out of the scope",
                    self.label,
                    count
                );
                self.log.insert(scope.begin_index, batch);
            }
        }
        self.push_constant_limit = MAX_PUSH_CONSTANT_SIZE;
        self.set_state(RecorderState::Recording);
    }

    pub fn begin(&mut self) {
        self.expect_state("begin", RecorderState::Idle);
        fatal_on_error!(
            unsafe { self.encoder.begin_encoding(Some(&self.label)) },
            "beginning recorder {:?}",
            self.label
        );
        self.set_state(RecorderState::Recording);
    }

    /// Finishes the recording.
    ///
    /// Swapchain textures are moved back to [`ResourceState::Present`], and
    /// with `restore_default_states` every other resource goes back to its
    /// default state.
    pub fn end(&mut self) {
        profiling::scope!("CommandRecorder::end");
        self.expect_state("end", RecorderState::Recording);
        if self.marker_depth != 0 {
            log::warn!(
                "Recorder {:?} ends with {} open debug markers",
                self.label,
                self.marker_depth
            );
        }

        let textures = mem::take(&mut self.used.textures);
        for texture in textures.iter() {
            if texture.is_swapchain() {
                self.use_texture(texture, TextureSelector::ALL, ResourceState::Present, false);
            } else if self.restore_default_states {
                self.use_texture(texture, TextureSelector::ALL, texture.default_state(), false);
            }
        }
        self.used.textures = textures;
        if self.restore_default_states {
            let buffers = mem::take(&mut self.used.buffers);
            for buffer in buffers.iter() {
                self.use_buffer(buffer, buffer.default_state(), false);
            }
            self.used.buffers = buffers;
        }

        self.flush_barriers();
        self.replay_log();
        let command_buffer = fatal_on_error!(
            unsafe { self.encoder.end_encoding() },
            "ending recorder {:?}",
            self.label
        );
        self.command_buffer = Some(command_buffer);
        self.set_state(RecorderState::Ended);
    }

    /// Submits the finished recording.
    ///
    /// The internal fence is always signaled. `fence`, if given, is signaled
    /// as well, with its next value.
    pub fn commit(&mut self, fence: Option<&Fence<A>>) -> SubmissionIndex {
        self.expect_state("commit", RecorderState::Ended);
        let resources = self.used.take_submitted();
        let command_buffer = match self.command_buffer {
            Some(ref command_buffer) => command_buffer,
            None => self.illegal("commit"),
        };

        self.fence_value += 1;
        let mut signals = ArrayVec::<(&A::Fence, hal::FenceValue), 2>::new();
        signals.push((&*self.fence, self.fence_value));
        if let Some(fence) = fence {
            if !Arc::ptr_eq(&fence.device, &self.device) {
                misuse(
                    &self.label,
                    StateError::ForeignFence(fence.device.label().to_string()),
                );
            }
            signals.push((&*fence.raw, fence.next_signal_value()));
        }

        let index = self
            .device
            .submit(&self.label, command_buffer, &signals, resources);
        drop(signals);

        #[cfg(feature = "trace")]
        if let Some(ref trace) = self.device.trace {
            trace.lock().add(trace::Action::Submit {
                index,
                recorder: self.label.clone(),
                commands: mem::take(&mut self.trace_commands),
            });
        }

        self.submission_index = Some(index);
        self.set_state(RecorderState::Submitted);
        index
    }

    /// Blocks until the last commit finished executing.
    pub fn block_until_completed(&self) {
        if self.fence_value == 0 {
            return;
        }
        profiling::scope!("CommandRecorder::block_until_completed");
        fatal_on_error!(
            unsafe { self.device.raw.wait(&self.fence, self.fence_value, None) },
            "waiting for recorder {:?}",
            self.label
        );
        self.device.maintain(false);
    }

    /// Returns to `Idle`, dropping the recording and everything it tracked.
    ///
    /// A submitted recording can only be reset after it completed.
    pub fn reset(&mut self) {
        match self.state {
            RecorderState::Idle => return,
            RecorderState::InsideRenderScope | RecorderState::InsideComputeScope => {
                self.illegal("reset")
            }
            RecorderState::Recording => unsafe { self.encoder.discard_encoding() },
            RecorderState::Ended => {}
            RecorderState::Submitted => {
                if !self.is_completed() {
                    misuse(
                        &self.label,
                        StateError::ResetWhileExecuting(self.submission_index.unwrap_or_default()),
                    );
                }
            }
        }
        if let Some(command_buffer) = self.command_buffer.take() {
            unsafe { self.encoder.reset_all(iter::once(command_buffer)) };
        }
        self.tracker.clear();
        self.log.clear();
        self.pending.clear();
        self.scope = None;
        self.used.clear();
        self.marker_depth = 0;
        self.push_constant_limit = MAX_PUSH_CONSTANT_SIZE;
        #[cfg(feature = "trace")]
        self.trace_commands.clear();
        self.set_state(RecorderState::Idle);
    }

    // copies

    pub fn copy_buffer_to_buffer(
        &mut self,
        src: &Arc<Buffer<A>>,
        dst: &Arc<Buffer<A>>,
        region: hal::BufferCopy,
    ) {
        self.expect_state("copy_buffer_to_buffer", RecorderState::Recording);
        self.use_buffer(src, ResourceState::CopySrc, false);
        self.use_buffer(dst, ResourceState::CopyDst, true);
        self.record(DeferredCommand::CopyBufferToBuffer {
            src: Arc::clone(src),
            dst: Arc::clone(dst),
            region,
        });
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        src: &Arc<Buffer<A>>,
        dst: &Arc<Texture<A>>,
        region: hal::BufferTextureCopy,
    ) {
        self.expect_state("copy_buffer_to_texture", RecorderState::Recording);
        self.check_subresource(dst, region.texture_mip_level, region.texture_array_layer);
        self.use_buffer(src, ResourceState::CopySrc, false);
        self.use_texture(
            dst,
            TextureSelector::single(region.texture_mip_level, region.texture_array_layer),
            ResourceState::CopyDst,
            true,
        );
        self.record(DeferredCommand::CopyBufferToTexture {
            src: Arc::clone(src),
            dst: Arc::clone(dst),
            region,
        });
    }

    pub fn copy_texture_to_buffer(
        &mut self,
        src: &Arc<Texture<A>>,
        dst: &Arc<Buffer<A>>,
        region: hal::BufferTextureCopy,
    ) {
        self.expect_state("copy_texture_to_buffer", RecorderState::Recording);
        self.check_subresource(src, region.texture_mip_level, region.texture_array_layer);
        self.use_texture(
            src,
            TextureSelector::single(region.texture_mip_level, region.texture_array_layer),
            ResourceState::CopySrc,
            false,
        );
        self.use_buffer(dst, ResourceState::CopyDst, true);
        self.record(DeferredCommand::CopyTextureToBuffer {
            src: Arc::clone(src),
            dst: Arc::clone(dst),
            region,
        });
    }

    pub fn copy_texture_to_texture(
        &mut self,
        src: &Arc<Texture<A>>,
        dst: &Arc<Texture<A>>,
        region: hal::TextureCopy,
    ) {
        self.expect_state("copy_texture_to_texture", RecorderState::Recording);
        self.check_subresource(src, region.src_mip_level, region.src_array_layer);
        self.check_subresource(dst, region.dst_mip_level, region.dst_array_layer);
        self.use_texture(
            src,
            TextureSelector::single(region.src_mip_level, region.src_array_layer),
            ResourceState::CopySrc,
            false,
        );
        self.use_texture(
            dst,
            TextureSelector::single(region.dst_mip_level, region.dst_array_layer),
            ResourceState::CopyDst,
            true,
        );
        self.record(DeferredCommand::CopyTextureToTexture {
            src: Arc::clone(src),
            dst: Arc::clone(dst),
            region,
        });
    }

    // debug markers

    pub fn insert_debug_marker(&mut self, label: &str) {
        self.expect_open("insert_debug_marker");
        if self.device.flags.contains(DeviceFlags::DEBUG_MARKERS) {
            self.record(DeferredCommand::InsertDebugMarker(label.to_string()));
        }
    }

    pub fn begin_debug_marker(&mut self, label: &str) {
        self.expect_open("begin_debug_marker");
        self.marker_depth += 1;
        if self.device.flags.contains(DeviceFlags::DEBUG_MARKERS) {
            self.record(DeferredCommand::BeginDebugMarker(label.to_string()));
        }
    }

    pub fn end_debug_marker(&mut self) {
        self.expect_open("end_debug_marker");
        if self.marker_depth == 0 {
            misuse(&self.label, StateError::UnbalancedDebugMarker);
        }
        self.marker_depth -= 1;
        if self.device.flags.contains(DeviceFlags::DEBUG_MARKERS) {
            self.record(DeferredCommand::EndDebugMarker);
        }
    }

    // render scopes

    /// Opens a render scope drawing into `targets`.
    ///
    /// Everything logged before is encoded first. Barriers the scope needs,
    /// including the ones for the targets, are issued right before the pass.
    pub fn begin_render_scope(&mut self, targets: &RenderTargets<A>) {
        profiling::scope!("CommandRecorder::begin_render_scope");
        if targets.color_targets.len() > MAX_COLOR_ATTACHMENTS {
            misuse(
                &self.label,
                StateError::TooManyColorTargets {
                    count: targets.color_targets.len(),
                    max: MAX_COLOR_ATTACHMENTS,
                },
            );
        }
        self.enter_scope("begin_render_scope", RecorderState::InsideRenderScope);

        let mut color_targets = ArrayVec::new();
        for target in targets.color_targets {
            self.check_subresource(&target.texture, target.mip_level, target.array_layer);
            self.use_texture(
                &target.texture,
                TextureSelector::single(target.mip_level, target.array_layer),
                ResourceState::ColorTarget,
                true,
            );
            color_targets.push(LoggedTarget {
                texture: Arc::clone(&target.texture),
                mip_level: target.mip_level,
                array_layer: target.array_layer,
                load_op: target.load_op,
                store: target.store,
            });
        }

        let mut depth_stencil_target = None;
        if let Some(ref target) = targets.depth_stencil_target {
            self.check_subresource(&target.texture, target.mip_level, target.array_layer);
            self.use_texture(
                &target.texture,
                TextureSelector::single(target.mip_level, target.array_layer),
                ResourceState::DepthStencilWrite,
                true,
            );
            depth_stencil_target = Some(LoggedDepthStencil {
                texture: Arc::clone(&target.texture),
                mip_level: target.mip_level,
                array_layer: target.array_layer,
                depth_load_op: target.depth_load_op,
                stencil_load_op: target.stencil_load_op,
                store: target.store,
            });
        }

        self.log.append(DeferredCommand::BeginRenderPass {
            label: targets.label.map(str::to_string),
            extent: targets.extent,
            color_targets,
            depth_stencil_target,
        });
    }

    pub fn end_render_scope(&mut self) {
        self.expect_state("end_render_scope", RecorderState::InsideRenderScope);
        self.exit_scope(DeferredCommand::EndRenderPass);
    }

    pub fn set_render_pipeline(&mut self, pipeline: &Arc<RenderPipeline<A>>) {
        self.expect_state("set_render_pipeline", RecorderState::InsideRenderScope);
        self.used.add_render_pipeline(pipeline);
        self.push_constant_limit = pipeline.push_constant_size as usize;
        self.record(DeferredCommand::SetRenderPipeline(Arc::clone(pipeline)));
    }

    pub fn set_vertex_buffer(
        &mut self,
        index: u32,
        buffer: &Arc<Buffer<A>>,
        offset: hal::BufferAddress,
    ) {
        self.expect_state("set_vertex_buffer", RecorderState::InsideRenderScope);
        self.use_buffer(buffer, ResourceState::VertexBuffer, false);
        self.record(DeferredCommand::SetVertexBuffer {
            index,
            buffer: Arc::clone(buffer),
            offset,
        });
    }

    pub fn set_index_buffer(
        &mut self,
        buffer: &Arc<Buffer<A>>,
        offset: hal::BufferAddress,
        format: hal::IndexFormat,
    ) {
        self.expect_state("set_index_buffer", RecorderState::InsideRenderScope);
        self.use_buffer(buffer, ResourceState::IndexBuffer, false);
        self.record(DeferredCommand::SetIndexBuffer {
            buffer: Arc::clone(buffer),
            offset,
            format,
        });
    }

    pub fn set_viewport(&mut self, rect: &hal::Rect<f32>, depth_range: Range<f32>) {
        self.expect_state("set_viewport", RecorderState::InsideRenderScope);
        self.record(DeferredCommand::SetViewport {
            rect: *rect,
            depth_range,
        });
    }

    pub fn set_scissor(&mut self, rect: &hal::Rect<u32>) {
        self.expect_state("set_scissor", RecorderState::InsideRenderScope);
        self.record(DeferredCommand::SetScissorRect(*rect));
    }

    #[track_caller]
    fn check_range(&self, what: &'static str, range: &Range<u32>) {
        if range.start > range.end {
            misuse(
                &self.label,
                StateError::ReversedRange {
                    what,
                    start: range.start,
                    end: range.end,
                },
            );
        }
    }

    pub fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.expect_state("draw", RecorderState::InsideRenderScope);
        self.check_range("vertex", &vertices);
        self.check_range("instance", &instances);
        self.record(DeferredCommand::Draw {
            vertices,
            instances,
        });
    }

    pub fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.expect_state("draw_indexed", RecorderState::InsideRenderScope);
        self.check_range("index", &indices);
        self.check_range("instance", &instances);
        self.record(DeferredCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn draw_indirect_impl(
        &mut self,
        operation: &'static str,
        buffer: &Arc<Buffer<A>>,
        offset: hal::BufferAddress,
        draw_count: u32,
        indexed: bool,
    ) {
        self.expect_state(operation, RecorderState::InsideRenderScope);
        self.use_buffer(buffer, ResourceState::IndirectArgument, false);
        self.record(DeferredCommand::DrawIndirect {
            buffer: Arc::clone(buffer),
            offset,
            draw_count,
            indexed,
        });
    }

    pub fn draw_indirect(
        &mut self,
        buffer: &Arc<Buffer<A>>,
        offset: hal::BufferAddress,
        draw_count: u32,
    ) {
        self.draw_indirect_impl("draw_indirect", buffer, offset, draw_count, false);
    }

    pub fn draw_indexed_indirect(
        &mut self,
        buffer: &Arc<Buffer<A>>,
        offset: hal::BufferAddress,
        draw_count: u32,
    ) {
        self.draw_indirect_impl("draw_indexed_indirect", buffer, offset, draw_count, true);
    }

    // compute scopes

    /// Opens a compute scope running `pipeline`.
    pub fn begin_compute_scope(&mut self, pipeline: &Arc<ComputePipeline<A>>) {
        profiling::scope!("CommandRecorder::begin_compute_scope");
        self.enter_scope("begin_compute_scope", RecorderState::InsideComputeScope);
        self.used.add_compute_pipeline(pipeline);
        self.push_constant_limit = pipeline.push_constant_size as usize;
        self.log.append(DeferredCommand::BeginComputePass {
            label: Some(pipeline.label().to_string()),
        });
        self.log
            .append(DeferredCommand::SetComputePipeline(Arc::clone(pipeline)));
    }

    pub fn end_compute_scope(&mut self) {
        self.expect_state("end_compute_scope", RecorderState::InsideComputeScope);
        self.exit_scope(DeferredCommand::EndComputePass);
    }

    pub fn dispatch(&mut self, count: [u32; 3]) {
        self.expect_state("dispatch", RecorderState::InsideComputeScope);
        self.record(DeferredCommand::Dispatch(count));
    }

    pub fn dispatch_indirect(&mut self, buffer: &Arc<Buffer<A>>, offset: hal::BufferAddress) {
        self.expect_state("dispatch_indirect", RecorderState::InsideComputeScope);
        self.use_buffer(buffer, ResourceState::IndirectArgument, false);
        self.record(DeferredCommand::DispatchIndirect {
            buffer: Arc::clone(buffer),
            offset,
        });
    }

    // bindings, in either scope

    fn bind_resource(
        &mut self,
        operation: &'static str,
        slot: u32,
        resource: BindingResource<A>,
        writable: bool,
    ) {
        self.expect_any_scope(operation);
        let state = if writable {
            ResourceState::ShaderReadWrite
        } else {
            ResourceState::ShaderRead
        };
        match resource {
            BindingResource::Buffer { buffer, offset } => {
                self.use_buffer(buffer, state, writable);
                self.record(DeferredCommand::BindBuffer {
                    slot,
                    buffer: Arc::clone(buffer),
                    offset,
                    writable,
                });
            }
            BindingResource::Texture { texture, selector } => {
                let selector = selector.unwrap_or_default();
                self.check_selector(texture, &selector);
                // Views are contiguous, so gaps in the selection are used as well.
                let mips = selector.mips.span(texture.mip_level_count());
                let layers = selector.layers.span(texture.array_layer_count());
                let view = TextureSelector {
                    mips: MipMask::from_range(mips.clone()),
                    layers: LayerMask::from_range(layers.clone()),
                };
                self.use_texture(texture, view, state, writable);
                self.record(DeferredCommand::BindTexture {
                    slot,
                    texture: Arc::clone(texture),
                    range: hal::SubresourceRange {
                        base_mip_level: mips.start,
                        mip_level_count: mips.end - mips.start,
                        base_array_layer: layers.start,
                        array_layer_count: layers.end - layers.start,
                    },
                    writable,
                });
            }
        }
    }

    /// Binds `resource` at `slot` for shader reads.
    pub fn bind_resource_for_read(&mut self, slot: u32, resource: BindingResource<A>) {
        self.bind_resource("bind_resource_for_read", slot, resource, false);
    }

    /// Binds `resource` at `slot` for shader reads and writes.
    pub fn bind_resource_for_write(&mut self, slot: u32, resource: BindingResource<A>) {
        self.bind_resource("bind_resource_for_write", slot, resource, true);
    }

    pub fn bind_bindless_table(&mut self, slot: u32, table: hal::BindlessTable) {
        self.expect_any_scope("bind_bindless_table");
        self.record(DeferredCommand::SetBindlessTable { slot, table });
    }

    /// Sets push constant bytes `offset..offset + data.len()`.
    ///
    /// The range must fit in the bound pipeline's push constant block.
    pub fn set_push_constants(&mut self, offset: u32, data: &[u8]) {
        self.expect_any_scope("set_push_constants");
        let end = offset as usize + data.len();
        if end > self.push_constant_limit {
            misuse(
                &self.label,
                StateError::PushConstantsOutOfRange {
                    offset,
                    end,
                    max: self.push_constant_limit,
                },
            );
        }
        self.record(DeferredCommand::SetPushConstants {
            offset,
            data: SmallVec::from_slice(data),
        });
    }
}

impl<A: hal::Api> Drop for CommandRecorder<A> {
    fn drop(&mut self) {
        if self.state == RecorderState::Submitted {
            match unsafe { self.device.raw.get_fence_value(&self.fence) } {
                Ok(value) if value >= self.fence_value => {}
                _ => {
                    log::warn!(
                        "Recorder {:?} dropped while submission {:?} is executing",
                        self.label,
                        self.submission_index
                    );
                    if let Err(err) =
                        unsafe { self.device.raw.wait(&self.fence, self.fence_value, None) }
                    {
                        log::error!("Unable to wait for recorder {:?}: {}", self.label, err);
                    }
                }
            }
        }
        unsafe {
            match self.state {
                RecorderState::Recording
                | RecorderState::InsideRenderScope
                | RecorderState::InsideComputeScope => self.encoder.discard_encoding(),
                _ => {}
            }
            if let Some(command_buffer) = self.command_buffer.take() {
                self.encoder.reset_all(iter::once(command_buffer));
            }
            self.device
                .raw
                .destroy_command_encoder(ManuallyDrop::take(&mut self.encoder));
            self.device
                .raw
                .destroy_fence(ManuallyDrop::take(&mut self.fence));
        }
    }
}

impl<A: hal::Api> std::fmt::Debug for CommandRecorder<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CommandRecorder")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("fence_value", &self.fence_value)
            .field("tracked", &self.tracker.len())
            .finish()
    }
}
