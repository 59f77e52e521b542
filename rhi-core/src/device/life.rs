use std::sync::Arc;

use crate::{
    resource::{Buffer, ComputePipeline, RenderPipeline, Texture},
    SubmissionIndex,
};

/// Strong references a submission holds on everything it uses.
#[derive(Debug)]
pub(crate) struct SubmittedResources<A: hal::Api> {
    pub buffers: Vec<Arc<Buffer<A>>>,
    pub textures: Vec<Arc<Texture<A>>>,
    pub render_pipelines: Vec<Arc<RenderPipeline<A>>>,
    pub compute_pipelines: Vec<Arc<ComputePipeline<A>>>,
}

impl<A: hal::Api> SubmittedResources<A> {
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
            && self.textures.is_empty()
            && self.render_pipelines.is_empty()
            && self.compute_pipelines.is_empty()
    }

    fn len(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.render_pipelines.len()
            + self.compute_pipelines.len()
    }
}

/// A command buffer submitted to the GPU for execution.
#[derive(Debug)]
struct ActiveSubmission<A: hal::Api> {
    /// The index of the submission we track.
    ///
    /// When `Device::fence`'s value is greater than or equal to this, our queue
    /// submission has completed.
    index: SubmissionIndex,
    resources: SubmittedResources<A>,
}

/// Keeps resources alive until the GPU is done with them.
///
/// Dropping the last user handle of a resource that is still referenced by
/// an executing submission does not destroy it: the reference held here is
/// released once the device fence passes the submission index.
#[derive(Debug)]
pub(crate) struct LifetimeTracker<A: hal::Api> {
    /// Resources used by queue submissions still in flight, sorted by index.
    active: Vec<ActiveSubmission<A>>,
}

impl<A: hal::Api> LifetimeTracker<A> {
    pub fn new() -> Self {
        Self { active: Vec::new() }
    }

    pub fn track_submission(&mut self, index: SubmissionIndex, resources: SubmittedResources<A>) {
        strict_assert!(self.active.last().map_or(true, |a| a.index < index));
        self.active.push(ActiveSubmission { index, resources });
    }

    pub fn queue_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Detaches every submission up to and including `last_done`.
    ///
    /// The returned resources must be dropped without holding the lock on
    /// this tracker, since dropping them returns descriptor slots to the device.
    pub fn triage_submissions(
        &mut self,
        last_done: SubmissionIndex,
    ) -> Vec<SubmittedResources<A>> {
        profiling::scope!("triage_submissions");
        let done_count = self
            .active
            .iter()
            .position(|a| a.index > last_done)
            .unwrap_or(self.active.len());

        self.active
            .drain(..done_count)
            .map(|a| {
                log::trace!(
                    "Active submission {} is done, releasing {} resources",
                    a.index,
                    a.resources.len()
                );
                a.resources
            })
            .collect()
    }
}
