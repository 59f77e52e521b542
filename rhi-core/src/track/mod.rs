/*! Resource State Tracking

A recorder owns one [`UsageTracker`]. Every resource-touching call
reports the state it needs together with whether it writes. The tracker
compares that against the last state recorded for the same subresource
and produces a [`PendingTransition`] when the GPU has to be told.

## Granularity

Textures are tracked per (mip, layer). A request naming several mips or
layers through [`MipMask`] and [`LayerMask`] is expanded into one entry per
selected pair, walking mips then layers, lowest bit first. Different
subresources of one texture can therefore sit in different states, e.g.
one mip being rendered to while the one above is sampled.

Buffers are tracked as a single unit. Any write followed by any other use
forces a barrier, even when the two uses touch disjoint byte ranges.

## Rules

For a request of state `S` with write flag `w` against the last entry
`{state, written}`:

- no entry: start from the resource's declared default state;
- `state != S`: transition `state..S`;
- `state == S`, `written && !w`: hazard barrier `S..S`, the write must be
  made visible before the read even though the state is unchanged;
- otherwise nothing. Write-after-write in one state is left unordered.

The entry then becomes `{S, w}`. Entries live until the recorder is reset.
*/

pub mod mask;

use std::ops::Range;

use fxhash::FxHashMap;
use hal::ResourceState;

use crate::resource::ResourceId;

pub use mask::{iter_set_bits, LayerMask, MipMask};

/// Identifies tracked memory: a whole buffer, or texture subresources.
///
/// The tracker only stores keys that select exactly one mip and one layer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubresourceKey {
    pub id: ResourceId,
    pub mips: MipMask,
    pub layers: LayerMask,
}

impl SubresourceKey {
    pub fn buffer(id: ResourceId) -> Self {
        Self::subresource(id, 0, 0)
    }

    pub fn subresource(id: ResourceId, mip_level: u32, array_layer: u32) -> Self {
        Self {
            id,
            mips: MipMask::single(mip_level),
            layers: LayerMask::single(array_layer),
        }
    }

    pub fn is_single(&self) -> bool {
        self.mips.is_single() && self.layers.is_single()
    }

    /// The range this key covers. Only valid for single keys.
    pub fn range(&self) -> hal::SubresourceRange {
        strict_assert!(self.is_single());
        hal::SubresourceRange::single(
            self.mips.first().unwrap_or_default(),
            self.layers.first().unwrap_or_default(),
        )
    }
}

/// Selects the part of a texture an operation touches.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextureSelector {
    pub mips: MipMask,
    pub layers: LayerMask,
}

impl TextureSelector {
    /// Every mip of every layer.
    pub const ALL: Self = Self {
        mips: MipMask::ALL,
        layers: LayerMask::ALL,
    };

    pub fn single(mip_level: u32, array_layer: u32) -> Self {
        Self {
            mips: MipMask::single(mip_level),
            layers: LayerMask::single(array_layer),
        }
    }
}

/// The last known use of one subresource in the current recording.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrackedState {
    pub state: ResourceState,
    pub written: bool,
}

/// A structure containing all the information about a particular resource
/// transition. The recorder turns it into a hal barrier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingTransition {
    pub key: SubresourceKey,
    pub usage: Range<ResourceState>,
}

impl PendingTransition {
    /// The state stays the same, only a previous write is ordered.
    pub fn is_hazard(&self) -> bool {
        self.usage.start == self.usage.end
    }
}

/// Per-recording map from subresource to its last known use.
#[derive(Debug, Default)]
pub struct UsageTracker {
    states: FxHashMap<SubresourceKey, TrackedState>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a use of one subresource, returning the barrier it needs.
    ///
    /// `default_state` is only consulted the first time `key` is seen.
    pub fn record_use(
        &mut self,
        key: SubresourceKey,
        default_state: ResourceState,
        requested: ResourceState,
        is_write: bool,
    ) -> Option<PendingTransition> {
        strict_assert!(key.is_single());

        let last = self.states.entry(key).or_insert(TrackedState {
            state: default_state,
            written: false,
        });

        let transition = if last.state != requested {
            Some(PendingTransition {
                key,
                usage: last.state..requested,
            })
        } else if last.written && !is_write {
            Some(PendingTransition {
                key,
                usage: requested..requested,
            })
        } else {
            None
        };

        *last = TrackedState {
            state: requested,
            written: is_write,
        };

        if let Some(ref transition) = transition {
            log::trace!("\tSynthesized {:?}", transition);
        }
        transition
    }

    /// Records a use of the whole buffer.
    pub fn record_buffer_use(
        &mut self,
        id: ResourceId,
        default_state: ResourceState,
        requested: ResourceState,
        is_write: bool,
    ) -> Option<PendingTransition> {
        self.record_use(SubresourceKey::buffer(id), default_state, requested, is_write)
    }

    /// Records a use of every subresource `selector` picks out of a texture
    /// with the given counts, appending the needed barriers to `out`.
    ///
    /// Returns the number of barriers appended.
    pub fn record_texture_use(
        &mut self,
        id: ResourceId,
        selector: TextureSelector,
        mip_level_count: u32,
        array_layer_count: u32,
        default_state: ResourceState,
        requested: ResourceState,
        is_write: bool,
        out: &mut Vec<PendingTransition>,
    ) -> usize {
        profiling::scope!("UsageTracker::record_texture_use");
        let start = out.len();
        for mip in selector.mips.iter(mip_level_count) {
            for layer in selector.layers.iter(array_layer_count) {
                let key = SubresourceKey::subresource(id, mip, layer);
                if let Some(transition) = self.record_use(key, default_state, requested, is_write)
                {
                    out.push(transition);
                }
            }
        }
        out.len() - start
    }

    pub fn state_of(&self, key: &SubresourceKey) -> Option<TrackedState> {
        self.states.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SubresourceKey, &TrackedState)> {
        self.states.iter()
    }

    /// Every subresource used so far in this recording.
    pub fn used_keys(&self) -> impl Iterator<Item = &SubresourceKey> {
        self.states.keys()
    }

    /// Number of tracked subresources.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ResourceState as Rs;

    fn texture_keys(id: ResourceId, transitions: &[PendingTransition]) -> Vec<(u32, u32)> {
        transitions
            .iter()
            .inspect(|t| assert_eq!(t.key.id, id))
            .map(|t| (t.key.mips.first().unwrap(), t.key.layers.first().unwrap()))
            .collect()
    }

    #[test]
    fn first_use_starts_from_default() {
        let mut tracker = UsageTracker::new();
        let id = ResourceId::next();
        let key = SubresourceKey::buffer(id);
        assert_eq!(tracker.record_use(key, Rs::Common, Rs::Common, false), None);
        let transition = tracker.record_use(key, Rs::Common, Rs::CopyDst, true).unwrap();
        assert_eq!(transition.usage, Rs::Common..Rs::CopyDst);
        assert!(!transition.is_hazard());
    }

    #[test]
    fn repeated_read_is_idempotent() {
        let mut tracker = UsageTracker::new();
        let key = SubresourceKey::buffer(ResourceId::next());
        assert!(tracker.record_use(key, Rs::Common, Rs::ShaderRead, false).is_some());
        assert_eq!(tracker.record_use(key, Rs::Common, Rs::ShaderRead, false), None);
        assert_eq!(tracker.record_use(key, Rs::Common, Rs::ShaderRead, false), None);
    }

    #[test]
    fn read_after_write_in_same_state() {
        let mut tracker = UsageTracker::new();
        let key = SubresourceKey::buffer(ResourceId::next());
        let rw = Rs::ShaderReadWrite;
        assert!(tracker.record_use(key, Rs::Common, rw, true).is_some());
        // write after write: accepted as unordered
        assert_eq!(tracker.record_use(key, Rs::Common, rw, true), None);
        let hazard = tracker.record_use(key, Rs::Common, rw, false).unwrap();
        assert!(hazard.is_hazard());
        assert_eq!(hazard.usage, rw..rw);
        // the hazard was consumed by the read
        assert_eq!(tracker.record_use(key, Rs::Common, rw, false), None);
    }

    #[test]
    fn keys_are_independent() {
        let mut tracker = UsageTracker::new();
        let id = ResourceId::next();
        let a = SubresourceKey::subresource(id, 0, 0);
        let b = SubresourceKey::subresource(id, 1, 0);
        assert!(tracker.record_use(a, Rs::Common, Rs::ColorTarget, true).is_some());
        assert!(tracker.record_use(b, Rs::Common, Rs::ShaderRead, false).is_some());
        assert_eq!(tracker.record_use(a, Rs::Common, Rs::ColorTarget, true), None);
        assert_eq!(tracker.record_use(b, Rs::Common, Rs::ShaderRead, false), None);
        assert_eq!(
            tracker.state_of(&a),
            Some(TrackedState {
                state: Rs::ColorTarget,
                written: true
            })
        );
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn texture_expansion_order() {
        let mut tracker = UsageTracker::new();
        let id = ResourceId::next();
        let mut out = Vec::new();
        let selector = TextureSelector {
            mips: MipMask::from_bits(0b101),
            layers: LayerMask::ALL,
        };
        let count = tracker.record_texture_use(
            id,
            selector,
            3,
            2,
            Rs::Common,
            Rs::CopyDst,
            true,
            &mut out,
        );
        assert_eq!(count, 4);
        assert_eq!(texture_keys(id, &out), [(0, 0), (0, 1), (2, 0), (2, 1)]);
    }

    #[test]
    fn whole_then_single_mip() {
        let mut tracker = UsageTracker::new();
        let id = ResourceId::next();
        let mut out = Vec::new();
        tracker.record_texture_use(
            id,
            TextureSelector::ALL,
            4,
            1,
            Rs::ShaderRead,
            Rs::CopyDst,
            true,
            &mut out,
        );
        assert_eq!(texture_keys(id, &out), [(0, 0), (1, 0), (2, 0), (3, 0)]);
        assert!(out.iter().all(|t| t.usage == (Rs::ShaderRead..Rs::CopyDst)));

        out.clear();
        tracker.record_texture_use(
            id,
            TextureSelector::single(0, 0),
            4,
            1,
            Rs::ShaderRead,
            Rs::ShaderRead,
            false,
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].usage, Rs::CopyDst..Rs::ShaderRead);
        for mip in 1..4 {
            let key = SubresourceKey::subresource(id, mip, 0);
            assert_eq!(tracker.state_of(&key).unwrap().state, Rs::CopyDst);
        }
    }

    #[test]
    fn clear_forgets_everything() {
        let mut tracker = UsageTracker::new();
        let key = SubresourceKey::buffer(ResourceId::next());
        tracker.record_use(key, Rs::Common, Rs::CopyDst, true);
        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.record_use(key, Rs::CopyDst, Rs::CopyDst, false), None);
    }
}
