//! D3D12 resource state vocabulary.
//!
//! The values mirror `D3D12_RESOURCE_STATES` so a backend can pass them
//! straight through with a cast.

use std::ops::Range;

use bitflags::bitflags;

use crate::{ResourceState, SubresourceRange};

bitflags! {
    pub struct ResourceStates: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_WRITE = 0x10;
        const DEPTH_READ = 0x20;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        //Note: `PRESENT` is the same as `COMMON`
        const PRESENT = 0;
        const ALL_SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits | Self::PIXEL_SHADER_RESOURCE.bits;
    }
}

pub const ALL_SUBRESOURCES: u32 = 0xffff_ffff;

/// Native barrier the backend has to record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceBarrier {
    Transition {
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    },
    /// Orders unordered access against the next access.
    Uav,
}

pub fn map_resource_state(state: ResourceState) -> ResourceStates {
    use ResourceState as Rs;
    match state {
        Rs::Undefined | Rs::Common => ResourceStates::COMMON,
        Rs::CopySrc => ResourceStates::COPY_SOURCE,
        Rs::CopyDst => ResourceStates::COPY_DEST,
        Rs::VertexBuffer => ResourceStates::VERTEX_AND_CONSTANT_BUFFER,
        Rs::IndexBuffer => ResourceStates::INDEX_BUFFER,
        Rs::IndirectArgument => ResourceStates::INDIRECT_ARGUMENT,
        Rs::ShaderRead => ResourceStates::ALL_SHADER_RESOURCE,
        Rs::ShaderReadWrite => ResourceStates::UNORDERED_ACCESS,
        Rs::ColorTarget => ResourceStates::RENDER_TARGET,
        Rs::DepthStencilRead => ResourceStates::DEPTH_READ,
        Rs::DepthStencilWrite => ResourceStates::DEPTH_WRITE,
        Rs::Present => ResourceStates::PRESENT,
    }
}

/// Equivalent of `D3D12CalcSubresource` for single-plane formats.
pub fn calc_subresource(mip_level: u32, array_layer: u32, mip_level_count: u32) -> u32 {
    mip_level + array_layer * mip_level_count
}

/// Translates one buffer barrier. Returns `None` if nothing has to be recorded.
pub fn map_buffer_barrier(usage: &Range<ResourceState>) -> Option<ResourceBarrier> {
    let s0 = map_resource_state(usage.start);
    let s1 = map_resource_state(usage.end);
    if s0 != s1 {
        Some(ResourceBarrier::Transition {
            subresource: ALL_SUBRESOURCES,
            before: s0,
            after: s1,
        })
    } else if usage.start == usage.end {
        Some(ResourceBarrier::Uav)
    } else {
        None
    }
}

/// Translates one texture barrier into native barriers, appending to `out`.
///
/// A barrier covering the whole texture becomes a single transition,
/// anything smaller is split per (mip, layer).
pub fn map_texture_barrier(
    range: &SubresourceRange,
    usage: &Range<ResourceState>,
    mip_level_count: u32,
    array_layer_count: u32,
    out: &mut Vec<ResourceBarrier>,
) {
    let s0 = map_resource_state(usage.start);
    let s1 = map_resource_state(usage.end);
    if s0 != s1 {
        if super::covers_whole_texture(range, mip_level_count, array_layer_count) {
            out.push(ResourceBarrier::Transition {
                subresource: ALL_SUBRESOURCES,
                before: s0,
                after: s1,
            });
        } else {
            super::for_each_subresource(range, |mip, layer| {
                out.push(ResourceBarrier::Transition {
                    subresource: calc_subresource(mip, layer, mip_level_count),
                    before: s0,
                    after: s1,
                });
            });
        }
    } else if usage.start == usage.end {
        out.push(ResourceBarrier::Uav);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_is_common() {
        // Leaving the swapchain through `Common` records nothing.
        let usage = ResourceState::Present..ResourceState::Common;
        assert_eq!(map_buffer_barrier(&usage), None);
    }

    #[test]
    fn hazard_becomes_uav() {
        let usage = ResourceState::ShaderReadWrite..ResourceState::ShaderReadWrite;
        assert_eq!(map_buffer_barrier(&usage), Some(ResourceBarrier::Uav));
    }

    #[test]
    fn partial_texture_is_split() {
        let mut out = Vec::new();
        let range = SubresourceRange {
            base_mip_level: 1,
            mip_level_count: 2,
            base_array_layer: 1,
            array_layer_count: 1,
        };
        map_texture_barrier(
            &range,
            &(ResourceState::CopyDst..ResourceState::ShaderRead),
            4,
            2,
            &mut out,
        );
        let subresources = out
            .iter()
            .map(|barrier| match *barrier {
                ResourceBarrier::Transition { subresource, .. } => subresource,
                ResourceBarrier::Uav => unreachable!(),
            })
            .collect::<Vec<_>>();
        assert_eq!(subresources, [5, 6]);
    }

    #[test]
    fn whole_texture_is_one_barrier() {
        let mut out = Vec::new();
        let range = SubresourceRange {
            base_mip_level: 0,
            mip_level_count: 4,
            base_array_layer: 0,
            array_layer_count: 1,
        };
        map_texture_barrier(
            &range,
            &(ResourceState::ColorTarget..ResourceState::Present),
            4,
            1,
            &mut out,
        );
        assert_eq!(
            out,
            [ResourceBarrier::Transition {
                subresource: ALL_SUBRESOURCES,
                before: ResourceStates::RENDER_TARGET,
                after: ResourceStates::PRESENT,
            }]
        );
    }
}
