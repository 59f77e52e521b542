use std::ops::Range;

use ash::vk;

use crate::{ResourceState, SubresourceRange, TextureFormat};

/// Synchronization scope of one side of a barrier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AccessScope {
    pub stages: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
    pub layout: vk::ImageLayout,
}

pub fn derive_image_layout(state: ResourceState) -> vk::ImageLayout {
    use ResourceState as Rs;
    match state {
        Rs::Undefined => vk::ImageLayout::UNDEFINED,
        Rs::CopySrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        Rs::CopyDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        Rs::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        Rs::ColorTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        Rs::DepthStencilRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        Rs::DepthStencilWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        Rs::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        Rs::Common
        | Rs::ShaderReadWrite
        | Rs::VertexBuffer
        | Rs::IndexBuffer
        | Rs::IndirectArgument => vk::ImageLayout::GENERAL,
    }
}

pub fn map_resource_state(state: ResourceState) -> AccessScope {
    use ResourceState as Rs;
    let shader_stages = vk::PipelineStageFlags::VERTEX_SHADER
        | vk::PipelineStageFlags::FRAGMENT_SHADER
        | vk::PipelineStageFlags::COMPUTE_SHADER;
    let fragment_tests = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;

    let (stages, access) = match state {
        Rs::Undefined => (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
        Rs::Common => (
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ),
        Rs::CopySrc => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        ),
        Rs::CopyDst => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        Rs::VertexBuffer => (
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ),
        Rs::IndexBuffer => (
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::AccessFlags::INDEX_READ,
        ),
        Rs::IndirectArgument => (
            vk::PipelineStageFlags::DRAW_INDIRECT,
            vk::AccessFlags::INDIRECT_COMMAND_READ,
        ),
        Rs::ShaderRead => (
            shader_stages,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::UNIFORM_READ,
        ),
        Rs::ShaderReadWrite => (
            shader_stages,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ),
        Rs::ColorTarget => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        Rs::DepthStencilRead => (
            fragment_tests,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        Rs::DepthStencilWrite => (
            fragment_tests,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        Rs::Present => (
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
    };

    AccessScope {
        stages,
        access,
        layout: derive_image_layout(state),
    }
}

/// Maps a barrier's usage range to its source and destination scopes.
///
/// An unchanged state orders a previous write: both sides cover every
/// stage and all memory access, keeping the layout.
pub fn map_barrier(usage: &Range<ResourceState>) -> (AccessScope, AccessScope) {
    if usage.start == usage.end {
        let scope = AccessScope {
            stages: vk::PipelineStageFlags::ALL_COMMANDS,
            access: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            layout: derive_image_layout(usage.start),
        };
        (scope, scope)
    } else {
        (
            map_resource_state(usage.start),
            map_resource_state(usage.end),
        )
    }
}

/// Merges the stage masks of one batch, so it can be issued as a single
/// `vkCmdPipelineBarrier`.
pub fn merge_stages<I>(scopes: I) -> (vk::PipelineStageFlags, vk::PipelineStageFlags)
where
    I: IntoIterator<Item = (AccessScope, AccessScope)>,
{
    scopes.into_iter().fold(
        (
            vk::PipelineStageFlags::empty(),
            vk::PipelineStageFlags::empty(),
        ),
        |(src, dst), (from, to)| (src | from.stages, dst | to.stages),
    )
}

pub fn map_aspects(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn map_subresource_range(
    range: &SubresourceRange,
    aspect_mask: vk::ImageAspectFlags,
) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: range.base_mip_level,
        level_count: range.mip_level_count,
        base_array_layer: range.base_array_layer,
        layer_count: range.array_layer_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_changes_layout() {
        let (src, dst) = map_barrier(&(ResourceState::CopyDst..ResourceState::ShaderRead));
        assert_eq!(src.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(dst.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(src.access, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn hazard_keeps_layout_with_full_access() {
        let state = ResourceState::ShaderReadWrite;
        let (src, dst) = map_barrier(&(state..state));
        assert_eq!(src, dst);
        assert_eq!(src.layout, vk::ImageLayout::GENERAL);
        assert_eq!(src.stages, vk::PipelineStageFlags::ALL_COMMANDS);
        assert!(src.access.contains(vk::AccessFlags::MEMORY_WRITE));
    }

    #[test]
    fn batch_stages_are_merged() {
        let batch = [
            map_barrier(&(ResourceState::CopyDst..ResourceState::ShaderRead)),
            map_barrier(&(ResourceState::ColorTarget..ResourceState::Present)),
        ];
        let (src, dst) = merge_stages(batch);
        assert!(src.contains(vk::PipelineStageFlags::TRANSFER));
        assert!(src.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert!(dst.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(dst.contains(vk::PipelineStageFlags::BOTTOM_OF_PIPE));
    }

    #[test]
    fn subresource_range() {
        let range = SubresourceRange::single(2, 3);
        let vk_range = map_subresource_range(&range, map_aspects(TextureFormat::Rgba8Unorm));
        assert_eq!(vk_range.base_mip_level, 2);
        assert_eq!(vk_range.level_count, 1);
        assert_eq!(vk_range.base_array_layer, 3);
        assert_eq!(vk_range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn depth_aspects() {
        assert_eq!(
            map_aspects(TextureFormat::Depth32Float),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            map_aspects(TextureFormat::Depth24PlusStencil8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }
}
