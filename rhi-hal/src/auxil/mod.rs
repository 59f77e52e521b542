//! Pure translation tables from the abstract [`ResourceState`](crate::ResourceState)
//! vocabulary into native backend terms.
//!
//! Nothing in here touches a native API object, so the tables can be shared
//! between backends and tested on any platform.

pub mod dx12;
#[cfg(feature = "vulkan")]
pub mod vulkan;

/// Calls `f` for every (mip, layer) pair of `range`, mips outer.
pub fn for_each_subresource(range: &crate::SubresourceRange, mut f: impl FnMut(u32, u32)) {
    for mip in range.mips() {
        for layer in range.layers() {
            f(mip, layer);
        }
    }
}

/// Returns true if `range` covers every subresource of a texture with the given counts.
pub fn covers_whole_texture(
    range: &crate::SubresourceRange,
    mip_level_count: u32,
    array_layer_count: u32,
) -> bool {
    range.base_mip_level == 0
        && range.mip_level_count == mip_level_count
        && range.base_array_layer == 0
        && range.array_layer_count == array_layer_count
}
