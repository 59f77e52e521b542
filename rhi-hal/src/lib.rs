/*! This library describes the internal unsafe command recording API.
 *  It is the layer every native backend plugs into, with the following
 *  properties:
 *  - Fully unsafe: zero overhead, zero validation.
 *  - Compile-time backend selection via traits.
 *  - Objects are passed by references and returned by value. No IDs.
 *  - Resource transitions are explicit and expressed in one abstract
 *    [`ResourceState`] vocabulary. Backends translate it with the pure
 *    mapping tables in [`auxil`].
 *  - Binding is bindless: resources are addressed by descriptor slot.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Matches are good and extendable, no need to make an exception here.
    clippy::single_match,
    // Push commands are more regular than macros.
    clippy::vec_init_then_push,
    // Safety contracts are documented on the traits, not per method.
    clippy::missing_safety_doc,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unsafe_op_in_unsafe_fn,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod auxil;
pub mod empty;

use std::{fmt, ops::Range};

use bitflags::bitflags;
use thiserror::Error;

pub type Label<'a> = Option<&'a str>;
pub type BufferAddress = u64;
pub type FenceValue = u64;
/// Index of a slot in one of the device's bindless descriptor tables.
pub type DescriptorIndex = u32;

/// Size limit of the push constant block, in bytes.
pub const MAX_PUSH_CONSTANT_SIZE: usize = 128;
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device is lost")]
    Lost,
    #[error("the backend rejected the call: {0}")]
    Other(&'static str),
}

pub trait Api: Clone + fmt::Debug + Sized + 'static {
    type Device: Device<Self>;
    type Queue: Queue<Self>;
    type CommandEncoder: CommandEncoder<Self>;
    type CommandBuffer: fmt::Debug + Send + Sync;

    type Buffer: fmt::Debug + Send + Sync + 'static;
    type Texture: fmt::Debug + Send + Sync + 'static;
    type Sampler: fmt::Debug + Send + Sync;
    type Fence: fmt::Debug + Send + Sync;

    type RenderPipeline: fmt::Debug + Send + Sync;
    type ComputePipeline: fmt::Debug + Send + Sync;
}

pub trait Device<A: Api>: Send + Sync {
    /// Creates a new buffer.
    ///
    /// The initial state is [`ResourceState::Common`].
    unsafe fn create_buffer(&self, desc: &BufferDescriptor) -> Result<A::Buffer, DeviceError>;
    unsafe fn destroy_buffer(&self, buffer: A::Buffer);

    /// Creates a new texture.
    ///
    /// All subresources start in `desc.usage.default_state()`.
    unsafe fn create_texture(&self, desc: &TextureDescriptor) -> Result<A::Texture, DeviceError>;
    unsafe fn destroy_texture(&self, texture: A::Texture);

    unsafe fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<A::Sampler, DeviceError>;
    unsafe fn destroy_sampler(&self, sampler: A::Sampler);

    unsafe fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor,
    ) -> Result<A::RenderPipeline, DeviceError>;
    unsafe fn destroy_render_pipeline(&self, pipeline: A::RenderPipeline);
    unsafe fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor,
    ) -> Result<A::ComputePipeline, DeviceError>;
    unsafe fn destroy_compute_pipeline(&self, pipeline: A::ComputePipeline);

    unsafe fn create_command_encoder(
        &self,
        desc: &CommandEncoderDescriptor,
    ) -> Result<A::CommandEncoder, DeviceError>;
    unsafe fn destroy_command_encoder(&self, encoder: A::CommandEncoder);

    /// Creates a timeline fence with value 0.
    unsafe fn create_fence(&self) -> Result<A::Fence, DeviceError>;
    unsafe fn destroy_fence(&self, fence: A::Fence);
    unsafe fn get_fence_value(&self, fence: &A::Fence) -> Result<FenceValue, DeviceError>;
    /// Waits until `fence` reaches `value`.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first. A `timeout_ms` of
    /// `None` waits forever.
    unsafe fn wait(
        &self,
        fence: &A::Fence,
        value: FenceValue,
        timeout_ms: Option<u32>,
    ) -> Result<bool, DeviceError>;

    /// Writes a view of `buffer` into the resource table at `index`.
    unsafe fn write_buffer_descriptor(
        &self,
        index: DescriptorIndex,
        buffer: &A::Buffer,
        writable: bool,
    );
    /// Writes a view of all subresources of `texture` into the resource table at `index`.
    unsafe fn write_texture_descriptor(
        &self,
        index: DescriptorIndex,
        texture: &A::Texture,
        writable: bool,
    );
    unsafe fn write_sampler_descriptor(&self, index: DescriptorIndex, sampler: &A::Sampler);
}

pub trait Queue<A: Api>: Send + Sync {
    /// Submits the command buffers for execution on the GPU.
    ///
    /// After all of them complete, every fence in `signal_fences` is set
    /// to its paired value.
    unsafe fn submit(
        &mut self,
        command_buffers: &[&A::CommandBuffer],
        signal_fences: &[(&A::Fence, FenceValue)],
    ) -> Result<(), DeviceError>;
}

/// Encoder for commands in command buffers.
///
/// Every method that is not part of the encoding lifecycle must be called
/// between [`begin_encoding`] and [`end_encoding`]. Pass-only methods must be
/// called between the matching `begin_*_pass` and `end_*_pass`.
///
/// [`begin_encoding`]: CommandEncoder::begin_encoding
/// [`end_encoding`]: CommandEncoder::end_encoding
pub trait CommandEncoder<A: Api>: fmt::Debug + Send + Sync {
    /// Begin encoding a new command buffer.
    unsafe fn begin_encoding(&mut self, label: Label) -> Result<(), DeviceError>;
    /// Discard currently recorded list, if any.
    unsafe fn discard_encoding(&mut self);
    unsafe fn end_encoding(&mut self) -> Result<A::CommandBuffer, DeviceError>;
    /// Reclaims all resources that are allocated for this encoder.
    ///
    /// The command buffers must not be in flight.
    unsafe fn reset_all<I>(&mut self, command_buffers: I)
    where
        I: Iterator<Item = A::CommandBuffer>;

    /// Issues one batch of barriers.
    ///
    /// A barrier whose `usage.start` equals `usage.end` orders a write
    /// against the following access without changing the state.
    unsafe fn transition_resources<'a, B, T>(&mut self, buffers: B, textures: T)
    where
        B: Iterator<Item = BufferBarrier<'a, A>>,
        T: Iterator<Item = TextureBarrier<'a, A>>;

    // copy operations

    unsafe fn copy_buffer_to_buffer(
        &mut self,
        src: &A::Buffer,
        dst: &A::Buffer,
        region: BufferCopy,
    );

    /// Note: `dst` current state has to be [`ResourceState::CopyDst`].
    unsafe fn copy_buffer_to_texture(
        &mut self,
        src: &A::Buffer,
        dst: &A::Texture,
        region: BufferTextureCopy,
    );

    /// Note: `src` current state has to be [`ResourceState::CopySrc`].
    unsafe fn copy_texture_to_buffer(
        &mut self,
        src: &A::Texture,
        dst: &A::Buffer,
        region: BufferTextureCopy,
    );

    unsafe fn copy_texture_to_texture(
        &mut self,
        src: &A::Texture,
        dst: &A::Texture,
        region: TextureCopy,
    );

    // binding, valid inside of both pass kinds

    unsafe fn bind_buffer(&mut self, slot: u32, binding: BufferBinding<'_, A>, writable: bool);
    unsafe fn bind_texture(
        &mut self,
        slot: u32,
        texture: &A::Texture,
        range: SubresourceRange,
        writable: bool,
    );
    unsafe fn set_bindless_table(&mut self, slot: u32, table: BindlessTable);
    unsafe fn set_push_constants(&mut self, offset_bytes: u32, data: &[u8]);

    unsafe fn insert_debug_marker(&mut self, label: &str);
    unsafe fn begin_debug_marker(&mut self, group_label: &str);
    unsafe fn end_debug_marker(&mut self);

    // render passes

    /// Begins a render pass. All attachments must already be in the
    /// matching target state.
    unsafe fn begin_render_pass(&mut self, desc: &RenderPassDescriptor<'_, A>);
    unsafe fn end_render_pass(&mut self);

    unsafe fn set_render_pipeline(&mut self, pipeline: &A::RenderPipeline);
    unsafe fn set_index_buffer(&mut self, binding: BufferBinding<'_, A>, format: IndexFormat);
    unsafe fn set_vertex_buffer(&mut self, index: u32, binding: BufferBinding<'_, A>);
    unsafe fn set_viewport(&mut self, rect: &Rect<f32>, depth_range: Range<f32>);
    unsafe fn set_scissor_rect(&mut self, rect: &Rect<u32>);

    unsafe fn draw(
        &mut self,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    );
    unsafe fn draw_indexed(
        &mut self,
        first_index: u32,
        index_count: u32,
        base_vertex: i32,
        first_instance: u32,
        instance_count: u32,
    );
    unsafe fn draw_indirect(&mut self, buffer: &A::Buffer, offset: BufferAddress, draw_count: u32);
    unsafe fn draw_indexed_indirect(
        &mut self,
        buffer: &A::Buffer,
        offset: BufferAddress,
        draw_count: u32,
    );

    // compute passes

    unsafe fn begin_compute_pass(&mut self, desc: &ComputePassDescriptor);
    unsafe fn end_compute_pass(&mut self);

    unsafe fn set_compute_pipeline(&mut self, pipeline: &A::ComputePipeline);

    unsafe fn dispatch(&mut self, count: [u32; 3]);
    unsafe fn dispatch_indirect(&mut self, buffer: &A::Buffer, offset: BufferAddress);
}

/// Abstract usage state of a buffer or a texture subresource.
///
/// Every backend translates this into its own vocabulary: image layouts
/// plus access masks on Vulkan, resource state bits on D3D12.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResourceState {
    /// Contents are not defined. Only valid as a transition source.
    Undefined,
    /// Generic state usable by any queue operation, with no cache guarantees.
    Common,
    CopySrc,
    CopyDst,
    VertexBuffer,
    IndexBuffer,
    IndirectArgument,
    /// Read-only access from any shader stage.
    ShaderRead,
    /// Unordered read/write access from any shader stage.
    ShaderReadWrite,
    ColorTarget,
    DepthStencilRead,
    DepthStencilWrite,
    /// Owned by the presentation engine.
    Present,
}

impl ResourceState {
    /// Returns true if this state is valid for buffers.
    pub fn is_buffer_state(self) -> bool {
        match self {
            Self::ColorTarget
            | Self::DepthStencilRead
            | Self::DepthStencilWrite
            | Self::Present
            | Self::Undefined => false,
            _ => true,
        }
    }
}

bitflags! {
    /// Ways a buffer may be used over its lifetime.
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct BufferUses: u16 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const VERTEX = 1 << 2;
        const INDEX = 1 << 3;
        const UNIFORM = 1 << 4;
        const STORAGE_READ = 1 << 5;
        const STORAGE_READ_WRITE = 1 << 6;
        const INDIRECT = 1 << 7;
        /// The combination of uses that need a bindless descriptor.
        const SHADER_VISIBLE = Self::UNIFORM.bits | Self::STORAGE_READ.bits | Self::STORAGE_READ_WRITE.bits;
    }
}

bitflags! {
    /// Ways a texture may be used over its lifetime.
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct TextureUses: u16 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const RESOURCE = 1 << 2;
        const STORAGE_READ_WRITE = 1 << 3;
        const COLOR_TARGET = 1 << 4;
        const DEPTH_STENCIL = 1 << 5;
        /// The texture belongs to a swapchain and is handed back to the
        /// presentation engine at the end of every recording.
        const PRESENT = 1 << 6;
        /// The combination of uses that need a bindless descriptor.
        const SHADER_VISIBLE = Self::RESOURCE.bits | Self::STORAGE_READ_WRITE.bits;
    }
}

impl TextureUses {
    /// The state a texture with these uses rests in between recordings.
    ///
    /// Swapchain textures rest in [`ResourceState::Present`], attachments in
    /// their target state, sampled textures in [`ResourceState::ShaderRead`].
    pub fn default_state(self) -> ResourceState {
        if self.contains(Self::PRESENT) {
            ResourceState::Present
        } else if self.contains(Self::DEPTH_STENCIL) {
            ResourceState::DepthStencilWrite
        } else if self.contains(Self::COLOR_TARGET) {
            ResourceState::ColorTarget
        } else if self.contains(Self::RESOURCE) {
            ResourceState::ShaderRead
        } else {
            ResourceState::Common
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    R32Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth_stencil(self) -> bool {
        match self {
            Self::Depth32Float | Self::Depth24PlusStencil8 => true,
            _ => false,
        }
    }

    pub fn has_stencil(self) -> bool {
        self == Self::Depth24PlusStencil8
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Which of the device's descriptor tables to bind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BindlessTable {
    Resources,
    Samplers,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Origin3d {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rect<T> {
    pub x: T,
    pub y: T,
    pub w: T,
    pub h: T,
}

/// A contiguous block of mip levels and array layers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubresourceRange {
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

impl SubresourceRange {
    /// The range covering exactly one mip level of one array layer.
    pub fn single(mip_level: u32, array_layer: u32) -> Self {
        Self {
            base_mip_level: mip_level,
            mip_level_count: 1,
            base_array_layer: array_layer,
            array_layer_count: 1,
        }
    }

    pub fn mips(&self) -> Range<u32> {
        self.base_mip_level..self.base_mip_level + self.mip_level_count
    }

    pub fn layers(&self) -> Range<u32> {
        self.base_array_layer..self.base_array_layer + self.array_layer_count
    }
}

#[derive(Clone, Debug)]
pub struct BufferDescriptor<'a> {
    pub label: Label<'a>,
    pub size: BufferAddress,
    pub usage: BufferUses,
}

#[derive(Clone, Debug)]
pub struct TextureDescriptor<'a> {
    pub label: Label<'a>,
    pub size: Extent3d,
    pub mip_level_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUses,
}

impl TextureDescriptor<'_> {
    pub fn array_layer_count(&self) -> u32 {
        self.size.depth_or_array_layers.max(1)
    }
}

#[derive(Clone, Debug)]
pub struct SamplerDescriptor<'a> {
    pub label: Label<'a>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_modes: [AddressMode; 3],
    pub lod_clamp: Option<Range<f32>>,
}

/// Describes a render pipeline. Shader code and fixed function state are
/// opaque to this layer.
#[derive(Clone, Debug)]
pub struct RenderPipelineDescriptor<'a> {
    pub label: Label<'a>,
    pub color_formats: &'a [TextureFormat],
    pub depth_stencil_format: Option<TextureFormat>,
    /// Size of the push constant block, in bytes.
    pub push_constant_size: u32,
}

#[derive(Clone, Debug)]
pub struct ComputePipelineDescriptor<'a> {
    pub label: Label<'a>,
    pub push_constant_size: u32,
}

#[derive(Clone, Debug)]
pub struct CommandEncoderDescriptor<'a> {
    pub label: Label<'a>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoadOp<V> {
    Load,
    Clear(V),
    DontCare,
}

#[derive(Debug)]
pub struct ColorAttachment<'a, A: Api> {
    pub target: &'a A::Texture,
    pub mip_level: u32,
    pub array_layer: u32,
    pub load_op: LoadOp<[f32; 4]>,
    pub store: bool,
}

// Rust gets confused about the impl requirements for `A`
impl<A: Api> Clone for ColorAttachment<'_, A> {
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            mip_level: self.mip_level,
            array_layer: self.array_layer,
            load_op: self.load_op,
            store: self.store,
        }
    }
}

#[derive(Debug)]
pub struct DepthStencilAttachment<'a, A: Api> {
    pub target: &'a A::Texture,
    pub mip_level: u32,
    pub array_layer: u32,
    pub depth_load_op: LoadOp<f32>,
    pub stencil_load_op: LoadOp<u32>,
    pub store: bool,
}

impl<A: Api> Clone for DepthStencilAttachment<'_, A> {
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            mip_level: self.mip_level,
            array_layer: self.array_layer,
            depth_load_op: self.depth_load_op,
            stencil_load_op: self.stencil_load_op,
            store: self.store,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RenderPassDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub extent: Extent3d,
    pub color_attachments: &'a [ColorAttachment<'a, A>],
    pub depth_stencil_attachment: Option<DepthStencilAttachment<'a, A>>,
}

#[derive(Clone, Debug)]
pub struct ComputePassDescriptor<'a> {
    pub label: Label<'a>,
}

#[derive(Debug)]
pub struct BufferBinding<'a, A: Api> {
    pub buffer: &'a A::Buffer,
    pub offset: BufferAddress,
}

// Rust gets confused about the impl requirements for `A`
impl<A: Api> Clone for BufferBinding<'_, A> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer,
            offset: self.offset,
        }
    }
}

#[derive(Debug)]
pub struct BufferBarrier<'a, A: Api> {
    pub buffer: &'a A::Buffer,
    pub usage: Range<ResourceState>,
}

impl<A: Api> BufferBarrier<'_, A> {
    /// A barrier that keeps the state but orders a prior write.
    pub fn is_hazard(&self) -> bool {
        self.usage.start == self.usage.end
    }
}

#[derive(Debug)]
pub struct TextureBarrier<'a, A: Api> {
    pub texture: &'a A::Texture,
    pub range: SubresourceRange,
    pub usage: Range<ResourceState>,
}

impl<A: Api> TextureBarrier<'_, A> {
    pub fn is_hazard(&self) -> bool {
        self.usage.start == self.usage.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferCopy {
    pub src_offset: BufferAddress,
    pub dst_offset: BufferAddress,
    pub size: BufferAddress,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferTextureCopy {
    pub buffer_offset: BufferAddress,
    /// Bytes per row in the buffer. `None` means tightly packed.
    pub bytes_per_row: Option<u32>,
    pub texture_mip_level: u32,
    pub texture_array_layer: u32,
    pub texture_origin: Origin3d,
    pub size: Extent3d,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextureCopy {
    pub src_mip_level: u32,
    pub src_array_layer: u32,
    pub src_origin: Origin3d,
    pub dst_mip_level: u32,
    pub dst_array_layer: u32,
    pub dst_origin: Origin3d,
    pub size: Extent3d,
}

#[test]
fn test_buffer_states() {
    assert!(!ResourceState::ColorTarget.is_buffer_state());
    assert!(!ResourceState::Present.is_buffer_state());
    assert!(ResourceState::CopyDst.is_buffer_state());
    assert!(ResourceState::IndirectArgument.is_buffer_state());
}

#[test]
fn test_texture_default_state() {
    let swapchain = TextureUses::PRESENT | TextureUses::COLOR_TARGET;
    assert_eq!(swapchain.default_state(), ResourceState::Present);
    let sampled = TextureUses::RESOURCE | TextureUses::COPY_DST;
    assert_eq!(sampled.default_state(), ResourceState::ShaderRead);
    assert_eq!(TextureUses::COPY_SRC.default_state(), ResourceState::Common);
}
