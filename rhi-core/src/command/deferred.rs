use std::{ops::Range, sync::Arc};

use arrayvec::ArrayVec;
use hal::ResourceState;
use smallvec::SmallVec;

use crate::{
    resource::{Buffer, ComputePipeline, RenderPipeline, Texture},
    MAX_COLOR_ATTACHMENTS, MAX_PUSH_CONSTANT_SIZE,
};

#[derive(Debug)]
pub(crate) struct BufferTransition<A: hal::Api> {
    pub buffer: Arc<Buffer<A>>,
    pub usage: Range<ResourceState>,
}

#[derive(Debug)]
pub(crate) struct TextureTransition<A: hal::Api> {
    pub texture: Arc<Texture<A>>,
    pub range: hal::SubresourceRange,
    pub usage: Range<ResourceState>,
}

/// Barriers waiting to be logged as one batch.
#[derive(Debug)]
pub(crate) struct BarrierBatch<A: hal::Api> {
    pub buffers: Vec<BufferTransition<A>>,
    pub textures: Vec<TextureTransition<A>>,
}

impl<A: hal::Api> BarrierBatch<A> {
    pub fn new() -> Self {
        Self {
            buffers: Vec::new(),
            textures: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.textures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffers.len() + self.textures.len()
    }

    /// Moves the batch into a transition command, leaving `self` empty.
    pub fn take_command(&mut self) -> Option<DeferredCommand<A>> {
        if self.is_empty() {
            return None;
        }
        Some(DeferredCommand::Transition {
            buffers: std::mem::take(&mut self.buffers),
            textures: std::mem::take(&mut self.textures),
        })
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
        self.textures.clear();
    }
}

#[derive(Debug)]
pub(crate) struct LoggedTarget<A: hal::Api, V> {
    pub texture: Arc<Texture<A>>,
    pub mip_level: u32,
    pub array_layer: u32,
    pub load_op: hal::LoadOp<V>,
    pub store: bool,
}

#[derive(Debug)]
pub(crate) struct LoggedDepthStencil<A: hal::Api> {
    pub texture: Arc<Texture<A>>,
    pub mip_level: u32,
    pub array_layer: u32,
    pub depth_load_op: hal::LoadOp<f32>,
    pub stencil_load_op: hal::LoadOp<u32>,
    pub store: bool,
}

/// Everything needed to issue one encoder call later.
///
/// Commands own strong references to what they touch, so resources
/// outlive the recording even if the caller drops its handles.
#[derive(Debug)]
pub(crate) enum DeferredCommand<A: hal::Api> {
    Transition {
        buffers: Vec<BufferTransition<A>>,
        textures: Vec<TextureTransition<A>>,
    },
    CopyBufferToBuffer {
        src: Arc<Buffer<A>>,
        dst: Arc<Buffer<A>>,
        region: hal::BufferCopy,
    },
    CopyBufferToTexture {
        src: Arc<Buffer<A>>,
        dst: Arc<Texture<A>>,
        region: hal::BufferTextureCopy,
    },
    CopyTextureToBuffer {
        src: Arc<Texture<A>>,
        dst: Arc<Buffer<A>>,
        region: hal::BufferTextureCopy,
    },
    CopyTextureToTexture {
        src: Arc<Texture<A>>,
        dst: Arc<Texture<A>>,
        region: hal::TextureCopy,
    },
    BindBuffer {
        slot: u32,
        buffer: Arc<Buffer<A>>,
        offset: hal::BufferAddress,
        writable: bool,
    },
    BindTexture {
        slot: u32,
        texture: Arc<Texture<A>>,
        range: hal::SubresourceRange,
        writable: bool,
    },
    SetBindlessTable {
        slot: u32,
        table: hal::BindlessTable,
    },
    SetPushConstants {
        offset: u32,
        data: SmallVec<[u8; MAX_PUSH_CONSTANT_SIZE]>,
    },
    InsertDebugMarker(String),
    BeginDebugMarker(String),
    EndDebugMarker,
    BeginRenderPass {
        label: Option<String>,
        extent: hal::Extent3d,
        color_targets: ArrayVec<LoggedTarget<A, [f32; 4]>, MAX_COLOR_ATTACHMENTS>,
        depth_stencil_target: Option<LoggedDepthStencil<A>>,
    },
    EndRenderPass,
    SetRenderPipeline(Arc<RenderPipeline<A>>),
    SetIndexBuffer {
        buffer: Arc<Buffer<A>>,
        offset: hal::BufferAddress,
        format: hal::IndexFormat,
    },
    SetVertexBuffer {
        index: u32,
        buffer: Arc<Buffer<A>>,
        offset: hal::BufferAddress,
    },
    SetViewport {
        rect: hal::Rect<f32>,
        depth_range: Range<f32>,
    },
    SetScissorRect(hal::Rect<u32>),
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    DrawIndirect {
        buffer: Arc<Buffer<A>>,
        offset: hal::BufferAddress,
        draw_count: u32,
        indexed: bool,
    },
    BeginComputePass {
        label: Option<String>,
    },
    EndComputePass,
    SetComputePipeline(Arc<ComputePipeline<A>>),
    Dispatch([u32; 3]),
    DispatchIndirect {
        buffer: Arc<Buffer<A>>,
        offset: hal::BufferAddress,
    },
}

/// Ordered commands of the current recording that have not been replayed yet.
#[derive(Debug)]
pub(crate) struct CommandLog<A: hal::Api> {
    commands: Vec<DeferredCommand<A>>,
}

impl<A: hal::Api> CommandLog<A> {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    pub fn append(&mut self, command: DeferredCommand<A>) {
        self.commands.push(command);
    }

    /// Places `command` at `index`, shifting everything after it.
    pub fn insert(&mut self, index: usize, command: DeferredCommand<A>) {
        self.commands.insert(index, command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[DeferredCommand<A>] {
        &self.commands
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}
