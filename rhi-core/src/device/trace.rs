use std::{io::Write as _, ops::Range};

use crate::{resource::ResourceId, SubmissionIndex};

type FileName = String;

#[derive(Debug, serde::Serialize)]
pub(crate) struct TraceTarget {
    pub texture: ResourceId,
    pub mip_level: u32,
    pub array_layer: u32,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct TraceBarrier {
    pub id: ResourceId,
    pub range: Option<hal::SubresourceRange>,
    pub usage: Range<hal::ResourceState>,
}

/// One replayed command, with resources referred to by id.
#[derive(Debug, serde::Serialize)]
pub(crate) enum Command {
    Transition(Vec<TraceBarrier>),
    CopyBufferToBuffer {
        src: ResourceId,
        dst: ResourceId,
        region: hal::BufferCopy,
    },
    CopyBufferToTexture {
        src: ResourceId,
        dst: ResourceId,
        region: hal::BufferTextureCopy,
    },
    CopyTextureToBuffer {
        src: ResourceId,
        dst: ResourceId,
        region: hal::BufferTextureCopy,
    },
    CopyTextureToTexture {
        src: ResourceId,
        dst: ResourceId,
        region: hal::TextureCopy,
    },
    BindBuffer {
        slot: u32,
        buffer: ResourceId,
        offset: hal::BufferAddress,
        writable: bool,
    },
    BindTexture {
        slot: u32,
        texture: ResourceId,
        range: hal::SubresourceRange,
        writable: bool,
    },
    SetBindlessTable {
        slot: u32,
        table: hal::BindlessTable,
    },
    SetPushConstants {
        offset: u32,
        data: FileName,
    },
    InsertDebugMarker(String),
    BeginDebugMarker(String),
    EndDebugMarker,
    BeginRenderPass {
        label: Option<String>,
        extent: hal::Extent3d,
        color_targets: Vec<TraceTarget>,
        depth_stencil_target: Option<TraceTarget>,
    },
    EndRenderPass,
    SetRenderPipeline(String),
    SetIndexBuffer {
        buffer: ResourceId,
        offset: hal::BufferAddress,
        format: hal::IndexFormat,
    },
    SetVertexBuffer {
        index: u32,
        buffer: ResourceId,
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
        buffer: ResourceId,
        offset: hal::BufferAddress,
        draw_count: u32,
        indexed: bool,
    },
    BeginComputePass {
        label: Option<String>,
    },
    EndComputePass,
    SetComputePipeline(String),
    Dispatch([u32; 3]),
    DispatchIndirect {
        buffer: ResourceId,
        offset: hal::BufferAddress,
    },
}

#[derive(Debug, serde::Serialize)]
pub(crate) enum Action {
    Init {
        label: String,
        resource_table_capacity: u32,
        sampler_table_capacity: u32,
    },
    CreateBuffer {
        id: ResourceId,
        label: String,
        size: hal::BufferAddress,
        usage: hal::BufferUses,
    },
    CreateTexture {
        id: ResourceId,
        label: String,
        size: hal::Extent3d,
        format: hal::TextureFormat,
        usage: hal::TextureUses,
        mip_level_count: u32,
    },
    Submit {
        index: SubmissionIndex,
        recorder: String,
        commands: Vec<Command>,
    },
}

#[derive(Debug)]
pub struct Trace {
    path: std::path::PathBuf,
    file: std::fs::File,
    config: ron::ser::PrettyConfig,
    binary_id: usize,
}

impl Trace {
    pub fn new(path: &std::path::Path) -> Result<Self, std::io::Error> {
        log::info!("Tracing into '{:?}'", path);
        let mut file = std::fs::File::create(path.join("trace.ron"))?;
        file.write_all(b"[\n")?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            config: ron::ser::PrettyConfig::default(),
            binary_id: 0,
        })
    }

    pub(crate) fn make_binary(&mut self, kind: &str, data: &[u8]) -> FileName {
        self.binary_id += 1;
        let name = format!("{}{}.bin", kind, self.binary_id);
        let _ = std::fs::write(self.path.join(&name), data);
        name
    }

    pub(crate) fn add(&mut self, action: Action) {
        match ron::ser::to_string_pretty(&action, self.config.clone()) {
            Ok(string) => {
                let _ = writeln!(self.file, "{},", string);
            }
            Err(e) => {
                log::warn!("RON serialization failure: {:?}", e);
            }
        }
    }
}

impl Drop for Trace {
    fn drop(&mut self) {
        let _ = self.file.write_all(b"]");
    }
}
