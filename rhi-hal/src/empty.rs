//! Software backend that executes nothing and records everything.
//!
//! Every encoder call is stored as a [`Command`], submissions are kept on the
//! [`Queue`] and fences are signaled at submission time. This lets the layers
//! above be exercised and inspected without a GPU.

use std::{
    mem,
    ops::Range,
    sync::{
        atomic::{AtomicIsize, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{
    BindlessTable, BufferAddress, BufferCopy, BufferTextureCopy, DescriptorIndex, FenceValue,
    IndexFormat, Label, Rect, ResourceState, SubresourceRange, TextureCopy,
};

type DeviceResult<T> = Result<T, crate::DeviceError>;

#[derive(Clone, Debug)]
pub struct Api;

impl crate::Api for Api {
    type Device = Device;
    type Queue = Queue;
    type CommandEncoder = Encoder;
    type CommandBuffer = CommandBuffer;

    type Buffer = Resource;
    type Texture = Resource;
    type Sampler = Resource;
    type Fence = Fence;

    type RenderPipeline = Resource;
    type ComputePipeline = Resource;
}

/// Any object created by the empty [`Device`]. Only the label is kept.
#[derive(Debug)]
pub struct Resource {
    label: String,
}

impl Resource {
    pub fn label(&self) -> &str {
        &self.label
    }
}

fn label_of(label: Label) -> String {
    label.unwrap_or_default().to_string()
}

#[derive(Debug, Default)]
pub struct Fence {
    value: Arc<AtomicU64>,
}

impl Fence {
    pub fn value(&self) -> FenceValue {
        self.value.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DescriptorKind {
    Buffer { writable: bool },
    Texture { writable: bool },
    Sampler,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DescriptorWrite {
    pub index: DescriptorIndex,
    pub resource: String,
    pub kind: DescriptorKind,
}

#[derive(Debug, Default)]
pub struct Device {
    live_objects: AtomicIsize,
    descriptor_writes: Mutex<Vec<DescriptorWrite>>,
}

impl Device {
    /// Number of buffers, textures, samplers and pipelines not yet destroyed.
    pub fn live_object_count(&self) -> isize {
        self.live_objects.load(Ordering::Acquire)
    }

    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.descriptor_writes.lock().clone()
    }

    fn create(&self, label: Label) -> Resource {
        self.live_objects.fetch_add(1, Ordering::AcqRel);
        Resource {
            label: label_of(label),
        }
    }

    fn destroy(&self, _resource: Resource) {
        self.live_objects.fetch_sub(1, Ordering::AcqRel);
    }

    fn write(&self, index: DescriptorIndex, resource: &Resource, kind: DescriptorKind) {
        self.descriptor_writes.lock().push(DescriptorWrite {
            index,
            resource: resource.label.clone(),
            kind,
        });
    }
}

impl crate::Device<Api> for Device {
    unsafe fn create_buffer(&self, desc: &crate::BufferDescriptor) -> DeviceResult<Resource> {
        Ok(self.create(desc.label))
    }
    unsafe fn destroy_buffer(&self, buffer: Resource) {
        self.destroy(buffer);
    }
    unsafe fn create_texture(&self, desc: &crate::TextureDescriptor) -> DeviceResult<Resource> {
        Ok(self.create(desc.label))
    }
    unsafe fn destroy_texture(&self, texture: Resource) {
        self.destroy(texture);
    }
    unsafe fn create_sampler(&self, desc: &crate::SamplerDescriptor) -> DeviceResult<Resource> {
        Ok(self.create(desc.label))
    }
    unsafe fn destroy_sampler(&self, sampler: Resource) {
        self.destroy(sampler);
    }
    unsafe fn create_render_pipeline(
        &self,
        desc: &crate::RenderPipelineDescriptor,
    ) -> DeviceResult<Resource> {
        Ok(self.create(desc.label))
    }
    unsafe fn destroy_render_pipeline(&self, pipeline: Resource) {
        self.destroy(pipeline);
    }
    unsafe fn create_compute_pipeline(
        &self,
        desc: &crate::ComputePipelineDescriptor,
    ) -> DeviceResult<Resource> {
        Ok(self.create(desc.label))
    }
    unsafe fn destroy_compute_pipeline(&self, pipeline: Resource) {
        self.destroy(pipeline);
    }
    unsafe fn create_command_encoder(
        &self,
        _desc: &crate::CommandEncoderDescriptor,
    ) -> DeviceResult<Encoder> {
        Ok(Encoder::default())
    }
    unsafe fn destroy_command_encoder(&self, _encoder: Encoder) {}

    unsafe fn create_fence(&self) -> DeviceResult<Fence> {
        Ok(Fence::default())
    }
    unsafe fn destroy_fence(&self, _fence: Fence) {}
    unsafe fn get_fence_value(&self, fence: &Fence) -> DeviceResult<FenceValue> {
        Ok(fence.value())
    }
    unsafe fn wait(
        &self,
        fence: &Fence,
        value: FenceValue,
        timeout_ms: Option<u32>,
    ) -> DeviceResult<bool> {
        let reached = fence.value() >= value;
        match timeout_ms {
            // Nothing runs in the background, so an unbounded wait on an
            // unsignaled fence would never return.
            None if !reached => Err(crate::DeviceError::Other(
                "unbounded wait on a fence with no pending signal",
            )),
            _ => Ok(reached),
        }
    }

    unsafe fn write_buffer_descriptor(
        &self,
        index: DescriptorIndex,
        buffer: &Resource,
        writable: bool,
    ) {
        self.write(index, buffer, DescriptorKind::Buffer { writable });
    }
    unsafe fn write_texture_descriptor(
        &self,
        index: DescriptorIndex,
        texture: &Resource,
        writable: bool,
    ) {
        self.write(index, texture, DescriptorKind::Texture { writable });
    }
    unsafe fn write_sampler_descriptor(&self, index: DescriptorIndex, sampler: &Resource) {
        self.write(index, sampler, DescriptorKind::Sampler);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub commands: Vec<Command>,
    pub signals: Vec<FenceValue>,
}

#[derive(Debug, Default)]
pub struct Queue {
    hold_signals: bool,
    held: Vec<(Arc<AtomicU64>, FenceValue)>,
    submissions: Vec<Submission>,
}

impl Queue {
    /// While holding, fence signals are queued instead of being applied,
    /// emulating work that is still in flight.
    pub fn hold_signals(&mut self, hold: bool) {
        self.hold_signals = hold;
    }

    /// Applies every held fence signal, returning how many there were.
    pub fn release_held(&mut self) -> usize {
        let count = self.held.len();
        log::trace!("Releasing {} held fence signals", count);
        for (fence, value) in self.held.drain(..) {
            fence.fetch_max(value, Ordering::AcqRel);
        }
        count
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }
}

impl crate::Queue<Api> for Queue {
    unsafe fn submit(
        &mut self,
        command_buffers: &[&CommandBuffer],
        signal_fences: &[(&Fence, FenceValue)],
    ) -> DeviceResult<()> {
        let commands = command_buffers
            .iter()
            .flat_map(|cmd_buf| cmd_buf.commands.iter().cloned())
            .collect();
        self.submissions.push(Submission {
            commands,
            signals: signal_fences.iter().map(|&(_, value)| value).collect(),
        });

        log::trace!(
            "Submission {} with {} command buffers",
            self.submissions.len(),
            command_buffers.len()
        );
        for &(fence, value) in signal_fences {
            if self.hold_signals {
                self.held.push((Arc::clone(&fence.value), value));
            } else {
                fence.value.fetch_max(value, Ordering::AcqRel);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BarrierRecord {
    pub resource: String,
    /// `None` for buffers.
    pub range: Option<SubresourceRange>,
    pub usage: Range<ResourceState>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Transition {
        buffers: Vec<BarrierRecord>,
        textures: Vec<BarrierRecord>,
    },
    CopyBufferToBuffer {
        src: String,
        dst: String,
        region: BufferCopy,
    },
    CopyBufferToTexture {
        src: String,
        dst: String,
        region: BufferTextureCopy,
    },
    CopyTextureToBuffer {
        src: String,
        dst: String,
        region: BufferTextureCopy,
    },
    CopyTextureToTexture {
        src: String,
        dst: String,
        region: TextureCopy,
    },
    BindBuffer {
        slot: u32,
        buffer: String,
        offset: BufferAddress,
        writable: bool,
    },
    BindTexture {
        slot: u32,
        texture: String,
        range: SubresourceRange,
        writable: bool,
    },
    SetBindlessTable {
        slot: u32,
        table: BindlessTable,
    },
    SetPushConstants {
        offset: u32,
        data: Vec<u8>,
    },
    InsertDebugMarker(String),
    BeginDebugMarker(String),
    EndDebugMarker,
    BeginRenderPass {
        label: String,
        color_targets: Vec<String>,
        depth_stencil_target: Option<String>,
    },
    EndRenderPass,
    SetRenderPipeline(String),
    SetIndexBuffer {
        buffer: String,
        offset: BufferAddress,
        format: IndexFormat,
    },
    SetVertexBuffer {
        index: u32,
        buffer: String,
        offset: BufferAddress,
    },
    SetViewport {
        rect: Rect<f32>,
        depth_range: Range<f32>,
    },
    SetScissorRect(Rect<u32>),
    Draw {
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    },
    DrawIndexed {
        first_index: u32,
        index_count: u32,
        base_vertex: i32,
        first_instance: u32,
        instance_count: u32,
    },
    DrawIndirect {
        buffer: String,
        offset: BufferAddress,
        draw_count: u32,
        indexed: bool,
    },
    BeginComputePass {
        label: String,
    },
    EndComputePass,
    SetComputePipeline(String),
    Dispatch([u32; 3]),
    DispatchIndirect {
        buffer: String,
        offset: BufferAddress,
    },
}

impl Command {
    pub fn is_transition(&self) -> bool {
        match *self {
            Self::Transition { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

#[derive(Debug, Default)]
pub struct Encoder {
    commands: Vec<Command>,
}

impl Encoder {
    fn push(&mut self, command: Command) {
        self.commands.push(command);
    }
}

impl crate::CommandEncoder<Api> for Encoder {
    unsafe fn begin_encoding(&mut self, _label: Label) -> DeviceResult<()> {
        self.commands.clear();
        Ok(())
    }
    unsafe fn discard_encoding(&mut self) {
        self.commands.clear();
    }
    unsafe fn end_encoding(&mut self) -> DeviceResult<CommandBuffer> {
        Ok(CommandBuffer {
            commands: mem::take(&mut self.commands),
        })
    }
    unsafe fn reset_all<I>(&mut self, _command_buffers: I)
    where
        I: Iterator<Item = CommandBuffer>,
    {
    }

    unsafe fn transition_resources<'a, B, T>(&mut self, buffers: B, textures: T)
    where
        B: Iterator<Item = crate::BufferBarrier<'a, Api>>,
        T: Iterator<Item = crate::TextureBarrier<'a, Api>>,
    {
        let buffers = buffers
            .map(|barrier| BarrierRecord {
                resource: barrier.buffer.label.clone(),
                range: None,
                usage: barrier.usage,
            })
            .collect();
        let textures = textures
            .map(|barrier| BarrierRecord {
                resource: barrier.texture.label.clone(),
                range: Some(barrier.range),
                usage: barrier.usage,
            })
            .collect();
        self.push(Command::Transition { buffers, textures });
    }

    unsafe fn copy_buffer_to_buffer(&mut self, src: &Resource, dst: &Resource, region: BufferCopy) {
        self.push(Command::CopyBufferToBuffer {
            src: src.label.clone(),
            dst: dst.label.clone(),
            region,
        });
    }
    unsafe fn copy_buffer_to_texture(
        &mut self,
        src: &Resource,
        dst: &Resource,
        region: BufferTextureCopy,
    ) {
        self.push(Command::CopyBufferToTexture {
            src: src.label.clone(),
            dst: dst.label.clone(),
            region,
        });
    }
    unsafe fn copy_texture_to_buffer(
        &mut self,
        src: &Resource,
        dst: &Resource,
        region: BufferTextureCopy,
    ) {
        self.push(Command::CopyTextureToBuffer {
            src: src.label.clone(),
            dst: dst.label.clone(),
            region,
        });
    }
    unsafe fn copy_texture_to_texture(
        &mut self,
        src: &Resource,
        dst: &Resource,
        region: TextureCopy,
    ) {
        self.push(Command::CopyTextureToTexture {
            src: src.label.clone(),
            dst: dst.label.clone(),
            region,
        });
    }

    unsafe fn bind_buffer(&mut self, slot: u32, binding: crate::BufferBinding<'_, Api>, writable: bool) {
        self.push(Command::BindBuffer {
            slot,
            buffer: binding.buffer.label.clone(),
            offset: binding.offset,
            writable,
        });
    }
    unsafe fn bind_texture(
        &mut self,
        slot: u32,
        texture: &Resource,
        range: SubresourceRange,
        writable: bool,
    ) {
        self.push(Command::BindTexture {
            slot,
            texture: texture.label.clone(),
            range,
            writable,
        });
    }
    unsafe fn set_bindless_table(&mut self, slot: u32, table: BindlessTable) {
        self.push(Command::SetBindlessTable { slot, table });
    }
    unsafe fn set_push_constants(&mut self, offset_bytes: u32, data: &[u8]) {
        self.push(Command::SetPushConstants {
            offset: offset_bytes,
            data: data.to_vec(),
        });
    }

    unsafe fn insert_debug_marker(&mut self, label: &str) {
        self.push(Command::InsertDebugMarker(label.to_string()));
    }
    unsafe fn begin_debug_marker(&mut self, group_label: &str) {
        self.push(Command::BeginDebugMarker(group_label.to_string()));
    }
    unsafe fn end_debug_marker(&mut self) {
        self.push(Command::EndDebugMarker);
    }

    unsafe fn begin_render_pass(&mut self, desc: &crate::RenderPassDescriptor<'_, Api>) {
        self.push(Command::BeginRenderPass {
            label: label_of(desc.label),
            color_targets: desc
                .color_attachments
                .iter()
                .map(|at| at.target.label.clone())
                .collect(),
            depth_stencil_target: desc
                .depth_stencil_attachment
                .as_ref()
                .map(|at| at.target.label.clone()),
        });
    }
    unsafe fn end_render_pass(&mut self) {
        self.push(Command::EndRenderPass);
    }

    unsafe fn set_render_pipeline(&mut self, pipeline: &Resource) {
        self.push(Command::SetRenderPipeline(pipeline.label.clone()));
    }
    unsafe fn set_index_buffer(&mut self, binding: crate::BufferBinding<'_, Api>, format: IndexFormat) {
        self.push(Command::SetIndexBuffer {
            buffer: binding.buffer.label.clone(),
            offset: binding.offset,
            format,
        });
    }
    unsafe fn set_vertex_buffer(&mut self, index: u32, binding: crate::BufferBinding<'_, Api>) {
        self.push(Command::SetVertexBuffer {
            index,
            buffer: binding.buffer.label.clone(),
            offset: binding.offset,
        });
    }
    unsafe fn set_viewport(&mut self, rect: &Rect<f32>, depth_range: Range<f32>) {
        self.push(Command::SetViewport {
            rect: *rect,
            depth_range,
        });
    }
    unsafe fn set_scissor_rect(&mut self, rect: &Rect<u32>) {
        self.push(Command::SetScissorRect(*rect));
    }

    unsafe fn draw(
        &mut self,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    ) {
        self.push(Command::Draw {
            first_vertex,
            vertex_count,
            first_instance,
            instance_count,
        });
    }
    unsafe fn draw_indexed(
        &mut self,
        first_index: u32,
        index_count: u32,
        base_vertex: i32,
        first_instance: u32,
        instance_count: u32,
    ) {
        self.push(Command::DrawIndexed {
            first_index,
            index_count,
            base_vertex,
            first_instance,
            instance_count,
        });
    }
    unsafe fn draw_indirect(&mut self, buffer: &Resource, offset: BufferAddress, draw_count: u32) {
        self.push(Command::DrawIndirect {
            buffer: buffer.label.clone(),
            offset,
            draw_count,
            indexed: false,
        });
    }
    unsafe fn draw_indexed_indirect(
        &mut self,
        buffer: &Resource,
        offset: BufferAddress,
        draw_count: u32,
    ) {
        self.push(Command::DrawIndirect {
            buffer: buffer.label.clone(),
            offset,
            draw_count,
            indexed: true,
        });
    }

    unsafe fn begin_compute_pass(&mut self, desc: &crate::ComputePassDescriptor) {
        self.push(Command::BeginComputePass {
            label: label_of(desc.label),
        });
    }
    unsafe fn end_compute_pass(&mut self) {
        self.push(Command::EndComputePass);
    }

    unsafe fn set_compute_pipeline(&mut self, pipeline: &Resource) {
        self.push(Command::SetComputePipeline(pipeline.label.clone()));
    }

    unsafe fn dispatch(&mut self, count: [u32; 3]) {
        self.push(Command::Dispatch(count));
    }
    unsafe fn dispatch_indirect(&mut self, buffer: &Resource, offset: BufferAddress) {
        self.push(Command::DispatchIndirect {
            buffer: buffer.label.clone(),
            offset,
        });
    }
}
