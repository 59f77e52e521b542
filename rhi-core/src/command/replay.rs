use arrayvec::ArrayVec;
use hal::CommandEncoder as _;

use super::deferred::DeferredCommand;
use crate::MAX_COLOR_ATTACHMENTS;

#[cfg(feature = "trace")]
use crate::device::trace::{self, Command as TraceCommand};

/// Issues `commands` on `encoder` in order. Every transition entry becomes
/// a single `transition_resources` call.
///
/// # Safety
///
/// `encoder` must be recording, and inside of a pass exactly where the
/// commands expect one.
pub(super) unsafe fn replay<A: hal::Api>(
    encoder: &mut A::CommandEncoder,
    commands: &[DeferredCommand<A>],
) {
    profiling::scope!("replay");
    for command in commands {
        log::trace!("\t{:?}", command);
        match *command {
            DeferredCommand::Transition {
                ref buffers,
                ref textures,
            } => unsafe {
                encoder.transition_resources(
                    buffers.iter().map(|t| hal::BufferBarrier {
                        buffer: t.buffer.as_hal(),
                        usage: t.usage.clone(),
                    }),
                    textures.iter().map(|t| hal::TextureBarrier {
                        texture: t.texture.as_hal(),
                        range: t.range,
                        usage: t.usage.clone(),
                    }),
                );
            },
            DeferredCommand::CopyBufferToBuffer {
                ref src,
                ref dst,
                region,
            } => unsafe { encoder.copy_buffer_to_buffer(src.as_hal(), dst.as_hal(), region) },
            DeferredCommand::CopyBufferToTexture {
                ref src,
                ref dst,
                region,
            } => unsafe { encoder.copy_buffer_to_texture(src.as_hal(), dst.as_hal(), region) },
            DeferredCommand::CopyTextureToBuffer {
                ref src,
                ref dst,
                region,
            } => unsafe { encoder.copy_texture_to_buffer(src.as_hal(), dst.as_hal(), region) },
            DeferredCommand::CopyTextureToTexture {
                ref src,
                ref dst,
                region,
            } => unsafe { encoder.copy_texture_to_texture(src.as_hal(), dst.as_hal(), region) },
            DeferredCommand::BindBuffer {
                slot,
                ref buffer,
                offset,
                writable,
            } => unsafe {
                encoder.bind_buffer(
                    slot,
                    hal::BufferBinding {
                        buffer: buffer.as_hal(),
                        offset,
                    },
                    writable,
                );
            },
            DeferredCommand::BindTexture {
                slot,
                ref texture,
                range,
                writable,
            } => unsafe { encoder.bind_texture(slot, texture.as_hal(), range, writable) },
            DeferredCommand::SetBindlessTable { slot, table } => unsafe {
                encoder.set_bindless_table(slot, table)
            },
            DeferredCommand::SetPushConstants { offset, ref data } => unsafe {
                encoder.set_push_constants(offset, data)
            },
            DeferredCommand::InsertDebugMarker(ref label) => unsafe {
                encoder.insert_debug_marker(label)
            },
            DeferredCommand::BeginDebugMarker(ref label) => unsafe {
                encoder.begin_debug_marker(label)
            },
            DeferredCommand::EndDebugMarker => unsafe { encoder.end_debug_marker() },
            DeferredCommand::BeginRenderPass {
                ref label,
                extent,
                ref color_targets,
                ref depth_stencil_target,
            } => {
                let color_attachments = color_targets
                    .iter()
                    .map(|at| hal::ColorAttachment {
                        target: at.texture.as_hal(),
                        mip_level: at.mip_level,
                        array_layer: at.array_layer,
                        load_op: at.load_op,
                        store: at.store,
                    })
                    .collect::<ArrayVec<_, MAX_COLOR_ATTACHMENTS>>();
                let depth_stencil_attachment =
                    depth_stencil_target
                        .as_ref()
                        .map(|at| hal::DepthStencilAttachment {
                            target: at.texture.as_hal(),
                            mip_level: at.mip_level,
                            array_layer: at.array_layer,
                            depth_load_op: at.depth_load_op,
                            stencil_load_op: at.stencil_load_op,
                            store: at.store,
                        });
                unsafe {
                    encoder.begin_render_pass(&hal::RenderPassDescriptor {
                        label: label.as_deref(),
                        extent,
                        color_attachments: &color_attachments,
                        depth_stencil_attachment,
                    });
                }
            }
            DeferredCommand::EndRenderPass => unsafe { encoder.end_render_pass() },
            DeferredCommand::SetRenderPipeline(ref pipeline) => unsafe {
                encoder.set_render_pipeline(&pipeline.raw)
            },
            DeferredCommand::SetIndexBuffer {
                ref buffer,
                offset,
                format,
            } => unsafe {
                encoder.set_index_buffer(
                    hal::BufferBinding {
                        buffer: buffer.as_hal(),
                        offset,
                    },
                    format,
                );
            },
            DeferredCommand::SetVertexBuffer {
                index,
                ref buffer,
                offset,
            } => unsafe {
                encoder.set_vertex_buffer(
                    index,
                    hal::BufferBinding {
                        buffer: buffer.as_hal(),
                        offset,
                    },
                );
            },
            DeferredCommand::SetViewport {
                ref rect,
                ref depth_range,
            } => unsafe { encoder.set_viewport(rect, depth_range.clone()) },
            DeferredCommand::SetScissorRect(ref rect) => unsafe {
                encoder.set_scissor_rect(rect)
            },
            DeferredCommand::Draw {
                ref vertices,
                ref instances,
            } => unsafe {
                encoder.draw(
                    vertices.start,
                    vertices.end - vertices.start,
                    instances.start,
                    instances.end - instances.start,
                );
            },
            DeferredCommand::DrawIndexed {
                ref indices,
                base_vertex,
                ref instances,
            } => unsafe {
                encoder.draw_indexed(
                    indices.start,
                    indices.end - indices.start,
                    base_vertex,
                    instances.start,
                    instances.end - instances.start,
                );
            },
            DeferredCommand::DrawIndirect {
                ref buffer,
                offset,
                draw_count,
                indexed,
            } => unsafe {
                if indexed {
                    encoder.draw_indexed_indirect(buffer.as_hal(), offset, draw_count);
                } else {
                    encoder.draw_indirect(buffer.as_hal(), offset, draw_count);
                }
            },
            DeferredCommand::BeginComputePass { ref label } => unsafe {
                encoder.begin_compute_pass(&hal::ComputePassDescriptor {
                    label: label.as_deref(),
                });
            },
            DeferredCommand::EndComputePass => unsafe { encoder.end_compute_pass() },
            DeferredCommand::SetComputePipeline(ref pipeline) => unsafe {
                encoder.set_compute_pipeline(&pipeline.raw)
            },
            DeferredCommand::Dispatch(count) => unsafe { encoder.dispatch(count) },
            DeferredCommand::DispatchIndirect { ref buffer, offset } => unsafe {
                encoder.dispatch_indirect(buffer.as_hal(), offset)
            },
        }
    }
}

#[cfg(feature = "trace")]
impl<A: hal::Api> DeferredCommand<A> {
    pub(super) fn to_trace(&self, trace: &mut trace::Trace) -> TraceCommand {
        match *self {
            Self::Transition {
                ref buffers,
                ref textures,
            } => TraceCommand::Transition(
                buffers
                    .iter()
                    .map(|t| trace::TraceBarrier {
                        id: t.buffer.id(),
                        range: None,
                        usage: t.usage.clone(),
                    })
                    .chain(textures.iter().map(|t| trace::TraceBarrier {
                        id: t.texture.id(),
                        range: Some(t.range),
                        usage: t.usage.clone(),
                    }))
                    .collect(),
            ),
            Self::CopyBufferToBuffer {
                ref src,
                ref dst,
                region,
            } => TraceCommand::CopyBufferToBuffer {
                src: src.id(),
                dst: dst.id(),
                region,
            },
            Self::CopyBufferToTexture {
                ref src,
                ref dst,
                region,
            } => TraceCommand::CopyBufferToTexture {
                src: src.id(),
                dst: dst.id(),
                region,
            },
            Self::CopyTextureToBuffer {
                ref src,
                ref dst,
                region,
            } => TraceCommand::CopyTextureToBuffer {
                src: src.id(),
                dst: dst.id(),
                region,
            },
            Self::CopyTextureToTexture {
                ref src,
                ref dst,
                region,
            } => TraceCommand::CopyTextureToTexture {
                src: src.id(),
                dst: dst.id(),
                region,
            },
            Self::BindBuffer {
                slot,
                ref buffer,
                offset,
                writable,
            } => TraceCommand::BindBuffer {
                slot,
                buffer: buffer.id(),
                offset,
                writable,
            },
            Self::BindTexture {
                slot,
                ref texture,
                range,
                writable,
            } => TraceCommand::BindTexture {
                slot,
                texture: texture.id(),
                range,
                writable,
            },
            Self::SetBindlessTable { slot, table } => {
                TraceCommand::SetBindlessTable { slot, table }
            }
            Self::SetPushConstants { offset, ref data } => TraceCommand::SetPushConstants {
                offset,
                data: trace.make_binary("push", data),
            },
            Self::InsertDebugMarker(ref label) => TraceCommand::InsertDebugMarker(label.clone()),
            Self::BeginDebugMarker(ref label) => TraceCommand::BeginDebugMarker(label.clone()),
            Self::EndDebugMarker => TraceCommand::EndDebugMarker,
            Self::BeginRenderPass {
                ref label,
                extent,
                ref color_targets,
                ref depth_stencil_target,
            } => TraceCommand::BeginRenderPass {
                label: label.clone(),
                extent,
                color_targets: color_targets
                    .iter()
                    .map(|at| trace::TraceTarget {
                        texture: at.texture.id(),
                        mip_level: at.mip_level,
                        array_layer: at.array_layer,
                    })
                    .collect(),
                depth_stencil_target: depth_stencil_target.as_ref().map(|at| {
                    trace::TraceTarget {
                        texture: at.texture.id(),
                        mip_level: at.mip_level,
                        array_layer: at.array_layer,
                    }
                }),
            },
            Self::EndRenderPass => TraceCommand::EndRenderPass,
            Self::SetRenderPipeline(ref pipeline) => {
                TraceCommand::SetRenderPipeline(pipeline.label().to_string())
            }
            Self::SetIndexBuffer {
                ref buffer,
                offset,
                format,
            } => TraceCommand::SetIndexBuffer {
                buffer: buffer.id(),
                offset,
                format,
            },
            Self::SetVertexBuffer {
                index,
                ref buffer,
                offset,
            } => TraceCommand::SetVertexBuffer {
                index,
                buffer: buffer.id(),
                offset,
            },
            Self::SetViewport {
                rect,
                ref depth_range,
            } => TraceCommand::SetViewport {
                rect,
                depth_range: depth_range.clone(),
            },
            Self::SetScissorRect(rect) => TraceCommand::SetScissorRect(rect),
            Self::Draw {
                ref vertices,
                ref instances,
            } => TraceCommand::Draw {
                vertices: vertices.clone(),
                instances: instances.clone(),
            },
            Self::DrawIndexed {
                ref indices,
                base_vertex,
                ref instances,
            } => TraceCommand::DrawIndexed {
                indices: indices.clone(),
                base_vertex,
                instances: instances.clone(),
            },
            Self::DrawIndirect {
                ref buffer,
                offset,
                draw_count,
                indexed,
            } => TraceCommand::DrawIndirect {
                buffer: buffer.id(),
                offset,
                draw_count,
                indexed,
            },
            Self::BeginComputePass { ref label } => TraceCommand::BeginComputePass {
                label: label.clone(),
            },
            Self::EndComputePass => TraceCommand::EndComputePass,
            Self::SetComputePipeline(ref pipeline) => {
                TraceCommand::SetComputePipeline(pipeline.label().to_string())
            }
            Self::Dispatch(count) => TraceCommand::Dispatch(count),
            Self::DispatchIndirect { ref buffer, offset } => TraceCommand::DispatchIndirect {
                buffer: buffer.id(),
                offset,
            },
        }
    }
}
