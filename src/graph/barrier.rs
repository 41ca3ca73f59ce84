//! Barrier planning.
//!
//! Every scheduled pass gets a list of *invalidate* barriers, which make a resource visible in the right layout
//! before the pass runs, and *flush* barriers, which describe how the pass leaves a resource behind.
//! These are then collapsed per physical pass, since only the first use and the last use of a resource inside a
//! render pass need synchronization with the outside world.

use ash::vk;

use crate::core::error::Error;
use crate::graph::pass::RenderPass;
use crate::graph::physical_pass::{MipmapRequest, PhysicalPass};
use crate::graph::physical_resource::ResourceDimensions;
use crate::graph::virtual_resource::ResourceRegistry;
use crate::PipelineStage;

/// Synchronization requirement of one physical resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Barrier {
    pub resource_index: usize,
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags2,
    pub stages: PipelineStage,
    /// Refers to the previous frame's copy of the resource.
    pub history: bool,
}

impl Barrier {
    fn new(resource_index: usize, history: bool) -> Self {
        Self {
            resource_index,
            layout: vk::ImageLayout::UNDEFINED,
            access: vk::AccessFlags2::empty(),
            stages: PipelineStage::empty(),
            history,
        }
    }
}

/// Barriers of a single logical pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassBarriers {
    pub invalidate: Vec<Barrier>,
    pub flush: Vec<Barrier>,
}

fn find_or_insert(barriers: &mut Vec<Barrier>, index: usize, history: bool) -> &mut Barrier {
    let position = match barriers
        .iter()
        .position(|barrier| barrier.resource_index == index && barrier.history == history)
    {
        Some(position) => position,
        None => {
            barriers.push(Barrier::new(index, history));
            barriers.len() - 1
        }
    };
    &mut barriers[position]
}

/// Accumulates the barriers of one pass, reporting layout conflicts with the pass and resource names attached.
struct BarrierBuilder<'a> {
    pass: &'a RenderPass,
    resources: &'a ResourceRegistry,
    barriers: PassBarriers,
}

#[derive(Copy, Clone)]
enum Side {
    Invalidate,
    Flush,
}

impl<'a> BarrierBuilder<'a> {
    fn physical(&self, resource: usize) -> usize {
        self.resources.get(resource).physical_index().unwrap_or_default()
    }

    fn conflict(&self, resource: usize, existing: vk::ImageLayout, requested: vk::ImageLayout) -> Error {
        Error::LayoutConflict {
            pass: self.pass.name().to_owned(),
            resource: self.resources.get(resource).name().to_owned(),
            existing,
            requested,
        }
    }

    fn require_graphics(&self, category: &'static str) -> Result<(), Error> {
        if self.pass.queue().is_compute() {
            return Err(Error::AttachmentOnComputeQueue {
                pass: self.pass.name().to_owned(),
                category,
            });
        }
        Ok(())
    }

    /// Stage shader accesses happen in, depending on the queue of the pass.
    fn shader_stage(&self) -> PipelineStage {
        if self.pass.queue().is_compute() {
            PipelineStage::COMPUTE_SHADER
        } else {
            PipelineStage::FRAGMENT_SHADER
        }
    }

    fn entry(&mut self, side: Side, resource: usize, history: bool) -> &mut Barrier {
        let index = self.physical(resource);
        let list = match side {
            Side::Invalidate => &mut self.barriers.invalidate,
            Side::Flush => &mut self.barriers.flush,
        };
        find_or_insert(list, index, history)
    }

    /// Merge an access into the barrier for `resource`. A different layout requested earlier in the pass conflicts.
    fn access(
        &mut self,
        side: Side,
        resource: usize,
        history: bool,
        stages: PipelineStage,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
    ) -> Result<(), Error> {
        let barrier = self.entry(side, resource, history);
        barrier.stages |= stages;
        barrier.access |= access;
        let existing = barrier.layout;
        if existing != vk::ImageLayout::UNDEFINED && existing != layout {
            return Err(self.conflict(resource, existing, layout));
        }
        self.entry(side, resource, history).layout = layout;
        Ok(())
    }

    /// Like [`Self::access`], but a resource already read as `SHADER_READ_ONLY_OPTIMAL` (or in `GENERAL`) is promoted
    /// to `GENERAL` instead of conflicting.
    fn attachment_access(
        &mut self,
        side: Side,
        resource: usize,
        stages: PipelineStage,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
    ) -> Result<(), Error> {
        let barrier = self.entry(side, resource, false);
        barrier.stages |= stages;
        barrier.access |= access;
        let existing = barrier.layout;
        let promoted = match existing {
            vk::ImageLayout::UNDEFINED => layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL | vk::ImageLayout::GENERAL => vk::ImageLayout::GENERAL,
            _ => return Err(self.conflict(resource, existing, layout)),
        };
        self.entry(side, resource, false).layout = promoted;
        Ok(())
    }

    fn build(mut self) -> Result<PassBarriers, Error> {
        let pass = self.pass;
        let shader_stage = self.shader_stage();

        for input in pass.generic_buffer_inputs() {
            self.access(Side::Invalidate, input.buffer, false, input.stages, input.access, vk::ImageLayout::GENERAL)?;
        }

        for input in pass.generic_texture_inputs() {
            self.access(Side::Invalidate, input.texture, false, input.stages, input.access, input.layout)?;
        }

        for &input in pass.history_inputs() {
            self.access(
                Side::Invalidate,
                input,
                true,
                shader_stage,
                vk::AccessFlags2::SHADER_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
        }

        if !pass.attachment_inputs().is_empty() {
            self.require_graphics("input attachments")?;
        }
        for &input in pass.attachment_inputs() {
            self.access(
                Side::Invalidate,
                input,
                false,
                PipelineStage::FRAGMENT_SHADER,
                vk::AccessFlags2::INPUT_ATTACHMENT_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
        }

        for &input in pass.storage_inputs().iter().flatten() {
            self.access(
                Side::Invalidate,
                input,
                false,
                shader_stage,
                vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
                vk::ImageLayout::GENERAL,
            )?;
        }

        for &input in pass.storage_texture_inputs().iter().flatten() {
            self.access(
                Side::Invalidate,
                input,
                false,
                shader_stage,
                vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
                vk::ImageLayout::GENERAL,
            )?;
        }

        for &input in pass.blit_texture_inputs().iter().flatten() {
            self.access(
                Side::Invalidate,
                input,
                false,
                PipelineStage::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
        }

        if pass.color_inputs().iter().any(Option::is_some) {
            self.require_graphics("color inputs")?;
        }
        for &input in pass.color_inputs().iter().flatten() {
            self.attachment_access(
                Side::Invalidate,
                input,
                PipelineStage::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            )?;
        }

        if pass.color_scale_inputs().iter().any(Option::is_some) {
            self.require_graphics("scaled color inputs")?;
        }
        for &input in pass.color_scale_inputs().iter().flatten() {
            self.access(
                Side::Invalidate,
                input,
                false,
                PipelineStage::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
        }

        if !pass.color_outputs().is_empty() {
            self.require_graphics("color outputs")?;
        }
        for &output in pass.color_outputs() {
            self.attachment_access(
                Side::Flush,
                output,
                PipelineStage::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            )?;
        }

        if !pass.resolve_outputs().is_empty() {
            self.require_graphics("resolve outputs")?;
        }
        for &output in pass.resolve_outputs() {
            self.access(
                Side::Flush,
                output,
                false,
                PipelineStage::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            )?;
        }

        for &output in pass.blit_texture_outputs() {
            self.access(
                Side::Flush,
                output,
                false,
                PipelineStage::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
        }

        for &output in pass.storage_outputs().iter().chain(pass.storage_texture_outputs()) {
            self.access(
                Side::Flush,
                output,
                false,
                shader_stage,
                vk::AccessFlags2::SHADER_WRITE,
                vk::ImageLayout::GENERAL,
            )?;
        }

        let depth_tests = PipelineStage::EARLY_FRAGMENT_TESTS | PipelineStage::LATE_FRAGMENT_TESTS;
        match (pass.depth_stencil_input(), pass.depth_stencil_output()) {
            (None, None) => {}
            (Some(input), Some(output)) => {
                self.require_graphics("depth-stencil attachments")?;
                self.attachment_access(
                    Side::Invalidate,
                    input,
                    depth_tests,
                    vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                )?;
                self.attachment_access(
                    Side::Flush,
                    output,
                    PipelineStage::LATE_FRAGMENT_TESTS,
                    vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                )?;
            }
            (Some(input), None) => {
                self.require_graphics("depth-stencil attachments")?;
                let barrier = self.entry(Side::Invalidate, input, false);
                barrier.stages |= depth_tests;
                barrier.access |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ;
                let existing = barrier.layout;
                match existing {
                    vk::ImageLayout::UNDEFINED | vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
                        self.entry(Side::Invalidate, input, false).layout = vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL;
                    }
                    _ => return Err(self.conflict(input, existing, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)),
                }
            }
            (None, Some(output)) => {
                self.require_graphics("depth-stencil attachments")?;
                self.attachment_access(
                    Side::Flush,
                    output,
                    PipelineStage::LATE_FRAGMENT_TESTS,
                    vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                )?;
            }
        }

        // Reading an attachment while rendering to it (programmable blending) needs GENERAL on both sides.
        for &input in pass.attachment_inputs() {
            let index = self.physical(input);
            let written = self
                .barriers
                .flush
                .iter()
                .any(|barrier| barrier.resource_index == index && !barrier.history && is_attachment_layout(barrier.layout));
            if written {
                for barrier in self.barriers.invalidate.iter_mut().chain(self.barriers.flush.iter_mut()) {
                    if barrier.resource_index == index && !barrier.history {
                        barrier.layout = vk::ImageLayout::GENERAL;
                    }
                }
            }
        }

        Ok(self.barriers)
    }
}

fn is_attachment_layout(layout: vk::ImageLayout) -> bool {
    matches!(
        layout,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL | vk::ImageLayout::GENERAL
    )
}

/// Derive the invalidate and flush barriers of every scheduled pass, in schedule order.
pub(crate) fn build_barriers(
    pass_stack: &[usize],
    passes: &[RenderPass],
    resources: &ResourceRegistry,
    dims: &[ResourceDimensions],
) -> Result<Vec<PassBarriers>, Error> {
    pass_stack
        .iter()
        .map(|&index| {
            let pass = &passes[index];
            let builder = BarrierBuilder {
                pass,
                resources,
                barriers: PassBarriers::default(),
            };
            let mut barriers = builder.build()?;
            // Mipmapped color outputs leave the pass in TRANSFER_SRC_OPTIMAL, ready for mip generation.
            for &output in pass.color_outputs() {
                let Some(physical) = resources.get(output).physical_index() else {
                    continue;
                };
                if let Some(barrier) = barriers
                    .flush
                    .iter_mut()
                    .find(|barrier| barrier.resource_index == physical && !barrier.history)
                {
                    if dims[physical].levels > 1 {
                        barrier.layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
                        barrier.access = vk::AccessFlags2::TRANSFER_READ;
                        barrier.stages = PipelineStage::TRANSFER;
                    }
                }
            }
            Ok(barriers)
        })
        .collect()
}

/// Tracks one physical resource while walking the subpasses of a physical pass.
#[derive(Debug, Copy, Clone, Default)]
struct ResourceState {
    initial_layout: vk::ImageLayout,
    final_layout: vk::ImageLayout,
    invalidated_access: vk::AccessFlags2,
    flushed_access: vk::AccessFlags2,
    invalidated_stages: PipelineStage,
    flushed_stages: PipelineStage,
    touched: bool,
}

/// Reads visible after a write, for when a write happens before any read in a render pass.
fn flush_access_to_invalidate(mut access: vk::AccessFlags2) -> vk::AccessFlags2 {
    if access.contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE) {
        access |= vk::AccessFlags2::COLOR_ATTACHMENT_READ;
    }
    if access.contains(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE) {
        access |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ;
    }
    if access.contains(vk::AccessFlags2::SHADER_WRITE) {
        access |= vk::AccessFlags2::SHADER_READ;
    }
    access
}

fn flush_stage_to_invalidate(mut stages: PipelineStage) -> PipelineStage {
    if stages.contains(PipelineStage::LATE_FRAGMENT_TESTS) {
        stages |= PipelineStage::EARLY_FRAGMENT_TESTS;
    }
    stages
}

/// Collapse per-pass barriers into the barriers of each physical pass. Transient resources and the swapchain
/// are synchronized by the render pass itself and get no barriers.
pub(crate) fn build_physical_barriers(
    physical_passes: &mut [PhysicalPass],
    pass_stack: &[usize],
    pass_barriers: &[PassBarriers],
    dims: &[ResourceDimensions],
    swapchain_physical_index: Option<usize>,
) {
    let barriers_of = |pass: usize| {
        pass_stack
            .iter()
            .position(|&scheduled| scheduled == pass)
            .map(|position| &pass_barriers[position])
    };

    for physical_pass in physical_passes.iter_mut() {
        let mut states = vec![ResourceState::default(); dims.len()];
        let mut invalidate = Vec::new();
        let mut flush = Vec::new();
        let mut discards = Vec::new();

        let implicit = |index: usize| dims[index].transient || Some(index) == swapchain_physical_index;
        let storage_layout = |index: usize, layout: vk::ImageLayout| {
            if dims[index].is_storage_image() {
                vk::ImageLayout::GENERAL
            } else {
                layout
            }
        };

        for &pass in &physical_pass.passes {
            let Some(barriers) = barriers_of(pass) else {
                continue;
            };

            for barrier in &barriers.invalidate {
                let index = barrier.resource_index;
                if implicit(index) {
                    continue;
                }

                if barrier.history {
                    // Only the layout matters for history, and one transition per physical pass is enough.
                    let seen = invalidate
                        .iter()
                        .any(|existing: &Barrier| existing.resource_index == index && existing.history);
                    if !seen {
                        let layout = storage_layout(index, barrier.layout);
                        invalidate.push(Barrier {
                            layout,
                            ..*barrier
                        });
                        flush.push(Barrier {
                            layout,
                            access: vk::AccessFlags2::empty(),
                            ..*barrier
                        });
                    }
                    continue;
                }

                let state = &mut states[index];
                if !state.touched {
                    state.touched = true;
                    state.invalidated_access |= barrier.access;
                    state.invalidated_stages |= barrier.stages;
                    state.initial_layout = storage_layout(index, barrier.layout);
                }
                state.final_layout = storage_layout(index, barrier.layout);
                // Anything flushed earlier in this render pass is visible to this subpass already.
                state.flushed_access = vk::AccessFlags2::empty();
                state.flushed_stages = PipelineStage::empty();
            }

            for barrier in &barriers.flush {
                let index = barrier.resource_index;
                if implicit(index) {
                    continue;
                }

                let state = &mut states[index];
                state.flushed_access |= barrier.access;
                state.flushed_stages |= barrier.stages;
                state.final_layout = storage_layout(index, barrier.layout);

                if !state.touched {
                    state.touched = true;
                    if barrier.layout == vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
                        // Mipmapped outputs are rendered as color attachments first.
                        state.initial_layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
                        state.invalidated_stages = PipelineStage::COLOR_ATTACHMENT_OUTPUT;
                        state.invalidated_access =
                            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE;
                    } else {
                        state.initial_layout = storage_layout(index, barrier.layout);
                        state.invalidated_stages = flush_stage_to_invalidate(barrier.stages);
                        state.invalidated_access = flush_access_to_invalidate(barrier.access);
                    }
                    // Nothing reads the old contents in this pass.
                    discards.push(index);
                }
            }
        }

        for (index, state) in states.iter().enumerate() {
            if !state.touched {
                continue;
            }

            invalidate.push(Barrier {
                resource_index: index,
                layout: state.initial_layout,
                access: state.invalidated_access,
                stages: state.invalidated_stages,
                history: false,
            });

            if !state.flushed_access.is_empty() {
                flush.push(Barrier {
                    resource_index: index,
                    layout: state.final_layout,
                    access: state.flushed_access,
                    stages: state.flushed_stages,
                    history: false,
                });
            } else if !state.invalidated_access.is_empty() {
                // A read-only use still has to finish before the next write: a flush with no access.
                flush.push(Barrier {
                    resource_index: index,
                    layout: state.final_layout,
                    access: vk::AccessFlags2::empty(),
                    stages: state.invalidated_stages,
                    history: false,
                });
            }

            if !state.flushed_access.is_empty() && state.final_layout == vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
                physical_pass.mipmap_requests.push(MipmapRequest {
                    physical_resource: index,
                    stages: PipelineStage::COLOR_ATTACHMENT_OUTPUT,
                    access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                });
            }
        }

        physical_pass.invalidate = invalidate;
        physical_pass.flush = flush;
        physical_pass.discards = discards;
    }
}
