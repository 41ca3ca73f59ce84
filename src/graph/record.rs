//! Execution of a baked render graph.
//!
//! [`RenderGraph::setup_attachments()`] binds an image or buffer to every physical resource of the plan, reusing
//! what was bound in earlier frames where possible. [`RenderGraph::enqueue_render_passes()`] then records every
//! physical pass in order: the invalidate barriers, the render pass with one subpass per logical pass (or the plain
//! callbacks of compute passes), mip generation and the flush that makes the results visible to later passes.
//! Work on different physical queues goes into different submissions, synchronized with semaphores. Submissions are
//! held back until the whole frame is recorded, so a submission only signals the semaphores some later submission
//! actually waits on.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use ash::vk;

use crate::command_buffer::state::{
    AttachmentClear, BarrierBatch, BufferBarrier, BufferCreateInfo, ImageBarrier, ImageCreateInfo, RenderPassAttachment,
    RenderPassInfo, ScaledClear, SemaphoreWait,
};
use crate::command_buffer::traits::{
    Backend, CommandInterface, GpuBuffer, GpuImage, GraphCommandBuffer, ResourceFactory, SyncService,
};
use crate::core::error::Error;
use crate::core::queue::PhysicalQueue;
use crate::graph::barrier::Barrier;
use crate::graph::pass::{LayeredPassExecutor, PassCallbacks, PassExecutor, RenderPass};
use crate::graph::pass_graph::{RenderGraph, RenderGraphPlan};
use crate::graph::physical_pass::PhysicalPass;
use crate::graph::physical_resource::{PhysicalResources, ResourceDimensions};
use crate::util::format::aspect_flags;
use crate::PipelineStage;

/// Synchronization state of one physical image or buffer, carried across passes and frames.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResourceState {
    pub layout: vk::ImageLayout,
    /// Stages of the last use, which the next use has to wait for.
    pub src_stages: PipelineStage,
    /// Writes of the last use that are not yet visible.
    pub to_flush: vk::AccessFlags2,
    pub invalidated_stages: PipelineStage,
    pub invalidated_access: vk::AccessFlags2,
    /// Event set after the last use, only valid inside the command buffer being recorded.
    pub signaled_event: Option<usize>,
    /// Submission of this frame the next use on each queue has to wait for, by index.
    pub pending_signals: BTreeMap<PhysicalQueue, usize>,
}

impl ResourceState {
    fn covers(&self, barrier: &Barrier) -> bool {
        self.invalidated_stages.contains(barrier.stages) && self.invalidated_access.contains(barrier.access)
    }
}

/// Per-frame execution state owned by the graph.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Default(bound = ""))]
pub(crate) struct ExecutorState<B: Backend> {
    set_up: bool,
    states: Vec<ResourceState>,
    history_states: Vec<ResourceState>,
    events: Vec<Option<B::Event>>,
    /// Events set during the previous frame, reset before they are used again.
    signaled_events: Vec<usize>,
    swapchain: Option<B::Image>,
    /// Signaled at the end of an earlier frame, waited by the next submission on each queue.
    carried_semaphores: BTreeMap<PhysicalQueue, Vec<B::Semaphore>>,
    /// Waited on in an earlier frame, free to be signaled again.
    free_semaphores: Vec<B::Semaphore>,
    waited_semaphores: Vec<B::Semaphore>,
}

impl<B: Backend> ExecutorState<B> {
    /// Require another `setup_attachments()` before the next frame.
    pub fn invalidate(&mut self) {
        self.set_up = false;
    }
}

fn image_create_info(dim: &ResourceDimensions, transient: bool) -> ImageCreateInfo {
    let attachment_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
        | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        | vk::ImageUsageFlags::INPUT_ATTACHMENT;
    // Lazily allocated memory is only allowed for images that are never anything but attachments.
    let transient = transient && attachment_usage.contains(dim.image_usage);
    let mut usage = dim.image_usage;
    if transient {
        usage |= vk::ImageUsageFlags::TRANSIENT_ATTACHMENT;
    }

    ImageCreateInfo {
        format: dim.format,
        extent: vk::Extent3D {
            width: dim.width,
            height: dim.height,
            depth: dim.depth,
        },
        image_type: if dim.depth > 1 {
            vk::ImageType::TYPE_3D
        } else {
            vk::ImageType::TYPE_2D
        },
        layers: dim.layers,
        levels: dim.levels,
        samples: vk::SampleCountFlags::from_raw(dim.samples),
        usage,
        queues: dim.queues,
        initial_layout: vk::ImageLayout::UNDEFINED,
        transient,
        mutable_format: dim.is_storage_image(),
        mutable_srgb: dim.unorm_srgb_alias,
    }
}

/// Reuse `slot` if it was created with `info`, otherwise create a new image. Returns whether the handle changed.
fn setup_image<B: Backend>(
    device: &B::Device,
    slot: &mut Option<B::Image>,
    info: &ImageCreateInfo,
    name: &str,
) -> Result<bool> {
    if let Some(image) = slot {
        if image.create_info() == info {
            return Ok(false);
        }
    }

    let image = device.create_image(info)?;
    image.set_debug_name(name);
    #[cfg(feature = "log-objects")]
    trace!("Created image for `{}`: {:?}", name, info);
    *slot = Some(image);
    Ok(true)
}

/// Reuse `slot` if it is large enough with the right usage, otherwise create a new buffer. Persistent buffers must
/// match in size exactly. Returns whether the handle changed.
fn setup_buffer<B: Backend>(device: &B::Device, slot: &mut Option<B::Buffer>, dim: &ResourceDimensions) -> Result<bool> {
    let info = BufferCreateInfo {
        size: dim.buffer_info.size,
        usage: dim.buffer_info.usage,
        queues: dim.queues,
        zero_initialize: dim.persistent,
    };

    if let Some(buffer) = slot {
        let existing = buffer.create_info();
        let size_fits = if dim.persistent {
            existing.size == info.size
        } else {
            existing.size >= info.size
        };
        if size_fits && existing.usage.contains(info.usage) {
            return Ok(false);
        }
    }

    let buffer = device.create_buffer(&info)?;
    buffer.set_debug_name(&dim.name);
    #[cfg(feature = "log-objects")]
    trace!("Created buffer for `{}`: {:?}", dim.name, info);
    *slot = Some(buffer);
    Ok(true)
}

impl<B: Backend> RenderGraph<B> {
    /// Bind images and buffers to every physical resource of the baked plan. Call this every frame before
    /// [`RenderGraph::enqueue_render_passes()`], with the swapchain image acquired for the frame, or `None` to render
    /// headless into an image owned by the graph.
    /// # Errors
    /// - Fails with [`Error::NotBaked`] if the graph was not baked.
    /// - Fails if the device cannot create an image, buffer or event.
    pub fn setup_attachments(&mut self, swapchain: Option<&B::Image>) -> Result<()> {
        let plan = self.plan.as_ref().ok_or(Error::NotBaked)?;
        let count = plan.physical_dimensions.len();
        let physical = &mut self.physical;
        let executor = &mut self.executor;

        physical.images.resize(count, None);
        physical.history_images.resize(count, None);
        physical.buffers.resize(count, None);
        executor.states.resize_with(count, Default::default);
        executor.history_states.resize_with(count, Default::default);
        executor.events.resize_with(count, || None);
        executor.swapchain = swapchain.cloned();

        physical.names = self
            .resources
            .as_slice()
            .iter()
            .filter_map(|resource| resource.physical_index().map(|index| (resource.name().to_owned(), index)))
            .collect();

        for index in 0..count {
            let dim = &plan.physical_dimensions[index];
            let is_swapchain = Some(index) == plan.swapchain_physical_index;

            let changed = if dim.is_buffer() {
                setup_buffer::<B>(&self.device, &mut physical.buffers[index], dim)?
            } else if let (true, Some(image)) = (is_swapchain, swapchain) {
                // A new swapchain image comes in every frame, in an unknown layout.
                physical.images[index] = Some(image.clone());
                executor.states[index] = ResourceState::default();
                false
            } else if let Some(root) = plan.physical_aliases[index] {
                let image = physical.images[root].clone();
                let changed = physical.images[index] != image;
                physical.images[index] = image;
                changed
            } else {
                let transient = dim.transient && !is_swapchain;
                let info = image_create_info(dim, transient);
                setup_image::<B>(&self.device, &mut physical.images[index], &info, &dim.name)?
            };

            if changed {
                executor.states[index] = ResourceState::default();
                executor.events[index] = Some(self.device.create_event()?);
                #[cfg(feature = "log-objects")]
                trace!("Created event for physical resource #{} ({})", index, dim.name);
            } else if !dim.persistent && !dim.is_buffer() {
                executor.states[index].layout = vk::ImageLayout::UNDEFINED;
            }
            if executor.events[index].is_none() {
                executor.events[index] = Some(self.device.create_event()?);
            }

            if plan.has_history[index] {
                let info = image_create_info(dim, false);
                let name = format!("{} (history)", dim.name);
                if setup_image::<B>(&self.device, &mut physical.history_images[index], &info, &name)? {
                    executor.history_states[index] = ResourceState::default();
                }
            } else {
                physical.history_images[index] = None;
            }
        }

        executor.set_up = true;
        Ok(())
    }

    /// Take all physical buffers out of the graph, for example to carry them over to a graph that is baked next.
    pub fn consume_physical_buffers(&mut self) -> Vec<Option<B::Buffer>> {
        std::mem::take(&mut self.physical.buffers)
    }

    /// Install buffers taken from [`RenderGraph::consume_physical_buffers()`]. Buffers that fit the next
    /// `setup_attachments()` are reused.
    pub fn install_physical_buffers(&mut self, buffers: Vec<Option<B::Buffer>>) {
        self.physical.buffers = buffers;
    }

    /// The buffer currently bound to a physical index.
    pub fn consume_persistent_physical_buffer_resource(&self, index: usize) -> Option<B::Buffer> {
        self.physical.physical_buffer(index).cloned()
    }

    /// Bind a buffer to a physical index, replacing what was bound before.
    pub fn install_persistent_physical_buffer_resource(&mut self, index: usize, buffer: B::Buffer) {
        if self.physical.buffers.len() <= index {
            self.physical.buffers.resize(index + 1, None);
        }
        if self.physical.buffers[index].as_ref() != Some(&buffer) {
            if let Some(state) = self.executor.states.get_mut(index) {
                *state = ResourceState::default();
            }
        }
        self.physical.buffers[index] = Some(buffer);
    }

    /// Record and submit every physical pass of the baked plan.
    /// # Errors
    /// - Fails with [`Error::NotBaked`] or [`Error::NotSetUp`] if the graph is not ready to execute.
    /// - Fails if a pass callback or the backend fails. The frame is abandoned in that case.
    pub fn enqueue_render_passes(&mut self) -> Result<()> {
        let plan = self.plan.as_ref().ok_or(Error::NotBaked)?;
        if !self.executor.set_up {
            return Err(Error::NotSetUp.into());
        }

        let mut recorder = FrameRecorder {
            device: &self.device,
            plan,
            passes: &self.passes,
            callbacks: &mut self.callbacks,
            physical: &self.physical,
            sync: &mut self.executor,
            current: None,
            recorded: Vec::new(),
        };
        if let Err(err) = recorder.record_frame() {
            error!("Failed to enqueue render passes: {}", err);
            // Waits of this frame may never have been submitted.
            self.executor.waited_semaphores.clear();
            return Err(err);
        }

        // The image written this frame becomes next frame's history.
        for (index, _) in plan.has_history.iter().enumerate().filter(|(_, history)| **history) {
            let physical = &mut self.physical;
            std::mem::swap(&mut physical.images[index], &mut physical.history_images[index]);
            let executor = &mut self.executor;
            std::mem::swap(&mut executor.states[index], &mut executor.history_states[index]);
        }
        Ok(())
    }
}

/// Command buffer recorded this frame, with what its submission waits for and signals.
struct Submission<B: Backend> {
    queue: PhysicalQueue,
    cmd: B::CommandBuffer,
    waits: Vec<SemaphoreWait<B>>,
    /// One semaphore per queue that waits on this submission.
    signals: BTreeMap<PhysicalQueue, B::Semaphore>,
}

enum BarrierTarget<B: Backend> {
    Image(B::Image),
    Buffer(B::Buffer),
}

fn push_barrier<B: Backend>(
    batch: &mut BarrierBatch<B>,
    target: BarrierTarget<B>,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags2,
    dst_access: vk::AccessFlags2,
) {
    match target {
        BarrierTarget::Image(image) => batch.images.push(ImageBarrier {
            aspect: aspect_flags(image.create_info().format),
            image,
            old_layout,
            new_layout,
            src_access,
            dst_access,
        }),
        BarrierTarget::Buffer(buffer) => batch.buffers.push(BufferBarrier {
            buffer,
            src_access,
            dst_access,
        }),
    }
}

fn batch_for<B: Backend>(batches: &mut Vec<BarrierBatch<B>>, src: PipelineStage, dst: PipelineStage) -> &mut BarrierBatch<B> {
    let position = match batches
        .iter()
        .position(|batch| batch.src_stages == src && batch.dst_stages == dst)
    {
        Some(position) => position,
        None => {
            batches.push(BarrierBatch::new(src, dst));
            batches.len() - 1
        }
    };
    &mut batches[position]
}

/// Barriers collected for one invalidate step.
struct PendingBarriers<B: Backend> {
    batches: Vec<BarrierBatch<B>>,
    event_batch: BarrierBatch<B>,
    events: Vec<usize>,
}

impl<B: Backend> Default for PendingBarriers<B> {
    fn default() -> Self {
        Self {
            batches: Vec::new(),
            event_batch: BarrierBatch::new(PipelineStage::empty(), PipelineStage::empty()),
            events: Vec::new(),
        }
    }
}

fn load_op(clear: bool, load: bool) -> vk::AttachmentLoadOp {
    if clear {
        vk::AttachmentLoadOp::CLEAR
    } else if load {
        vk::AttachmentLoadOp::LOAD
    } else {
        vk::AttachmentLoadOp::DONT_CARE
    }
}

fn store_op(store: bool) -> vk::AttachmentStoreOp {
    if store {
        vk::AttachmentStoreOp::STORE
    } else {
        vk::AttachmentStoreOp::DONT_CARE
    }
}

/// Run the recording callback of a pass. Layered callbacks get the layer being rendered.
fn execute_pass<B: Backend>(
    callbacks: &mut PassCallbacks<B>,
    layer: Option<u32>,
    cmd: &mut B::CommandBuffer,
    physical: &PhysicalResources<B>,
) -> Result<()> {
    match (layer, callbacks.build_render_pass.as_mut(), callbacks.build_render_pass_layered.as_mut()) {
        (Some(layer), _, Some(layered)) => LayeredPassExecutor::execute(&mut **layered, layer, cmd, physical),
        (_, Some(plain), _) => PassExecutor::execute(&mut **plain, cmd, physical),
        (None, None, Some(layered)) => LayeredPassExecutor::execute(&mut **layered, 0, cmd, physical),
        _ => Ok(()),
    }
}

struct FrameRecorder<'a, B: Backend> {
    device: &'a B::Device,
    plan: &'a RenderGraphPlan,
    passes: &'a [RenderPass],
    callbacks: &'a mut [PassCallbacks<B>],
    physical: &'a PhysicalResources<B>,
    sync: &'a mut ExecutorState<B>,
    current: Option<Submission<B>>,
    /// Finished submissions of this frame, in submission order.
    recorded: Vec<Submission<B>>,
}

impl<'a, B: Backend> FrameRecorder<'a, B> {
    fn record_frame(&mut self) -> Result<()> {
        for index in std::mem::take(&mut self.sync.signaled_events) {
            if let Some(event) = &self.sync.events[index] {
                self.device.reset_event(event)?;
            }
        }

        let sync = &mut *self.sync;
        sync.free_semaphores.append(&mut sync.waited_semaphores);
        // Left over only if the previous frame failed.
        for state in sync.states.iter_mut().chain(sync.history_states.iter_mut()) {
            state.pending_signals.clear();
        }

        for index in 0..self.plan.physical_passes.len() {
            self.record_physical_pass(index)?;
        }

        if let Some(swapchain) = self.sync.swapchain.clone() {
            if self.plan.swapchain_physical_index.is_none() {
                self.blit_to_swapchain(&swapchain)?;
            }
        }

        self.close();
        let carried = self.carry_signals()?;
        self.submit_all()?;
        for (queue, semaphore) in carried {
            self.sync.carried_semaphores.entry(queue).or_default().push(semaphore);
        }
        Ok(())
    }

    fn submission(current: &mut Option<Submission<B>>) -> Result<&mut Submission<B>, Error> {
        current
            .as_mut()
            .ok_or(Error::Uncategorized("no command buffer is being recorded"))
    }

    /// Make sure a command buffer for `queue` is being recorded, finishing the current one if it is for another queue.
    fn begin(&mut self, queue: PhysicalQueue) -> Result<()> {
        if self.current.as_ref().map_or(false, |submission| submission.queue == queue) {
            return Ok(());
        }

        self.close();
        let cmd = self.device.begin_command_buffer(queue)?;
        let mut waits = Vec::new();
        for semaphore in self.sync.carried_semaphores.remove(&queue).unwrap_or_default() {
            trace!("Waiting on semaphore from the previous frame on {:?}", queue);
            self.sync.waited_semaphores.push(semaphore.clone());
            waits.push(SemaphoreWait {
                semaphore,
                stages: PipelineStage::ALL_COMMANDS,
            });
        }
        self.current = Some(Submission {
            queue,
            cmd,
            waits,
            signals: BTreeMap::new(),
        });
        Ok(())
    }

    /// Finish the command buffer being recorded. It is submitted together with the rest of the frame.
    fn close(&mut self) {
        let Some(submission) = self.current.take() else {
            return;
        };

        // Events cannot be waited on from another command buffer.
        for state in self.sync.states.iter_mut().chain(self.sync.history_states.iter_mut()) {
            state.signaled_event = None;
        }
        self.recorded.push(submission);
    }

    /// The semaphore `signaler` signals for `queue`. Reuses a free semaphore the first time it is asked for.
    fn signal_for(
        device: &B::Device,
        sync: &mut ExecutorState<B>,
        signaler: &mut Submission<B>,
        queue: PhysicalQueue,
    ) -> Result<B::Semaphore> {
        if let Some(semaphore) = signaler.signals.get(&queue) {
            return Ok(semaphore.clone());
        }

        let semaphore = match sync.free_semaphores.pop() {
            Some(semaphore) => semaphore,
            None => {
                let semaphore = device.create_semaphore()?;
                #[cfg(feature = "log-objects")]
                trace!("Created semaphore for {:?} -> {:?}", signaler.queue, queue);
                semaphore
            }
        };
        signaler.signals.insert(queue, semaphore.clone());
        Ok(semaphore)
    }

    /// Resources still waited for on another queue at the end of the frame are waited on by the first submission on
    /// that queue in the next frame.
    fn carry_signals(&mut self) -> Result<Vec<(PhysicalQueue, B::Semaphore)>> {
        let Self {
            device,
            sync,
            recorded,
            ..
        } = self;

        let mut pending = BTreeSet::new();
        for state in sync.states.iter_mut() {
            pending.extend(
                std::mem::take(&mut state.pending_signals)
                    .into_iter()
                    .map(|(queue, source)| (source, queue)),
            );
        }

        let mut carried = Vec::with_capacity(pending.len());
        for (source, queue) in pending {
            let signaler = recorded
                .get_mut(source)
                .ok_or(Error::Uncategorized("semaphore signal from an unknown submission"))?;
            // Already waited on by a submission on that queue this frame.
            if signaler.signals.contains_key(&queue) {
                continue;
            }
            carried.push((queue, Self::signal_for(*device, sync, signaler, queue)?));
        }
        Ok(carried)
    }

    fn submit_all(&mut self) -> Result<()> {
        for submission in self.recorded.drain(..) {
            let signals: Vec<B::Semaphore> = submission.signals.into_values().collect();
            trace!(
                "Submitting to {:?} ({} waits, {} signals)",
                submission.queue,
                submission.waits.len(),
                signals.len()
            );
            self.device
                .submit(submission.queue, submission.cmd, &submission.waits, &signals)?;
        }
        Ok(())
    }

    fn record_physical_pass(&mut self, index: usize) -> Result<()> {
        let plan = self.plan;
        let physical_pass = &plan.physical_passes[index];

        let mut active = false;
        for &pass in &physical_pass.passes {
            active |= self.callbacks[pass].need_render_pass();
        }
        if !active {
            debug!("Skipping physical pass #{}", index);
            self.alias_transfers(physical_pass);
            return Ok(());
        }

        self.begin(physical_pass.queue.physical_queue())?;
        self.begin_label(physical_pass)?;

        self.invalidate(physical_pass)?;
        if physical_pass.is_render_pass() {
            self.record_render_pass(physical_pass)?;
        } else {
            let Self {
                current,
                callbacks,
                physical,
                ..
            } = self;
            let submission = Self::submission(current)?;
            for &pass in &physical_pass.passes {
                execute_pass(&mut callbacks[pass], None, &mut submission.cmd, physical)?;
            }
        }
        self.generate_mipmaps(physical_pass)?;
        self.flush(physical_pass)?;

        self.end_label()?;
        self.alias_transfers(physical_pass);
        Ok(())
    }

    #[cfg(feature = "debug-markers")]
    fn begin_label(&mut self, physical_pass: &PhysicalPass) -> Result<()> {
        let passes = self.passes;
        let name = physical_pass
            .passes
            .iter()
            .map(|&pass| passes[pass].name())
            .collect::<Vec<_>>()
            .join(" + ");
        let color = physical_pass
            .passes
            .iter()
            .find_map(|&pass| passes[pass].debug_color)
            .unwrap_or([1.0, 1.0, 1.0, 1.0]);
        Self::submission(&mut self.current)?.cmd.begin_label(&name, color);
        Ok(())
    }

    #[cfg(not(feature = "debug-markers"))]
    fn begin_label(&mut self, _: &PhysicalPass) -> Result<()> {
        Ok(())
    }

    #[cfg(feature = "debug-markers")]
    fn end_label(&mut self) -> Result<()> {
        Self::submission(&mut self.current)?.cmd.end_label();
        Ok(())
    }

    #[cfg(not(feature = "debug-markers"))]
    fn end_label(&mut self) -> Result<()> {
        Ok(())
    }

    fn invalidate(&mut self, physical_pass: &PhysicalPass) -> Result<()> {
        let queue = physical_pass.queue.physical_queue();
        let mut pending = PendingBarriers::default();
        for barrier in &physical_pass.invalidate {
            let discard = physical_pass.discards.contains(&barrier.resource_index);
            self.invalidate_barrier(barrier, discard, queue, &mut pending)?;
        }
        self.emit(pending)
    }

    /// Bring one resource into the state `barrier` asks for. Waits on a semaphore if another queue used the resource
    /// last, waits on an event if it was flushed earlier in this command buffer, and uses a pipeline barrier otherwise.
    fn invalidate_barrier(
        &mut self,
        barrier: &Barrier,
        discard: bool,
        queue: PhysicalQueue,
        pending: &mut PendingBarriers<B>,
    ) -> Result<()> {
        let index = barrier.resource_index;
        let plan = self.plan;
        let dim = &plan.physical_dimensions[index];
        let Self {
            device,
            current,
            recorded,
            sync,
            physical,
            ..
        } = self;
        let submission = Self::submission(current)?;

        let source = if barrier.history {
            sync.history_states[index].pending_signals.remove(&queue)
        } else {
            sync.states[index].pending_signals.remove(&queue)
        };
        let waited = match source {
            Some(source) => {
                trace!("Waiting on semaphore for `{}` on {:?}", dim.name, queue);
                let signaler = recorded
                    .get_mut(source)
                    .ok_or(Error::Uncategorized("semaphore signal from an unknown submission"))?;
                let semaphore = Self::signal_for(*device, sync, signaler, queue)?;
                // An earlier submission on this queue may wait on the same semaphore already.
                let earlier = submission
                    .waits
                    .iter_mut()
                    .chain(recorded.iter_mut().flat_map(|recorded| recorded.waits.iter_mut()))
                    .find(|wait| wait.semaphore == semaphore);
                match earlier {
                    Some(wait) => wait.stages |= barrier.stages,
                    None => {
                        sync.waited_semaphores.push(semaphore.clone());
                        submission.waits.push(SemaphoreWait {
                            semaphore,
                            stages: barrier.stages,
                        });
                    }
                }
                true
            }
            None => false,
        };

        let state = if barrier.history {
            &mut sync.history_states[index]
        } else {
            &mut sync.states[index]
        };

        let target = if dim.is_buffer() {
            let buffer = physical
                .physical_buffer(index)
                .ok_or_else(|| Error::NoResourceBound(dim.name.clone()))?;
            BarrierTarget::Buffer(buffer.clone())
        } else {
            let image = if barrier.history {
                physical.physical_history_image(index)
            } else {
                physical.physical_image(index)
            };
            BarrierTarget::Image(image.ok_or_else(|| Error::NoResourceBound(dim.name.clone()))?.clone())
        };

        let old_layout = if discard || dim.is_buffer() {
            vk::ImageLayout::UNDEFINED
        } else {
            state.layout
        };
        let layout_change = !dim.is_buffer() && old_layout != barrier.layout;
        let needs_sync = layout_change || !state.to_flush.is_empty() || !state.covers(barrier);
        let never_used = state.src_stages.is_empty();

        if needs_sync {
            trace!(
                "Invalidate `{}`: {:?} -> {:?}, access {:?}, stages {:?}",
                dim.name,
                old_layout,
                barrier.layout,
                barrier.access,
                barrier.stages
            );

            if waited {
                // The semaphore made all writes visible, only a layout transition may be left.
                if layout_change {
                    let batch = batch_for(&mut pending.batches, barrier.stages, barrier.stages);
                    push_barrier(batch, target, old_layout, barrier.layout, vk::AccessFlags2::empty(), barrier.access);
                }
            } else if let Some(event) = state.signaled_event {
                pending.event_batch.src_stages |= state.src_stages;
                pending.event_batch.dst_stages |= barrier.stages;
                push_barrier(
                    &mut pending.event_batch,
                    target,
                    old_layout,
                    barrier.layout,
                    state.to_flush,
                    barrier.access,
                );
                if !pending.events.contains(&event) {
                    pending.events.push(event);
                }
            } else if !(dim.is_buffer() && never_used) {
                let src = if never_used {
                    PipelineStage::TOP_OF_PIPE
                } else {
                    state.src_stages
                };
                let batch = batch_for(&mut pending.batches, src, barrier.stages);
                push_barrier(batch, target, old_layout, barrier.layout, state.to_flush, barrier.access);
            }

            state.to_flush = vk::AccessFlags2::empty();
            state.invalidated_stages |= barrier.stages;
            state.invalidated_access |= barrier.access;
        }

        if !dim.is_buffer() {
            state.layout = barrier.layout;
        }
        Ok(())
    }

    fn emit(&mut self, pending: PendingBarriers<B>) -> Result<()> {
        let Self {
            current,
            sync,
            ..
        } = self;
        let submission = Self::submission(current)?;

        if !pending.events.is_empty() {
            let events: Vec<&B::Event> = pending
                .events
                .iter()
                .filter_map(|&event| sync.events[event].as_ref())
                .collect();
            submission.cmd.wait_events(&events, &pending.event_batch);
        }
        for batch in pending.batches.iter().filter(|batch| !batch.is_empty()) {
            submission.cmd.pipeline_barrier(batch);
        }
        Ok(())
    }

    fn color_final_layout(&self, physical_pass: &PhysicalPass, attachment: usize) -> vk::ImageLayout {
        let index = physical_pass.physical_color_attachments[attachment];
        if Some(index) == self.plan.swapchain_physical_index && self.sync.swapchain.is_some() {
            vk::ImageLayout::PRESENT_SRC_KHR
        } else {
            physical_pass.render_pass.color_final_layouts[attachment]
        }
    }

    fn render_pass_info(&mut self, physical_pass: &PhysicalPass, base_layer: u32, layer_count: u32) -> Result<RenderPassInfo<B>> {
        let plan = self.plan;
        let rp = &physical_pass.render_pass;
        let mut render_area = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };

        let mut color_attachments = Vec::with_capacity(physical_pass.physical_color_attachments.len());
        for (attachment, &index) in physical_pass.physical_color_attachments.iter().enumerate() {
            let bit = attachment as u32;
            let dim = &plan.physical_dimensions[index];
            let image = self
                .physical
                .physical_image(index)
                .ok_or_else(|| Error::NoResourceBound(dim.name.clone()))?
                .clone();
            let clear = if rp.clears(bit) {
                physical_pass
                    .color_clear_requests
                    .iter()
                    .find(|request| request.attachment == bit)
                    .and_then(|request| self.callbacks[request.pass].clear_color(request.index))
                    .map(AttachmentClear::Color)
            } else {
                None
            };

            render_area.width = render_area.width.min(dim.width);
            render_area.height = render_area.height.min(dim.height);
            color_attachments.push(RenderPassAttachment {
                image,
                format: dim.format,
                samples: dim.samples,
                load_op: load_op(rp.clears(bit), rp.loads(bit)),
                store_op: store_op(rp.stores(bit)),
                initial_layout: rp.color_initial_layouts[attachment],
                final_layout: self.color_final_layout(physical_pass, attachment),
                clear,
            });
        }

        let depth_stencil_attachment = match physical_pass.physical_depth_stencil_attachment {
            Some(index) => {
                let dim = &plan.physical_dimensions[index];
                let image = self
                    .physical
                    .physical_image(index)
                    .ok_or_else(|| Error::NoResourceBound(dim.name.clone()))?
                    .clone();
                let clear = match (rp.clear_depth_stencil, physical_pass.depth_clear_request) {
                    (true, Some(pass)) => self.callbacks[pass]
                        .clear_depth_stencil()
                        .map(AttachmentClear::DepthStencil),
                    _ => None,
                };

                render_area.width = render_area.width.min(dim.width);
                render_area.height = render_area.height.min(dim.height);
                Some(RenderPassAttachment {
                    image,
                    format: dim.format,
                    samples: dim.samples,
                    load_op: load_op(rp.clear_depth_stencil, rp.load_depth_stencil),
                    store_op: store_op(rp.store_depth_stencil),
                    initial_layout: rp.depth_stencil_initial_layout,
                    final_layout: rp.depth_stencil_final_layout,
                    clear,
                })
            }
            None => None,
        };

        let passes = self.passes;
        Ok(RenderPassInfo {
            name: physical_pass
                .passes
                .iter()
                .map(|&pass| passes[pass].name())
                .collect::<Vec<_>>()
                .join(" + "),
            color_attachments,
            depth_stencil_attachment,
            subpasses: rp.subpasses.clone(),
            render_area,
            base_layer,
            layer_count,
        })
    }

    fn record_render_pass(&mut self, physical_pass: &PhysicalPass) -> Result<()> {
        let layers = physical_pass.layers.max(1);
        let layered = layers > 1
            && physical_pass
                .passes
                .iter()
                .any(|&pass| self.callbacks[pass].build_render_pass_layered.is_some());
        let instances: Vec<(u32, u32)> = if layered {
            (0..layers).map(|layer| (layer, 1)).collect()
        } else {
            vec![(0, layers)]
        };

        for (base_layer, layer_count) in instances {
            let info = self.render_pass_info(physical_pass, base_layer, layer_count)?;
            let Self {
                current,
                callbacks,
                physical,
                ..
            } = self;
            let submission = Self::submission(current)?;
            submission.cmd.begin_render_pass(&info)?;

            for (subpass, &pass) in physical_pass.passes.iter().enumerate() {
                if subpass > 0 {
                    submission.cmd.next_subpass();
                }
                for request in &physical_pass.scaled_clear_requests[subpass] {
                    let input = physical
                        .physical_image(request.physical_resource)
                        .ok_or(Error::NoResourceBound(format!("#{}", request.physical_resource)))?;
                    submission.cmd.draw_scaled_input(&ScaledClear {
                        input: input.clone(),
                        color_attachment: request.target,
                    })?;
                }
                execute_pass(&mut callbacks[pass], layered.then_some(base_layer), &mut submission.cmd, physical)?;
            }

            submission.cmd.end_render_pass();
        }

        for (attachment, &index) in physical_pass.physical_color_attachments.iter().enumerate() {
            self.sync.states[index].layout = self.color_final_layout(physical_pass, attachment);
        }
        if let Some(index) = physical_pass.physical_depth_stencil_attachment {
            self.sync.states[index].layout = physical_pass.render_pass.depth_stencil_final_layout;
        }
        Ok(())
    }

    fn generate_mipmaps(&mut self, physical_pass: &PhysicalPass) -> Result<()> {
        let Self {
            current,
            sync,
            physical,
            plan,
            ..
        } = self;
        let submission = Self::submission(current)?;
        for request in &physical_pass.mipmap_requests {
            let index = request.physical_resource;
            let image = physical
                .physical_image(index)
                .ok_or_else(|| Error::NoResourceBound(plan.physical_dimensions[index].name.clone()))?;
            submission
                .cmd
                .generate_mipmaps(image, request.layout, request.stages, request.access)?;
            sync.states[index].layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
        }
        Ok(())
    }

    /// Record how the physical pass leaves every resource, and signal whatever later users on other queues wait for.
    fn flush(&mut self, physical_pass: &PhysicalPass) -> Result<()> {
        let queue = physical_pass.queue.physical_queue();
        let Self {
            plan,
            current,
            recorded,
            sync,
            ..
        } = self;
        let submission = Self::submission(current)?;
        let source = recorded.len();

        for barrier in &physical_pass.flush {
            let index = barrier.resource_index;
            let dim = &plan.physical_dimensions[index];
            let state = if barrier.history {
                &mut sync.history_states[index]
            } else {
                &mut sync.states[index]
            };

            if !dim.is_buffer() {
                state.layout = barrier.layout;
            }
            state.src_stages = barrier.stages;
            state.to_flush = barrier.access;
            state.invalidated_stages = PipelineStage::empty();
            state.invalidated_access = vk::AccessFlags2::empty();
            state.signaled_event = None;

            if barrier.history {
                continue;
            }

            let other_queues: Vec<PhysicalQueue> = dim
                .queues
                .physical_queues()
                .into_iter()
                .filter(|&other| other != queue)
                .collect();

            if other_queues.is_empty() {
                if let Some(event) = &sync.events[index] {
                    submission.cmd.set_event(event, barrier.stages);
                    state.signaled_event = Some(index);
                    if !sync.signaled_events.contains(&index) {
                        sync.signaled_events.push(index);
                    }
                }
            } else {
                // The semaphore is only signaled once a later submission on the other queue waits for it.
                for other in other_queues {
                    state.pending_signals.insert(other, source);
                }
            }
        }
        Ok(())
    }

    /// Hand the image of each aliased resource over to the next resource sharing it.
    fn alias_transfers(&mut self, physical_pass: &PhysicalPass) {
        for &(from, to) in &physical_pass.alias_transfer {
            trace!("Alias transfer: {} -> {}", from, to);
            let mut state = self.sync.states[from].clone();
            state.layout = vk::ImageLayout::UNDEFINED;
            state.to_flush = vk::AccessFlags2::empty();
            self.sync.states[to] = state;
        }
    }

    /// Copy the backbuffer into the swapchain image and prepare it for presentation.
    fn blit_to_swapchain(&mut self, swapchain: &B::Image) -> Result<()> {
        let index = self.plan.backbuffer_physical_index;
        self.begin(PhysicalQueue::Graphics)?;

        let mut pending = PendingBarriers::default();
        let read = Barrier {
            resource_index: index,
            layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            access: vk::AccessFlags2::TRANSFER_READ,
            stages: PipelineStage::TRANSFER,
            history: false,
        };
        self.invalidate_barrier(&read, false, PhysicalQueue::Graphics, &mut pending)?;
        let acquire = batch_for(&mut pending.batches, PipelineStage::ALL_COMMANDS, PipelineStage::TRANSFER);
        push_barrier(
            acquire,
            BarrierTarget::Image(swapchain.clone()),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags2::empty(),
            vk::AccessFlags2::TRANSFER_WRITE,
        );
        self.emit(pending)?;

        let plan = self.plan;
        let dim = &plan.physical_dimensions[index];
        let backbuffer = self
            .physical
            .physical_image(index)
            .ok_or_else(|| Error::NoResourceBound(dim.name.clone()))?;
        let submission = Self::submission(&mut self.current)?;
        submission.cmd.blit_image(
            backbuffer,
            swapchain,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;

        let mut present = BarrierBatch::new(PipelineStage::TRANSFER, PipelineStage::BOTTOM_OF_PIPE);
        push_barrier(
            &mut present,
            BarrierTarget::Image(swapchain.clone()),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::AccessFlags2::empty(),
        );
        submission.cmd.pipeline_barrier(&present);

        let state = &mut self.sync.states[index];
        state.src_stages = PipelineStage::TRANSFER;
        state.to_flush = vk::AccessFlags2::empty();
        Ok(())
    }
}
