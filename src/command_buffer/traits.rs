//! Services the render graph consumes. Implement these for your Vulkan wrapper to drive the graph.

use std::fmt::Debug;

use anyhow::Result;
use ash::vk;

use crate::command_buffer::state::{BarrierBatch, BufferCreateInfo, ImageCreateInfo, RenderPassInfo, ScaledClear, SemaphoreWait};
use crate::core::queue::PhysicalQueue;
use crate::PipelineStage;

/// A reference-counted image handle. Two handles compare equal if they refer to the same image.
pub trait GpuImage: Clone + Debug + PartialEq {
    /// Parameters the image was created with.
    fn create_info(&self) -> &ImageCreateInfo;
    /// Attach a name for debuggers and validation messages.
    fn set_debug_name(&self, name: &str);
    /// Usage flags of the image.
    fn usage(&self) -> vk::ImageUsageFlags {
        self.create_info().usage
    }
}

/// A reference-counted buffer handle. Two handles compare equal if they refer to the same buffer.
pub trait GpuBuffer: Clone + Debug + PartialEq {
    /// Parameters the buffer was created with.
    fn create_info(&self) -> &BufferCreateInfo;
    /// Attach a name for debuggers and validation messages.
    fn set_debug_name(&self, name: &str);
    /// Usage flags of the buffer.
    fn usage(&self) -> vk::BufferUsageFlags {
        self.create_info().usage
    }
}

/// Bundles the handle types of a Vulkan backend.
pub trait Backend: Sized + 'static {
    type Device: Device<Self>;
    type Image: GpuImage;
    type Buffer: GpuBuffer;
    type Event: Debug;
    type Semaphore: Clone + Debug + PartialEq;
    type CommandBuffer: GraphCommandBuffer<Self>;
}

/// Creates images and buffers.
pub trait ResourceFactory<B: Backend> {
    fn create_image(&self, info: &ImageCreateInfo) -> Result<B::Image>;
    fn create_buffer(&self, info: &BufferCreateInfo) -> Result<B::Buffer>;
}

/// Allocates and submits command buffers.
pub trait CommandInterface<B: Backend> {
    /// Get a command buffer in the recording state for a queue.
    fn begin_command_buffer(&self, queue: PhysicalQueue) -> Result<B::CommandBuffer>;
    /// Finish and submit a command buffer. Fences are managed by the caller.
    fn submit(
        &self,
        queue: PhysicalQueue,
        cmd: B::CommandBuffer,
        waits: &[SemaphoreWait<B>],
        signals: &[B::Semaphore],
    ) -> Result<()>;
}

/// Creates synchronization primitives.
pub trait SyncService<B: Backend> {
    fn create_event(&self) -> Result<B::Event>;
    fn create_semaphore(&self) -> Result<B::Semaphore>;
    fn reset_event(&self, event: &B::Event) -> Result<()>;
}

/// Every service the render graph needs to allocate and execute.
pub trait Device<B: Backend>: ResourceFactory<B> + CommandInterface<B> + SyncService<B> {}

impl<B: Backend, T> Device<B> for T where T: ResourceFactory<B> + CommandInterface<B> + SyncService<B> {}

/// Commands the render graph records itself. User commands are recorded by the pass callbacks, which get the full
/// command buffer type.
pub trait GraphCommandBuffer<B: Backend> {
    /// Equivalent of `vkCmdPipelineBarrier2`.
    fn pipeline_barrier(&mut self, batch: &BarrierBatch<B>);
    /// Equivalent of `vkCmdSetEvent2`.
    fn set_event(&mut self, event: &B::Event, stages: PipelineStage);
    /// Equivalent of `vkCmdWaitEvents2`, with the barriers of `batch` applied after the wait.
    fn wait_events(&mut self, events: &[&B::Event], batch: &BarrierBatch<B>);
    fn begin_render_pass(&mut self, info: &RenderPassInfo<B>) -> Result<()>;
    fn next_subpass(&mut self);
    fn end_render_pass(&mut self);
    /// Draw a full screen quad sampling `clear.input` into a color attachment of the current subpass.
    fn draw_scaled_input(&mut self, clear: &ScaledClear<B>) -> Result<()>;
    /// Blit the whole of `src` into the whole of `dst`.
    fn blit_image(&mut self, src: &B::Image, dst: &B::Image, src_layout: vk::ImageLayout, dst_layout: vk::ImageLayout) -> Result<()>;
    fn copy_buffer(&mut self, src: &B::Buffer, dst: &B::Buffer, size: vk::DeviceSize) -> Result<()>;
    /// Fill mip levels `1..` of `image` from level 0. Level 0 is in `base_layout`, last written at `base_stage` with
    /// `base_access`. All levels end up in `TRANSFER_SRC_OPTIMAL`.
    fn generate_mipmaps(
        &mut self,
        image: &B::Image,
        base_layout: vk::ImageLayout,
        base_stage: PipelineStage,
        base_access: vk::AccessFlags2,
    ) -> Result<()>;
    /// Open a debug label region. Only called with the `debug-markers` feature.
    fn begin_label(&mut self, name: &str, color: [f32; 4]);
    fn end_label(&mut self);
}
