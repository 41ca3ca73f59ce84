//! Plain data handed from the render graph to the backend: creation parameters, barrier batches and render pass
//! begin info.

use ash::vk;

use crate::command_buffer::traits::Backend;
use crate::core::queue::QueueFlags;
use crate::graph::pass::{ClearColor, ClearDepthStencil};
use crate::graph::physical_pass::SubpassLayout;
use crate::PipelineStage;

/// Parameters for a new image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCreateInfo {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub image_type: vk::ImageType,
    pub layers: u32,
    pub levels: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    /// Every logical queue that touches the image. More than one physical queue means concurrent sharing.
    pub queues: QueueFlags,
    pub initial_layout: vk::ImageLayout,
    /// Contents never leave a single render pass, so the backend may use lazily allocated memory.
    pub transient: bool,
    /// Views may use a different format than the image. Set for storage images.
    pub mutable_format: bool,
    /// Views may reinterpret between the UNORM and sRGB variants of the format.
    pub mutable_srgb: bool,
}

impl Default for ImageCreateInfo {
    fn default() -> Self {
        Self {
            format: vk::Format::UNDEFINED,
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            image_type: vk::ImageType::TYPE_2D,
            layers: 1,
            levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::empty(),
            queues: QueueFlags::empty(),
            initial_layout: vk::ImageLayout::UNDEFINED,
            transient: false,
            mutable_format: false,
            mutable_srgb: false,
        }
    }
}

/// Parameters for a new buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferCreateInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub queues: QueueFlags,
    /// Fill the buffer with zeroes before first use.
    pub zero_initialize: bool,
}

/// Image memory barrier inside a [`BarrierBatch`].
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Clone(bound = ""), PartialEq(bound = ""))]
pub struct ImageBarrier<B: Backend> {
    pub image: B::Image,
    /// Aspects of the image format, covering every mip level and layer.
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// Buffer memory barrier inside a [`BarrierBatch`].
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Clone(bound = ""), PartialEq(bound = ""))]
pub struct BufferBarrier<B: Backend> {
    pub buffer: B::Buffer,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// A set of barriers sharing one source and destination stage mask. Translates to one `vkCmdPipelineBarrier2()`.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Clone(bound = ""), PartialEq(bound = ""), Default(bound = ""))]
pub struct BarrierBatch<B: Backend> {
    pub src_stages: PipelineStage,
    pub dst_stages: PipelineStage,
    pub images: Vec<ImageBarrier<B>>,
    pub buffers: Vec<BufferBarrier<B>>,
}

impl<B: Backend> BarrierBatch<B> {
    pub fn new(src_stages: PipelineStage, dst_stages: PipelineStage) -> Self {
        Self {
            src_stages,
            dst_stages,
            images: Vec::new(),
            buffers: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty()
    }
}

/// Clear value of a render pass attachment.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum AttachmentClear {
    Color(ClearColor),
    DepthStencil(ClearDepthStencil),
}

/// One attachment of a render pass instance.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Clone(bound = ""), PartialEq(bound = ""))]
pub struct RenderPassAttachment<B: Backend> {
    pub image: B::Image,
    pub format: vk::Format,
    pub samples: u32,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    pub clear: Option<AttachmentClear>,
}

/// Everything the backend needs to begin a render pass instance. Subpass references index into
/// `color_attachments`, with the depth-stencil attachment referred to by `color_attachments.len()`.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Clone(bound = ""), PartialEq(bound = ""))]
pub struct RenderPassInfo<B: Backend> {
    pub name: String,
    pub color_attachments: Vec<RenderPassAttachment<B>>,
    pub depth_stencil_attachment: Option<RenderPassAttachment<B>>,
    pub subpasses: Vec<SubpassLayout>,
    pub render_area: vk::Extent2D,
    pub base_layer: u32,
    pub layer_count: u32,
}

/// Draw a color input, rescaled, into a color attachment of the current subpass.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Clone(bound = ""), PartialEq(bound = ""))]
pub struct ScaledClear<B: Backend> {
    pub input: B::Image,
    /// Index of the target in the subpass color attachment list.
    pub color_attachment: u32,
}

/// Wait for a semaphore before the given stages of a submission execute.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Clone(bound = ""), PartialEq(bound = ""))]
pub struct SemaphoreWait<B: Backend> {
    pub semaphore: B::Semaphore,
    pub stages: PipelineStage,
}
