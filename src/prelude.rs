pub use ash::vk;

pub use crate::PipelineStage;
pub use crate::core::error::Error;
pub use crate::core::queue::{PhysicalQueue, QueueFlags, RenderGraphQueue};

pub use crate::command_buffer::state::*;
pub use crate::command_buffer::traits::*;

pub use crate::graph::barrier::Barrier;
pub use crate::graph::pass::{ClearColor, ClearDepthStencil, LayeredPassExecutor, PassBuilder, PassExecutor, RenderPass};
pub use crate::graph::pass_graph::{GraphViz, RenderGraph, RenderGraphPlan, MAX_ATTACHMENTS};
pub use crate::graph::physical_pass::*;
pub use crate::graph::physical_resource::{PhysicalResources, ResourceDimensions};
pub use crate::graph::resource::{AttachmentInfo, BufferInfo, ResourceType, SizeClass};
pub use crate::graph::virtual_resource::{RenderResource, ResourceHandle};

pub use crate::util::format::*;
pub use crate::util::to_vk::{AsVulkanType, IntoVulkanType};
