//! The render graph turns a declarative list of passes into a schedule of Vulkan work. Each pass declares the
//! resources it reads and writes by name, in a category that says how it uses them (color attachment, sampled
//! texture, storage buffer, ...). Baking the graph then:
//! - traverses the passes backwards from the backbuffer, dropping everything that does not contribute to it,
//! - reorders the remaining passes to give the GPU room between producers and consumers,
//! - assigns physical resources, merging resources that are passed through a pass in place,
//! - merges adjacent graphics passes into multi-subpass render passes where that is legal,
//! - plans image layouts and barriers, and lets resources with disjoint lifetimes share memory.
//!
//! Actual images and buffers are bound in [`RenderGraph::setup_attachments()`](crate::RenderGraph::setup_attachments),
//! after which [`RenderGraph::enqueue_render_passes()`](crate::RenderGraph::enqueue_render_passes) records and submits
//! a frame.
//!
//! Through the [`GraphViz`](pass_graph::GraphViz) trait, it's possible to export a graphviz-compatible dot file of the
//! baked passes.
//!
//! # Example
//!
//! ```ignore
//! use vk_render_graph::prelude::*;
//!
//! let mut graph = RenderGraph::new(device);
//! graph.set_backbuffer_dimensions(ResourceDimensions::swapchain(1920, 1080, vk::Format::B8G8R8A8_SRGB));
//!
//! graph.add_pass("scene", RenderGraphQueue::Graphics)
//!     .add_color_output("hdr", AttachmentInfo::default().format(vk::Format::R16G16B16A16_SFLOAT), None)
//!     .set_depth_stencil_output("depth", AttachmentInfo::default().format(vk::Format::D32_SFLOAT))
//!     .set_build_render_pass(|cmd, resources| Ok(()));
//! graph.add_pass("tonemap", RenderGraphQueue::Graphics)
//!     .add_texture_input("hdr", None)
//!     .add_color_output("output", AttachmentInfo::default(), None)
//!     .set_build_render_pass(|cmd, resources| Ok(()));
//! graph.set_backbuffer_source("output");
//! graph.bake()?;
//!
//! // Every frame:
//! graph.setup_attachments(Some(&swapchain_image))?;
//! graph.enqueue_render_passes()?;
//! ```
//!
//! For more complex passes, see the [`pass`] module documentation.

pub mod barrier;
pub mod pass;
pub mod pass_graph;
pub mod physical_pass;
pub mod physical_resource;
pub mod record;
pub mod resource;
pub mod virtual_resource;

pub(crate) mod aliasing;
pub(crate) mod task_graph;
