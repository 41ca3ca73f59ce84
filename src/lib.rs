//! Declarative Vulkan render graph
//!
//! Passes declare the images and buffers they read and write, and the graph works out everything else: which passes
//! need to run, in what order, which passes can share a render pass as subpasses, which resources can share memory,
//! and every image layout transition, pipeline barrier, event and semaphore in between.
//!
//! The graph does not own a Vulkan device. It drives whatever wrapper you use through a small set of traits in
//! [`command_buffer::traits`], bundled by a [`Backend`] implementation.
//!
//! To get started, the easiest way is to simply
//! ```
//! // Import everything at once.
//! use vk_render_graph::prelude::*;
//! // Or under a namespace.
//! use vk_render_graph::prelude as rg;
//! ```
//!
//! # Example
//!
//! ```ignore
//! use vk_render_graph::prelude::*;
//!
//! let mut graph = RenderGraph::new(device);
//! graph.add_pass("gbuffer", RenderGraphQueue::Graphics)
//!     .add_color_output("albedo", AttachmentInfo::default(), None)
//!     .set_depth_stencil_output("depth", AttachmentInfo::default().format(vk::Format::D32_SFLOAT))
//!     .set_build_render_pass(|cmd, resources| Ok(()));
//! graph.add_pass("bloom", RenderGraphQueue::AsyncCompute)
//!     .add_texture_input("albedo", None)
//!     .add_storage_texture_output("bloom", AttachmentInfo::relative_to("albedo", 0.5, 0.5), None)
//!     .set_build_render_pass(|cmd, resources| Ok(()));
//! graph.add_pass("compose", RenderGraphQueue::Graphics)
//!     .add_texture_input("albedo", None)
//!     .add_texture_input("bloom", None)
//!     .add_color_output("final", AttachmentInfo::default(), None)
//!     .set_build_render_pass(|cmd, resources| Ok(()));
//! graph.set_backbuffer_source("final");
//! graph.bake()?;
//! graph.log();
//!
//! loop {
//!     let image = acquire_swapchain_image()?;
//!     graph.setup_attachments(Some(&image))?;
//!     graph.enqueue_render_passes()?;
//! }
//! ```
//! For further documentation, check out the following modules
//! - [`graph`] for declaring passes, baking and executing the graph.
//! - [`command_buffer`] for the traits a backend implements.
//! - [`core`] for the error type and queue model.
//! - [`util`] for format helpers and conversions into Vulkan types.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

pub mod prelude;
pub use crate::prelude::*;

pub mod command_buffer;
pub mod core;
pub mod graph;
pub mod util;

/// Pipeline stage mask used for every stage the graph plans.
pub type PipelineStage = ash::vk::PipelineStageFlags2;
