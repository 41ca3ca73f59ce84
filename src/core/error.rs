//! Exposes the render graph error type

use ash::vk;
use thiserror::Error;

use crate::graph::resource::ResourceType;

/// Error type that the render graph can return.
///
/// Declaration and planning errors are returned from [`RenderGraph::bake()`](crate::RenderGraph::bake),
/// execution errors from [`RenderGraph::setup_attachments()`](crate::RenderGraph::setup_attachments) and
/// [`RenderGraph::enqueue_render_passes()`](crate::RenderGraph::enqueue_render_passes).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// `bake()` was called before a backbuffer source was set.
    #[error("No backbuffer source was set.")]
    NoBackbufferSource,
    /// The backbuffer source names a resource that was never declared.
    #[error("Backbuffer source `{0}` does not exist.")]
    BackbufferSourceNotFound(String),
    /// A pass reads a resource that no pass writes.
    #[error("Pass `{pass}` reads `{resource}`, but no pass writes to it.")]
    NoWriter { pass: String, resource: String },
    /// Traversal from the backbuffer went deeper than the number of passes.
    #[error("Cycle detected in render graph at pass `{0}`.")]
    GraphHasCycle(String),
    /// A pass consumes a resource that only it produces.
    #[error("Pass `{0}` depends on itself.")]
    SelfDependency(String),
    /// A parallel input list does not have the same length as its output list.
    #[error("Pass `{pass}`: {category} inputs ({inputs}) and outputs ({outputs}) differ in length.")]
    InputOutputCountMismatch {
        pass: String,
        category: &'static str,
        inputs: usize,
        outputs: usize,
    },
    /// An input/output pair that is renamed to one physical resource has different dimensions.
    #[error("Pass `{pass}`: {category} input `{input}` and output `{output}` have mismatching dimensions.")]
    DimensionMismatch {
        pass: String,
        category: &'static str,
        input: String,
        output: String,
    },
    /// A size-relative attachment refers to a resource that does not exist.
    #[error("Resource `{resource}` is sized relative to `{relative_to}`, which does not exist.")]
    UnknownRelativeResource { resource: String, relative_to: String },
    /// A chain of size-relative attachments refers back to itself.
    #[error("Relative size of `{0}` is recursive.")]
    RecursiveRelativeSize(String),
    /// A history input is never written by any pass.
    #[error("Pass `{pass}` has history input `{resource}`, but it is never written.")]
    HistoryWithoutWriter { pass: String, resource: String },
    /// An output was renamed to an input, but was already bound to a different physical resource.
    #[error("Pass `{pass}`: cannot rename `{output}` to `{input}`, physical index already claimed.")]
    PhysicalIndexConflict {
        pass: String,
        input: String,
        output: String,
    },
    /// The same (resource, history) key was requested in two different image layouts in one pass.
    #[error("Pass `{pass}`: layout conflict on `{resource}` ({existing:?} vs {requested:?}).")]
    LayoutConflict {
        pass: String,
        resource: String,
        existing: vk::ImageLayout,
        requested: vk::ImageLayout,
    },
    /// A pass on a compute queue declared a render pass attachment.
    #[error("Pass `{pass}` runs on a compute queue and cannot use {category}.")]
    AttachmentOnComputeQueue { pass: String, category: &'static str },
    /// A resource name was used both as a texture and as a buffer.
    #[error("Resource `{name}` was declared as {declared:?} but used as {requested:?}.")]
    ResourceTypeMismatch {
        name: String,
        declared: ResourceType,
        requested: ResourceType,
    },
    /// Planning produced a transient resource that is used by more than one physical pass.
    #[error("Transient resource `{0}` is used in more than one physical pass.")]
    TransientInMultiplePasses(String),
    /// Planning produced an alias chain whose members do not share dimensions or lifetimes.
    #[error("Aliased resources `{0}` and `{1}` are incompatible.")]
    IncompatibleAlias(String, String),
    /// A depth-stencil attachment resolved to a format without depth or stencil aspects.
    #[error("Pass `{pass}`: depth-stencil attachment `{resource}` has color format {format:?}.")]
    NotDepthStencilFormat {
        pass: String,
        resource: String,
        format: vk::Format,
    },
    /// Two passes in one physical pass need different depth attachments.
    #[error("Physical pass containing `{0}` has conflicting depth-stencil attachments.")]
    DepthStencilConflict(String),
    /// The graph must be baked before this operation.
    #[error("Render graph has not been baked.")]
    NotBaked,
    /// `setup_attachments()` must run after `bake()` and before `enqueue_render_passes()`.
    #[error("Physical attachments have not been set up for the current plan.")]
    NotSetUp,
    /// No physical resource was bound to a resource at execution time.
    #[error("No physical resource bound to `{0}`")]
    NoResourceBound(String),
    /// Generic Vulkan error type.
    #[error("Vulkan error: `{0}`")]
    VkError(vk::Result),
    /// Uncategorized error.
    #[error("Uncategorized error: `{0}`")]
    Uncategorized(&'static str),
}

impl From<vk::Result> for Error {
    fn from(value: vk::Result) -> Self {
        Error::VkError(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_culprits() {
        let err = Error::LayoutConflict {
            pass: "lighting".into(),
            resource: "gbuffer".into(),
            existing: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            requested: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        };
        let msg = err.to_string();
        assert!(msg.contains("lighting"), "pass name missing from `{msg}`");
        assert!(msg.contains("gbuffer"), "resource name missing from `{msg}`");
    }

    #[test]
    fn converts_from_vk_result() {
        let err: Error = vk::Result::ERROR_DEVICE_LOST.into();
        assert_eq!(err, Error::VkError(vk::Result::ERROR_DEVICE_LOST));
    }
}
