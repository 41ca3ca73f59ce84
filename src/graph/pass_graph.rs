//! The pass graph module holds the render graph implementation: declaration, baking and the baked plan.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use anyhow::Result;
use ash::vk;
use petgraph::dot::Dot;
use petgraph::graph::{EdgeReference, NodeIndex};
use petgraph::Graph;

use crate::command_buffer::traits::Backend;
use crate::core::error::Error;
use crate::core::queue::{QueueFlags, RenderGraphQueue};
use crate::graph::aliasing::build_aliases;
use crate::graph::barrier::{build_barriers, build_physical_barriers};
use crate::graph::pass::{PassBuilder, PassCallbacks, RenderPass};
use crate::graph::physical_pass::{
    build_attachment_ops, build_physical_passes, build_render_pass_info, ClearQuery, DepthStencilMode, PhysicalPass,
};
use crate::graph::physical_resource::{
    build_physical_resources, build_transients, resolve_dimensions, PhysicalResources, ResourceDimensions,
};
use crate::graph::record::ExecutorState;
use crate::graph::resource::ResourceType;
use crate::graph::task_graph::{reorder_passes, traverse_dependencies, validate_passes};
use crate::graph::virtual_resource::{RenderResource, ResourceHandle, ResourceRegistry};

/// Color attachments per physical pass are tracked in 32 bit masks.
pub const MAX_ATTACHMENTS: usize = 32;

/// Everything [`RenderGraph::bake()`] computes. Plans only contain indices, so two plans of identical declarations
/// compare equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderGraphPlan {
    /// Scheduled passes in execution order.
    pub pass_stack: Vec<usize>,
    pub physical_passes: Vec<PhysicalPass>,
    pub physical_dimensions: Vec<ResourceDimensions>,
    /// Root of the alias chain of each physical resource, if it shares an image with another one.
    pub physical_aliases: Vec<Option<usize>>,
    /// Whether each physical resource is read as history and needs a second image.
    pub has_history: Vec<bool>,
    /// Physical index of the backbuffer source.
    pub backbuffer_physical_index: usize,
    /// Set when the backbuffer is rendered to the swapchain image directly.
    pub swapchain_physical_index: Option<usize>,
}

assert_impl_all!(RenderGraphPlan: Send, Sync);
const_assert!(MAX_ATTACHMENTS <= u32::BITS as usize);

/// A Granite-style render graph. Passes are declared with resources referenced by name, the graph is baked into a
/// plan once, and then executed every frame through the backend.
///
/// # Example
/// ```ignore
/// use vk_render_graph::prelude::*;
///
/// let mut graph = RenderGraph::new(device);
/// graph.set_backbuffer_dimensions(ResourceDimensions::swapchain(1920, 1080, vk::Format::B8G8R8A8_SRGB));
/// graph.add_pass("main", RenderGraphQueue::Graphics)
///     .add_color_output("final", AttachmentInfo::default(), None)
///     .set_build_render_pass(|cmd, resources| Ok(()));
/// graph.set_backbuffer_source("final");
/// graph.bake()?;
/// graph.log();
///
/// // Every frame:
/// graph.setup_attachments(Some(&swapchain_image))?;
/// graph.enqueue_render_passes()?;
/// ```
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct RenderGraph<B: Backend> {
    #[derivative(Debug = "ignore")]
    pub(crate) device: B::Device,
    pub(crate) passes: Vec<RenderPass>,
    pub(crate) callbacks: Vec<PassCallbacks<B>>,
    pass_to_index: HashMap<String, usize>,
    pub(crate) resources: ResourceRegistry,
    backbuffer_source: Option<String>,
    swapchain_dimensions: ResourceDimensions,
    pub(crate) plan: Option<RenderGraphPlan>,
    pub(crate) physical: PhysicalResources<B>,
    pub(crate) executor: ExecutorState<B>,
}

impl<B: Backend> RenderGraph<B> {
    /// Create an empty render graph on a device. The backbuffer defaults to 1280x720 `B8G8R8A8_SRGB`.
    pub fn new(device: B::Device) -> Self {
        Self {
            device,
            passes: Vec::new(),
            callbacks: Vec::new(),
            pass_to_index: HashMap::new(),
            resources: ResourceRegistry::default(),
            backbuffer_source: None,
            swapchain_dimensions: ResourceDimensions::swapchain(1280, 720, vk::Format::B8G8R8A8_SRGB),
            plan: None,
            physical: PhysicalResources::default(),
            executor: ExecutorState::default(),
        }
    }

    /// Declare a pass, or continue declaring an existing pass with the same name. Drops the baked plan.
    pub fn add_pass(&mut self, name: &str, queue: RenderGraphQueue) -> PassBuilder<'_, B> {
        self.reset_plan();
        let index = match self.pass_to_index.get(name) {
            Some(&index) => index,
            None => {
                let index = self.passes.len();
                self.passes.push(RenderPass::new(name.to_owned(), index, queue));
                self.callbacks.push(PassCallbacks::default());
                self.pass_to_index.insert(name.to_owned(), index);
                index
            }
        };
        PassBuilder::new(self, index)
    }

    /// Index of a declared pass.
    pub fn find_pass(&self, name: &str) -> Option<usize> {
        self.pass_to_index.get(name).copied()
    }

    /// Look up or declare a texture resource.
    pub fn texture_resource(&mut self, name: &str) -> ResourceHandle {
        let index = self.resources.texture(name);
        self.resources.get(index).handle()
    }

    /// Look up or declare a buffer resource.
    pub fn buffer_resource(&mut self, name: &str) -> ResourceHandle {
        let index = self.resources.buffer(name);
        self.resources.get(index).handle()
    }

    /// Look up a resource without declaring it.
    pub fn find_resource(&self, name: &str) -> Option<ResourceHandle> {
        self.resources.find(name).map(|index| self.resources.get(index).handle())
    }

    /// Resource behind a handle.
    pub fn resource(&self, handle: ResourceHandle) -> &RenderResource {
        self.resources.get(handle.index())
    }

    pub fn resources(&self) -> &[RenderResource] {
        self.resources.as_slice()
    }

    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    pub fn pass(&self, index: usize) -> Option<&RenderPass> {
        self.passes.get(index)
    }

    /// Name the resource whose final contents are presented. Drops the baked plan.
    pub fn set_backbuffer_source(&mut self, name: &str) {
        self.reset_plan();
        self.backbuffer_source = Some(name.to_owned());
    }

    /// Set the dimensions swapchain-relative resources are resolved against. Drops the baked plan if they changed.
    pub fn set_backbuffer_dimensions(&mut self, dimensions: ResourceDimensions) {
        if self.swapchain_dimensions != dimensions {
            self.reset_plan();
        }
        self.swapchain_dimensions = dimensions;
    }

    pub fn backbuffer_dimensions(&self) -> &ResourceDimensions {
        &self.swapchain_dimensions
    }

    /// Dimensions a resource resolves to against the current backbuffer dimensions. Does not require a bake.
    /// # Errors
    /// - Fails if the resource is sized relative to a missing resource, or recursively.
    pub fn resource_dimensions(&self, handle: ResourceHandle) -> Result<ResourceDimensions> {
        let resource = self.resources.get(handle.index());
        Ok(resolve_dimensions(&self.resources, resource, &self.swapchain_dimensions)?)
    }

    /// The baked plan. `None` until [`bake()`](Self::bake) succeeds, and again after any pass is declared or the
    /// backbuffer source or dimensions change.
    pub fn plan(&self) -> Option<&RenderGraphPlan> {
        self.plan.as_ref()
    }

    /// Physical images and buffers bound for the current frame.
    pub fn physical_resources(&self) -> &PhysicalResources<B> {
        &self.physical
    }

    /// Remove every pass, resource and physical resource. The backbuffer dimensions are kept.
    pub fn reset(&mut self) {
        self.passes.clear();
        self.callbacks.clear();
        self.pass_to_index.clear();
        self.resources.clear();
        self.backbuffer_source = None;
        self.plan = None;
        self.physical = PhysicalResources::default();
        self.executor = ExecutorState::default();
    }

    fn reset_plan(&mut self) {
        self.plan = None;
        self.resources.clear_physical_indices();
        for pass in &mut self.passes {
            pass.physical_pass = None;
        }
        self.executor.invalidate();
    }

    /// Plan the graph: order passes, assign physical resources, merge passes and derive all barriers.
    /// On failure the graph is left as it was before baking, ready for another attempt.
    /// # Errors
    /// - Fails with the [`Error`] describing the first declaration or planning problem found.
    pub fn bake(&mut self) -> Result<()> {
        match self.build_plan() {
            Ok(plan) => {
                debug!(
                    "Baked render graph: {} passes scheduled into {} physical passes, {} physical resources",
                    plan.pass_stack.len(),
                    plan.physical_passes.len(),
                    plan.physical_dimensions.len()
                );
                self.plan = Some(plan);
                Ok(())
            }
            Err(err) => {
                self.reset_plan();
                Err(err.into())
            }
        }
    }

    fn build_plan(&mut self) -> Result<RenderGraphPlan, Error> {
        self.reset_plan();

        if let Some(err) = self.resources.first_error() {
            return Err(err.clone());
        }
        let name = self.backbuffer_source.clone().ok_or(Error::NoBackbufferSource)?;
        let backbuffer = self
            .resources
            .find(&name)
            .ok_or_else(|| Error::BackbufferSourceNotFound(name.clone()))?;

        validate_passes(&mut self.passes, &self.resources, &self.swapchain_dimensions)?;
        let (mut pass_stack, mut dependencies) = traverse_dependencies(&self.passes, &self.resources, backbuffer)?;
        reorder_passes(&mut pass_stack, &mut dependencies);
        trace!("Pass schedule: {:?}", pass_stack);

        let (mut dims, has_history) =
            build_physical_resources(&pass_stack, &self.passes, &mut self.resources, &self.swapchain_dimensions)?;
        let mut physical_passes = build_physical_passes(&pass_stack, &mut self.passes, &self.resources, &dims);
        build_transients(&self.passes, &self.resources, &mut dims, &has_history);

        let clears = self.clear_queries();
        build_render_pass_info(&mut physical_passes, &self.passes, &self.resources, &dims, &clears);
        let pass_barriers = build_barriers(&pass_stack, &self.passes, &self.resources, &dims)?;

        let backbuffer_physical_index = self
            .resources
            .get(backbuffer)
            .physical_index()
            .ok_or(Error::Uncategorized("backbuffer source was not assigned a physical resource"))?;
        let swapchain_physical_index = self.alias_swapchain(&mut dims, backbuffer_physical_index);

        build_physical_barriers(&mut physical_passes, &pass_stack, &pass_barriers, &dims, swapchain_physical_index);
        build_attachment_ops(&mut physical_passes, &self.passes, &self.resources, &dims, swapchain_physical_index);
        let physical_aliases = build_aliases(
            &pass_stack,
            &self.passes,
            &self.resources,
            &mut physical_passes,
            &mut dims,
            &has_history,
            swapchain_physical_index,
        );

        let plan = RenderGraphPlan {
            pass_stack,
            physical_passes,
            physical_dimensions: dims,
            physical_aliases,
            has_history,
            backbuffer_physical_index,
            swapchain_physical_index,
        };
        self.check_plan(&plan)?;
        Ok(plan)
    }

    /// Ask the clear callbacks of every pass which attachments they clear.
    fn clear_queries(&mut self) -> Vec<ClearQuery> {
        self.passes
            .iter()
            .zip(self.callbacks.iter_mut())
            .map(|(pass, callbacks)| ClearQuery {
                colors: (0..pass.color_outputs.len() as u32)
                    .map(|i| callbacks.clear_color(i).is_some())
                    .collect(),
                depth_stencil: callbacks.clear_depth_stencil().is_some(),
            })
            .collect()
    }

    /// Decide whether the backbuffer can be rendered to the swapchain image directly. If not, it gets its own
    /// image and is blitted to the swapchain at the end of the frame.
    fn alias_swapchain(&self, dims: &mut [ResourceDimensions], backbuffer: usize) -> Option<usize> {
        let swapchain = &self.swapchain_dimensions;
        let dim = &mut dims[backbuffer];
        let can_alias = !dim.queues.intersects(QueueFlags::COMPUTE_QUEUES) && dim.transient;
        let same_shape = dim.format == swapchain.format
            && dim.width == swapchain.width
            && dim.height == swapchain.height
            && dim.depth == swapchain.depth
            && dim.layers == swapchain.layers
            && dim.levels == swapchain.levels
            && dim.samples == swapchain.samples;

        if can_alias && same_shape {
            return Some(backbuffer);
        }

        warn!("Backbuffer `{}` cannot alias the swapchain image, a blit will be inserted.", dim.name);
        dim.transient = false;
        dim.queues |= QueueFlags::GRAPHICS;
        dim.image_usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        None
    }

    /// Consistency checks on a finished plan.
    fn check_plan(&self, plan: &RenderGraphPlan) -> Result<(), Error> {
        let dims = &plan.physical_dimensions;

        let mut used_in: Vec<Option<usize>> = vec![None; dims.len()];
        for (physical_index, physical_pass) in plan.physical_passes.iter().enumerate() {
            for &pass in &physical_pass.passes {
                for resource in self.passes[pass].touched_resources() {
                    let Some(physical) = self.resources.get(resource).physical_index() else {
                        continue;
                    };
                    if !dims[physical].transient {
                        continue;
                    }
                    match used_in[physical] {
                        Some(existing) if existing != physical_index => {
                            return Err(Error::TransientInMultiplePasses(dims[physical].name.clone()));
                        }
                        _ => used_in[physical] = Some(physical_index),
                    }
                }

                let pass = &self.passes[pass];
                if let Some(depth) = pass.depth_stencil_input.or(pass.depth_stencil_output) {
                    if self.resources.get(depth).physical_index() != physical_pass.physical_depth_stencil_attachment {
                        return Err(Error::DepthStencilConflict(pass.name().to_owned()));
                    }
                }
            }

            let subpass_has_depth = physical_pass
                .render_pass
                .subpasses
                .iter()
                .any(|subpass| subpass.depth_stencil != DepthStencilMode::None);
            if subpass_has_depth != physical_pass.physical_depth_stencil_attachment.is_some() {
                return Err(Error::Uncategorized("depth-stencil attachment without a subpass using it"));
            }
            if physical_pass.attachment_count() > MAX_ATTACHMENTS {
                return Err(Error::Uncategorized("too many attachments in one physical pass"));
            }
        }

        for (index, alias) in plan.physical_aliases.iter().enumerate() {
            if let Some(root) = *alias {
                if !dims[index].is_compatible(&dims[root]) {
                    return Err(Error::IncompatibleAlias(dims[index].name.clone(), dims[root].name.clone()));
                }
            }
        }

        for (index, history) in plan.has_history.iter().enumerate() {
            if *history && dims[index].transient {
                return Err(Error::Uncategorized("history resource planned as transient"));
            }
        }

        Ok(())
    }

    /// Dump the baked plan through `info!`.
    pub fn log(&self) {
        let Some(plan) = &self.plan else {
            info!("Render graph has not been baked.");
            return;
        };

        for (index, dim) in plan.physical_dimensions.iter().enumerate() {
            match dim.ty {
                ResourceType::Buffer => info!(
                    "Resource #{} ({}): size: {}, usage: {:?}",
                    index, dim.name, dim.buffer_info.size, dim.buffer_info.usage
                ),
                ResourceType::Texture => info!(
                    "Resource #{} ({}): {} x {} (fmt: {:?}), samples: {}, transient: {}, persistent: {}, alias: {:?}, history: {}",
                    index,
                    dim.name,
                    dim.width,
                    dim.height,
                    dim.format,
                    dim.samples,
                    dim.transient,
                    dim.persistent,
                    plan.physical_aliases[index],
                    plan.has_history[index]
                ),
            }
        }

        info!("Swapchain physical index: {:?}", plan.swapchain_physical_index);

        for (index, physical_pass) in plan.physical_passes.iter().enumerate() {
            info!("Physical pass #{} ({:?}):", index, physical_pass.queue);
            for barrier in &physical_pass.invalidate {
                info!(
                    "  Invalidate: {}, layout: {:?}, access: {:?}, stages: {:?}{}",
                    barrier.resource_index,
                    barrier.layout,
                    barrier.access,
                    barrier.stages,
                    if barrier.history { " (history)" } else { "" }
                );
            }

            for (subpass, &pass) in physical_pass.passes.iter().enumerate() {
                let layout = &physical_pass.render_pass.subpasses[subpass];
                info!("    Subpass #{} ({}):", subpass, self.passes[pass].name());
                info!("      Colors: {:?}", layout.color_attachments);
                info!("      Inputs: {:?}", layout.input_attachments);
                info!("      Resolves: {:?}", layout.resolve_attachments);
                info!("      Depth-stencil: {:?}", layout.depth_stencil);
            }

            let rp = &physical_pass.render_pass;
            info!(
                "  Attachments: {:?}, depth-stencil: {:?}, layers: {}",
                physical_pass.physical_color_attachments, physical_pass.physical_depth_stencil_attachment, physical_pass.layers
            );
            info!(
                "  Clear: {:#b}, load: {:#b}, store: {:#b}",
                rp.clear_attachments, rp.load_attachments, rp.store_attachments
            );

            for barrier in &physical_pass.flush {
                info!(
                    "  Flush: {}, layout: {:?}, access: {:?}, stages: {:?}{}",
                    barrier.resource_index,
                    barrier.layout,
                    barrier.access,
                    barrier.stages,
                    if barrier.history { " (history)" } else { "" }
                );
            }
            for discard in &physical_pass.discards {
                info!("  Discard: {}", discard);
            }
            for request in &physical_pass.mipmap_requests {
                info!("  Mipmap: {}", request.physical_resource);
            }
            for (from, to) in &physical_pass.alias_transfer {
                info!("  Alias transfer: {} -> {}", from, to);
            }
        }
    }
}

/// Trait that is implemented for the render graph to help with debugging and visualizing the graph.
pub trait GraphViz {
    /// Get the string representation of this graph in `dot` format.
    fn dot(&self) -> Result<String>;
}

/// Node of the exported dependency graph.
#[derive(Debug, Clone)]
struct DotPass {
    name: String,
    queue: RenderGraphQueue,
    scheduled: bool,
}

impl Display for DotPass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.name, self.queue)
    }
}

fn get_edge_attributes(_: &Graph<DotPass, String>, _: EdgeReference<String>) -> String {
    String::new()
}

fn get_node_attributes(_: &Graph<DotPass, String>, node: (NodeIndex, &DotPass)) -> String {
    if node.1.scheduled {
        String::from("style = filled fillcolor = \"#5e6df7\"")
    } else {
        String::from("style = dashed")
    }
}

impl<B: Backend> GraphViz for RenderGraph<B> {
    /// Passes are nodes, and every resource written by one pass and read by another is an edge.
    /// Passes that did not make it into the baked schedule are dashed.
    fn dot(&self) -> Result<String> {
        let mut graph: Graph<DotPass, String> = Graph::new();
        let nodes: Vec<NodeIndex> = self
            .passes
            .iter()
            .map(|pass| {
                graph.add_node(DotPass {
                    name: pass.name().to_owned(),
                    queue: pass.queue(),
                    scheduled: pass.physical_pass().is_some(),
                })
            })
            .collect();

        for resource in self.resources.as_slice() {
            for &writer in resource.write_passes() {
                for &reader in resource.read_passes().iter().filter(|&&reader| reader != writer) {
                    graph.add_edge(nodes[writer], nodes[reader], resource.name().to_owned());
                }
            }
        }

        Ok(format!(
            "{}",
            Dot::with_attr_getters(&graph, &[], &get_edge_attributes, &get_node_attributes)
        ))
    }
}
