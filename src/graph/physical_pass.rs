//! Physical passes: runs of scheduled passes merged into one render pass instance, one subpass per pass.
//!
//! Two adjacent passes can only be merged if everything flowing between them can be expressed as a subpass
//! attachment. Merging is only done when it is also worthwhile: the later pass must keep a color or depth attachment
//! of an earlier one on tile.

use ash::vk;

use crate::core::queue::RenderGraphQueue;
use crate::graph::barrier::Barrier;
use crate::graph::pass::RenderPass;
use crate::graph::physical_resource::ResourceDimensions;
use crate::graph::virtual_resource::ResourceRegistry;

/// How a subpass uses the depth-stencil attachment of its render pass.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum DepthStencilMode {
    #[default]
    None,
    ReadOnly,
    ReadWrite,
}

/// Attachment references of one subpass. Indices point into the physical pass color attachments, the index
/// equal to the color attachment count refers to the depth-stencil attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubpassLayout {
    pub color_attachments: Vec<u32>,
    pub input_attachments: Vec<u32>,
    pub resolve_attachments: Vec<u32>,
    pub depth_stencil: DepthStencilMode,
}

/// Load, clear and store decisions for every attachment of a physical pass. Color decisions are bitmasks over
/// the color attachment indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderPassLayout {
    pub clear_attachments: u32,
    pub load_attachments: u32,
    pub store_attachments: u32,
    pub clear_depth_stencil: bool,
    pub load_depth_stencil: bool,
    pub store_depth_stencil: bool,
    pub depth_stencil_read_only: bool,
    /// Layout each color attachment is in when the render pass begins.
    pub color_initial_layouts: Vec<vk::ImageLayout>,
    /// Layout each color attachment is left in when the render pass ends.
    pub color_final_layouts: Vec<vk::ImageLayout>,
    pub depth_stencil_initial_layout: vk::ImageLayout,
    pub depth_stencil_final_layout: vk::ImageLayout,
    pub subpasses: Vec<SubpassLayout>,
}

impl RenderPassLayout {
    pub fn clears(&self, attachment: u32) -> bool {
        self.clear_attachments & (1 << attachment) != 0
    }

    pub fn loads(&self, attachment: u32) -> bool {
        self.load_attachments & (1 << attachment) != 0
    }

    pub fn stores(&self, attachment: u32) -> bool {
        self.store_attachments & (1 << attachment) != 0
    }
}

/// A color attachment that gets cleared with the value returned by a pass's clear callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ColorClearRequest {
    pub pass: usize,
    /// Color output index within the pass, handed to the clear callback.
    pub index: u32,
    /// Color attachment index within the physical pass.
    pub attachment: u32,
}

/// A scaled color input drawn into a color attachment at the start of a subpass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScaledClearRequest {
    /// Color attachment index within the subpass.
    pub target: u32,
    pub physical_resource: usize,
}

/// Mip chain generation for a color attachment after its render pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MipmapRequest {
    pub physical_resource: usize,
    pub stages: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

/// One or more scheduled passes recorded together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicalPass {
    /// Logical passes in execution order.
    pub passes: Vec<usize>,
    pub queue: RenderGraphQueue,
    /// Physical resources whose previous contents are not needed.
    pub discards: Vec<usize>,
    pub invalidate: Vec<Barrier>,
    pub flush: Vec<Barrier>,
    /// Ownership of an aliased image moves from the first to the second physical resource after this pass.
    pub alias_transfer: Vec<(usize, usize)>,
    pub physical_color_attachments: Vec<usize>,
    pub physical_depth_stencil_attachment: Option<usize>,
    pub render_pass: RenderPassLayout,
    pub color_clear_requests: Vec<ColorClearRequest>,
    /// Pass whose clear callback provides the depth-stencil clear value.
    pub depth_clear_request: Option<usize>,
    /// Indexed by subpass.
    pub scaled_clear_requests: Vec<Vec<ScaledClearRequest>>,
    pub mipmap_requests: Vec<MipmapRequest>,
    pub layers: u32,
}

impl PhysicalPass {
    /// True if this physical pass is recorded inside a render pass instance.
    pub fn is_render_pass(&self) -> bool {
        !self.queue.is_compute()
            && (!self.physical_color_attachments.is_empty() || self.physical_depth_stencil_attachment.is_some())
    }

    /// Number of attachments including depth-stencil.
    pub fn attachment_count(&self) -> usize {
        self.physical_color_attachments.len() + usize::from(self.physical_depth_stencil_attachment.is_some())
    }
}

/// Which attachments a pass wants cleared, as answered by its clear callbacks while baking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ClearQuery {
    pub colors: Vec<bool>,
    pub depth_stencil: bool,
}

/// Whether `next` can share a render pass with `prev` at all.
fn merge_permitted(prev: &RenderPass, next: &RenderPass, resources: &ResourceRegistry, dims: &[ResourceDimensions]) -> bool {
    if prev.queue.is_compute() || next.queue != prev.queue {
        return false;
    }

    let mipmapped = prev.color_outputs.iter().any(|&output| {
        resources
            .get(output)
            .physical_index()
            .map_or(false, |physical| dims[physical].levels > 1)
    });
    if mipmapped {
        return false;
    }

    // Everything below needs a barrier between the passes, which a subpass dependency cannot express.
    for input in &next.generic_texture_inputs {
        let texture = &input.texture;
        if prev.color_outputs.contains(texture)
            || prev.resolve_outputs.contains(texture)
            || prev.storage_texture_outputs.contains(texture)
            || prev.blit_texture_outputs.contains(texture)
            || prev.depth_stencil_output == Some(*texture)
        {
            return false;
        }
    }

    if next.generic_buffer_inputs.iter().any(|input| prev.storage_outputs.contains(&input.buffer)) {
        return false;
    }

    if next.blit_texture_inputs.iter().flatten().any(|input| prev.blit_texture_outputs.contains(input)) {
        return false;
    }

    if next.storage_inputs.iter().flatten().any(|input| prev.storage_outputs.contains(input)) {
        return false;
    }

    if next
        .storage_texture_inputs
        .iter()
        .flatten()
        .any(|input| prev.storage_texture_outputs.contains(input))
    {
        return false;
    }

    for input in next.color_scale_inputs.iter().flatten() {
        if prev.storage_texture_outputs.contains(input)
            || prev.blit_texture_outputs.contains(input)
            || prev.color_outputs.contains(input)
            || prev.resolve_outputs.contains(input)
        {
            return false;
        }
    }

    for input in next.color_inputs.iter().flatten() {
        if prev.storage_texture_outputs.contains(input) || prev.blit_texture_outputs.contains(input) {
            return false;
        }
    }

    let physical = |resource: Option<usize>| resource.and_then(|resource| resources.get(resource).physical_index());
    let different = |a: Option<usize>, b: Option<usize>| matches!((physical(a), physical(b)), (Some(a), Some(b)) if a != b);
    let depth_pairs = [
        (next.depth_stencil_input, prev.depth_stencil_input),
        (next.depth_stencil_output, prev.depth_stencil_input),
        (next.depth_stencil_input, prev.depth_stencil_output),
        (next.depth_stencil_output, prev.depth_stencil_output),
    ];
    !depth_pairs.iter().any(|&(a, b)| different(a, b))
}

/// Whether merging `next` into a render pass with `prev` keeps data on tile.
fn merge_preferred(prev: &RenderPass, next: &RenderPass, resources: &ResourceRegistry) -> bool {
    for input in next.color_inputs.iter().flatten() {
        if prev.color_outputs.contains(input) || prev.resolve_outputs.contains(input) {
            return true;
        }
    }

    let physical = |resource: Option<usize>| resource.and_then(|resource| resources.get(resource).physical_index());
    let same = |a: Option<usize>, b: Option<usize>| matches!((physical(a), physical(b)), (Some(a), Some(b)) if a == b);
    if same(next.depth_stencil_input, prev.depth_stencil_input) || same(next.depth_stencil_input, prev.depth_stencil_output)
    {
        return true;
    }

    next.attachment_inputs.iter().any(|input| {
        prev.color_outputs.contains(input) || prev.resolve_outputs.contains(input) || prev.depth_stencil_output == Some(*input)
    })
}

/// Split the schedule into physical passes, and record the physical pass index on every scheduled pass.
pub(crate) fn build_physical_passes(
    pass_stack: &[usize],
    passes: &mut [RenderPass],
    resources: &ResourceRegistry,
    dims: &[ResourceDimensions],
) -> Vec<PhysicalPass> {
    let mut physical_passes: Vec<PhysicalPass> = Vec::new();
    let mut index = 0;
    while index < pass_stack.len() {
        let mut merge_end = index + 1;
        while merge_end < pass_stack.len() {
            let next = &passes[pass_stack[merge_end]];
            let members = pass_stack[index..merge_end].iter().map(|&member| &passes[member]);
            let permitted = members.clone().all(|prev| merge_permitted(prev, next, resources, dims));
            if !permitted || !members.into_iter().any(|prev| merge_preferred(prev, next, resources)) {
                break;
            }
            merge_end += 1;
        }

        physical_passes.push(PhysicalPass {
            passes: pass_stack[index..merge_end].to_vec(),
            queue: passes[pass_stack[index]].queue,
            layers: 1,
            ..Default::default()
        });
        index = merge_end;
    }

    for (physical_index, physical_pass) in physical_passes.iter().enumerate() {
        for &pass in &physical_pass.passes {
            passes[pass].physical_pass = Some(physical_index);
        }
    }
    physical_passes
}

/// Deduplicate the attachments of every physical pass and decide load and clear operations.
/// Store operations are decided later, once transient resources are known.
pub(crate) fn build_render_pass_info(
    physical_passes: &mut [PhysicalPass],
    passes: &[RenderPass],
    resources: &ResourceRegistry,
    dims: &[ResourceDimensions],
    clears: &[ClearQuery],
) {
    let physical = |resource: usize| resources.get(resource).physical_index().unwrap_or_default();

    for (current, physical_pass) in physical_passes.iter_mut().enumerate() {
        let mut rp = RenderPassLayout::default();
        let mut colors: Vec<usize> = Vec::new();
        let mut depth_stencil: Option<usize> = None;
        let mut color_clear_requests = Vec::new();
        let mut depth_clear_request = None;
        let mut scaled_clear_requests = Vec::new();

        fn add_unique(colors: &mut Vec<usize>, index: usize) -> (u32, bool) {
            match colors.iter().position(|&color| color == index) {
                Some(position) => (position as u32, false),
                None => {
                    colors.push(index);
                    ((colors.len() - 1) as u32, true)
                }
            }
        }

        for &index in &physical_pass.passes {
            let pass = &passes[index];
            let mut subpass = SubpassLayout::default();
            let mut scaled = Vec::new();

            for (i, &output) in pass.color_outputs.iter().enumerate() {
                let (attachment, first_use) = add_unique(&mut colors, physical(output));
                subpass.color_attachments.push(attachment);
                if !first_use {
                    continue;
                }
                let color_input = pass.color_inputs.get(i).copied().flatten();
                let scaled_input = pass.color_scale_inputs.get(i).copied().flatten();
                match (color_input, scaled_input) {
                    (None, None) => {
                        if clears[index].colors.get(i).copied().unwrap_or(false) {
                            rp.clear_attachments |= 1 << attachment;
                            color_clear_requests.push(ColorClearRequest {
                                pass: index,
                                index: i as u32,
                                attachment,
                            });
                        }
                    }
                    (_, Some(scaled_input)) => scaled.push(ScaledClearRequest {
                        target: i as u32,
                        physical_resource: physical(scaled_input),
                    }),
                    (Some(_), None) => rp.load_attachments |= 1 << attachment,
                }
            }

            for &output in &pass.resolve_outputs {
                // Resolve targets never need their previous contents.
                let (attachment, _) = add_unique(&mut colors, physical(output));
                subpass.resolve_attachments.push(attachment);
            }
            scaled_clear_requests.push(scaled);

            let mut add_unique_depth = |index: usize| {
                let first_use = depth_stencil.is_none();
                depth_stencil = Some(index);
                first_use
            };

            subpass.depth_stencil = match (pass.depth_stencil_input, pass.depth_stencil_output) {
                (Some(_), Some(output)) => {
                    if add_unique_depth(physical(output)) {
                        rp.load_depth_stencil = true;
                    }
                    rp.store_depth_stencil = true;
                    DepthStencilMode::ReadWrite
                }
                (None, Some(output)) => {
                    if add_unique_depth(physical(output)) && clears[index].depth_stencil {
                        rp.clear_depth_stencil = true;
                        depth_clear_request = Some(index);
                    }
                    rp.store_depth_stencil = true;
                    DepthStencilMode::ReadWrite
                }
                (Some(input), None) => {
                    if add_unique_depth(physical(input)) {
                        rp.depth_stencil_read_only = true;
                        rp.load_depth_stencil = true;
                        // Later physical passes reading the attachment, directly or through a fake alias, need it stored.
                        let read_later = |resource: usize| {
                            resources
                                .get(resource)
                                .read_passes()
                                .iter()
                                .any(|&reader| passes[reader].physical_pass().map_or(false, |p| p > current))
                        };
                        let preserve = read_later(input)
                            || passes.iter().any(|logical| {
                                logical
                                    .fake_resource_aliases
                                    .iter()
                                    .any(|&(from, to)| from == input && read_later(to))
                            });
                        if preserve {
                            rp.store_depth_stencil = true;
                        }
                    }
                    DepthStencilMode::ReadOnly
                }
                (None, None) => DepthStencilMode::None,
            };

            rp.subpasses.push(subpass);
        }

        // Input attachments come last so depth-stencil inputs can refer to the depth attachment.
        for (subpass, &index) in physical_pass.passes.iter().enumerate() {
            for &input in &passes[index].attachment_inputs {
                let physical_input = physical(input);
                let (attachment, first_use) = if Some(physical_input) == depth_stencil {
                    (colors.len() as u32, false)
                } else {
                    add_unique(&mut colors, physical_input)
                };
                rp.subpasses[subpass].input_attachments.push(attachment);
                if first_use {
                    rp.load_attachments |= 1 << attachment;
                }
            }
        }

        let layers = colors
            .iter()
            .chain(depth_stencil.iter())
            .map(|&attachment| dims[attachment].layers)
            .min()
            .unwrap_or(1);

        physical_pass.physical_color_attachments = colors;
        physical_pass.physical_depth_stencil_attachment = depth_stencil;
        physical_pass.render_pass = rp;
        physical_pass.color_clear_requests = color_clear_requests;
        physical_pass.depth_clear_request = depth_clear_request;
        physical_pass.scaled_clear_requests = scaled_clear_requests;
        physical_pass.layers = layers;
    }
}

/// Decide which attachments are stored, and the layouts attachments enter and leave each render pass in.
/// Runs after physical barriers, when transient resources and the swapchain alias are final.
pub(crate) fn build_attachment_ops(
    physical_passes: &mut [PhysicalPass],
    passes: &[RenderPass],
    resources: &ResourceRegistry,
    dims: &[ResourceDimensions],
    swapchain_physical_index: Option<usize>,
) {
    let physical = |resource: usize| resources.get(resource).physical_index();

    for physical_pass in physical_passes.iter_mut() {
        let implicit = |index: usize| dims[index].transient || Some(index) == swapchain_physical_index;

        let mut written: Vec<usize> = Vec::new();
        for &index in &physical_pass.passes {
            let pass = &passes[index];
            written.extend(pass.color_outputs.iter().chain(&pass.resolve_outputs).filter_map(|&output| physical(output)));
        }

        let mut store = 0u32;
        let mut initial = Vec::with_capacity(physical_pass.physical_color_attachments.len());
        let mut finals = Vec::with_capacity(physical_pass.physical_color_attachments.len());
        for (attachment, &index) in physical_pass.physical_color_attachments.iter().enumerate() {
            let transient_only = dims[index].transient && Some(index) != swapchain_physical_index;
            if written.contains(&index) && !transient_only {
                store |= 1 << attachment;
            }
            initial.push(initial_layout(physical_pass, index, implicit(index)));
            finals.push(final_layout(physical_pass, index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        }

        if let Some(depth) = physical_pass.physical_depth_stencil_attachment {
            let attachment_layout = if physical_pass.render_pass.depth_stencil_read_only {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            };
            let initial = initial_layout(physical_pass, depth, implicit(depth));
            let last = final_layout(physical_pass, depth, attachment_layout);

            let rp = &mut physical_pass.render_pass;
            if dims[depth].transient && Some(depth) != swapchain_physical_index {
                rp.store_depth_stencil = false;
            }
            rp.depth_stencil_initial_layout = initial;
            rp.depth_stencil_final_layout = last;
        }

        let rp = &mut physical_pass.render_pass;
        rp.store_attachments = store;
        rp.color_initial_layouts = initial;
        rp.color_final_layouts = finals;
    }
}

fn initial_layout(physical_pass: &PhysicalPass, index: usize, implicit: bool) -> vk::ImageLayout {
    if implicit || physical_pass.discards.contains(&index) {
        return vk::ImageLayout::UNDEFINED;
    }
    physical_pass
        .invalidate
        .iter()
        .find(|barrier| barrier.resource_index == index && !barrier.history)
        .map_or(vk::ImageLayout::UNDEFINED, |barrier| barrier.layout)
}

fn final_layout(physical_pass: &PhysicalPass, index: usize, attachment_layout: vk::ImageLayout) -> vk::ImageLayout {
    // Mip generation starts from the attachment layout.
    if physical_pass.mipmap_requests.iter().any(|request| request.physical_resource == index) {
        return vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
    }
    physical_pass
        .flush
        .iter()
        .find(|barrier| barrier.resource_index == index && !barrier.history)
        .map_or(attachment_layout, |barrier| barrier.layout)
}
