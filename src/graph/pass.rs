//! This module mainly exposes the [`PassBuilder`] struct, used for declaring passes in a
//! [`RenderGraph`](crate::RenderGraph).
//!
//! A pass declares every resource it reads and writes by name, in a category that tells the graph how the resource
//! is used: color, resolve or depth-stencil attachment, input attachment, sampled texture, storage texture or buffer,
//! blit source or destination, vertex/index/indirect/uniform buffer, or history (the previous frame's contents).
//! The category decides the pipeline stage, access mask, image layout and usage flags the graph plans for it.
//!
//! Additionally, each pass can carry callbacks: one that records its commands, an optional layered variant,
//! one that decides whether the pass needs to run at all this frame, and clear value callbacks for its attachments.
//! A color can be given to each pass which will show up in debuggers like [*RenderDoc*](https://renderdoc.org/)
//! if the `debug-markers` feature is enabled.
//!
//! # Example
//!
//! ```ignore
//! use vk_render_graph::prelude::*;
//!
//! graph.add_pass("gbuffer", RenderGraphQueue::Graphics)
//!     .add_color_output("albedo", AttachmentInfo::default().format(vk::Format::R8G8B8A8_SRGB), None)
//!     .set_depth_stencil_output("depth", AttachmentInfo::default().format(vk::Format::D32_SFLOAT))
//!     .set_get_clear_color(|_| Some(ClearColor::Float([0.0, 0.0, 0.0, 1.0])))
//!     .set_get_clear_depth_stencil(|| Some(ClearDepthStencil { depth: 1.0, stencil: 0 }))
//!     .set_build_render_pass(|cmd, resources| {
//!         // Record draws into `cmd`.
//!         Ok(())
//!     });
//!
//! graph.add_pass("lighting", RenderGraphQueue::Graphics)
//!     // Sampling the albedo in the fragment shader orders this pass after "gbuffer".
//!     .add_texture_input("albedo", None)
//!     .add_color_output("hdr", AttachmentInfo::default().format(vk::Format::R16G16B16A16_SFLOAT), None);
//! ```

use anyhow::Result;
use ash::vk;

use crate::command_buffer::traits::Backend;
use crate::core::queue::RenderGraphQueue;
use crate::graph::pass_graph::RenderGraph;
use crate::graph::physical_resource::PhysicalResources;
use crate::graph::resource::{AttachmentInfo, BufferInfo};
use crate::graph::virtual_resource::ResourceRegistry;
use crate::PipelineStage;

/// Defines a pass executor that is called when the pass is recorded.
pub trait PassExecutor<B: Backend> {
    /// Record this pass to a command buffer.
    fn execute(&mut self, cmd: &mut B::CommandBuffer, resources: &PhysicalResources<B>) -> Result<()>;
}

impl<B, F> PassExecutor<B> for F
where
    B: Backend,
    F: FnMut(&mut B::CommandBuffer, &PhysicalResources<B>) -> Result<()>,
{
    fn execute(&mut self, cmd: &mut B::CommandBuffer, resources: &PhysicalResources<B>) -> Result<()> {
        self(cmd, resources)
    }
}

/// Pass executor that is called once per layer of a layered render pass.
pub trait LayeredPassExecutor<B: Backend> {
    /// Record this pass to a command buffer for a single layer.
    fn execute(&mut self, layer: u32, cmd: &mut B::CommandBuffer, resources: &PhysicalResources<B>) -> Result<()>;
}

impl<B, F> LayeredPassExecutor<B> for F
where
    B: Backend,
    F: FnMut(u32, &mut B::CommandBuffer, &PhysicalResources<B>) -> Result<()>,
{
    fn execute(&mut self, layer: u32, cmd: &mut B::CommandBuffer, resources: &PhysicalResources<B>) -> Result<()> {
        self(layer, cmd, resources)
    }
}

pub(crate) type BoxedPassFn<B> = Box<dyn PassExecutor<B>>;
pub(crate) type BoxedLayeredPassFn<B> = Box<dyn LayeredPassExecutor<B>>;

/// Clear value for a color attachment.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ClearColor {
    Float([f32; 4]),
    Int([i32; 4]),
    Uint([u32; 4]),
}

/// Clear value for a depth-stencil attachment.
#[derive(Copy, Clone, Default, Debug, PartialEq)]
pub struct ClearDepthStencil {
    pub depth: f32,
    pub stencil: u32,
}

/// A texture read with explicit synchronization parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AccessedTexture {
    pub texture: usize,
    pub stages: PipelineStage,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

/// A buffer read with explicit synchronization parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AccessedBuffer {
    pub buffer: usize,
    pub stages: PipelineStage,
    pub access: vk::AccessFlags2,
}

/// Per-pass callbacks. These are stored next to the pass declarations, so the planner never sees a closure.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Default(bound = ""))]
pub(crate) struct PassCallbacks<B: Backend> {
    #[derivative(Debug = "ignore")]
    pub build_render_pass: Option<BoxedPassFn<B>>,
    #[derivative(Debug = "ignore")]
    pub build_render_pass_layered: Option<BoxedLayeredPassFn<B>>,
    #[derivative(Debug = "ignore")]
    pub need_render_pass: Option<Box<dyn FnMut() -> bool>>,
    #[derivative(Debug = "ignore")]
    pub clear_color: Option<Box<dyn FnMut(u32) -> Option<ClearColor>>>,
    #[derivative(Debug = "ignore")]
    pub clear_depth_stencil: Option<Box<dyn FnMut() -> Option<ClearDepthStencil>>>,
}

impl<B: Backend> PassCallbacks<B> {
    pub fn need_render_pass(&mut self) -> bool {
        self.need_render_pass.as_mut().map_or(true, |f| f())
    }

    pub fn clear_color(&mut self, index: u32) -> Option<ClearColor> {
        self.clear_color.as_mut().and_then(|f| f(index))
    }

    pub fn clear_depth_stencil(&mut self) -> Option<ClearDepthStencil> {
        self.clear_depth_stencil.as_mut().and_then(|f| f())
    }
}

/// A declared pass. All resource references are indices into the graph's resource list.
///
/// Color, storage, blit-texture and storage-texture inputs are parallel to their outputs: input `i` is renamed into
/// output `i`, and `None` means the output starts out cleared or undefined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderPass {
    pub(crate) name: String,
    pub(crate) index: usize,
    pub(crate) queue: RenderGraphQueue,
    pub(crate) physical_pass: Option<usize>,
    pub(crate) debug_color: Option<[f32; 4]>,
    /// Set when a `need_render_pass` callback exists, meaning this pass may be skipped at execution time.
    pub(crate) may_skip: bool,

    pub(crate) color_outputs: Vec<usize>,
    pub(crate) color_inputs: Vec<Option<usize>>,
    pub(crate) color_scale_inputs: Vec<Option<usize>>,
    pub(crate) resolve_outputs: Vec<usize>,
    pub(crate) storage_outputs: Vec<usize>,
    pub(crate) storage_inputs: Vec<Option<usize>>,
    pub(crate) storage_texture_outputs: Vec<usize>,
    pub(crate) storage_texture_inputs: Vec<Option<usize>>,
    pub(crate) blit_texture_outputs: Vec<usize>,
    pub(crate) blit_texture_inputs: Vec<Option<usize>>,
    pub(crate) attachment_inputs: Vec<usize>,
    pub(crate) history_inputs: Vec<usize>,
    pub(crate) generic_texture_inputs: Vec<AccessedTexture>,
    pub(crate) generic_buffer_inputs: Vec<AccessedBuffer>,
    pub(crate) depth_stencil_input: Option<usize>,
    pub(crate) depth_stencil_output: Option<usize>,
    pub(crate) fake_resource_aliases: Vec<(usize, usize)>,
}

impl RenderPass {
    pub(crate) fn new(name: String, index: usize, queue: RenderGraphQueue) -> Self {
        Self {
            name,
            index,
            queue,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn queue(&self) -> RenderGraphQueue {
        self.queue
    }

    /// Physical pass this pass was merged into by the last successful bake.
    pub fn physical_pass(&self) -> Option<usize> {
        self.physical_pass
    }

    pub fn color_outputs(&self) -> &[usize] {
        &self.color_outputs
    }

    pub fn color_inputs(&self) -> &[Option<usize>] {
        &self.color_inputs
    }

    /// Color inputs that are rescaled into their output because the dimensions differ.
    pub fn color_scale_inputs(&self) -> &[Option<usize>] {
        &self.color_scale_inputs
    }

    pub fn resolve_outputs(&self) -> &[usize] {
        &self.resolve_outputs
    }

    pub fn storage_outputs(&self) -> &[usize] {
        &self.storage_outputs
    }

    pub fn storage_inputs(&self) -> &[Option<usize>] {
        &self.storage_inputs
    }

    pub fn storage_texture_outputs(&self) -> &[usize] {
        &self.storage_texture_outputs
    }

    pub fn storage_texture_inputs(&self) -> &[Option<usize>] {
        &self.storage_texture_inputs
    }

    pub fn blit_texture_outputs(&self) -> &[usize] {
        &self.blit_texture_outputs
    }

    pub fn blit_texture_inputs(&self) -> &[Option<usize>] {
        &self.blit_texture_inputs
    }

    pub fn attachment_inputs(&self) -> &[usize] {
        &self.attachment_inputs
    }

    pub fn history_inputs(&self) -> &[usize] {
        &self.history_inputs
    }

    pub fn generic_texture_inputs(&self) -> &[AccessedTexture] {
        &self.generic_texture_inputs
    }

    pub fn generic_buffer_inputs(&self) -> &[AccessedBuffer] {
        &self.generic_buffer_inputs
    }

    pub fn depth_stencil_input(&self) -> Option<usize> {
        self.depth_stencil_input
    }

    pub fn depth_stencil_output(&self) -> Option<usize> {
        self.depth_stencil_output
    }

    pub fn fake_resource_aliases(&self) -> &[(usize, usize)] {
        &self.fake_resource_aliases
    }

    /// Move color input `index` into the scaled input slot.
    pub(crate) fn make_color_input_scaled(&mut self, index: usize) {
        std::mem::swap(&mut self.color_scale_inputs[index], &mut self.color_inputs[index]);
    }

    /// Every resource this pass reads or writes, in a stable order. May contain duplicates.
    pub fn touched_resources(&self) -> Vec<usize> {
        let mut all = Vec::new();
        all.extend(self.color_inputs.iter().flatten());
        all.extend(self.color_scale_inputs.iter().flatten());
        all.extend(&self.color_outputs);
        all.extend(&self.resolve_outputs);
        all.extend(self.storage_inputs.iter().flatten());
        all.extend(&self.storage_outputs);
        all.extend(self.storage_texture_inputs.iter().flatten());
        all.extend(&self.storage_texture_outputs);
        all.extend(self.blit_texture_inputs.iter().flatten());
        all.extend(&self.blit_texture_outputs);
        all.extend(&self.attachment_inputs);
        all.extend(&self.history_inputs);
        all.extend(self.generic_texture_inputs.iter().map(|input| input.texture));
        all.extend(self.generic_buffer_inputs.iter().map(|input| input.buffer));
        all.extend(self.depth_stencil_input);
        all.extend(self.depth_stencil_output);
        all.extend(self.fake_resource_aliases.iter().map(|(_, to)| *to));
        all
    }
}

/// Used to declare the inputs, outputs and callbacks of a pass. Obtained from
/// [`RenderGraph::add_pass()`](crate::RenderGraph::add_pass).
/// # Example
/// See the [`pass`](crate::graph::pass) module level documentation.
pub struct PassBuilder<'g, B: Backend> {
    graph: &'g mut RenderGraph<B>,
    index: usize,
}

impl<'g, B: Backend> PassBuilder<'g, B> {
    pub(crate) fn new(graph: &'g mut RenderGraph<B>, index: usize) -> Self {
        Self {
            graph,
            index,
        }
    }

    /// Index of the pass being declared.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The pass declaration as it currently stands.
    pub fn pass(&self) -> &RenderPass {
        &self.graph.passes[self.index]
    }

    fn parts(&mut self) -> (&mut RenderPass, &mut ResourceRegistry) {
        (&mut self.graph.passes[self.index], &mut self.graph.resources)
    }

    fn callbacks(&mut self) -> &mut PassCallbacks<B> {
        &mut self.graph.callbacks[self.index]
    }

    /// Look up or declare a texture that this pass reads, registering the read.
    fn read_texture(&mut self, name: &str, usage: vk::ImageUsageFlags) -> usize {
        let (pass, resources) = self.parts();
        let texture = resources.texture(name);
        let resource = resources.get_mut(texture);
        resource.add_queue(pass.queue);
        resource.read_in_pass(pass.index);
        resource.add_image_usage(usage);
        texture
    }

    /// Look up or declare a texture that this pass writes, registering the write and its declared properties.
    fn write_texture(&mut self, name: &str, info: AttachmentInfo, usage: vk::ImageUsageFlags) -> usize {
        let (pass, resources) = self.parts();
        let texture = resources.texture(name);
        let resource = resources.get_mut(texture);
        resource.add_queue(pass.queue);
        resource.written_in_pass(pass.index);
        resource.set_attachment_info(info);
        resource.add_image_usage(usage);
        texture
    }

    fn read_buffer(&mut self, name: &str, usage: vk::BufferUsageFlags) -> usize {
        let (pass, resources) = self.parts();
        let buffer = resources.buffer(name);
        let resource = resources.get_mut(buffer);
        resource.add_queue(pass.queue);
        resource.read_in_pass(pass.index);
        resource.add_buffer_usage(usage);
        buffer
    }

    fn default_shader_stage(&self) -> PipelineStage {
        if self.pass().queue.is_compute() {
            PipelineStage::COMPUTE_SHADER
        } else {
            PipelineStage::FRAGMENT_SHADER
        }
    }

    /// Adds a color attachment. If `input` is given, its contents are loaded into the attachment and both names
    /// share one physical image. Otherwise the attachment is cleared (if a clear color is returned for it) or discarded.
    pub fn add_color_output(mut self, name: &str, info: AttachmentInfo, input: Option<&str>) -> Self {
        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        // Mip generation blits from and to the attachment.
        if info.levels != 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        }
        let output = self.write_texture(name, info, usage);
        let input = input.map(|input| self.read_texture(input, vk::ImageUsageFlags::COLOR_ATTACHMENT));
        let (pass, _) = self.parts();
        pass.color_outputs.push(output);
        pass.color_inputs.push(input);
        pass.color_scale_inputs.push(None);
        self
    }

    /// Adds a multisample resolve target for the color output at the same index.
    pub fn add_resolve_output(mut self, name: &str, info: AttachmentInfo) -> Self {
        let output = self.write_texture(name, info, vk::ImageUsageFlags::COLOR_ATTACHMENT);
        self.parts().0.resolve_outputs.push(output);
        self
    }

    /// Reads a color or depth attachment of an earlier subpass as an input attachment.
    pub fn add_attachment_input(mut self, name: &str) -> Self {
        let input = self.read_texture(name, vk::ImageUsageFlags::INPUT_ATTACHMENT);
        let (pass, _) = self.parts();
        if !pass.attachment_inputs.contains(&input) {
            pass.attachment_inputs.push(input);
        }
        self
    }

    /// Samples the contents `name` had at the end of the previous frame. History reads do not order passes.
    pub fn add_history_input(mut self, name: &str) -> Self {
        let (pass, resources) = self.parts();
        let texture = resources.texture(name);
        let resource = resources.get_mut(texture);
        resource.add_queue(pass.queue);
        resource.add_image_usage(vk::ImageUsageFlags::SAMPLED);
        if !pass.history_inputs.contains(&texture) {
            pass.history_inputs.push(texture);
        }
        self
    }

    /// Samples a texture. `stages` defaults to the fragment shader, or the compute shader on compute queues.
    /// Declaring the same texture twice on one pass has no further effect.
    pub fn add_texture_input(self, name: &str, stages: Option<PipelineStage>) -> Self {
        let stages = stages.unwrap_or_else(|| self.default_shader_stage());
        self.add_generic_texture_input(
            name,
            stages,
            vk::AccessFlags2::SHADER_READ,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageUsageFlags::SAMPLED,
        )
    }

    /// Reads a texture with explicit synchronization parameters, for uses the graph cannot infer.
    pub fn add_generic_texture_input(
        mut self,
        name: &str,
        stages: PipelineStage,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        let texture = self.read_texture(name, usage);
        let (pass, _) = self.parts();
        if pass.generic_texture_inputs.iter().any(|input| input.texture == texture) {
            return self;
        }
        pass.generic_texture_inputs.push(AccessedTexture {
            texture,
            stages,
            access,
            layout,
        });
        self
    }

    /// Reads a texture as the source of a transfer blit.
    pub fn add_blit_texture_read_only_input(self, name: &str) -> Self {
        self.add_generic_texture_input(
            name,
            PipelineStage::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_SRC,
        )
    }

    /// Writes a texture with transfer blits. With `input`, the texture's previous contents are kept.
    pub fn add_blit_texture_output(mut self, name: &str, info: AttachmentInfo, input: Option<&str>) -> Self {
        let output = self.write_texture(name, info, vk::ImageUsageFlags::TRANSFER_DST);
        let input = input.map(|input| self.read_texture(input, vk::ImageUsageFlags::TRANSFER_DST));
        let (pass, _) = self.parts();
        pass.blit_texture_outputs.push(output);
        pass.blit_texture_inputs.push(input);
        self
    }

    /// Writes a storage image. With `input`, the image is read-modify-written.
    pub fn add_storage_texture_output(mut self, name: &str, info: AttachmentInfo, input: Option<&str>) -> Self {
        let output = self.write_texture(name, info, vk::ImageUsageFlags::STORAGE);
        let input = input.map(|input| self.read_texture(input, vk::ImageUsageFlags::STORAGE));
        let (pass, _) = self.parts();
        pass.storage_texture_outputs.push(output);
        pass.storage_texture_inputs.push(input);
        self
    }

    /// Writes a storage buffer. With `input`, the buffer is read-modify-written.
    pub fn add_storage_output(mut self, name: &str, info: BufferInfo, input: Option<&str>) -> Self {
        let output = {
            let (pass, resources) = self.parts();
            let buffer = resources.buffer(name);
            let resource = resources.get_mut(buffer);
            resource.add_queue(pass.queue);
            resource.written_in_pass(pass.index);
            resource.set_buffer_info(info);
            resource.add_buffer_usage(vk::BufferUsageFlags::STORAGE_BUFFER);
            buffer
        };
        let input = input.map(|input| self.read_buffer(input, vk::BufferUsageFlags::STORAGE_BUFFER));
        let (pass, _) = self.parts();
        pass.storage_outputs.push(output);
        pass.storage_inputs.push(input);
        self
    }

    /// Reads a buffer with explicit synchronization parameters.
    pub fn add_generic_buffer_input(
        mut self,
        name: &str,
        stages: PipelineStage,
        access: vk::AccessFlags2,
        usage: vk::BufferUsageFlags,
    ) -> Self {
        let buffer = self.read_buffer(name, usage);
        let (pass, _) = self.parts();
        if let Some(existing) = pass.generic_buffer_inputs.iter_mut().find(|input| input.buffer == buffer) {
            existing.stages |= stages;
            existing.access |= access;
            return self;
        }
        pass.generic_buffer_inputs.push(AccessedBuffer {
            buffer,
            stages,
            access,
        });
        self
    }

    pub fn add_vertex_buffer_input(self, name: &str) -> Self {
        self.add_generic_buffer_input(
            name,
            PipelineStage::VERTEX_ATTRIBUTE_INPUT,
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )
    }

    pub fn add_index_buffer_input(self, name: &str) -> Self {
        self.add_generic_buffer_input(
            name,
            PipelineStage::INDEX_INPUT,
            vk::AccessFlags2::INDEX_READ,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )
    }

    pub fn add_indirect_buffer_input(self, name: &str) -> Self {
        self.add_generic_buffer_input(
            name,
            PipelineStage::DRAW_INDIRECT,
            vk::AccessFlags2::INDIRECT_COMMAND_READ,
            vk::BufferUsageFlags::INDIRECT_BUFFER,
        )
    }

    /// Reads a uniform buffer. `stages` defaults to the vertex and fragment shaders, or the compute shader on compute queues.
    pub fn add_uniform_input(self, name: &str, stages: Option<PipelineStage>) -> Self {
        let stages = stages.unwrap_or_else(|| {
            if self.pass().queue.is_compute() {
                PipelineStage::COMPUTE_SHADER
            } else {
                PipelineStage::VERTEX_SHADER | PipelineStage::FRAGMENT_SHADER
            }
        });
        self.add_generic_buffer_input(name, stages, vk::AccessFlags2::UNIFORM_READ, vk::BufferUsageFlags::UNIFORM_BUFFER)
    }

    /// Reads a storage buffer without writing it.
    pub fn add_storage_read_only_input(self, name: &str, stages: Option<PipelineStage>) -> Self {
        let stages = stages.unwrap_or_else(|| self.default_shader_stage());
        self.add_generic_buffer_input(name, stages, vk::AccessFlags2::SHADER_READ, vk::BufferUsageFlags::STORAGE_BUFFER)
    }

    /// Tests against a depth-stencil attachment without writing it.
    pub fn set_depth_stencil_input(mut self, name: &str) -> Self {
        let input = self.read_texture(name, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        self.parts().0.depth_stencil_input = Some(input);
        self
    }

    /// Writes a depth-stencil attachment. Together with [`PassBuilder::set_depth_stencil_input()`], the attachment is
    /// read-modify-written.
    pub fn set_depth_stencil_output(mut self, name: &str, info: AttachmentInfo) -> Self {
        let output = self.write_texture(name, info, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        self.parts().0.depth_stencil_output = Some(output);
        self
    }

    /// Declare that this pass produces `to` as another name for `from`. Later passes may read `to` and get the image
    /// `from` resolves to.
    pub fn add_fake_resource_write_alias(mut self, from: &str, to: &str) -> Self {
        let (pass, resources) = self.parts();
        let from = resources.texture(from);
        let to = resources.texture(to);
        let source = resources.get(from).clone();
        let alias = resources.get_mut(to);
        alias.info = source.info;
        alias.queues = source.queues;
        alias.read_passes.clear();
        alias.write_passes.clear();
        alias.add_queue(pass.queue);
        alias.written_in_pass(pass.index);
        pass.fake_resource_aliases.push((from, to));
        self
    }

    /// Set the function that records this pass.
    pub fn set_build_render_pass<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut B::CommandBuffer, &PhysicalResources<B>) -> Result<()> + 'static, {
        self.callbacks().build_render_pass = Some(Box::new(f));
        self
    }

    /// Set the function that records one layer of this pass. Used instead of the plain callback when the pass renders
    /// to more than one layer.
    pub fn set_build_render_pass_layered<F>(mut self, f: F) -> Self
    where
        F: FnMut(u32, &mut B::CommandBuffer, &PhysicalResources<B>) -> Result<()> + 'static, {
        self.callbacks().build_render_pass_layered = Some(Box::new(f));
        self
    }

    /// Set the function that decides whether this pass runs in the current frame.
    /// Outputs of a pass with such a function never share memory with other resources.
    pub fn set_need_render_pass<F>(mut self, f: F) -> Self
    where
        F: FnMut() -> bool + 'static, {
        self.callbacks().need_render_pass = Some(Box::new(f));
        self.parts().0.may_skip = true;
        self
    }

    /// Set the function that returns the clear color for color output `index`, or `None` to not clear it.
    /// Also called while baking to decide which attachments get cleared.
    pub fn set_get_clear_color<F>(mut self, f: F) -> Self
    where
        F: FnMut(u32) -> Option<ClearColor> + 'static, {
        self.callbacks().clear_color = Some(Box::new(f));
        self
    }

    /// Set the function that returns the depth-stencil clear value, or `None` to not clear it.
    pub fn set_get_clear_depth_stencil<F>(mut self, f: F) -> Self
    where
        F: FnMut() -> Option<ClearDepthStencil> + 'static, {
        self.callbacks().clear_depth_stencil = Some(Box::new(f));
        self
    }

    /// Set the color of this pass in debuggers. Only used with the `debug-markers` feature.
    pub fn debug_color(mut self, color: [f32; 4]) -> Self {
        self.parts().0.debug_color = Some(color);
        self
    }
}
