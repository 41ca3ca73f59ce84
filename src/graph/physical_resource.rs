//! Physical resources are what the declared resources of a graph collapse into. Renamed input/output pairs, fake
//! aliases and repeated uses of the same name all end up on one physical index, which is what images and buffers are
//! actually allocated for.
//!
//! At execution time, the concrete handles are exposed to pass callbacks through [`PhysicalResources`].

use std::collections::HashMap;

use anyhow::Result;
use ash::vk;

use crate::command_buffer::traits::Backend;
use crate::core::error::Error;
use crate::core::queue::QueueFlags;
use crate::graph::pass::RenderPass;
use crate::graph::resource::{BufferInfo, ResourceType, SizeClass};
use crate::graph::virtual_resource::{RenderResource, ResourceInfo, ResourceRegistry};
use crate::util::format::full_mip_chain;

/// Fully resolved properties of a physical resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDimensions {
    pub ty: ResourceType,
    pub format: vk::Format,
    /// Only meaningful for buffers.
    pub buffer_info: BufferInfo,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub layers: u32,
    pub levels: u32,
    pub samples: u32,
    pub persistent: bool,
    /// Contents never outlive the physical pass that uses the resource.
    pub transient: bool,
    pub unorm_srgb_alias: bool,
    /// Every logical queue that touches this physical resource.
    pub queues: QueueFlags,
    pub image_usage: vk::ImageUsageFlags,
    /// Name of the first resource that was assigned this physical index.
    pub name: String,
}

impl Default for ResourceDimensions {
    fn default() -> Self {
        Self {
            ty: ResourceType::Texture,
            format: vk::Format::UNDEFINED,
            buffer_info: BufferInfo::default(),
            width: 0,
            height: 0,
            depth: 1,
            layers: 1,
            levels: 1,
            samples: 1,
            persistent: true,
            transient: false,
            unorm_srgb_alias: false,
            queues: QueueFlags::empty(),
            image_usage: vk::ImageUsageFlags::empty(),
            name: String::new(),
        }
    }
}

impl ResourceDimensions {
    /// Dimensions of a backbuffer with the given extent and format.
    pub fn swapchain(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            format,
            width,
            height,
            ..Default::default()
        }
    }

    pub fn is_buffer(&self) -> bool {
        self.ty == ResourceType::Buffer
    }

    pub fn is_storage_image(&self) -> bool {
        !self.is_buffer() && self.image_usage.contains(vk::ImageUsageFlags::STORAGE)
    }

    /// Equal in every property that decides whether two resources can share memory.
    /// Queues, usage and name are merged instead of compared.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.ty == other.ty
            && self.format == other.format
            && self.buffer_info == other.buffer_info
            && self.width == other.width
            && self.height == other.height
            && self.depth == other.depth
            && self.layers == other.layers
            && self.levels == other.levels
            && self.samples == other.samples
            && self.persistent == other.persistent
            && self.transient == other.transient
            && self.unorm_srgb_alias == other.unorm_srgb_alias
    }

    fn merge_usage(&mut self, resource: &RenderResource) {
        self.queues |= resource.queues();
        self.image_usage |= resource.image_usage();
        self.buffer_info.usage |= resource.buffer_usage();
    }
}

fn scale(value: f32, base: u32) -> u32 {
    ((value * base as f32).ceil() as u32).max(1)
}

/// Resolve the dimensions of a declared resource against the backbuffer dimensions.
pub(crate) fn resolve_dimensions(
    resources: &ResourceRegistry,
    resource: &RenderResource,
    swapchain: &ResourceDimensions,
) -> Result<ResourceDimensions, Error> {
    resolve_recursive(resources, resource, swapchain, 0)
}

fn resolve_recursive(
    resources: &ResourceRegistry,
    resource: &RenderResource,
    swapchain: &ResourceDimensions,
    depth: usize,
) -> Result<ResourceDimensions, Error> {
    if depth > resources.len() {
        return Err(Error::RecursiveRelativeSize(resource.name().to_owned()));
    }

    let (info, usage) = match &resource.info {
        ResourceInfo::Buffer { info, usage } => {
            let mut buffer_info = info.clone();
            buffer_info.usage |= *usage;
            return Ok(ResourceDimensions {
                ty: ResourceType::Buffer,
                persistent: info.persistent,
                buffer_info,
                queues: resource.queues(),
                name: resource.name().to_owned(),
                ..Default::default()
            });
        }
        ResourceInfo::Texture { info, usage } => (info, *usage),
    };

    let (width, height, depth_extent) = match &info.size_class {
        SizeClass::Absolute => (
            (info.size_x.ceil() as u32).max(1),
            (info.size_y.ceil() as u32).max(1),
            (info.size_z.ceil() as u32).max(1),
        ),
        SizeClass::SwapchainRelative => (
            scale(info.size_x, swapchain.width),
            scale(info.size_y, swapchain.height),
            (info.size_z.ceil() as u32).max(1),
        ),
        SizeClass::InputRelative(name) => {
            let relative = resources.find(name).ok_or_else(|| Error::UnknownRelativeResource {
                resource: resource.name().to_owned(),
                relative_to: name.clone(),
            })?;
            let base = resolve_recursive(resources, resources.get(relative), swapchain, depth + 1)?;
            (
                scale(info.size_x, base.width),
                scale(info.size_y, base.height),
                scale(info.size_z, base.depth),
            )
        }
    };

    let format = if info.format == vk::Format::UNDEFINED {
        swapchain.format
    } else {
        info.format
    };
    let requested_levels = if info.levels == 0 { u32::MAX } else { info.levels };

    Ok(ResourceDimensions {
        ty: ResourceType::Texture,
        format,
        width,
        height,
        depth: depth_extent,
        layers: info.layers.max(1),
        levels: full_mip_chain(width, height, depth_extent).min(requested_levels),
        samples: info.samples.max(1),
        persistent: info.persistent,
        unorm_srgb_alias: info.unorm_srgb_alias,
        queues: resource.queues(),
        image_usage: usage | info.aux_usage,
        name: resource.name().to_owned(),
        ..Default::default()
    })
}

struct PhysicalAssigner<'a> {
    resources: &'a mut ResourceRegistry,
    swapchain: &'a ResourceDimensions,
    dimensions: Vec<ResourceDimensions>,
}

impl<'a> PhysicalAssigner<'a> {
    /// Give `resource` a physical index if it has none, otherwise merge its usage into the existing one.
    fn assign(&mut self, resource: usize) -> Result<usize, Error> {
        let declared = self.resources.get(resource);
        if let Some(index) = declared.physical_index() {
            self.dimensions[index].merge_usage(declared);
            return Ok(index);
        }
        let dimensions = resolve_dimensions(self.resources, declared, self.swapchain)?;
        let index = self.dimensions.len();
        trace!("Physical resource #{index} <- `{}`", declared.name());
        self.dimensions.push(dimensions);
        self.resources.get_mut(resource).physical_index = Some(index);
        Ok(index)
    }

    /// Make `output` share the physical index of `input`.
    fn rename(&mut self, pass: &RenderPass, input: usize, output: usize) -> Result<(), Error> {
        let physical = self.assign(input)?;
        match self.resources.get(output).physical_index() {
            None => {
                self.resources.get_mut(output).physical_index = Some(physical);
                Ok(())
            }
            Some(existing) if existing == physical => Ok(()),
            Some(_) => Err(Error::PhysicalIndexConflict {
                pass: pass.name().to_owned(),
                input: self.resources.get(input).name().to_owned(),
                output: self.resources.get(output).name().to_owned(),
            }),
        }
    }

    fn rename_all(&mut self, pass: &RenderPass, inputs: &[Option<usize>], outputs: &[usize]) -> Result<(), Error> {
        for (input, output) in inputs.iter().zip(outputs) {
            if let Some(input) = input {
                self.rename(pass, *input, *output)?;
            }
        }
        Ok(())
    }

    fn assign_all(&mut self, resources: impl IntoIterator<Item = usize>) -> Result<(), Error> {
        for resource in resources {
            self.assign(resource)?;
        }
        Ok(())
    }
}

/// Assign physical indices to every resource touched by the scheduled passes, in schedule order.
/// Returns the dimensions of every physical resource and whether it is read as history.
pub(crate) fn build_physical_resources(
    pass_stack: &[usize],
    passes: &[RenderPass],
    resources: &mut ResourceRegistry,
    swapchain: &ResourceDimensions,
) -> Result<(Vec<ResourceDimensions>, Vec<bool>), Error> {
    let mut assigner = PhysicalAssigner {
        resources,
        swapchain,
        dimensions: Vec::new(),
    };

    for &index in pass_stack {
        let pass = &passes[index];
        assigner.assign_all(pass.generic_buffer_inputs.iter().map(|input| input.buffer))?;
        assigner.assign_all(pass.generic_texture_inputs.iter().map(|input| input.texture))?;
        assigner.assign_all(pass.color_scale_inputs.iter().flatten().copied())?;

        assigner.rename_all(pass, &pass.color_inputs, &pass.color_outputs)?;
        assigner.rename_all(pass, &pass.storage_inputs, &pass.storage_outputs)?;
        assigner.rename_all(pass, &pass.blit_texture_inputs, &pass.blit_texture_outputs)?;
        assigner.rename_all(pass, &pass.storage_texture_inputs, &pass.storage_texture_outputs)?;

        assigner.assign_all(pass.color_outputs.iter().copied())?;
        assigner.assign_all(pass.resolve_outputs.iter().copied())?;
        assigner.assign_all(pass.storage_outputs.iter().copied())?;
        assigner.assign_all(pass.blit_texture_outputs.iter().copied())?;
        assigner.assign_all(pass.storage_texture_outputs.iter().copied())?;

        match (pass.depth_stencil_input, pass.depth_stencil_output) {
            (Some(input), Some(output)) => {
                assigner.rename(pass, input, output)?;
                assigner.assign(output)?;
            }
            (Some(input), None) => {
                assigner.assign(input)?;
            }
            (None, Some(output)) => {
                assigner.assign(output)?;
            }
            (None, None) => {}
        }

        assigner.assign_all(pass.attachment_inputs.iter().copied())?;

        for &(from, to) in &pass.fake_resource_aliases {
            let physical = assigner.resources.get(from).physical_index();
            assigner.resources.get_mut(to).physical_index = physical;
        }
    }

    let mut has_history = vec![false; assigner.dimensions.len()];
    for &index in pass_stack {
        let pass = &passes[index];
        for &history in &pass.history_inputs {
            let resource = assigner.resources.get(history);
            match resource.physical_index() {
                Some(physical) => has_history[physical] = true,
                None => {
                    return Err(Error::HistoryWithoutWriter {
                        pass: pass.name().to_owned(),
                        resource: resource.name().to_owned(),
                    })
                }
            }
        }
    }

    Ok((assigner.dimensions, has_history))
}

/// Mark textures that live inside a single physical pass as transient. Requires physical pass indices on the passes.
pub(crate) fn build_transients(
    passes: &[RenderPass],
    resources: &ResourceRegistry,
    dimensions: &mut [ResourceDimensions],
    has_history: &[bool],
) {
    for (physical, dimension) in dimensions.iter_mut().enumerate() {
        dimension.transient = !dimension.is_buffer() && !dimension.is_storage_image() && !has_history[physical];
    }

    let mut used_in: Vec<Option<usize>> = vec![None; dimensions.len()];
    for resource in resources.as_slice() {
        if resource.ty() != ResourceType::Texture {
            continue;
        }
        let Some(physical) = resource.physical_index() else {
            continue;
        };
        let users = resource.write_passes().iter().chain(resource.read_passes());
        for physical_pass in users.filter_map(|&pass| passes[pass].physical_pass()) {
            match used_in[physical] {
                Some(existing) if existing != physical_pass => {
                    dimensions[physical].transient = false;
                    break;
                }
                _ => used_in[physical] = Some(physical_pass),
            }
        }
    }
}

/// Concrete images and buffers bound to the physical resources of the current frame.
#[derive(Derivative)]
#[derivative(Debug(bound = ""), Default(bound = ""))]
pub struct PhysicalResources<B: Backend> {
    pub(crate) images: Vec<Option<B::Image>>,
    pub(crate) history_images: Vec<Option<B::Image>>,
    pub(crate) buffers: Vec<Option<B::Buffer>>,
    pub(crate) names: HashMap<String, usize>,
}

impl<B: Backend> PhysicalResources<B> {
    /// Physical index a declared resource was assigned to.
    pub fn physical_index(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Image bound to a physical index.
    pub fn physical_image(&self, index: usize) -> Option<&B::Image> {
        self.images.get(index).and_then(Option::as_ref)
    }

    /// Image holding the previous frame's contents of a physical index.
    pub fn physical_history_image(&self, index: usize) -> Option<&B::Image> {
        self.history_images.get(index).and_then(Option::as_ref)
    }

    /// Buffer bound to a physical index.
    pub fn physical_buffer(&self, index: usize) -> Option<&B::Buffer> {
        self.buffers.get(index).and_then(Option::as_ref)
    }

    /// Image that a texture resource resolves to this frame.
    /// # Errors
    /// - Fails with [`Error::NoResourceBound`] if no image is bound for this name.
    pub fn image(&self, name: &str) -> Result<&B::Image> {
        Ok(self
            .physical_index(name)
            .and_then(|index| self.physical_image(index))
            .ok_or_else(|| Error::NoResourceBound(name.to_owned()))?)
    }

    /// Image holding the previous frame's contents of a texture resource.
    /// # Errors
    /// - Fails with [`Error::NoResourceBound`] if the resource is not read as history.
    pub fn history_image(&self, name: &str) -> Result<&B::Image> {
        Ok(self
            .physical_index(name)
            .and_then(|index| self.physical_history_image(index))
            .ok_or_else(|| Error::NoResourceBound(name.to_owned()))?)
    }

    /// Buffer that a buffer resource resolves to this frame.
    /// # Errors
    /// - Fails with [`Error::NoResourceBound`] if no buffer is bound for this name.
    pub fn buffer(&self, name: &str) -> Result<&B::Buffer> {
        Ok(self
            .physical_index(name)
            .and_then(|index| self.physical_buffer(index))
            .ok_or_else(|| Error::NoResourceBound(name.to_owned()))?)
    }
}
