//! Resource registry entries. Every texture or buffer referenced by a pass is interned here by name,
//! and tracks which passes read and write it.

use std::collections::{BTreeSet, HashMap};

use ash::vk;

use crate::core::error::Error;
use crate::core::queue::{QueueFlags, RenderGraphQueue};
use crate::graph::resource::{AttachmentInfo, BufferInfo, ResourceType};

/// Handle to a resource in a [`RenderGraph`](crate::RenderGraph). Handles stay valid until
/// [`RenderGraph::reset()`](crate::RenderGraph::reset).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle {
    pub(crate) index: usize,
    pub(crate) ty: ResourceType,
}

impl ResourceHandle {
    /// Virtual index of this resource, assigned in declaration order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ty(&self) -> ResourceType {
        self.ty
    }
}

/// Declared properties that differ between textures and buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceInfo {
    Texture {
        info: AttachmentInfo,
        /// Union of the usage implied by every pass that touches this texture.
        usage: vk::ImageUsageFlags,
    },
    Buffer {
        info: BufferInfo,
        /// Union of the usage implied by every pass that touches this buffer.
        usage: vk::BufferUsageFlags,
    },
}

/// A texture or buffer declared in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResource {
    pub(crate) name: String,
    pub(crate) index: usize,
    pub(crate) physical_index: Option<usize>,
    pub(crate) write_passes: BTreeSet<usize>,
    pub(crate) read_passes: BTreeSet<usize>,
    pub(crate) queues: QueueFlags,
    pub(crate) info: ResourceInfo,
}

impl RenderResource {
    pub(crate) fn texture(name: String, index: usize) -> Self {
        Self::new(
            name,
            index,
            ResourceInfo::Texture {
                info: AttachmentInfo::default(),
                usage: vk::ImageUsageFlags::empty(),
            },
        )
    }

    pub(crate) fn buffer(name: String, index: usize) -> Self {
        Self::new(
            name,
            index,
            ResourceInfo::Buffer {
                info: BufferInfo::default(),
                usage: vk::BufferUsageFlags::empty(),
            },
        )
    }

    fn new(name: String, index: usize, info: ResourceInfo) -> Self {
        Self {
            name,
            index,
            physical_index: None,
            write_passes: BTreeSet::new(),
            read_passes: BTreeSet::new(),
            queues: QueueFlags::empty(),
            info,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn handle(&self) -> ResourceHandle {
        ResourceHandle {
            index: self.index,
            ty: self.ty(),
        }
    }

    pub fn ty(&self) -> ResourceType {
        match self.info {
            ResourceInfo::Texture { .. } => ResourceType::Texture,
            ResourceInfo::Buffer { .. } => ResourceType::Buffer,
        }
    }

    /// Physical resource this resource was assigned to by the last successful bake.
    pub fn physical_index(&self) -> Option<usize> {
        self.physical_index
    }

    /// Indices of all passes that write this resource.
    pub fn write_passes(&self) -> &BTreeSet<usize> {
        &self.write_passes
    }

    /// Indices of all passes that read this resource.
    pub fn read_passes(&self) -> &BTreeSet<usize> {
        &self.read_passes
    }

    /// All queues this resource is used on.
    pub fn queues(&self) -> QueueFlags {
        self.queues
    }

    /// Declared attachment properties, if this is a texture.
    pub fn attachment_info(&self) -> Option<&AttachmentInfo> {
        match &self.info {
            ResourceInfo::Texture { info, .. } => Some(info),
            ResourceInfo::Buffer { .. } => None,
        }
    }

    /// Declared buffer properties, if this is a buffer.
    pub fn buffer_info(&self) -> Option<&BufferInfo> {
        match &self.info {
            ResourceInfo::Buffer { info, .. } => Some(info),
            ResourceInfo::Texture { .. } => None,
        }
    }

    /// Accumulated image usage. Empty for buffers.
    pub fn image_usage(&self) -> vk::ImageUsageFlags {
        match self.info {
            ResourceInfo::Texture { usage, .. } => usage,
            ResourceInfo::Buffer { .. } => vk::ImageUsageFlags::empty(),
        }
    }

    /// Accumulated buffer usage. Empty for textures.
    pub fn buffer_usage(&self) -> vk::BufferUsageFlags {
        match self.info {
            ResourceInfo::Buffer { usage, .. } => usage,
            ResourceInfo::Texture { .. } => vk::BufferUsageFlags::empty(),
        }
    }

    pub(crate) fn written_in_pass(&mut self, pass: usize) {
        self.write_passes.insert(pass);
    }

    pub(crate) fn read_in_pass(&mut self, pass: usize) {
        self.read_passes.insert(pass);
    }

    pub(crate) fn add_queue(&mut self, queue: RenderGraphQueue) {
        self.queues |= queue.flag();
    }

    pub(crate) fn add_image_usage(&mut self, flags: vk::ImageUsageFlags) {
        if let ResourceInfo::Texture { usage, .. } = &mut self.info {
            *usage |= flags;
        }
    }

    pub(crate) fn add_buffer_usage(&mut self, flags: vk::BufferUsageFlags) {
        if let ResourceInfo::Buffer { usage, .. } = &mut self.info {
            *usage |= flags;
        }
    }

    pub(crate) fn set_attachment_info(&mut self, attachment: AttachmentInfo) {
        if let ResourceInfo::Texture { info, .. } = &mut self.info {
            *info = attachment;
        }
    }

    pub(crate) fn set_buffer_info(&mut self, buffer: BufferInfo) {
        if let ResourceInfo::Buffer { info, .. } = &mut self.info {
            *info = buffer;
        }
    }
}

/// Interns resources by name. Resources live in one contiguous vector and are referred to by index everywhere else.
#[derive(Debug, Default, Clone)]
pub(crate) struct ResourceRegistry {
    resources: Vec<RenderResource>,
    by_name: HashMap<String, usize>,
    /// Kind mismatches found during declaration, reported by the next bake.
    errors: Vec<Error>,
}

impl ResourceRegistry {
    /// Get the texture called `name`, declaring it if it does not exist yet.
    pub fn texture(&mut self, name: &str) -> usize {
        self.intern(name, ResourceType::Texture)
    }

    /// Get the buffer called `name`, declaring it if it does not exist yet.
    pub fn buffer(&mut self, name: &str) -> usize {
        self.intern(name, ResourceType::Buffer)
    }

    fn intern(&mut self, name: &str, ty: ResourceType) -> usize {
        if let Some(&index) = self.by_name.get(name) {
            let declared = self.resources[index].ty();
            if declared != ty {
                self.errors.push(Error::ResourceTypeMismatch {
                    name: name.to_owned(),
                    declared,
                    requested: ty,
                });
            }
            return index;
        }
        let index = self.resources.len();
        let resource = match ty {
            ResourceType::Texture => RenderResource::texture(name.to_owned(), index),
            ResourceType::Buffer => RenderResource::buffer(name.to_owned(), index),
        };
        self.resources.push(resource);
        self.by_name.insert(name.to_owned(), index);
        index
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, index: usize) -> &RenderResource {
        &self.resources[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut RenderResource {
        &mut self.resources[index]
    }

    pub fn as_slice(&self) -> &[RenderResource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn first_error(&self) -> Option<&Error> {
        self.errors.first()
    }

    /// Forget every planning result stored on the resources.
    pub fn clear_physical_indices(&mut self) {
        for resource in &mut self.resources {
            resource.physical_index = None;
        }
    }

    pub fn clear(&mut self) {
        self.resources.clear();
        self.by_name.clear();
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let mut registry = ResourceRegistry::default();
        let a = registry.texture("albedo");
        let b = registry.buffer("lights");
        assert_eq!(registry.texture("albedo"), a);
        assert_ne!(a, b);
        assert_eq!(registry.get(b).ty(), ResourceType::Buffer);
        assert!(registry.first_error().is_none());
    }

    #[test]
    fn kind_mismatch_is_recorded() {
        let mut registry = ResourceRegistry::default();
        registry.texture("shared");
        registry.buffer("shared");
        assert!(matches!(
            registry.first_error(),
            Some(Error::ResourceTypeMismatch { requested: ResourceType::Buffer, .. })
        ));
    }
}
