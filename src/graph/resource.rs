//! Declarative descriptions of graph resources, before any physical planning happens.

use ash::vk;

/// Type of a resource in the render graph.
#[derive(Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceType {
    /// Image resource
    #[default]
    Texture,
    /// Buffer resource
    Buffer,
}

/// How the extent of an attachment is derived.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum SizeClass {
    /// `size_x`, `size_y` and `size_z` are the extent in texels.
    Absolute,
    /// The extent is `size_x` and `size_y` times the backbuffer dimensions.
    #[default]
    SwapchainRelative,
    /// The extent is `size_x`, `size_y` and `size_z` times the extent of another texture resource.
    InputRelative(String),
}

/// Declared properties of a texture resource.
///
/// # Example
/// ```
/// use vk_render_graph::prelude::*;
///
/// let hdr = AttachmentInfo::default()
///     .format(vk::Format::R16G16B16A16_SFLOAT)
///     .size(0.5, 0.5)
///     .persistent(false);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentInfo {
    /// How `size_x`, `size_y` and `size_z` are interpreted.
    pub size_class: SizeClass,
    pub size_x: f32,
    pub size_y: f32,
    pub size_z: f32,
    /// `vk::Format::UNDEFINED` inherits the backbuffer format.
    pub format: vk::Format,
    pub samples: u32,
    /// `0` requests a full mip chain.
    pub levels: u32,
    pub layers: u32,
    /// Usage flags added on top of the usage implied by the passes that touch the resource.
    pub aux_usage: vk::ImageUsageFlags,
    /// Keep the contents of this image alive across frames.
    pub persistent: bool,
    /// Allow the image to be viewed both as sRGB and as UNORM.
    pub unorm_srgb_alias: bool,
}

impl Default for AttachmentInfo {
    fn default() -> Self {
        Self {
            size_class: SizeClass::SwapchainRelative,
            size_x: 1.0,
            size_y: 1.0,
            size_z: 0.0,
            format: vk::Format::UNDEFINED,
            samples: 1,
            levels: 1,
            layers: 1,
            aux_usage: vk::ImageUsageFlags::empty(),
            persistent: true,
            unorm_srgb_alias: false,
        }
    }
}

impl AttachmentInfo {
    /// Attachment with a fixed extent in texels.
    pub fn absolute(width: u32, height: u32) -> Self {
        Self {
            size_class: SizeClass::Absolute,
            size_x: width as f32,
            size_y: height as f32,
            ..Default::default()
        }
    }

    /// Attachment sized relative to another texture in the graph.
    pub fn relative_to(name: impl Into<String>, scale_x: f32, scale_y: f32) -> Self {
        Self {
            size_class: SizeClass::InputRelative(name.into()),
            size_x: scale_x,
            size_y: scale_y,
            ..Default::default()
        }
    }

    pub fn format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    /// Set the horizontal and vertical size scalars, interpreted according to the size class.
    pub fn size(mut self, x: f32, y: f32) -> Self {
        self.size_x = x;
        self.size_y = y;
        self
    }

    /// Set the depth scalar. Values below one produce a 2D image.
    pub fn depth(mut self, z: f32) -> Self {
        self.size_z = z;
        self
    }

    pub fn samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }

    pub fn layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self
    }

    pub fn aux_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.aux_usage |= usage;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn unorm_srgb_alias(mut self, alias: bool) -> Self {
        self.unorm_srgb_alias = alias;
        self
    }
}

/// Declared properties of a buffer resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferInfo {
    /// Size in bytes.
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    /// Keep the contents of this buffer alive across frames.
    pub persistent: bool,
}

impl Default for BufferInfo {
    fn default() -> Self {
        Self {
            size: 0,
            usage: vk::BufferUsageFlags::empty(),
            persistent: true,
        }
    }
}

impl BufferInfo {
    /// Buffer of `size` bytes.
    pub fn new(size: vk::DeviceSize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }
}
