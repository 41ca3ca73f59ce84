//! Utility traits to convert objects into their corresponding vulkan types

use ash::vk;

use crate::command_buffer::state::AttachmentClear;
use crate::graph::pass::{ClearColor, ClearDepthStencil};

/// Convert an object into a vulkan type
pub trait IntoVulkanType {
    /// Output Vulkan type
    type Output;

    /// Consume self and return a vulkan type
    fn into_vulkan(self) -> Self::Output;
}

/// Get a reference to the object, as a vulkan type
pub trait AsVulkanType {
    /// Output Vulkan type
    type Output;

    /// Return a vulkan type that lives as long as self
    fn as_vulkan(&self) -> Self::Output;
}

impl IntoVulkanType for ClearColor {
    type Output = vk::ClearColorValue;

    fn into_vulkan(self) -> Self::Output {
        match self {
            ClearColor::Float(float32) => vk::ClearColorValue {
                float32,
            },
            ClearColor::Int(int32) => vk::ClearColorValue {
                int32,
            },
            ClearColor::Uint(uint32) => vk::ClearColorValue {
                uint32,
            },
        }
    }
}

impl IntoVulkanType for ClearDepthStencil {
    type Output = vk::ClearDepthStencilValue;

    fn into_vulkan(self) -> Self::Output {
        vk::ClearDepthStencilValue {
            depth: self.depth,
            stencil: self.stencil,
        }
    }
}

impl AsVulkanType for AttachmentClear {
    type Output = vk::ClearValue;

    fn as_vulkan(&self) -> Self::Output {
        match *self {
            AttachmentClear::Color(color) => vk::ClearValue {
                color: color.into_vulkan(),
            },
            AttachmentClear::DepthStencil(depth_stencil) => vk::ClearValue {
                depth_stencil: depth_stencil.into_vulkan(),
            },
        }
    }
}
