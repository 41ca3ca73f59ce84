//! Format helpers used when planning attachments.

use ash::vk;

/// Image aspects a format carries.
pub fn aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => vk::ImageAspectFlags::DEPTH,
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// True for depth, stencil and combined depth-stencil formats.
pub fn has_depth_or_stencil(format: vk::Format) -> bool {
    aspect_flags(format).intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
}

/// Number of mip levels in a full chain for the given extent.
pub fn full_mip_chain(width: u32, height: u32, depth: u32) -> u32 {
    let max_dim = width.max(height).max(depth);
    u32::BITS - max_dim.leading_zeros()
}
