//! Various utilities

pub mod format;
pub mod to_vk;
