//! The render graph never talks to Vulkan directly. Everything it needs from the outside world goes through the
//! traits in [`traits`]:
//! - [`ResourceFactory`](traits::ResourceFactory) creates images and buffers.
//! - [`CommandInterface`](traits::CommandInterface) hands out command buffers and submits them.
//! - [`SyncService`](traits::SyncService) creates events and semaphores.
//! - [`GraphCommandBuffer`](traits::GraphCommandBuffer) records the barriers, render passes, blits and mipmap
//!   generation the graph schedules.
//!
//! The data passed across these traits lives in [`state`].

pub mod state;
pub mod traits;
