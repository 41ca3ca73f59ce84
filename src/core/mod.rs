//! Error type and queue model shared by the whole crate.

pub mod error;
pub mod queue;
