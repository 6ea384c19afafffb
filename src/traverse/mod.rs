//! Directed graph traversal driven by edges and links.

pub mod walker;

pub use walker::{StopReason, Walker};
