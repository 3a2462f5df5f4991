//! Storage layer
//!
//! Key layout shared by the atomic commands.

pub mod keys;

pub use keys::{QueueKeys, DEFAULT_PREFIX};
