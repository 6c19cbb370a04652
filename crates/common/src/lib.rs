//! Shared types and error plumbing used across all pylon crates.

pub mod error;
pub mod types;

pub use error::FromMessage;
