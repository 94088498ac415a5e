//! Configuration Module
//!
//! Handles loading and validation of the immutable startup configuration.
//! Runtime-tunable settings live in [`crate::settings`].

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::*;
