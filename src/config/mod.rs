//! Configuration module
//!
//! Provides the resource accounting configuration file, the diagnostic
//! CLI arguments, and size parsing helpers.

mod settings;

pub use settings::*;
