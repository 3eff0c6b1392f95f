//! Error types for kernel resource accounting
//!
//! This module defines all error types produced by the topology provider,
//! the allocators and the resource spec record. Invariant violations are
//! kept distinct from recoverable conditions so the kernel lifecycle manager
//! can decide whether to reject a launch or escalate.

use rust_decimal::Decimal;
use std::path::PathBuf;
use thiserror::Error;

use crate::alloc::DeviceId;
use crate::system::CoreId;

/// Main error type for resource accounting operations
#[derive(Error, Debug)]
pub enum ResourceError {
    /// I/O error while reading or writing a resource record
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No single NUMA node can satisfy an accelerator request
    #[error("Insufficient {resource} capacity: requested {requested}, largest single-node availability is {available}")]
    CapacityExceeded {
        resource: String,
        requested: Decimal,
        available: Decimal,
    },

    /// Request is malformed (zero cores, non-positive share, ...)
    #[error("Invalid allocation request: {0}")]
    InvalidRequest(String),

    /// Core id is not part of the allocator's topology
    #[error("Core {0} is not managed by this allocator")]
    UnknownCore(CoreId),

    /// Device id is not part of the accelerator allocator
    #[error("Device '{0}' is not managed by this allocator")]
    UnknownDevice(DeviceId),

    /// A free would drive an allocation counter below zero
    #[error("Releasing {requested} of {resource} '{target}' exceeds the allocated {allocated}")]
    OverRelease {
        resource: String,
        target: String,
        requested: String,
        allocated: String,
    },

    /// Every NUMA node in the topology is empty
    #[error("No NUMA node has any schedulable cores")]
    NoSchedulableCores,

    /// Two devices share the same id
    #[error("Duplicate accelerator device id '{0}'")]
    DuplicateDevice(DeviceId),

    /// Resource spec failed structural validation
    #[error("Invalid resource spec: {0}")]
    InvalidSpec(String),

    /// Mount entry could not be built or parsed
    #[error("Invalid mount '{0}'")]
    InvalidMount(String),

    /// Persisted record field failed to parse
    #[error("Failed to parse field '{field}': {message}")]
    Parse { field: String, message: String },

    /// Persisted record is missing a required field
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON encoding or decoding error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ResourceError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error for a record field
    pub fn parse(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an over-release error
    pub fn over_release(
        resource: impl Into<String>,
        target: impl ToString,
        requested: impl ToString,
        allocated: impl ToString,
    ) -> Self {
        Self::OverRelease {
            resource: resource.into(),
            target: target.to_string(),
            requested: requested.to_string(),
            allocated: allocated.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Check if this error signals a bookkeeping bug in the caller
    ///
    /// These must never be absorbed: the allocator state and the caller's
    /// records disagree.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownCore(_)
                | Self::UnknownDevice(_)
                | Self::OverRelease { .. }
                | Self::NoSchedulableCores
        )
    }

    /// Check if this error means the node simply has no room right now
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for resource accounting operations
pub type Result<T> = std::result::Result<T, ResourceError>;

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        ResourceError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        ResourceError::Serialization(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| ResourceError::io(path, e))
    }
}
