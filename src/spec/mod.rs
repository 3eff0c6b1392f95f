//! Per-kernel resource record
//!
//! A [`KernelResourceSpec`] captures everything a kernel was granted: its NUMA
//! node, cores, memory and scratch limits, per-class shares and mounts. It is
//! persisted next to the kernel so it outlives an agent restart, and reported
//! as JSON to API consumers.

mod format;
mod kernel;
mod report;

pub use kernel::{KernelResourceSpec, Mount, MountPermission, ShareValue, Shares};
