//! Host topology discovery
//!
//! Provides the NUMA topology and the set of CPU cores this agent may hand
//! out to kernels. Absence of NUMA support or of affinity introspection
//! degrades to a single-node view instead of failing.

pub mod numa;
mod topology;

pub use numa::HostTopology;
pub use topology::{CoreTopology, StaticTopology, TopologyProvider, TopologySource};

/// NUMA node identifier (0 when NUMA is unsupported)
pub type NodeId = usize;

/// Logical CPU identifier
pub type CoreId = usize;
