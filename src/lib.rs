//! # kernel-resources - NUMA-aware resource accounting for compute kernels
//!
//! The resource accounting core of a compute agent. It decides which CPU
//! cores, NUMA node and fractional accelerator shares each kernel gets, and
//! records that decision in a form that survives agent restarts.
//!
//! ## Components
//!
//! - **Topology**: NUMA node count, core-to-node mapping and the cores this
//!   process may use (cgroup cpuset, then scheduler affinity, then the
//!   logical CPU count)
//! - **CPU allocator**: picks the least-loaded node and spreads core slots
//!   over its least-shared cores
//! - **Accelerator allocator**: grants exact decimal shares from devices of a
//!   single NUMA node
//! - **Resource spec**: the per-kernel record, with a lossless text form and
//!   a JSON report
//!
//! ## Quick Start
//!
//! ```no_run
//! use kernel_resources::prelude::*;
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! let topology = Arc::new(TopologyProvider::new(HostTopology::detect()));
//! let cpus = CpuAllocator::new(topology);
//!
//! let (node, cores) = cpus.alloc(2).unwrap();
//! let spec = KernelResourceSpec::new(
//!     node,
//!     cores.clone(),
//!     4 << 30,
//!     0,
//!     Shares::new(),
//!     Vec::new(),
//! )
//! .unwrap();
//! println!("{}", spec.to_json());
//!
//! cpus.free(&cores).unwrap();
//! ```
//!
//! ## Accelerator Shares
//!
//! ```no_run
//! use kernel_resources::alloc::{load_device_catalog, AcceleratorAllocator, UnitCost};
//! use rust_decimal::Decimal;
//! use std::path::Path;
//!
//! let unit = UnitCost::new(2 << 30, 8).unwrap();
//! let devices = load_device_catalog(Path::new("gpus.json"), unit).unwrap();
//! let gpus = AcceleratorAllocator::new(devices, "cuda").unwrap();
//!
//! let (node, shares) = gpus.alloc(Decimal::new(25, 1)).unwrap();
//! println!("node {node}: {shares:?}");
//! gpus.free(&shares).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alloc;
pub mod config;
pub mod error;
pub mod spec;
pub mod system;

// Re-export commonly used types
pub use alloc::{AcceleratorAllocator, CpuAllocator};
pub use config::ResourceConfig;
pub use error::{ResourceError, Result};
pub use spec::KernelResourceSpec;
pub use system::TopologyProvider;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use kernel_resources::prelude::*;
    //! ```

    pub use crate::alloc::{
        AcceleratorAllocator, AcceleratorDevice, CpuAllocator, CudaDevice, DeviceId, ShareMap,
        UnitCost,
    };
    pub use crate::config::ResourceConfig;
    pub use crate::error::{ResourceError, Result};
    pub use crate::spec::{KernelResourceSpec, Mount, MountPermission, ShareValue, Shares};
    pub use crate::system::{CoreId, HostTopology, NodeId, StaticTopology, TopologyProvider};
}
