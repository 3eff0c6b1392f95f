//! Kernel resource allocators
//!
//! Both allocators are per-agent singletons. Each owns a lock around its
//! bookkeeping, so they can be shared behind an `Arc` and called from any
//! kernel lifecycle task.

mod accelerator;
mod cpu;
pub mod device;

pub use accelerator::{AcceleratorAllocator, ShareMap};
pub use cpu::CpuAllocator;
pub use device::{
    load_device_catalog, AcceleratorDevice, CudaDevice, DeviceDescriptor, DeviceId, UnitCost,
    SHARE_PRECISION,
};
