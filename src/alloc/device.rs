//! Accelerator device descriptors
//!
//! The accelerator allocator only knows devices through the
//! [`AcceleratorDevice`] capability trait. Device types differ in how much
//! memory and how many processing units one share costs; [`UnitCost`]
//! captures that model so each device type can delegate to it.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::{NonZeroU32, NonZeroU64};
use std::path::Path;
use std::sync::Arc;

use crate::config::AcceleratorConfig;
use crate::error::{IoResultExt, ResourceError, Result};
use crate::system::NodeId;

/// Number of decimal digits a device's maximum share is quantized to
pub const SHARE_PRECISION: u32 = 2;

/// Accelerator device identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability contract every accelerator type implements
pub trait AcceleratorDevice: fmt::Debug + Send + Sync {
    /// Stable device identifier
    fn device_id(&self) -> &DeviceId;

    /// Bus address (e.g. PCI `0000:3b:00.0`)
    fn hw_location(&self) -> &str;

    /// NUMA node the device is attached to
    fn numa_node(&self) -> NodeId;

    /// Total device memory in bytes
    fn memory_size(&self) -> u64;

    /// Total processing units (SMs, CUs, cores)
    fn processing_units(&self) -> u32;

    /// Largest share this single device can back
    fn max_share(&self) -> Decimal;

    /// Concrete (memory, processing units) granted by `share`
    fn share_to_spec(&self, share: Decimal) -> (u64, u32);

    /// Share needed to cover `memory` bytes and `processing_units` units
    fn spec_to_share(&self, memory: u64, processing_units: u32) -> Decimal;
}

/// Memory and processing units that make up one share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitCost {
    memory: NonZeroU64,
    processing_units: NonZeroU32,
}

impl UnitCost {
    /// Create a unit cost; both components must be non-zero
    pub fn new(memory: u64, processing_units: u32) -> Result<Self> {
        match (NonZeroU64::new(memory), NonZeroU32::new(processing_units)) {
            (Some(memory), Some(processing_units)) => Ok(Self {
                memory,
                processing_units,
            }),
            _ => Err(ResourceError::config(format!(
                "unit cost must be non-zero (memory={memory}, processing_units={processing_units})"
            ))),
        }
    }

    /// Unit cost from the accelerator configuration
    pub fn from_config(config: &AcceleratorConfig) -> Result<Self> {
        Self::new(config.unit_memory, config.unit_processing_units)
    }

    fn by_memory(&self, memory: u64) -> Decimal {
        Decimal::from(memory) / Decimal::from(self.memory.get())
    }

    fn by_processing_units(&self, processing_units: u32) -> Decimal {
        Decimal::from(processing_units) / Decimal::from(self.processing_units.get())
    }

    /// `min(memory / unit, processing_units / unit)`, rounded down
    pub fn max_share(&self, memory: u64, processing_units: u32) -> Decimal {
        self.by_memory(memory)
            .min(self.by_processing_units(processing_units))
            .round_dp_with_strategy(SHARE_PRECISION, RoundingStrategy::ToZero)
    }

    /// Resources covered by `share`, rounded down to whole bytes and units
    pub fn share_to_spec(&self, share: Decimal) -> (u64, u32) {
        let share = share.max(Decimal::ZERO);
        let scale = |unit: Decimal| {
            share
                .checked_mul(unit)
                .unwrap_or(Decimal::MAX)
                .floor()
        };

        let memory = scale(Decimal::from(self.memory.get())).to_u64().unwrap_or(u64::MAX);
        let processing_units = scale(Decimal::from(self.processing_units.get()))
            .to_u32()
            .unwrap_or(u32::MAX);
        (memory, processing_units)
    }

    /// Smallest share covering both requirements, rounded up
    pub fn spec_to_share(&self, memory: u64, processing_units: u32) -> Decimal {
        self.by_memory(memory)
            .max(self.by_processing_units(processing_units))
            .round_dp_with_strategy(SHARE_PRECISION, RoundingStrategy::AwayFromZero)
    }
}

/// Device facts reported by device discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device identifier
    pub device_id: DeviceId,
    /// Bus address
    pub hw_location: String,
    /// Attached NUMA node
    #[serde(default)]
    pub numa_node: NodeId,
    /// Device memory in bytes
    pub memory_size: u64,
    /// Processing unit count
    pub processing_units: u32,
}

/// A CUDA GPU, one share = `unit_memory` bytes plus `unit_processing_units` SMs
#[derive(Debug, Clone)]
pub struct CudaDevice {
    descriptor: DeviceDescriptor,
    unit: UnitCost,
}

impl CudaDevice {
    /// Create a device from its descriptor and the configured unit cost
    pub fn new(descriptor: DeviceDescriptor, unit: UnitCost) -> Self {
        Self { descriptor, unit }
    }
}

impl AcceleratorDevice for CudaDevice {
    fn device_id(&self) -> &DeviceId {
        &self.descriptor.device_id
    }

    fn hw_location(&self) -> &str {
        &self.descriptor.hw_location
    }

    fn numa_node(&self) -> NodeId {
        self.descriptor.numa_node
    }

    fn memory_size(&self) -> u64 {
        self.descriptor.memory_size
    }

    fn processing_units(&self) -> u32 {
        self.descriptor.processing_units
    }

    fn max_share(&self) -> Decimal {
        self.unit
            .max_share(self.descriptor.memory_size, self.descriptor.processing_units)
    }

    fn share_to_spec(&self, share: Decimal) -> (u64, u32) {
        self.unit.share_to_spec(share)
    }

    fn spec_to_share(&self, memory: u64, processing_units: u32) -> Decimal {
        self.unit.spec_to_share(memory, processing_units)
    }
}

/// Load a JSON array of device descriptors as CUDA devices
pub fn load_device_catalog(path: &Path, unit: UnitCost) -> Result<Vec<Arc<dyn AcceleratorDevice>>> {
    let content = std::fs::read_to_string(path).with_path(path)?;
    let descriptors: Vec<DeviceDescriptor> = serde_json::from_str(&content)?;

    tracing::debug!(
        "Loaded {} accelerator descriptors from {}",
        descriptors.len(),
        path.display()
    );

    Ok(descriptors
        .into_iter()
        .map(|d| Arc::new(CudaDevice::new(d, unit)) as Arc<dyn AcceleratorDevice>)
        .collect())
}
