//! Kernel resource spec data model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::alloc::{DeviceId, ShareMap};
use crate::error::{ResourceError, Result};
use crate::system::{CoreId, NodeId};

/// Access mode of a mount inside the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MountPermission {
    /// Read-only bind
    ReadOnly,
    /// Read-write bind
    ReadWrite,
}

impl MountPermission {
    /// Two-letter tag used in the persisted and reported forms
    pub fn as_str(&self) -> &'static str {
        match self {
            MountPermission::ReadOnly => "ro",
            MountPermission::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for MountPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MountPermission {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ro" => Ok(MountPermission::ReadOnly),
            "rw" => Ok(MountPermission::ReadWrite),
            other => Err(ResourceError::InvalidMount(format!("unknown mode '{other}'"))),
        }
    }
}

/// One host path exposed inside the container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mount {
    source: PathBuf,
    target: PathBuf,
    permission: MountPermission,
}

impl Mount {
    /// Create a mount; paths must be UTF-8 and free of `:`, `,` and newlines
    pub fn new(
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        permission: MountPermission,
    ) -> Result<Self> {
        let mount = Self {
            source: source.into(),
            target: target.into(),
            permission,
        };
        Self::check_path(&mount.source)?;
        Self::check_path(&mount.target)?;
        Ok(mount)
    }

    fn check_path(path: &Path) -> Result<()> {
        match path.to_str() {
            Some(s) if !s.is_empty() && !s.contains([':', ',', '\n', '\r']) => Ok(()),
            _ => Err(ResourceError::InvalidMount(path.to_string_lossy().into_owned())),
        }
    }

    /// Host path
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Path inside the container
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Access mode
    pub fn permission(&self) -> MountPermission {
        self.permission
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.source.display(),
            self.target.display(),
            self.permission
        )
    }
}

impl FromStr for Mount {
    type Err = ResourceError;

    /// Parse `source:destination:mode`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [source, target, mode] => Mount::new(*source, *target, mode.parse()?),
            _ => Err(ResourceError::InvalidMount(s.to_string())),
        }
    }
}

/// Share granted for one resource class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareValue {
    /// A single quantity (cores, memory, ...)
    Single(Decimal),
    /// Per-device shares of an accelerator class
    PerDevice(ShareMap),
}

impl From<Decimal> for ShareValue {
    fn from(share: Decimal) -> Self {
        ShareValue::Single(share)
    }
}

impl From<ShareMap> for ShareValue {
    fn from(shares: ShareMap) -> Self {
        ShareValue::PerDevice(shares)
    }
}

/// Resource-class tag -> granted share
pub type Shares = BTreeMap<String, ShareValue>;

/// The recorded allocation of one kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelResourceSpec {
    pub(super) numa_node: NodeId,
    pub(super) cpu_set: BTreeSet<CoreId>,
    pub(super) memory_limit: u64,
    pub(super) scratch_disk_size: u64,
    pub(super) shares: Shares,
    pub(super) mounts: Vec<Mount>,
}

impl KernelResourceSpec {
    /// Assemble a spec from allocator results and launch parameters
    pub fn new(
        numa_node: NodeId,
        cpu_set: BTreeSet<CoreId>,
        memory_limit: u64,
        scratch_disk_size: u64,
        shares: Shares,
        mounts: Vec<Mount>,
    ) -> Result<Self> {
        if cpu_set.is_empty() {
            return Err(ResourceError::InvalidSpec("CPU core set is empty".to_string()));
        }

        for (class, value) in &shares {
            if class.is_empty() || class.contains(['=', '\n', '\r']) {
                return Err(ResourceError::InvalidSpec(format!(
                    "invalid resource class tag '{class}'"
                )));
            }
            let negative = match value {
                ShareValue::Single(share) => share.is_sign_negative(),
                ShareValue::PerDevice(per_device) => {
                    per_device.values().any(Decimal::is_sign_negative)
                }
            };
            if negative {
                return Err(ResourceError::InvalidSpec(format!(
                    "negative share for resource class '{class}'"
                )));
            }
        }

        Ok(Self {
            numa_node,
            cpu_set,
            memory_limit,
            scratch_disk_size,
            shares,
            mounts,
        })
    }

    /// NUMA node the kernel is bound to
    pub fn numa_node(&self) -> NodeId {
        self.numa_node
    }

    /// Cores the kernel may run on
    pub fn cpu_set(&self) -> &BTreeSet<CoreId> {
        &self.cpu_set
    }

    /// Memory limit in bytes
    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }

    /// Scratch disk size in bytes
    pub fn scratch_disk_size(&self) -> u64 {
        self.scratch_disk_size
    }

    /// All granted shares
    pub fn shares(&self) -> &Shares {
        &self.shares
    }

    /// Per-device shares of an accelerator class
    pub fn device_shares(&self, resource_class: &str) -> Option<&ShareMap> {
        match self.shares.get(resource_class)? {
            ShareValue::PerDevice(per_device) => Some(per_device),
            ShareValue::Single(_) => None,
        }
    }

    /// Mounts in presentation order
    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Devices holding a share of `resource_class`
    pub fn devices(&self, resource_class: &str) -> Vec<&DeviceId> {
        self.device_shares(resource_class)
            .map(|per_device| per_device.keys().collect())
            .unwrap_or_default()
    }

    /// Print spec summary
    pub fn print_summary(&self) {
        println!("=== Kernel Resources ===");
        println!("NUMA node: {}", self.numa_node);
        println!("CPU cores: {:?}", self.cpu_set);
        println!("Memory:    {}", humansize::format_size(self.memory_limit, humansize::BINARY));
        println!("Scratch:   {}", humansize::format_size(self.scratch_disk_size, humansize::BINARY));
        for (class, value) in &self.shares {
            match value {
                ShareValue::Single(share) => println!("Share {class}: {share}"),
                ShareValue::PerDevice(per_device) => {
                    for (device, share) in per_device {
                        println!("Share {class}[{device}]: {share}");
                    }
                }
            }
        }
        for mount in &self.mounts {
            println!("Mount:     {mount}");
        }
    }
}
