//! Fractional-share accelerator allocator
//!
//! Tracks how much of each accelerator's share capacity is handed out.
//! A request is served by the devices of exactly one NUMA node: the first
//! node (by id) whose remaining capacity covers it. Within that node,
//! devices are filled in catalog order.
//!
//! All share arithmetic uses [`Decimal`], so repeated alloc/free cycles
//! return to exactly the starting state.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::device::{AcceleratorDevice, DeviceId};
use crate::error::{ResourceError, Result};
use crate::system::NodeId;

/// Device id -> share mapping
pub type ShareMap = BTreeMap<DeviceId, Decimal>;

/// Share allocator over a fixed set of accelerator devices
#[derive(Debug)]
pub struct AcceleratorAllocator {
    resource_class: String,
    devices: BTreeMap<DeviceId, Arc<dyn AcceleratorDevice>>,
    max_shares: ShareMap,
    node_groups: BTreeMap<NodeId, Vec<DeviceId>>,
    allocations: Mutex<ShareMap>,
}

impl AcceleratorAllocator {
    /// Build an allocator for `devices`, reported under `resource_class`
    ///
    /// Devices are grouped by NUMA node in the order given.
    pub fn new(
        devices: Vec<Arc<dyn AcceleratorDevice>>,
        resource_class: impl Into<String>,
    ) -> Result<Self> {
        let resource_class = resource_class.into();
        let mut by_id = BTreeMap::new();
        let mut max_shares = ShareMap::new();
        let mut node_groups: BTreeMap<NodeId, Vec<DeviceId>> = BTreeMap::new();

        for device in devices {
            let id = device.device_id().clone();
            if by_id.contains_key(&id) {
                return Err(ResourceError::DuplicateDevice(id));
            }

            max_shares.insert(id.clone(), device.max_share());
            node_groups.entry(device.numa_node()).or_default().push(id.clone());
            by_id.insert(id, device);
        }

        let allocations = by_id.keys().map(|id| (id.clone(), Decimal::ZERO)).collect();

        tracing::info!(
            "{} allocator ready: {} devices on {} nodes, total share {}",
            resource_class,
            by_id.len(),
            node_groups.len(),
            max_shares.values().sum::<Decimal>()
        );

        Ok(Self {
            resource_class,
            devices: by_id,
            max_shares,
            node_groups,
            allocations: Mutex::new(allocations),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ShareMap> {
        // State is validated before every mutation, so a poisoned guard is still consistent
        self.allocations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remaining(&self, allocations: &ShareMap, id: &DeviceId) -> Decimal {
        let max = self.max_shares.get(id).copied().unwrap_or_default();
        let used = allocations.get(id).copied().unwrap_or_default();
        max - used
    }

    fn node_available(&self, allocations: &ShareMap, group: &[DeviceId]) -> Decimal {
        group.iter().map(|id| self.remaining(allocations, id)).sum()
    }

    /// Allocate `requested` shares from a single NUMA node
    ///
    /// Returns the node and the share granted per device (non-zero grants
    /// only). Fails without touching any state when no node can cover the
    /// whole request.
    pub fn alloc(&self, requested: Decimal) -> Result<(NodeId, ShareMap)> {
        if requested <= Decimal::ZERO {
            return Err(ResourceError::InvalidRequest(format!(
                "{} share must be positive, got {}",
                self.resource_class, requested
            )));
        }

        let mut allocations = self.lock();
        let mut best_available = Decimal::ZERO;

        for (&node, group) in &self.node_groups {
            let available = self.node_available(&allocations, group);
            if available < requested {
                best_available = best_available.max(available);
                continue;
            }

            let mut remaining_need = requested;
            let mut granted = ShareMap::new();

            for id in group {
                if remaining_need.is_zero() {
                    break;
                }
                let take = remaining_need.min(self.remaining(&allocations, id));
                if take > Decimal::ZERO {
                    granted.insert(id.clone(), take);
                    *allocations.entry(id.clone()).or_default() += take;
                    remaining_need -= take;
                }
            }

            tracing::debug!(
                "Allocated {} {} share on node {}: {:?}",
                requested,
                self.resource_class,
                node,
                granted
            );
            return Ok((node, granted));
        }

        Err(ResourceError::CapacityExceeded {
            resource: self.resource_class.clone(),
            requested,
            available: best_available,
        })
    }

    /// Return the shares in `shares` to their devices
    ///
    /// Every entry is checked before anything is released.
    pub fn free(&self, shares: &ShareMap) -> Result<()> {
        let mut allocations = self.lock();

        for (id, amount) in shares {
            if amount.is_sign_negative() {
                return Err(ResourceError::InvalidRequest(format!(
                    "cannot release negative share {} of device '{}'",
                    amount, id
                )));
            }
            let held = allocations
                .get(id)
                .copied()
                .ok_or_else(|| ResourceError::UnknownDevice(id.clone()))?;
            if *amount > held {
                return Err(ResourceError::over_release(
                    self.resource_class.as_str(),
                    id,
                    amount,
                    held,
                ));
            }
        }

        for (id, amount) in shares {
            if let Some(held) = allocations.get_mut(id) {
                *held -= *amount;
            }
        }

        tracing::debug!("Released {} shares {:?}", self.resource_class, shares);
        Ok(())
    }

    /// Share currently allocated on `id`
    pub fn allocated(&self, id: &DeviceId) -> Option<Decimal> {
        self.lock().get(id).copied()
    }

    /// Snapshot of allocated share per device
    pub fn allocations(&self) -> ShareMap {
        self.lock().clone()
    }

    /// Remaining share capacity per NUMA node
    pub fn available_per_node(&self) -> BTreeMap<NodeId, Decimal> {
        let allocations = self.lock();
        self.node_groups
            .iter()
            .map(|(&node, group)| (node, self.node_available(&allocations, group)))
            .collect()
    }

    /// Maximum share of `id`
    pub fn max_share(&self, id: &DeviceId) -> Option<Decimal> {
        self.max_shares.get(id).copied()
    }

    /// Device descriptor for `id`
    pub fn device(&self, id: &DeviceId) -> Option<&Arc<dyn AcceleratorDevice>> {
        self.devices.get(id)
    }

    /// All managed devices, ordered by id
    pub fn devices(&self) -> impl Iterator<Item = &Arc<dyn AcceleratorDevice>> {
        self.devices.values()
    }

    /// Resource-class tag this allocator reports under
    pub fn resource_class(&self) -> &str {
        &self.resource_class
    }
}
