//! NUMA-aware CPU core allocator
//!
//! Hands out core slots to kernels. A request always lands on the least
//! loaded NUMA node and is spread over that node's cores least-shared
//! first. Cores may be oversubscribed: one core can carry several slots.
//!
//! `free` releases exactly one slot per listed core. An allocation that put
//! more than one slot on a core therefore needs one `free` per extra slot
//! before the core is fully released.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{ResourceError, Result};
use crate::system::{CoreId, CoreTopology, NodeId, TopologyProvider};

#[derive(Debug, Clone, Default)]
struct CpuAllocState {
    /// node -> slots allocated on that node
    alloc_per_node: BTreeMap<NodeId, usize>,
    /// node -> core -> slots on that core
    core_shares: BTreeMap<NodeId, BTreeMap<CoreId, usize>>,
}

/// Core slot allocator for one agent
#[derive(Debug)]
pub struct CpuAllocator {
    topology: Arc<TopologyProvider>,
    core_topo: CoreTopology,
    num_nodes: usize,
    num_cores: usize,
    state: Mutex<CpuAllocState>,
}

impl CpuAllocator {
    /// Build the allocator from a topology snapshot
    pub fn new(topology: Arc<TopologyProvider>) -> Self {
        let core_topo = topology.core_topology();
        let num_nodes = core_topo.len();
        let num_cores = core_topo.values().map(Vec::len).sum();

        let state = CpuAllocState {
            alloc_per_node: core_topo.keys().map(|&node| (node, 0)).collect(),
            core_shares: core_topo
                .iter()
                .map(|(&node, cores)| (node, cores.iter().map(|&core| (core, 0)).collect()))
                .collect(),
        };

        tracing::info!(
            "CPU allocator ready: {} nodes, {} cores",
            num_nodes,
            num_cores
        );

        Self {
            topology,
            core_topo,
            num_nodes,
            num_cores,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CpuAllocState> {
        // State is validated before every mutation, so a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate `n` core slots on a single NUMA node
    ///
    /// Returns the chosen node and the distinct cores that received slots.
    pub fn alloc(&self, n: usize) -> Result<(NodeId, BTreeSet<CoreId>)> {
        if n == 0 {
            return Err(ResourceError::InvalidRequest(
                "at least one core slot must be requested".to_string(),
            ));
        }

        let mut state = self.lock();

        // Least loaded node, lowest id on ties; nodes without cores never qualify
        let node = state
            .alloc_per_node
            .iter()
            .filter(|&(node, _)| self.core_topo.get(node).is_some_and(|c| !c.is_empty()))
            .min_by_key(|&(&node, &slots)| (slots, node))
            .map(|(&node, _)| node)
            .ok_or(ResourceError::NoSchedulableCores)?;

        let node_slots = state
            .alloc_per_node
            .get(&node)
            .copied()
            .unwrap_or(0)
            .checked_add(n)
            .ok_or_else(|| slot_overflow(n))?;

        let cores = &self.core_topo[&node];
        let touched = spread_slots(cores, state.core_shares.entry(node).or_default(), n)?;
        state.alloc_per_node.insert(node, node_slots);

        tracing::debug!("Allocated {} core slots on node {}: {:?}", n, node, touched);
        Ok((node, touched))
    }

    /// Release one slot on each core in `cores`
    ///
    /// The whole set is checked first; on error nothing is released.
    pub fn free(&self, cores: &BTreeSet<CoreId>) -> Result<()> {
        let mut state = self.lock();

        let mut releases = Vec::with_capacity(cores.len());
        for &core in cores {
            let node = self.topology.node_of_cpu(core);
            let held = state
                .core_shares
                .get(&node)
                .and_then(|shares| shares.get(&core))
                .copied()
                .ok_or(ResourceError::UnknownCore(core))?;

            if held == 0 {
                return Err(ResourceError::over_release("cpu core", core, 1, 0));
            }
            releases.push((node, core));
        }

        for (node, core) in releases {
            if let Some(held) = state.core_shares.get_mut(&node).and_then(|s| s.get_mut(&core)) {
                *held -= 1;
            }
            if let Some(slots) = state.alloc_per_node.get_mut(&node) {
                *slots -= 1;
            }
        }

        tracing::debug!("Released core slots {:?}", cores);
        Ok(())
    }

    /// Snapshot of allocated slots per node
    pub fn alloc_per_node(&self) -> BTreeMap<NodeId, usize> {
        self.lock().alloc_per_node.clone()
    }

    /// Snapshot of slots per core, grouped by node
    pub fn core_shares(&self) -> BTreeMap<NodeId, BTreeMap<CoreId, usize>> {
        self.lock().core_shares.clone()
    }

    /// The immutable node -> cores layout this allocator serves
    pub fn core_topology(&self) -> &CoreTopology {
        &self.core_topo
    }

    /// Number of NUMA nodes
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of available cores across all nodes
    pub fn num_cores(&self) -> usize {
        self.num_cores
    }
}

fn slot_overflow(n: usize) -> ResourceError {
    ResourceError::InvalidRequest(format!("{n} core slots overflow the slot counters"))
}

/// Place `n` slots on `cores`, each on the least-shared core with topology
/// order breaking ties
///
/// Equivalent to placing the slots one at a time, but raises whole levels at
/// once so the cost depends on the core count only. `shares` is left
/// untouched on error.
fn spread_slots(
    cores: &[CoreId],
    shares: &mut BTreeMap<CoreId, usize>,
    n: usize,
) -> Result<BTreeSet<CoreId>> {
    let held = |core: &CoreId| shares.get(core).copied().unwrap_or(0);

    // (slots, topology position), least shared first
    let mut order: Vec<(usize, usize)> = cores
        .iter()
        .enumerate()
        .map(|(pos, core)| (held(core), pos))
        .collect();
    order.sort_unstable();

    let Some(&(mut level, _)) = order.first() else {
        return Err(ResourceError::NoSchedulableCores);
    };

    // Lift the least-shared group to the next level while the request covers it
    let mut remaining = n;
    let mut width = 0;
    loop {
        while width < order.len() && order[width].0 == level {
            width += 1;
        }
        let Some(&(next, _)) = order.get(width) else {
            break;
        };
        let Some(room) = (next - level)
            .checked_mul(width)
            .filter(|&room| room <= remaining)
        else {
            break;
        };
        remaining -= room;
        level = next;
    }

    // The rest is spread evenly; leftovers go to the group's first cores in topology order
    let base = level
        .checked_add(remaining / width)
        .ok_or_else(|| slot_overflow(n))?;
    let extra = remaining % width;
    let top = if extra > 0 {
        base.checked_add(1).ok_or_else(|| slot_overflow(n))?
    } else {
        base
    };

    let mut group: Vec<usize> = order[..width].iter().map(|&(_, pos)| pos).collect();
    group.sort_unstable();

    let mut updates = Vec::with_capacity(width);
    let mut touched = BTreeSet::new();
    for (rank, pos) in group.into_iter().enumerate() {
        let core = cores[pos];
        let target = if rank < extra { top } else { base };
        if target > held(&core) {
            touched.insert(core);
        }
        updates.push((core, target));
    }

    for (core, target) in updates {
        shares.insert(core, target);
    }
    Ok(touched)
}
