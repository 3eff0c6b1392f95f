//! Topology provider
//!
//! [`TopologyProvider`] answers the three questions the CPU allocator needs
//! answered: how many NUMA nodes exist, which node owns a core, and which
//! cores the agent process may use. The raw facts come from a
//! [`TopologySource`], so the host implementation can be swapped for a
//! fixed topology in tests and pinned deployments.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use super::{CoreId, HostTopology, NodeId};
use crate::config::ResourceConfig;

/// Ordered mapping from NUMA node to the available cores it owns
pub type CoreTopology = BTreeMap<NodeId, Vec<CoreId>>;

/// Raw topology facts supplied by the host (or a stand-in)
///
/// Every query may report "unknown"; the provider turns that into the
/// single-node fallback.
pub trait TopologySource: Send + Sync {
    /// Whether the host exposes NUMA information at all
    fn numa_supported(&self) -> bool;

    /// Number of configured NUMA nodes (only consulted when supported)
    fn configured_nodes(&self) -> usize;

    /// Node owning `core`, if known
    fn node_of_cpu(&self, core: CoreId) -> Option<NodeId>;

    /// Cores the agent is confined to by an external restriction
    /// (container cpuset, cgroup), if detectable
    fn confined_cores(&self) -> Option<BTreeSet<CoreId>>;

    /// The calling process's CPU affinity mask, if the OS exposes it
    fn affinity_cores(&self) -> Option<BTreeSet<CoreId>>;

    /// Total logical CPU count of the host
    fn logical_cpu_count(&self) -> usize;
}

/// Cached view of the host topology
pub struct TopologyProvider {
    source: Box<dyn TopologySource>,
    numa_supported: bool,
    available: RwLock<Option<BTreeSet<CoreId>>>,
}

impl std::fmt::Debug for TopologyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyProvider")
            .field("numa_supported", &self.numa_supported)
            .field("available", &self.available)
            .finish_non_exhaustive()
    }
}

impl TopologyProvider {
    /// Wrap a topology source. NUMA support is probed once, here.
    pub fn new(source: impl TopologySource + 'static) -> Self {
        let numa_supported = source.numa_supported();
        if !numa_supported {
            tracing::debug!("NUMA not supported on this host, using single-node view");
        }

        Self {
            source: Box::new(source),
            numa_supported,
            available: RwLock::new(None),
        }
    }

    /// Build a provider from configuration: a pinned topology when one is
    /// configured, the live host otherwise
    pub fn from_config(config: &ResourceConfig) -> Self {
        match &config.pinned_topology {
            Some(nodes) => {
                tracing::info!("Using pinned core topology with {} nodes", nodes.len());
                Self::new(StaticTopology::from_nodes(
                    nodes.iter().map(|(node, cores)| (*node, cores.clone())),
                ))
            }
            None => Self::new(HostTopology::from_config(config)),
        }
    }

    /// Whether NUMA support was detected
    pub fn numa_supported(&self) -> bool {
        self.numa_supported
    }

    /// Number of NUMA nodes; 1 when NUMA is unsupported
    pub fn num_nodes(&self) -> usize {
        if self.numa_supported {
            self.source.configured_nodes().max(1)
        } else {
            1
        }
    }

    /// NUMA node owning `core`; 0 when NUMA is unsupported
    pub fn node_of_cpu(&self, core: CoreId) -> NodeId {
        if self.numa_supported {
            self.source.node_of_cpu(core).unwrap_or(0)
        } else {
            0
        }
    }

    /// Cores usable by this agent process
    ///
    /// Cgroup cpuset ∩ affinity mask when both are known; else the mask;
    /// else the cpuset if it is a proper subset of the host CPUs; else every
    /// logical CPU.
    ///
    /// Resolved once and cached until [`invalidate_cache`](Self::invalidate_cache).
    pub fn available_cores(&self) -> BTreeSet<CoreId> {
        if let Some(cores) = self
            .available
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return cores.clone();
        }

        let cores = self.resolve_available_cores();
        *self.available.write().unwrap_or_else(PoisonError::into_inner) = Some(cores.clone());
        cores
    }

    /// Drop the cached core set so the next query re-resolves it
    pub fn invalidate_cache(&self) {
        *self.available.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn resolve_available_cores(&self) -> BTreeSet<CoreId> {
        let confined = self.source.confined_cores().filter(|c| !c.is_empty());
        let affinity = self.source.affinity_cores().filter(|c| !c.is_empty());

        // A root cgroup cpuset lists every host CPU; the mask is what we can run on
        if let Some(mask) = affinity {
            if let Some(cpuset) = confined {
                let cores: BTreeSet<CoreId> = cpuset.intersection(&mask).copied().collect();
                if !cores.is_empty() {
                    tracing::debug!("Agent confined to cores {:?} (cpuset within affinity mask)", cores);
                    return cores;
                }
                tracing::warn!(
                    "cgroup cpuset {:?} and affinity mask {:?} are disjoint, using the mask",
                    cpuset,
                    mask
                );
            }
            tracing::debug!("Using process affinity mask {:?}", mask);
            return mask;
        }

        let total = self.source.logical_cpu_count().max(1);
        let host: BTreeSet<CoreId> = (0..total).collect();

        // Without a mask, only a proper subset of the host counts as confinement
        if let Some(cpuset) = confined.filter(|c| c.is_subset(&host) && c.len() < host.len()) {
            tracing::debug!("Agent confined to cores {:?}", cpuset);
            return cpuset;
        }

        tracing::debug!("No affinity information, assuming all {} logical CPUs", total);
        host
    }

    /// Available cores grouped by NUMA node
    ///
    /// Every node in `0..num_nodes()` is present, possibly with no cores.
    pub fn core_topology(&self) -> CoreTopology {
        let mut topology: CoreTopology = (0..self.num_nodes()).map(|n| (n, Vec::new())).collect();

        for core in self.available_cores() {
            topology.entry(self.node_of_cpu(core)).or_default().push(core);
        }

        topology
    }

    /// Log the resolved topology for debugging
    pub fn log_topology(&self) {
        let topology = self.core_topology();
        tracing::info!(
            "Core topology: {} nodes, {} available cores (NUMA {})",
            topology.len(),
            topology.values().map(Vec::len).sum::<usize>(),
            if self.numa_supported { "supported" } else { "unsupported" }
        );
        for (node, cores) in &topology {
            tracing::info!("  Node {}: {} cores {:?}", node, cores.len(), cores);
        }
    }
}

/// A fixed topology, for pinned deployments and tests
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    node_of: Option<BTreeMap<CoreId, NodeId>>,
    num_nodes: usize,
    confined: Option<BTreeSet<CoreId>>,
    affinity: Option<BTreeSet<CoreId>>,
    cpu_count: usize,
}

impl StaticTopology {
    /// A host without NUMA support and `cpu_count` logical CPUs
    pub fn uniform(cpu_count: usize) -> Self {
        Self {
            cpu_count,
            ..Default::default()
        }
    }

    /// A NUMA host with explicit node membership
    pub fn from_nodes(nodes: impl IntoIterator<Item = (NodeId, Vec<CoreId>)>) -> Self {
        let mut node_of = BTreeMap::new();
        let mut num_nodes = 0;

        for (node, cores) in nodes {
            num_nodes = num_nodes.max(node + 1);
            for core in cores {
                node_of.insert(core, node);
            }
        }

        let cpu_count = node_of.keys().next_back().map_or(0, |max| max + 1);

        Self {
            node_of: Some(node_of),
            num_nodes,
            confined: None,
            affinity: None,
            cpu_count,
        }
    }

    /// A NUMA host where core `c` lives on node `c % num_nodes`
    pub fn interleaved(num_nodes: usize, num_cores: usize) -> Self {
        let num_nodes = num_nodes.max(1);
        Self::from_nodes((0..num_nodes).map(|node| {
            let cores = (0..num_cores).filter(|c| c % num_nodes == node).collect();
            (node, cores)
        }))
    }

    /// Report an external confinement of the agent to `cores`
    pub fn with_confined_cores(mut self, cores: impl IntoIterator<Item = CoreId>) -> Self {
        self.confined = Some(cores.into_iter().collect());
        self
    }

    /// Report a process affinity mask of `cores`
    pub fn with_affinity(mut self, cores: impl IntoIterator<Item = CoreId>) -> Self {
        self.affinity = Some(cores.into_iter().collect());
        self
    }

    /// Override the host logical CPU count
    pub fn with_cpu_count(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count;
        self
    }
}

impl TopologySource for StaticTopology {
    fn numa_supported(&self) -> bool {
        self.node_of.is_some()
    }

    fn configured_nodes(&self) -> usize {
        self.num_nodes
    }

    fn node_of_cpu(&self, core: CoreId) -> Option<NodeId> {
        self.node_of.as_ref()?.get(&core).copied()
    }

    fn confined_cores(&self) -> Option<BTreeSet<CoreId>> {
        self.confined.clone()
    }

    fn affinity_cores(&self) -> Option<BTreeSet<CoreId>> {
        self.affinity.clone()
    }

    fn logical_cpu_count(&self) -> usize {
        self.cpu_count
    }
}
