//! Host NUMA and CPU affinity introspection
//!
//! Reads node membership from sysfs (`/sys/devices/system/node`), the
//! agent's own cpuset from its cgroup, and the process affinity mask from
//! `sched_getaffinity`. Every probe is optional: a missing file or syscall
//! simply reports "unknown" to the [`TopologyProvider`](super::TopologyProvider).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::{CoreId, NodeId, TopologySource};
use crate::config::ResourceConfig;

/// Topology source backed by the running host
#[derive(Debug, Clone)]
pub struct HostTopology {
    proc_root: PathBuf,
    cgroup_root: PathBuf,
    /// Core to node membership, empty when NUMA is unsupported
    cpu_to_node: BTreeMap<CoreId, NodeId>,
    /// max node id + 1
    configured_nodes: usize,
}

impl Default for HostTopology {
    fn default() -> Self {
        Self::detect()
    }
}

impl HostTopology {
    /// Detect topology using the standard `/sys`, `/proc` and cgroup mounts
    pub fn detect() -> Self {
        Self::from_config(&ResourceConfig::default())
    }

    /// Detect topology using the roots named in `config`
    pub fn from_config(config: &ResourceConfig) -> Self {
        Self::with_roots(&config.sysfs_root, &config.proc_root, &config.cgroup_root)
    }

    /// Detect topology below explicit filesystem roots
    pub fn with_roots(sysfs_root: &Path, proc_root: &Path, cgroup_root: &Path) -> Self {
        let mut cpu_to_node = BTreeMap::new();
        let mut configured_nodes = 0;

        // Try to read from <sysfs>/devices/system/node/
        let node_root = sysfs_root.join("devices/system/node");
        if let Ok(entries) = std::fs::read_dir(&node_root) {
            for entry in entries.filter_map(|e| e.ok()) {
                let name = entry.file_name();
                let name_str = name.to_string_lossy();

                let Some(suffix) = name_str.strip_prefix("node") else {
                    continue;
                };
                let Ok(node_id) = suffix.parse::<NodeId>() else {
                    continue;
                };

                configured_nodes = configured_nodes.max(node_id + 1);
                for cpu in Self::read_node_cpus(&entry.path()) {
                    cpu_to_node.insert(cpu, node_id);
                }
            }
        }

        if configured_nodes == 0 {
            tracing::debug!("No NUMA nodes under {}", node_root.display());
        }

        Self {
            proc_root: proc_root.to_path_buf(),
            cgroup_root: cgroup_root.to_path_buf(),
            cpu_to_node,
            configured_nodes,
        }
    }

    fn read_node_cpus(node_path: &Path) -> Vec<CoreId> {
        let cpulist_path = node_path.join("cpulist");

        if let Ok(content) = std::fs::read_to_string(&cpulist_path) {
            Self::parse_cpu_list(content.trim())
        } else {
            Vec::new()
        }
    }

    /// Parse CPU list format (e.g., "0-3,8-11" -> [0,1,2,3,8,9,10,11])
    pub fn parse_cpu_list(s: &str) -> Vec<CoreId> {
        let mut cpus = Vec::new();

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if let Some((start, end)) = part.split_once('-') {
                if let (Ok(start), Ok(end)) = (start.parse::<CoreId>(), end.parse::<CoreId>()) {
                    cpus.extend(start..=end);
                }
            } else if let Ok(cpu) = part.parse::<CoreId>() {
                cpus.push(cpu);
            }
        }

        cpus
    }

    /// Candidate cpuset files for the agent's own cgroup, most specific first
    fn cpuset_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        let Ok(content) = std::fs::read_to_string(self.proc_root.join("self/cgroup")) else {
            return candidates;
        };

        // Format: "hierarchy-id:controllers:path"
        for line in content.lines() {
            let mut fields = line.splitn(3, ':');
            let (Some(id), Some(controllers), Some(path)) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let relative = path.trim().trim_start_matches('/');

            if controllers.split(',').any(|c| c == "cpuset") {
                candidates.insert(
                    0,
                    self.cgroup_root.join("cpuset").join(relative).join("cpuset.cpus"),
                );
            } else if id == "0" && controllers.is_empty() {
                candidates.push(self.cgroup_root.join(relative).join("cpuset.cpus.effective"));
            }
        }

        candidates
    }
}

impl TopologySource for HostTopology {
    fn numa_supported(&self) -> bool {
        self.configured_nodes > 0
    }

    fn configured_nodes(&self) -> usize {
        self.configured_nodes
    }

    fn node_of_cpu(&self, core: CoreId) -> Option<NodeId> {
        self.cpu_to_node.get(&core).copied()
    }

    fn confined_cores(&self) -> Option<BTreeSet<CoreId>> {
        for path in self.cpuset_candidates() {
            if let Ok(content) = std::fs::read_to_string(&path) {
                let cores: BTreeSet<CoreId> = Self::parse_cpu_list(content.trim()).into_iter().collect();
                if !cores.is_empty() {
                    tracing::debug!("Read cgroup cpuset from {}", path.display());
                    return Some(cores);
                }
            }
        }
        None
    }

    fn affinity_cores(&self) -> Option<BTreeSet<CoreId>> {
        sched_affinity()
    }

    fn logical_cpu_count(&self) -> usize {
        num_cpus::get()
    }
}

/// Current process CPU affinity mask
#[cfg(target_os = "linux")]
fn sched_affinity() -> Option<BTreeSet<CoreId>> {
    use std::mem::MaybeUninit;

    unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed().assume_init();
        let result = libc::sched_getaffinity(
            0, // current process
            std::mem::size_of::<libc::cpu_set_t>(),
            &mut set,
        );

        if result != 0 {
            tracing::debug!(
                "sched_getaffinity failed: {}",
                std::io::Error::last_os_error()
            );
            return None;
        }

        let cores: BTreeSet<CoreId> = (0..libc::CPU_SETSIZE as usize)
            .filter(|&cpu| libc::CPU_ISSET(cpu, &set))
            .collect();

        (!cores.is_empty()).then_some(cores)
    }
}

#[cfg(not(target_os = "linux"))]
fn sched_affinity() -> Option<BTreeSet<CoreId>> {
    // Affinity introspection not supported on this platform
    None
}
