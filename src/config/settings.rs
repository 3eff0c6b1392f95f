//! Configuration settings for kernel resource accounting
//!
//! Defines the agent-side resource configuration (host roots, accelerator
//! unit costs, optional pinned topology), the diagnostic CLI arguments,
//! and size parsing helpers.

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, ResourceError, Result};
use crate::system::{CoreId, NodeId};

/// kernel-resources - inspect and plan kernel resource allocations
#[derive(Parser, Debug, Clone)]
#[command(name = "kernel-resources")]
#[command(author = "Kernel Resources Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "NUMA-aware CPU and accelerator allocation diagnostics")]
#[command(long_about = r#"
kernel-resources exposes the agent's resource accounting core for inspection.

Examples:
  kernel-resources topology                         # Show usable cores per NUMA node
  kernel-resources plan --cpus 4 --mem 8G           # Dry-run a kernel allocation
  kernel-resources plan --cpus 2 --accel-share 1.5 --devices gpus.json
  kernel-resources inspect /var/lib/kernels/k1/resource.txt
"#)]
pub struct CliArgs {
    /// Resource configuration file (JSON)
    #[arg(short = 'c', long, value_name = "PATH", env = "KERNEL_RESOURCES_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show the core topology available to this agent
    #[command(name = "topology")]
    Topology,

    /// Dry-run one kernel allocation and print its resource spec
    #[command(name = "plan")]
    Plan(PlanArgs),

    /// Print the JSON report of a persisted resource record
    #[command(name = "inspect")]
    Inspect {
        /// Resource record path
        path: PathBuf,
    },
}

/// Arguments of the `plan` subcommand
#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Number of core slots
    #[arg(long, default_value = "1", value_name = "NUM")]
    pub cpus: usize,

    /// Memory limit (e.g., 4G, 512M)
    #[arg(long, default_value = "1G", value_name = "SIZE")]
    pub mem: String,

    /// Scratch disk size (e.g., 10G)
    #[arg(long, default_value = "0", value_name = "SIZE")]
    pub scratch: String,

    /// Fractional accelerator share to request
    #[arg(long, value_name = "SHARE", requires = "devices")]
    pub accel_share: Option<String>,

    /// Accelerator device catalog (JSON)
    #[arg(long, value_name = "PATH")]
    pub devices: Option<PathBuf>,

    /// Mount in source:destination:mode form (repeatable)
    #[arg(long = "mount", value_name = "MOUNT")]
    pub mounts: Vec<String>,

    /// Also write the persisted record to this path
    #[arg(long, value_name = "PATH")]
    pub save: Option<PathBuf>,
}

/// Agent-side resource accounting configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceConfig {
    /// sysfs mount point used for NUMA discovery
    pub sysfs_root: PathBuf,
    /// procfs mount point used to locate the agent's cgroup
    pub proc_root: PathBuf,
    /// cgroup filesystem mount point
    pub cgroup_root: PathBuf,
    /// Fixed node -> cores layout that replaces host discovery
    pub pinned_topology: Option<BTreeMap<NodeId, Vec<CoreId>>>,
    /// Accelerator cost model
    pub accelerator: AcceleratorConfig,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            proc_root: PathBuf::from("/proc"),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            pinned_topology: None,
            accelerator: AcceleratorConfig::default(),
        }
    }
}

/// Per-unit cost of one accelerator share
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Resource-class tag under which accelerator shares are recorded
    pub resource_class: String,
    /// Device memory covered by one share, in bytes
    pub unit_memory: u64,
    /// Processing units (SMs, CUs) covered by one share
    pub unit_processing_units: u32,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            resource_class: "cuda".to_string(),
            unit_memory: 2 * 1024 * 1024 * 1024, // 2GiB
            unit_processing_units: 8,
        }
    }
}

impl ResourceConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ResourceError::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.accelerator.unit_memory == 0 || self.accelerator.unit_processing_units == 0 {
            return Err(ResourceError::config("accelerator unit costs must be non-zero"));
        }
        if self.accelerator.resource_class.is_empty() {
            return Err(ResourceError::config("accelerator resource class must not be empty"));
        }
        Ok(())
    }
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("TB") || size.ends_with('T') {
        let num = size.trim_end_matches(|c| c == 'T' || c == 'B');
        (num, 1024u64 * 1024 * 1024 * 1024)
    } else if size.ends_with("GB") || size.ends_with('G') {
        let num = size.trim_end_matches(|c| c == 'G' || c == 'B');
        (num, 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        let num = size.trim_end_matches(|c| c == 'M' || c == 'B');
        (num, 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        let num = size.trim_end_matches(|c| c == 'K' || c == 'B');
        (num, 1024u64)
    } else if size.ends_with('B') {
        let num = size.trim_end_matches('B');
        (num, 1u64)
    } else {
        // Assume bytes if no suffix
        (size.as_str(), 1u64)
    };

    let num_str = num_str.trim();
    let (whole, fraction) = num_str.split_once('.').unwrap_or((num_str, ""));

    // Plain decimal digits only: no sign, exponent, nan or inf
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(format!("Invalid number: {}", num_str));
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| format!("Size too large: {}", size))?
    };
    let mut bytes = whole
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Size too large: {}", size))?;

    if !fraction.is_empty() {
        let fraction: f64 = format!("0.{}", fraction)
            .parse()
            .map_err(|_| format!("Invalid number: {}", num_str))?;
        bytes = bytes
            .checked_add((fraction * multiplier as f64) as u64)
            .ok_or_else(|| format!("Size too large: {}", size))?;
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("4G").unwrap(), 4 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5G").unwrap(), (1.5 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert!(parse_size("").is_err());
        assert!(parse_size("-1G").is_err());
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_parse_size_rejects_non_numbers() {
        for input in ["nan", "NaN", "inf", "infinity", "1e3", "+4G", ".", "1.2.3", "G"] {
            assert!(parse_size(input).is_err(), "{input} should be rejected");
        }
    }

    #[test]
    fn test_parse_size_exact_for_large_values() {
        // 2^53 + 1 is not representable as f64
        assert_eq!(parse_size("9007199254740993").unwrap(), 9_007_199_254_740_993);
        assert_eq!(parse_size("18446744073709551615").unwrap(), u64::MAX);
        assert_eq!(parse_size("8388609G").unwrap(), 8_388_609 * 1024 * 1024 * 1024);
        assert_eq!(parse_size(".5K").unwrap(), 512);
        assert!(parse_size("18446744073709551616").is_err());
        assert!(parse_size("20000000000G").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = ResourceConfig::default();
        assert_eq!(config.sysfs_root, PathBuf::from("/sys"));
        assert_eq!(config.accelerator.unit_memory, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.accelerator.unit_processing_units, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(
            &path,
            r#"{"pinned_topology": {"0": [0, 1], "1": [2, 3]}, "accelerator": {"unit_processing_units": 4}}"#,
        )
        .unwrap();

        let config = ResourceConfig::load(&path).unwrap();
        assert_eq!(config.proc_root, PathBuf::from("/proc"));
        assert_eq!(config.accelerator.unit_processing_units, 4);
        assert_eq!(config.accelerator.resource_class, "cuda");
        assert_eq!(config.pinned_topology.unwrap()[&1], vec![2, 3]);
    }

    #[test]
    fn test_load_rejects_zero_unit_cost() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(&path, r#"{"accelerator": {"unit_memory": 0}}"#).unwrap();

        assert!(matches!(
            ResourceConfig::load(&path),
            Err(ResourceError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ResourceConfig::load(Path::new("/nonexistent/resources.json")).unwrap_err();
        assert!(err.path().is_some());
    }

    #[test]
    fn test_cli_plan_args() {
        let args = CliArgs::parse_from([
            "kernel-resources",
            "plan",
            "--cpus",
            "4",
            "--mount",
            "/data:/home/work/data:ro",
            "--mount",
            "/out:/home/work/out:rw",
        ]);
        match args.command {
            Commands::Plan(plan) => {
                assert_eq!(plan.cpus, 4);
                assert_eq!(plan.mem, "1G");
                assert_eq!(plan.mounts.len(), 2);
                assert!(plan.accel_share.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_accel_share_requires_devices() {
        let result = CliArgs::try_parse_from(["kernel-resources", "plan", "--accel-share", "0.5"]);
        assert!(result.is_err());
    }
}
