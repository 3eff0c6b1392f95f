//! kernel-resources CLI - resource accounting diagnostics
//!
//! Shows the topology the agent would schedule on, dry-runs an allocation,
//! and inspects persisted resource records.

use clap::Parser;
use kernel_resources::alloc::{load_device_catalog, AcceleratorAllocator, CpuAllocator, UnitCost};
use kernel_resources::config::{parse_size, CliArgs, Commands, PlanArgs, ResourceConfig};
use kernel_resources::error::{ResourceError, Result};
use kernel_resources::spec::{KernelResourceSpec, Mount, ShareValue, Shares};
use kernel_resources::system::{NodeId, TopologyProvider};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => ResourceConfig::load(path)?,
        None => ResourceConfig::default(),
    };

    if args.verbose > 0 {
        print_config(&config);
    }

    match &args.command {
        Commands::Topology => cmd_topology(&config),
        Commands::Plan(plan) => cmd_plan(&config, plan, args.verbose > 0),
        Commands::Inspect { path } => cmd_inspect(path, args.verbose > 0),
    }
}

fn cmd_topology(config: &ResourceConfig) -> Result<()> {
    let topology = TopologyProvider::from_config(config);
    topology.log_topology();

    println!("=== Core Topology ===");
    println!(
        "NUMA:  {}",
        if topology.numa_supported() { "supported" } else { "unsupported" }
    );
    println!("Nodes: {}", topology.num_nodes());
    println!("Cores: {}", topology.available_cores().len());
    println!();

    for (node, cores) in topology.core_topology() {
        println!("  Node {:>2}: {:>3} cores {:?}", node, cores.len(), cores);
    }

    Ok(())
}

fn cmd_plan(config: &ResourceConfig, plan: &PlanArgs, verbose: bool) -> Result<()> {
    let memory_limit = parse_size(&plan.mem).map_err(ResourceError::config)?;
    let scratch_disk_size = parse_size(&plan.scratch).map_err(ResourceError::config)?;
    let mounts = plan
        .mounts
        .iter()
        .map(|m| m.parse::<Mount>())
        .collect::<Result<Vec<_>>>()?;

    let topology = Arc::new(TopologyProvider::from_config(config));
    let cpus = CpuAllocator::new(topology);
    let (cpu_node, cores) = cpus.alloc(plan.cpus)?;

    let mut shares = Shares::new();
    shares.insert("cpu".to_string(), ShareValue::Single(Decimal::from(plan.cpus)));
    shares.insert("mem".to_string(), ShareValue::Single(Decimal::from(memory_limit)));

    let mut numa_node = cpu_node;
    let mut split_note = None;
    if let (Some(share), Some(catalog)) = (&plan.accel_share, &plan.devices) {
        let requested = share.trim().parse::<Decimal>().map_err(|e| {
            ResourceError::InvalidRequest(format!("invalid accelerator share '{share}': {e}"))
        })?;

        let unit = UnitCost::from_config(&config.accelerator)?;
        let devices = load_device_catalog(catalog, unit)?;
        let accelerators = AcceleratorAllocator::new(devices, &config.accelerator.resource_class)?;
        let (accel_node, granted) = accelerators.alloc(requested)?;

        split_note = split_placement_note(cpu_node, accel_node);
        if let Some(note) = &split_note {
            tracing::warn!("{}", note);
        }
        numa_node = accel_node;
        shares.insert(
            accelerators.resource_class().to_string(),
            ShareValue::PerDevice(granted),
        );
    }

    let spec = KernelResourceSpec::new(
        numa_node,
        cores,
        memory_limit,
        scratch_disk_size,
        shares,
        mounts,
    )?;

    if verbose {
        spec.print_summary();
        println!();
    }
    println!("{}", serde_json::to_string_pretty(&spec.to_json())?);
    if let Some(note) = &split_note {
        println!("\nWarning: {}", note);
    }

    if let Some(path) = &plan.save {
        spec.save(path)?;
        println!("\nSaved resource record to {}", path.display());
    }

    Ok(())
}

/// Describe a placement whose cores and accelerators sit on different nodes
fn split_placement_note(cpu_node: NodeId, accel_node: NodeId) -> Option<String> {
    (cpu_node != accel_node).then(|| {
        format!(
            "record is split across NUMA nodes: cores on node {}, accelerators on node {} (recorded node)",
            cpu_node, accel_node
        )
    })
}

fn cmd_inspect(path: &Path, verbose: bool) -> Result<()> {
    let spec = KernelResourceSpec::load(path)?;

    if verbose {
        spec.print_summary();
        println!();
    }
    println!("{}", serde_json::to_string_pretty(&spec.to_json())?);

    Ok(())
}

fn print_config(config: &ResourceConfig) {
    println!("=== Configuration ===");
    println!("sysfs root:   {}", config.sysfs_root.display());
    println!("procfs root:  {}", config.proc_root.display());
    println!("cgroup root:  {}", config.cgroup_root.display());
    if let Some(pinned) = &config.pinned_topology {
        println!("Pinned nodes: {}", pinned.len());
    }
    println!(
        "Accelerator:  {} (1 share = {} + {} units)",
        config.accelerator.resource_class,
        humansize::format_size(config.accelerator.unit_memory, humansize::BINARY),
        config.accelerator.unit_processing_units
    );
    println!();
}
