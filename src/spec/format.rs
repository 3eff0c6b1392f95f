//! Persisted text form of a kernel resource spec
//!
//! One `KEY=VALUE` pair per line. Scalar keys are fixed; every resource class
//! gets its own `SHARES.<tag>` line. Per-device shares are written as a JSON
//! object whose values are decimal strings, so decimal scale survives a
//! save/load cycle unchanged.
//!
//! ```text
//! NUMA_NODE=1
//! CPU_CORES=4,5
//! MEMORY_LIMIT=4294967296
//! SCRATCH_SIZE=0
//! MOUNTS=/data/shared:/home/work/shared:ro
//! SHARES.cpu=2
//! SHARES.cuda={"0":"1.50","1":"1.00"}
//! ```

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use super::kernel::{KernelResourceSpec, Mount, ShareValue, Shares};
use crate::alloc::{DeviceId, ShareMap};
use crate::error::{IoResultExt, ResourceError, Result};
use crate::system::CoreId;

const NUMA_NODE: &str = "NUMA_NODE";
const CPU_CORES: &str = "CPU_CORES";
const MEMORY_LIMIT: &str = "MEMORY_LIMIT";
const SCRATCH_SIZE: &str = "SCRATCH_SIZE";
const MOUNTS: &str = "MOUNTS";
const SHARES_PREFIX: &str = "SHARES.";

impl KernelResourceSpec {
    /// Write the text form to `writer`
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "{NUMA_NODE}={}", self.numa_node)?;
        writeln!(writer, "{CPU_CORES}={}", join(&self.cpu_set))?;
        writeln!(writer, "{MEMORY_LIMIT}={}", self.memory_limit)?;
        writeln!(writer, "{SCRATCH_SIZE}={}", self.scratch_disk_size)?;
        writeln!(writer, "{MOUNTS}={}", join(&self.mounts))?;

        for (class, value) in &self.shares {
            match value {
                ShareValue::Single(share) => writeln!(writer, "{SHARES_PREFIX}{class}={share}")?,
                ShareValue::PerDevice(per_device) => {
                    let encoded: BTreeMap<&str, String> = per_device
                        .iter()
                        .map(|(device, share)| (device.as_str(), share.to_string()))
                        .collect();
                    writeln!(
                        writer,
                        "{SHARES_PREFIX}{class}={}",
                        serde_json::to_string(&encoded)?
                    )?;
                }
            }
        }

        writer.flush()?;
        Ok(())
    }

    /// Parse the text form from `reader`
    ///
    /// Unknown, duplicated or missing keys are rejected; nothing is returned
    /// unless every field parsed.
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        let mut numa_node = None;
        let mut cpu_set = None;
        let mut memory_limit = None;
        let mut scratch_disk_size = None;
        let mut mounts = None;
        let mut shares = Shares::new();
        let mut seen = HashSet::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| ResourceError::parse(line, "expected KEY=VALUE"))?;
            if !seen.insert(key.to_string()) {
                return Err(ResourceError::parse(key, "duplicate field"));
            }

            match key {
                NUMA_NODE => numa_node = Some(parse_number(key, value)?),
                CPU_CORES => cpu_set = Some(parse_cores(value)?),
                MEMORY_LIMIT => memory_limit = Some(parse_number(key, value)?),
                SCRATCH_SIZE => scratch_disk_size = Some(parse_number(key, value)?),
                MOUNTS => mounts = Some(parse_mounts(value)?),
                _ => match key.strip_prefix(SHARES_PREFIX) {
                    Some(class) => {
                        shares.insert(class.to_string(), parse_share(key, value)?);
                    }
                    None => return Err(ResourceError::parse(key, "unknown field")),
                },
            }
        }

        KernelResourceSpec::new(
            numa_node.ok_or(ResourceError::MissingField(NUMA_NODE))?,
            cpu_set.ok_or(ResourceError::MissingField(CPU_CORES))?,
            memory_limit.ok_or(ResourceError::MissingField(MEMORY_LIMIT))?,
            scratch_disk_size.ok_or(ResourceError::MissingField(SCRATCH_SIZE))?,
            shares,
            mounts.ok_or(ResourceError::MissingField(MOUNTS))?,
        )
    }

    /// Save to `path`, replacing any existing record
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_path(path)?;
        self.write_to(BufWriter::new(file)).map_err(|e| match e {
            ResourceError::Io { source, .. } => ResourceError::io(path, source),
            other => other,
        })?;

        tracing::debug!("Saved resource spec to {}", path.display());
        Ok(())
    }

    /// Load from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        Self::read_from(BufReader::new(file)).map_err(|e| match e {
            ResourceError::Io { source, .. } => ResourceError::io(path, source),
            other => other,
        })
    }
}

fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_number<T>(field: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ResourceError::parse(field, e.to_string()))
}

fn parse_cores(value: &str) -> Result<BTreeSet<CoreId>> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ResourceError::parse(CPU_CORES, "empty core set"));
    }
    value
        .split(',')
        .map(|core| parse_number(CPU_CORES, core))
        .collect()
}

fn parse_mounts(value: &str) -> Result<Vec<Mount>> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(|entry| {
            entry
                .parse()
                .map_err(|e: ResourceError| ResourceError::parse(MOUNTS, e.to_string()))
        })
        .collect()
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str_exact(value.trim()).map_err(|e| ResourceError::parse(field, e.to_string()))
}

fn parse_share(field: &str, value: &str) -> Result<ShareValue> {
    let value = value.trim();
    if !value.starts_with('{') {
        return parse_decimal(field, value).map(ShareValue::Single);
    }

    let encoded: BTreeMap<String, String> =
        serde_json::from_str(value).map_err(|e| ResourceError::parse(field, e.to_string()))?;
    let per_device = encoded
        .into_iter()
        .map(|(device, share)| Ok((DeviceId::new(device), parse_decimal(field, &share)?)))
        .collect::<Result<ShareMap>>()?;
    Ok(ShareValue::PerDevice(per_device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::MountPermission;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn sample() -> KernelResourceSpec {
        KernelResourceSpec::new(
            1,
            BTreeSet::from([4, 5, 7]),
            4 * 1024 * 1024 * 1024,
            512 * 1024 * 1024,
            Shares::from([
                ("cpu".to_string(), ShareValue::from(dec!(3))),
                ("mem".to_string(), ShareValue::from(dec!(4.0))),
                (
                    "cuda".to_string(),
                    ShareValue::from(ShareMap::from([
                        (DeviceId::new("0"), dec!(1.50)),
                        (DeviceId::new("1"), dec!(1.00)),
                    ])),
                ),
            ]),
            vec![
                Mount::new("/data/shared", "/home/work/shared", MountPermission::ReadOnly).unwrap(),
                Mount::new("/scratch/k1", "/home/work/tmp", MountPermission::ReadWrite).unwrap(),
            ],
        )
        .unwrap()
    }

    fn parse(text: &str) -> Result<KernelResourceSpec> {
        KernelResourceSpec::read_from(Cursor::new(text))
    }

    fn to_text(spec: &KernelResourceSpec) -> String {
        let mut buf = Vec::new();
        spec.write_to(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_write_format() {
        let text = to_text(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "NUMA_NODE=1",
                "CPU_CORES=4,5,7",
                "MEMORY_LIMIT=4294967296",
                "SCRATCH_SIZE=536870912",
                "MOUNTS=/data/shared:/home/work/shared:ro,/scratch/k1:/home/work/tmp:rw",
                "SHARES.cpu=3",
                r#"SHARES.cuda={"0":"1.50","1":"1.00"}"#,
                "SHARES.mem=4.0",
            ]
        );
    }

    #[test]
    fn test_round_trip_is_exact() {
        let spec = sample();
        let parsed = parse(&to_text(&spec)).unwrap();
        assert_eq!(parsed, spec);

        // scale is part of the value, not just the magnitude
        let cuda = parsed.device_shares("cuda").unwrap();
        assert_eq!(cuda[&DeviceId::new("0")].scale(), 2);
        assert_eq!(cuda[&DeviceId::new("1")].to_string(), "1.00");
        assert_eq!(to_text(&parsed), to_text(&spec));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resource.txt");

        let spec = sample();
        spec.save(&path).unwrap();
        assert_eq!(KernelResourceSpec::load(&path).unwrap(), spec);
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.txt");

        let err = KernelResourceSpec::load(&path).unwrap_err();
        assert_eq!(err.path(), Some(&path));
    }

    #[test]
    fn test_empty_mounts_round_trip() {
        let spec = KernelResourceSpec::new(
            0,
            BTreeSet::from([0]),
            0,
            0,
            Shares::new(),
            Vec::new(),
        )
        .unwrap();
        let text = to_text(&spec);
        assert!(text.contains("MOUNTS=\n"));
        assert_eq!(parse(&text).unwrap(), spec);
    }

    #[test]
    fn test_parse_error_names_field() {
        let text = to_text(&sample()).replace("CPU_CORES=4,5,7", "CPU_CORES=4,x");
        match parse(&text) {
            Err(ResourceError::Parse { field, .. }) => assert_eq!(field, "CPU_CORES"),
            other => panic!("unexpected result: {other:?}"),
        }

        let text = to_text(&sample()).replace("SHARES.cpu=3", "SHARES.cpu=three");
        match parse(&text) {
            Err(ResourceError::Parse { field, .. }) => assert_eq!(field, "SHARES.cpu"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_mount() {
        let text = to_text(&sample()).replace(":rw", ":rx");
        match parse(&text) {
            Err(ResourceError::Parse { field, .. }) => assert_eq!(field, "MOUNTS"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_and_duplicate_keys() {
        let text = format!("{}GPU_COUNT=2\n", to_text(&sample()));
        assert!(matches!(parse(&text), Err(ResourceError::Parse { .. })));

        let text = format!("{}NUMA_NODE=0\n", to_text(&sample()));
        match parse(&text) {
            Err(ResourceError::Parse { field, message }) => {
                assert_eq!(field, "NUMA_NODE");
                assert!(message.contains("duplicate"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(matches!(
            parse("NUMA_NODE=0\nno separator here\n"),
            Err(ResourceError::Parse { .. })
        ));
    }

    #[test]
    fn test_rejects_missing_fields() {
        let text: String = to_text(&sample())
            .lines()
            .filter(|line| !line.starts_with("MEMORY_LIMIT"))
            .map(|line| format!("{line}\n"))
            .collect();
        assert!(matches!(
            parse(&text),
            Err(ResourceError::MissingField("MEMORY_LIMIT"))
        ));

        assert!(matches!(
            parse(""),
            Err(ResourceError::MissingField("NUMA_NODE"))
        ));
    }

    #[test]
    fn test_rejects_empty_core_set() {
        let text = to_text(&sample()).replace("CPU_CORES=4,5,7", "CPU_CORES=");
        assert!(matches!(parse(&text), Err(ResourceError::Parse { .. })));
    }

    #[test]
    fn test_tolerates_crlf_and_blank_lines() {
        let text = to_text(&sample()).replace('\n', "\r\n\r\n");
        assert_eq!(parse(&text).unwrap(), sample());
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            numa_node in 0usize..8,
            cores in prop::collection::btree_set(0usize..256, 1..16),
            memory_limit in any::<u64>(),
            scratch in any::<u64>(),
            cpu_mantissa in 0i64..100_000,
            cpu_scale in 0u32..4,
            device_shares in prop::collection::btree_map("[0-9]{1,2}", (0i64..10_000, 0u32..3), 0..4),
        ) {
            let per_device: ShareMap = device_shares
                .into_iter()
                .map(|(id, (m, s))| (DeviceId::new(id), Decimal::new(m, s)))
                .collect();
            let mut shares = Shares::from([
                ("cpu".to_string(), ShareValue::from(Decimal::new(cpu_mantissa, cpu_scale))),
            ]);
            if !per_device.is_empty() {
                shares.insert("cuda".to_string(), ShareValue::from(per_device));
            }
            let spec = KernelResourceSpec::new(
                numa_node, cores, memory_limit, scratch, shares, Vec::new(),
            ).unwrap();

            let parsed = parse(&to_text(&spec)).unwrap();
            prop_assert_eq!(&parsed, &spec);
            prop_assert_eq!(to_text(&parsed), to_text(&spec));
        }
    }
}
