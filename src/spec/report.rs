//! JSON report of a kernel resource spec
//!
//! Shares are reported as decimal strings so consumers never see a float
//! approximation of a fractional accelerator share.

use serde_json::{json, Map, Value};

use super::kernel::{KernelResourceSpec, ShareValue};

impl KernelResourceSpec {
    /// Structured report for API consumers
    pub fn to_json(&self) -> Value {
        let shares: Map<String, Value> = self
            .shares
            .iter()
            .map(|(class, value)| {
                let value = match value {
                    ShareValue::Single(share) => Value::String(share.to_string()),
                    ShareValue::PerDevice(per_device) => Value::Object(
                        per_device
                            .iter()
                            .map(|(device, share)| {
                                (device.to_string(), Value::String(share.to_string()))
                            })
                            .collect(),
                    ),
                };
                (class.clone(), value)
            })
            .collect();

        let mounts: Vec<String> = self.mounts.iter().map(ToString::to_string).collect();

        json!({
            "numa_node": self.numa_node,
            "cpu_set": self.cpu_set,
            "memory_limit": self.memory_limit,
            "scratch_disk_size": self.scratch_disk_size,
            "shares": shares,
            "mounts": mounts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{DeviceId, ShareMap};
    use crate::spec::{Mount, MountPermission, Shares};
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    #[test]
    fn test_report_fields() {
        let spec = KernelResourceSpec::new(
            0,
            BTreeSet::from([2, 0, 1]),
            1 << 30,
            0,
            Shares::from([
                ("cpu".to_string(), ShareValue::from(dec!(3))),
                (
                    "cuda".to_string(),
                    ShareValue::from(ShareMap::from([
                        (DeviceId::new("0"), dec!(2)),
                        (DeviceId::new("1"), dec!(0.50)),
                    ])),
                ),
            ]),
            vec![Mount::new("/data", "/home/work/data", MountPermission::ReadOnly).unwrap()],
        )
        .unwrap();

        let report = spec.to_json();
        assert_eq!(report["numa_node"], 0);
        assert_eq!(report["cpu_set"], json!([0, 1, 2]));
        assert_eq!(report["memory_limit"], 1u64 << 30);
        assert_eq!(report["scratch_disk_size"], 0);
        assert_eq!(report["shares"]["cpu"], "3");
        assert_eq!(report["shares"]["cuda"], json!({"0": "2", "1": "0.50"}));
        assert_eq!(report["mounts"], json!(["/data:/home/work/data:ro"]));
    }
}
