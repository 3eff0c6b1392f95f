//! Performance benchmarks for the resource allocators
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kernel_resources::alloc::{
    AcceleratorAllocator, AcceleratorDevice, CpuAllocator, CudaDevice, DeviceDescriptor, DeviceId,
    UnitCost,
};
use kernel_resources::spec::{KernelResourceSpec, Mount, MountPermission, ShareValue, Shares};
use kernel_resources::system::{StaticTopology, TopologyProvider};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;

const GIB: u64 = 1024 * 1024 * 1024;

fn gpus(nodes: usize, per_node: usize) -> Vec<Arc<dyn AcceleratorDevice>> {
    let unit = UnitCost::new(2 * GIB, 8).unwrap();
    (0..nodes * per_node)
        .map(|i| {
            Arc::new(CudaDevice::new(
                DeviceDescriptor {
                    device_id: DeviceId::new(i.to_string()),
                    hw_location: format!("0000:{:02x}:00.0", i),
                    numa_node: i / per_node,
                    memory_size: 16 * GIB,
                    processing_units: 80,
                },
                unit,
            )) as Arc<dyn AcceleratorDevice>
        })
        .collect()
}

fn bench_cpu_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_alloc_free");

    for (nodes, cores) in [(1, 16), (2, 64), (8, 256)] {
        let topology = Arc::new(TopologyProvider::new(StaticTopology::interleaved(nodes, cores)));
        let allocator = CpuAllocator::new(topology);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", nodes, cores)),
            &allocator,
            |b, allocator| {
                b.iter(|| {
                    let (_, set) = allocator.alloc(black_box(4)).unwrap();
                    allocator.free(&set).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_cpu_fill(c: &mut Criterion) {
    c.bench_function("cpu_fill_64_kernels", |b| {
        let topology = Arc::new(TopologyProvider::new(StaticTopology::interleaved(4, 64)));
        let allocator = CpuAllocator::new(topology);

        b.iter(|| {
            let grants: Vec<_> = (0..64).map(|_| allocator.alloc(2).unwrap().1).collect();
            for set in &grants {
                allocator.free(set).unwrap();
            }
        });
    });
}

fn bench_accelerator_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("accelerator_alloc_free");

    for share in [Decimal::new(5, 1), Decimal::new(25, 1), Decimal::new(1275, 2)] {
        let allocator = AcceleratorAllocator::new(gpus(2, 4), "cuda").unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(share), &share, |b, &share| {
            b.iter(|| {
                let (_, granted) = allocator.alloc(black_box(share)).unwrap();
                allocator.free(&granted).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_spec_round_trip(c: &mut Criterion) {
    let spec = KernelResourceSpec::new(
        1,
        BTreeSet::from([8, 9, 10, 11]),
        8 * GIB,
        20 * GIB,
        Shares::from([
            ("cpu".to_string(), ShareValue::Single(Decimal::from(4))),
            (
                "cuda".to_string(),
                ShareValue::PerDevice(
                    [("0", Decimal::new(150, 2)), ("1", Decimal::new(75, 2))]
                        .into_iter()
                        .map(|(id, share)| (DeviceId::new(id), share))
                        .collect(),
                ),
            ),
        ]),
        vec![Mount::new("/data", "/home/work/data", MountPermission::ReadOnly).unwrap()],
    )
    .unwrap();

    c.bench_function("spec_write_read", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(256);
            spec.write_to(&mut buf).unwrap();
            black_box(KernelResourceSpec::read_from(buf.as_slice()).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_cpu_alloc_free,
    bench_cpu_fill,
    bench_accelerator_alloc_free,
    bench_spec_round_trip
);

criterion_main!(benches);
