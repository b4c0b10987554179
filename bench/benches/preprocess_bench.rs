//! Frame preprocessing benchmarks.
//!
//! Run with: cargo bench --bench preprocess_bench
//!
//! The GPU group runs on the software device, so it measures the per-call
//! resource handling rather than real shader throughput.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use anpr_bench::luma_plane;
use anpr_core::MemoryFrame;
use anpr_gpu::software::spirv_header;
use anpr_gpu::{GpuConfig, GpuPreprocessor, SoftwareDevice};
use anpr_preprocess::CpuPlaneRotator;

const SIZES: [(u32, u32); 3] = [(640, 480), (1280, 720), (1920, 1080)];

fn bench_cpu_rotate(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_rotate");

    for &(width, height) in &SIZES {
        let plane = luma_plane(width, height);
        group.throughput(Throughput::Bytes(plane.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("rotate_plane", format!("{width}x{height}")),
            &plane,
            |b, plane| {
                b.iter(|| {
                    CpuPlaneRotator::rotate_plane(
                        std::hint::black_box(plane),
                        width as usize,
                        width as usize,
                        height as usize,
                    )
                    .unwrap()
                });
            },
        );
    }
    group.finish();
}

fn bench_software_gpu(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let shader_path = dir.path().join("compute.spv");
    std::fs::write(&shader_path, spirv_header()).unwrap();
    let config = GpuConfig {
        shader_path,
        ..GpuConfig::default()
    };
    let gpu = GpuPreprocessor::new(Arc::new(SoftwareDevice::new()), &config).unwrap();

    let mut group = c.benchmark_group("software_gpu");
    group.sample_size(20);

    for &(width, height) in &SIZES[..2] {
        let frame = MemoryFrame::from_luma(width, height, width, luma_plane(width, height)).unwrap();
        group.throughput(Throughput::Bytes(u64::from(width * height)));
        group.bench_with_input(
            BenchmarkId::new("process", format!("{width}x{height}")),
            &frame,
            |b, frame| {
                b.iter(|| gpu.process(frame).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_cpu_rotate, bench_software_gpu);
criterion_main!(benches);
