use anpr_core::{Backend, MemoryFrame};
use anpr_gpu::software::spirv_header;
use anpr_gpu::GpuConfig;
use anpr_preprocess::{
    BackendPreference, CpuPlaneRotator, FramePreprocessor, GpuDeviceKind, PreprocessConfig,
};

fn software_config(dir: &tempfile::TempDir, backend: BackendPreference) -> PreprocessConfig {
    let shader_path = dir.path().join("compute.spv");
    std::fs::write(&shader_path, spirv_header()).unwrap();
    PreprocessConfig {
        backend,
        device: GpuDeviceKind::Software,
        gpu: GpuConfig {
            shader_path,
            ..GpuConfig::default()
        },
    }
}

fn frame(width: u32, height: u32, stride: u32, seed: u32) -> MemoryFrame {
    let luma = (0..stride * height)
        .map(|i| (i.wrapping_mul(2_654_435_761).wrapping_add(seed) >> 13) as u8)
        .collect();
    MemoryFrame::from_luma(width, height, stride, luma).unwrap()
}

#[test]
fn gpu_and_cpu_backends_agree() {
    let dir = tempfile::tempdir().unwrap();
    let gpu = FramePreprocessor::new(&software_config(&dir, BackendPreference::Gpu)).unwrap();
    let cpu = FramePreprocessor::new(&software_config(&dir, BackendPreference::Cpu)).unwrap();
    assert_eq!(gpu.active_backend(), Backend::Gpu);
    assert_eq!(cpu.active_backend(), Backend::Cpu);

    let shapes = [
        (4, 2, 4),
        (16, 16, 16),
        (17, 9, 32),
        (640, 480, 640),
        (3, 5, 4),
        (3, 5, 3),
        (4, 1, 4),
        (1, 4, 1),
        (1, 1, 1),
    ];
    for (i, &(w, h, stride)) in shapes.iter().enumerate() {
        let f = frame(w, h, stride, i as u32);
        let a = gpu.process(&f).unwrap();
        let b = cpu.process(&f).unwrap();
        assert_eq!(a.backend, Backend::Gpu);
        assert_eq!(b.backend, Backend::Cpu);
        assert_eq!(a.data, b.data, "{w}x{h} stride {stride}");
        assert_eq!((a.width, a.height), (b.width, b.height));
        assert_eq!((a.width, a.height), (h, w));
    }
}

#[test]
fn auto_without_shader_uses_cpu() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = software_config(&dir, BackendPreference::Auto);
    config.gpu.shader_path = dir.path().join("missing.spv");

    let pre = FramePreprocessor::new(&config).unwrap();
    assert_eq!(pre.active_backend(), Backend::Cpu);

    let f = frame(8, 6, 8, 1);
    let expected = CpuPlaneRotator::rotate_plane(&f.planes()[0], 8, 8, 6).unwrap();
    assert_eq!(pre.process(&f).unwrap().data, expected);
}

#[test]
fn forced_gpu_without_shader_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = software_config(&dir, BackendPreference::Gpu);
    config.gpu.shader_path = dir.path().join("missing.spv");
    assert!(FramePreprocessor::new(&config).is_err());
}

#[test]
fn busy_frame_falls_back_then_fails_on_cpu() {
    let dir = tempfile::tempdir().unwrap();
    let pre = FramePreprocessor::new(&software_config(&dir, BackendPreference::Auto)).unwrap();
    let f = frame(8, 6, 8, 2);
    f.set_refuse_lock(true);

    // The GPU import and the CPU lock both need the buffer.
    assert!(pre.process(&f).is_err());
    assert_eq!(f.unlock_count(), 0);
}
