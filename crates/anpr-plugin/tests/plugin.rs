use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use anpr_core::{AnprError, MemoryFrame, RecognitionResult, Result};
use anpr_gpu::software::spirv_header;
use anpr_plugin::{
    CommandTable, HostValue, Initialization, Installation, PluginConfig, PluginContext, Reply,
};
use anpr_preprocess::{BackendPreference, GpuDeviceKind};
use anpr_recognize::{PlateRecognizer, RecognizerConfig, RecognizerSettings};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Created(String),
    Recognize { bytes: Vec<u8>, bpp: u32, width: u32, height: u32 },
    TopN(u32),
    Country(String),
    Prewarp(String),
    Mask { len: usize, bpp: u32, width: u32, height: u32 },
    DetectRegion(bool),
    DefaultRegion(String),
}

type Log = Arc<Mutex<Vec<Call>>>;

struct Recording {
    log: Log,
}

impl PlateRecognizer for Recording {
    fn recognize(&mut self, pixels: &[u8], bpp: u32, width: u32, height: u32) -> Result<String> {
        self.log.lock().push(Call::Recognize {
            bytes: pixels.to_vec(),
            bpp,
            width,
            height,
        });
        Ok(format!(
            r#"{{"version":2,"data_type":"alpr_results","img_width":{width},"img_height":{height},"results":[{{"plate":"ABC123","confidence":88.5}}]}}"#
        ))
    }

    fn set_top_n(&mut self, top_n: u32) -> Result<()> {
        self.log.lock().push(Call::TopN(top_n));
        Ok(())
    }

    fn set_country(&mut self, country: &str) -> Result<()> {
        self.log.lock().push(Call::Country(country.into()));
        Ok(())
    }

    fn set_prewarp(&mut self, prewarp: &str) -> Result<()> {
        self.log.lock().push(Call::Prewarp(prewarp.into()));
        Ok(())
    }

    fn set_mask(&mut self, pixels: &[u8], bpp: u32, width: u32, height: u32) -> Result<()> {
        self.log.lock().push(Call::Mask {
            len: pixels.len(),
            bpp,
            width,
            height,
        });
        Ok(())
    }

    fn set_detect_region(&mut self, detect: bool) -> Result<()> {
        self.log.lock().push(Call::DetectRegion(detect));
        Ok(())
    }

    fn set_default_region(&mut self, region: &str) -> Result<()> {
        self.log.lock().push(Call::DefaultRegion(region.into()));
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    table: CommandTable,
    log: Log,
    created: Arc<AtomicUsize>,
}

fn config(dir: &tempfile::TempDir, backend: BackendPreference) -> PluginConfig {
    let mut config = PluginConfig::with_files_dir(dir.path());
    let shader = &config.preprocess.gpu.shader_path;
    std::fs::create_dir_all(shader.parent().unwrap()).unwrap();
    std::fs::write(shader, spirv_header()).unwrap();
    config.preprocess.backend = backend;
    config.preprocess.device = GpuDeviceKind::Software;
    config
}

fn harness_with(config: PluginConfig, dir: tempfile::TempDir) -> Harness {
    let log: Log = Arc::default();
    let created = Arc::new(AtomicUsize::new(0));
    let (factory_log, factory_created) = (log.clone(), created.clone());
    let context = PluginContext::with_recognizer_factory(
        config,
        Box::new(move |_: &RecognizerConfig, settings: &RecognizerSettings| {
            factory_created.fetch_add(1, Ordering::SeqCst);
            factory_log.lock().push(Call::Created(settings.country.clone()));
            Ok(Box::new(Recording {
                log: factory_log.clone(),
            }) as Box<dyn PlateRecognizer>)
        }),
    );
    let table = CommandTable::new(Arc::new(context));
    assert_eq!(table.install(), Installation::Installed);
    Harness {
        _dir: dir,
        table,
        log,
        created,
    }
}

fn harness(backend: BackendPreference) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, backend);
    harness_with(config, dir)
}

fn init(h: &Harness, args: &[HostValue<'_>]) {
    assert_eq!(h.table.call("initializeANPR", args).unwrap(), Reply::Undefined);
}

#[test]
fn second_install_is_a_no_op() {
    let h = harness(BackendPreference::Cpu);
    assert_eq!(h.table.install(), Installation::AlreadyInstalled);
    assert!(h.table.is_installed());
}

#[test]
fn commands_need_installation() {
    let dir = tempfile::tempdir().unwrap();
    let context = PluginContext::with_recognizer_factory(
        config(&dir, BackendPreference::Cpu),
        Box::new(|_: &RecognizerConfig, _: &RecognizerSettings| {
            Err(AnprError::Recognition("unused".into()))
        }),
    );
    let table = CommandTable::new(Arc::new(context));
    assert!(matches!(
        table.call("setTopN", &[HostValue::Number(1.0)]),
        Err(AnprError::NotInitialized(_))
    ));
}

#[test]
fn setters_before_initialize_fail() {
    let h = harness(BackendPreference::Cpu);
    let mask = [0u8; 4];
    let calls: [(&str, Vec<HostValue>); 6] = [
        ("setTopN", vec![HostValue::Number(3.0)]),
        ("setCountry", vec![HostValue::String("us")]),
        ("setPrewarp", vec![HostValue::String("planar,1,2")]),
        (
            "setMask",
            vec![
                HostValue::Bytes(&mask),
                HostValue::Number(1.0),
                HostValue::Number(2.0),
                HostValue::Number(2.0),
            ],
        ),
        ("setDetectRegion", vec![HostValue::Bool(true)]),
        ("setDefaultRegion", vec![HostValue::String("se")]),
    ];
    for (name, args) in calls {
        let err = h.table.call(name, &args).unwrap_err();
        assert!(matches!(err, AnprError::NotInitialized(_)), "{name}: {err}");
        assert_eq!(err.to_string(), "OpenALPR not initialized");
    }
    assert!(h.log.lock().is_empty());
}

#[test]
fn initialize_happens_once() {
    let h = harness(BackendPreference::Cpu);
    init(
        &h,
        &[HostValue::String("eu"), HostValue::Number(4.0), HostValue::String("se")],
    );
    init(&h, &[HostValue::String("us"), HostValue::Number(9.0)]);

    assert_eq!(h.created.load(Ordering::SeqCst), 1);
    assert_eq!(
        *h.log.lock(),
        vec![
            Call::Created("eu".into()),
            Call::TopN(4),
            Call::DefaultRegion("se".into())
        ]
    );
    assert_eq!(
        h.table.context().initialize(&RecognizerSettings::new("us")).unwrap(),
        Initialization::AlreadyInitialized
    );
}

#[test]
fn defaults_are_not_pushed_to_the_engine() {
    let h = harness(BackendPreference::Cpu);
    init(&h, &[HostValue::String("eu")]);
    assert_eq!(*h.log.lock(), vec![Call::Created("eu".into())]);
}

#[test]
fn setters_reach_the_engine() {
    let h = harness(BackendPreference::Cpu);
    init(&h, &[HostValue::String("eu")]);
    let mask = [255u8; 6];

    h.table.call("setTopN", &[HostValue::Number(7.0)]).unwrap();
    h.table.call("setCountry", &[HostValue::String("us")]).unwrap();
    h.table.call("setPrewarp", &[HostValue::String("planar,1,2")]).unwrap();
    h.table
        .call(
            "setMask",
            &[
                HostValue::Bytes(&mask),
                HostValue::Number(1.0),
                HostValue::Number(3.0),
                HostValue::Number(2.0),
            ],
        )
        .unwrap();
    h.table.call("setDetectRegion", &[HostValue::Bool(true)]).unwrap();
    h.table.call("setDefaultRegion", &[HostValue::String("md")]).unwrap();

    assert_eq!(
        &h.log.lock()[1..],
        &[
            Call::TopN(7),
            Call::Country("us".into()),
            Call::Prewarp("planar,1,2".into()),
            Call::Mask {
                len: 6,
                bpp: 1,
                width: 3,
                height: 2
            },
            Call::DetectRegion(true),
            Call::DefaultRegion("md".into()),
        ]
    );
}

#[test]
fn bad_arguments_are_rejected_before_the_engine() {
    let h = harness(BackendPreference::Cpu);
    init(&h, &[HostValue::String("eu")]);
    let err = h.table.call("setTopN", &[HostValue::String("7")]).unwrap_err();
    assert!(matches!(err, AnprError::InvalidInput(_)));
    assert_eq!(h.log.lock().len(), 1);
}

#[test]
fn recognise_frame_sends_rotated_grayscale() {
    for backend in [BackendPreference::Gpu, BackendPreference::Cpu] {
        let h = harness(backend);
        init(&h, &[HostValue::String("eu")]);
        let frame = MemoryFrame::from_luma(4, 2, 4, vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let Reply::Json(json) = h.table.call("recogniseFrame", &[HostValue::Frame(&frame)]).unwrap()
        else {
            panic!("recogniseFrame returned no JSON");
        };
        let result = RecognitionResult::from_json(&json).unwrap();
        assert_eq!((result.img_width, result.img_height), (2, 4));
        assert_eq!(result.best_plate().unwrap().plate, "ABC123");

        assert_eq!(
            h.log.lock().last().unwrap(),
            &Call::Recognize {
                bytes: vec![5, 1, 6, 2, 7, 3, 8, 4],
                bpp: 1,
                width: 2,
                height: 4,
            },
            "{backend:?}"
        );
    }
}

#[test]
fn recognise_frame_before_initialize_touches_nothing() {
    let h = harness(BackendPreference::Cpu);
    let frame = MemoryFrame::from_luma(4, 2, 4, vec![0; 8]).unwrap();
    assert!(matches!(
        h.table.call("recogniseFrame", &[HostValue::Frame(&frame)]),
        Err(AnprError::NotInitialized(_))
    ));
    assert_eq!(frame.lock_count(), 0);
}

#[test]
fn preprocessor_failure_is_retried_on_next_frame() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, BackendPreference::Gpu);
    let shader = config.preprocess.gpu.shader_path.clone();
    std::fs::remove_file(&shader).unwrap();
    let h = harness_with(config, dir);
    init(&h, &[HostValue::String("eu")]);

    let frame = MemoryFrame::from_luma(4, 2, 4, vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    assert!(matches!(
        h.table.call("recogniseFrame", &[HostValue::Frame(&frame)]),
        Err(AnprError::ShaderLoad(_))
    ));

    std::fs::write(&shader, spirv_header()).unwrap();
    assert!(h.table.call("recogniseFrame", &[HostValue::Frame(&frame)]).is_ok());
}

#[test]
fn failed_initialize_can_be_retried() {
    let dir = tempfile::tempdir().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let context = PluginContext::with_recognizer_factory(
        config(&dir, BackendPreference::Cpu),
        Box::new(move |_: &RecognizerConfig, _: &RecognizerSettings| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(AnprError::Recognition("runtime data missing".into()));
            }
            Ok(Box::new(Recording { log: Log::default() }) as Box<dyn PlateRecognizer>)
        }),
    );

    assert!(context.initialize(&RecognizerSettings::new("eu")).is_err());
    assert!(!context.is_initialized());
    assert_eq!(
        context.initialize(&RecognizerSettings::new("eu")).unwrap(),
        Initialization::Created
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn staged_shader_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, BackendPreference::Auto);
    let shader = config.preprocess.gpu.shader_path.clone();
    let context = PluginContext::with_recognizer_factory(
        config,
        Box::new(|_: &RecognizerConfig, _: &RecognizerSettings| {
            Err(AnprError::Recognition("unused".into()))
        }),
    );
    context.stage_shader().unwrap();
    assert_eq!(std::fs::read(shader).unwrap(), spirv_header());
}
