// 该文件是 Xuepian （血片镜检） 项目的一部分。
// tests/orchestrator.rs - 分析流程集成测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use uuid::Uuid;
use yare::parameterized;

use xuepian::{
  AnalysisError, AnalysisOrchestrator, AnalysisRequest, EngineConfig, InferenceEngine, Stage,
  Verdict,
  frame::RgbNhwcFrame,
  input::{AcquiredImage, CaptureInput, UploadInput},
  model::{DetectResult, Detection, LoadError, Model, ModelLoader},
  random::SequenceRandom,
  record::{
    AnalysisRecord, DirectoryRecordStore, MemoryRecordStore, PersistenceError, RecordFilter,
    RecordStore, RecordUpdate, SyncStatus,
  },
  engine::InferenceError,
  storage::{DirectoryImageStore, ImageStore, MemoryImageStore, StorageError, StoredImage},
  validate::MAX_BYTE_SIZE,
};

fn encode(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
  let image = image::RgbImage::from_pixel(width, height, image::Rgb([235, 205, 210]));
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, format).unwrap();
  bytes.into_inner()
}

fn request() -> AnalysisRequest {
  AnalysisRequest::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
}

fn quiet_config() -> EngineConfig {
  EngineConfig::default().with_simulate_latency(false)
}

/// 总是检测到一个寄生虫的模型，记录加载与推理次数
struct StubModel {
  confidence: f32,
  fail: bool,
  inferences: Arc<AtomicUsize>,
}

impl Model for StubModel {
  type Error = std::io::Error;

  fn infer(&self, _input: &RgbNhwcFrame) -> Result<DetectResult, Self::Error> {
    self.inferences.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(std::io::Error::other("NPU 超时"));
    }
    Ok(DetectResult::from(vec![Detection {
      label: "parasite".to_string(),
      class_id: 0,
      confidence: self.confidence,
      bbox: [0.1, 0.1, 0.2, 0.2],
    }]))
  }

  fn version(&self) -> String {
    "stub-v1".to_string()
  }
}

#[derive(Clone, Default)]
struct StubLoader {
  confidence: f32,
  fail: bool,
  loads: Arc<AtomicUsize>,
  inferences: Arc<AtomicUsize>,
}

impl ModelLoader for StubLoader {
  type Model = StubModel;

  fn load(&self, _config: &EngineConfig) -> Result<Self::Model, LoadError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    Ok(StubModel {
      confidence: self.confidence,
      fail: self.fail,
      inferences: self.inferences.clone(),
    })
  }
}

#[derive(Default)]
struct SpyImageStore {
  inner: MemoryImageStore,
  saves: AtomicUsize,
}

impl ImageStore for SpyImageStore {
  fn save(
    &self,
    bytes: &[u8],
    original_filename: &str,
    owner_scope: &str,
  ) -> Result<StoredImage, StorageError> {
    self.saves.fetch_add(1, Ordering::SeqCst);
    self.inner.save(bytes, original_filename, owner_scope)
  }

  fn stored_images(&self) -> Result<Vec<PathBuf>, StorageError> {
    self.inner.stored_images()
  }
}

struct FailingImageStore;

impl ImageStore for FailingImageStore {
  fn save(&self, _: &[u8], _: &str, _: &str) -> Result<StoredImage, StorageError> {
    Err(StorageError::IoError(std::io::Error::other("设备上没有空间")))
  }

  fn stored_images(&self) -> Result<Vec<PathBuf>, StorageError> {
    Ok(Vec::new())
  }
}

#[derive(Default)]
struct SpyRecordStore {
  inner: MemoryRecordStore,
  creates: AtomicUsize,
  fail_create: bool,
}

impl RecordStore for SpyRecordStore {
  fn create(&self, record: AnalysisRecord) -> Result<AnalysisRecord, PersistenceError> {
    self.creates.fetch_add(1, Ordering::SeqCst);
    if self.fail_create {
      return Err(PersistenceError::IoError(std::io::Error::other("连接已断开")));
    }
    self.inner.create(record)
  }

  fn get(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    self.inner.get(id)
  }

  fn list(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>, PersistenceError> {
    self.inner.list(filter)
  }

  fn mark_synced(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    self.inner.mark_synced(id)
  }

  fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<AnalysisRecord, PersistenceError> {
    self.inner.update(id, update)
  }
}

fn stub_orchestrator(
  loader: StubLoader,
  images: SpyImageStore,
  records: SpyRecordStore,
) -> AnalysisOrchestrator<SpyImageStore, SpyRecordStore, StubLoader> {
  let engine = InferenceEngine::with_loader(quiet_config(), loader);
  AnalysisOrchestrator::new(Arc::new(engine), images, records)
}

#[test]
fn large_jpeg_with_one_confident_detection_is_positive() {
  let mut bytes = encode(500, 500, image::ImageFormat::Jpeg);
  bytes.resize(2 * 1024 * 1024, 0);

  let loader = StubLoader {
    confidence: 0.9,
    ..StubLoader::default()
  };
  let orchestrator = stub_orchestrator(
    loader.clone(),
    SpyImageStore::default(),
    SpyRecordStore::default(),
  );
  let request = request().with_notes("发热三天");

  let report = orchestrator
    .analyze_upload(&request, AcquiredImage::new(bytes, "smear.jpg"))
    .unwrap();

  assert_eq!(report.outcome.verdict(), Verdict::Positive);
  assert!((report.outcome.confidence() - 0.9).abs() < 1e-6);
  assert_eq!(report.outcome.detections().map(|d| d.len()), Some(1));
  assert_eq!(
    report.trail,
    vec![
      Stage::Received,
      Stage::Validated,
      Stage::Inferred,
      Stage::Stored,
      Stage::Recorded
    ]
  );

  let record = &report.record;
  assert_eq!(record.result, Verdict::Positive);
  assert_eq!(record.model_version, "stub-v1");
  assert_eq!(record.clinic_id, request.clinic_id);
  assert_eq!(record.notes.as_deref(), Some("发热三天"));
  assert_eq!(record.sync_status, SyncStatus::Pending);
  assert_eq!(record.test_date, record.created_at);
  assert!(record.image_filename.ends_with(".jpg"));

  assert_eq!(orchestrator.records().get(record.id).unwrap(), *record);
  assert_eq!(orchestrator.images().saves.load(Ordering::SeqCst), 1);
  assert_eq!(loader.inferences.load(Ordering::SeqCst), 1);
}

#[test]
fn tiny_png_is_rejected_before_anything_runs() {
  let loader = StubLoader::default();
  let orchestrator = stub_orchestrator(
    loader.clone(),
    SpyImageStore::default(),
    SpyRecordStore::default(),
  );

  let err = orchestrator
    .analyze_upload(
      &request(),
      AcquiredImage::new(encode(50, 50, image::ImageFormat::Png), "tiny.png"),
    )
    .unwrap_err();

  assert!(matches!(err, AnalysisError::InvalidImage(_)));
  assert_eq!(err.stage(), Some(Stage::Received));
  assert!(err.public_message().contains("50x50"));
  assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
  assert_eq!(loader.inferences.load(Ordering::SeqCst), 0);
  assert_eq!(orchestrator.images().saves.load(Ordering::SeqCst), 0);
  assert_eq!(orchestrator.records().creates.load(Ordering::SeqCst), 0);
}

fn oversized_png() -> Vec<u8> {
  let mut bytes = encode(200, 200, image::ImageFormat::Png);
  bytes.resize(MAX_BYTE_SIZE + 1, 0);
  bytes
}

#[parameterized(
  gif = { b"GIF89a\x64\x00\x64\x00\x00\x00\x00;".to_vec(), "slide.gif" },
  text = { b"patient notes, not a picture".to_vec(), "notes.txt" },
  oversized = { oversized_png(), "huge.png" },
  tiny = { encode(99, 120, image::ImageFormat::Jpeg), "tiny.jpg" },
)]
fn rejected_upload_touches_no_collaborator(bytes: Vec<u8>, filename: &str) {
  let loader = StubLoader {
    confidence: 0.9,
    ..StubLoader::default()
  };
  let orchestrator = stub_orchestrator(
    loader.clone(),
    SpyImageStore::default(),
    SpyRecordStore::default(),
  );

  let err = orchestrator
    .analyze_upload(&request(), AcquiredImage::new(bytes, filename))
    .unwrap_err();

  assert!(matches!(err, AnalysisError::InvalidImage(_)));
  assert!(err.is_user_visible());
  assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
  assert_eq!(loader.inferences.load(Ordering::SeqCst), 0);
  assert_eq!(orchestrator.images().saves.load(Ordering::SeqCst), 0);
  assert_eq!(orchestrator.records().creates.load(Ordering::SeqCst), 0);
  assert!(orchestrator.orphaned_images().unwrap().is_empty());
}

#[test]
fn inference_failure_stops_before_storage() {
  let loader = StubLoader {
    confidence: 0.9,
    fail: true,
    ..StubLoader::default()
  };
  let orchestrator = stub_orchestrator(
    loader.clone(),
    SpyImageStore::default(),
    SpyRecordStore::default(),
  );

  let err = orchestrator
    .analyze_upload(
      &request(),
      AcquiredImage::new(encode(200, 200, image::ImageFormat::Png), "smear.png"),
    )
    .unwrap_err();

  assert!(matches!(err, AnalysisError::Inference(InferenceError::Model(_))));
  assert_eq!(err.stage(), Some(Stage::Validated));
  assert_eq!(err.public_message(), "analysis failed during inference");
  assert!(!err.public_message().contains("NPU"));
  assert_eq!(loader.inferences.load(Ordering::SeqCst), 1);
  assert_eq!(orchestrator.images().saves.load(Ordering::SeqCst), 0);
  assert_eq!(orchestrator.records().creates.load(Ordering::SeqCst), 0);
  assert!(orchestrator.images().inner.is_empty());
}

#[test]
fn sweep_removes_interrupted_writes_only() {
  let dir = tempfile::tempdir().unwrap();
  let images = DirectoryImageStore::new(dir.path().join("images"));
  let records = DirectoryRecordStore::open(dir.path().join("records")).unwrap();
  let engine = InferenceEngine::new(quiet_config());
  let orchestrator = AnalysisOrchestrator::new(Arc::new(engine), images, records);

  let report = orchestrator
    .analyze_upload(
      &request(),
      AcquiredImage::new(encode(200, 200, image::ImageFormat::Png), "smear.png"),
    )
    .unwrap();
  let leftover = report.record.image_path.with_file_name("crashed.png.partial");
  std::fs::write(&leftover, b"half").unwrap();

  assert_eq!(orchestrator.sweep_partials().unwrap(), 1);
  assert!(!leftover.exists());
  assert!(report.record.image_path.exists());
  assert_eq!(orchestrator.sweep_partials().unwrap(), 0);
  assert!(orchestrator.orphaned_images().unwrap().is_empty());
}

#[test]
fn memory_store_has_nothing_to_sweep() {
  let orchestrator = stub_orchestrator(
    StubLoader::default(),
    SpyImageStore::default(),
    SpyRecordStore::default(),
  );
  assert_eq!(orchestrator.sweep_partials().unwrap(), 0);
}

#[test]
fn storage_failure_never_creates_a_record() {
  let loader = StubLoader {
    confidence: 0.9,
    ..StubLoader::default()
  };
  let engine = InferenceEngine::with_loader(quiet_config(), loader);
  let orchestrator =
    AnalysisOrchestrator::new(Arc::new(engine), FailingImageStore, SpyRecordStore::default());

  let err = orchestrator
    .analyze_upload(
      &request(),
      AcquiredImage::new(encode(200, 200, image::ImageFormat::Png), "smear.png"),
    )
    .unwrap_err();

  assert!(matches!(err, AnalysisError::Storage(_)));
  assert_eq!(err.public_message(), "analysis failed during storage");
  assert!(!err.public_message().contains("空间"));
  assert_eq!(orchestrator.records().creates.load(Ordering::SeqCst), 0);
}

#[test]
fn persistence_failure_leaves_an_orphaned_image() {
  let orchestrator = stub_orchestrator(
    StubLoader {
      confidence: 0.5,
      ..StubLoader::default()
    },
    SpyImageStore::default(),
    SpyRecordStore {
      fail_create: true,
      ..SpyRecordStore::default()
    },
  );

  let err = orchestrator
    .analyze_upload(
      &request(),
      AcquiredImage::new(encode(200, 200, image::ImageFormat::Png), "smear.png"),
    )
    .unwrap_err();

  assert!(matches!(err, AnalysisError::Persistence(_)));
  assert_eq!(err.stage(), Some(Stage::Stored));
  assert_eq!(err.public_message(), "analysis failed during persistence");

  let orphans = orchestrator.orphaned_images().unwrap();
  assert_eq!(orphans.len(), 1);
  assert_eq!(orchestrator.images().inner.len(), 1);
}

#[test]
fn fallback_mode_runs_end_to_end_on_disk() {
  let dir = tempfile::tempdir().unwrap();
  let images = DirectoryImageStore::new(dir.path().join("images"));
  let records = DirectoryRecordStore::open(dir.path().join("records")).unwrap();

  // 置信度 0.65 + 0.9 * 0.33, 耗时 100 + 0.5 * 200, 掷骰 0.1
  let engine = InferenceEngine::new(quiet_config())
    .with_random(Arc::new(SequenceRandom::new([0.9, 0.5, 0.1])));
  let orchestrator = AnalysisOrchestrator::new(Arc::new(engine), images, records);

  let mut upload = UploadInput::from_bytes(encode(320, 240, image::ImageFormat::Png), "slide.PNG");
  let report = orchestrator
    .capture_and_analyze(&request(), &mut upload)
    .unwrap();

  assert_eq!(report.record.model_version, "placeholder-v1.0.0");
  assert_eq!(report.record.result, Verdict::Positive);
  assert!((report.record.confidence_score - 0.947).abs() < 1e-4);
  assert!((report.record.processing_time_ms - 200.0).abs() < 1e-9);
  assert!(report.outcome.detections().is_none());

  assert!(report.record.image_path.starts_with(dir.path().join("images")));
  assert!(report.record.image_path.exists());
  assert_eq!(
    report.record.image_path.extension().and_then(|e| e.to_str()),
    Some("png")
  );
  assert!(orchestrator.orphaned_images().unwrap().is_empty());

  // 上传源只能取用一次
  assert!(matches!(
    orchestrator.capture_and_analyze(&request(), &mut upload),
    Err(AnalysisError::Acquisition(_))
  ));
}

#[test]
fn synthetic_capture_is_analyzed_and_recorded() {
  let orchestrator = stub_orchestrator(
    StubLoader {
      confidence: 0.8,
      ..StubLoader::default()
    },
    SpyImageStore::default(),
    SpyRecordStore::default(),
  );
  let mut camera = CaptureInput::default().with_resolution(640, 360);

  let report = orchestrator
    .capture_and_analyze(&request(), &mut camera)
    .unwrap();

  assert_eq!(report.record.result, Verdict::Positive);
  assert!(report.record.image_filename.ends_with(".jpg"));
  assert_eq!(orchestrator.pending_sync().unwrap().len(), 1);
}

#[test]
fn lookups_map_missing_records_to_not_found() {
  let orchestrator = stub_orchestrator(
    StubLoader::default(),
    SpyImageStore::default(),
    SpyRecordStore::default(),
  );
  let id = Uuid::new_v4();

  assert!(matches!(orchestrator.get_record(id), Err(AnalysisError::NotFound(x)) if x == id));
  assert!(matches!(
    orchestrator.mark_synced(id),
    Err(AnalysisError::NotFound(_))
  ));
  assert!(matches!(
    orchestrator.update_record(id, &RecordUpdate::default()),
    Err(AnalysisError::NotFound(_))
  ));
}

#[test]
fn concurrent_attempts_share_one_model_load() {
  let loader = StubLoader {
    confidence: 0.3,
    ..StubLoader::default()
  };
  let orchestrator = Arc::new(stub_orchestrator(
    loader.clone(),
    SpyImageStore::default(),
    SpyRecordStore::default(),
  ));
  let bytes = encode(200, 200, image::ImageFormat::Png);

  let handles: Vec<_> = (0..8)
    .map(|_| {
      let orchestrator = orchestrator.clone();
      let bytes = bytes.clone();
      std::thread::spawn(move || {
        orchestrator
          .analyze_upload(&request(), AcquiredImage::new(bytes, "smear.png"))
          .unwrap()
      })
    })
    .collect();
  for handle in handles {
    assert_eq!(handle.join().unwrap().record.result, Verdict::Negative);
  }

  assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
  assert_eq!(loader.inferences.load(Ordering::SeqCst), 8);
  assert_eq!(
    orchestrator
      .records()
      .list(&RecordFilter::default())
      .unwrap()
      .len(),
    8
  );
}
