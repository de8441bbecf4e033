// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/orchestrator.rs - 分析流程编排
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

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
  classify::ClassificationOutcome,
  engine::InferenceEngine,
  error::AnalysisError,
  input::{Acquire, AcquiredImage, RawImage},
  model::{DefaultLoader, ModelLoader},
  record::{AnalysisRecord, RecordFilter, RecordStore, RecordUpdate, SyncStatus},
  storage::{ImageStore, orphaned_images},
  validate::ImageValidator,
};

/// 单次分析所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
  Received,
  Validated,
  Inferred,
  Stored,
  Recorded,
  Failed,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Received => "received",
      Stage::Validated => "validated",
      Stage::Inferred => "inferred",
      Stage::Stored => "stored",
      Stage::Recorded => "recorded",
      Stage::Failed => "failed",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
  pub patient_id: Uuid,
  pub clinic_id: Uuid,
  pub operator_id: Uuid,
  pub notes: Option<String>,
  pub symptoms: Option<String>,
}

impl AnalysisRequest {
  pub fn new(patient_id: Uuid, clinic_id: Uuid, operator_id: Uuid) -> Self {
    Self {
      patient_id,
      clinic_id,
      operator_id,
      notes: None,
      symptoms: None,
    }
  }

  pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
    self.notes = Some(notes.into());
    self
  }

  pub fn with_symptoms(mut self, symptoms: impl Into<String>) -> Self {
    self.symptoms = Some(symptoms.into());
    self
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
  pub record: AnalysisRecord,
  pub outcome: ClassificationOutcome,
  pub trail: Vec<Stage>,
}

/// 按 校验 → 推理 → 存储图像 → 提交记录 的顺序执行一次分析
///
/// 只有推理完成且图像保存成功才会创建记录；记录提交失败时已保存的图像
/// 保留为孤儿图像，供 `orphaned_images` 排查，不会被自动删除。
pub struct AnalysisOrchestrator<S, R, L: ModelLoader = DefaultLoader> {
  engine: Arc<InferenceEngine<L>>,
  validator: ImageValidator,
  images: S,
  records: R,
}

impl<S: ImageStore, R: RecordStore, L: ModelLoader> AnalysisOrchestrator<S, R, L> {
  pub fn new(engine: Arc<InferenceEngine<L>>, images: S, records: R) -> Self {
    Self {
      engine,
      validator: ImageValidator,
      images,
      records,
    }
  }

  pub fn engine(&self) -> &InferenceEngine<L> {
    &self.engine
  }

  pub fn images(&self) -> &S {
    &self.images
  }

  pub fn records(&self) -> &R {
    &self.records
  }

  /// 分析调用方提供的图像
  pub fn analyze_upload(
    &self,
    request: &AnalysisRequest,
    image: AcquiredImage,
  ) -> Result<AnalysisReport, AnalysisError> {
    let attempt = Uuid::new_v4();
    let span = info_span!("analysis", %attempt, clinic = %request.clinic_id);
    let _enter = span.enter();

    let result = self.run(request, image);
    match &result {
      Ok(report) => info!(
        "分析完成: 记录 {} 结论 {} (置信度: {:.2}, 耗时: {:.2} ms)",
        report.record.id,
        report.record.result,
        report.record.confidence_score,
        report.record.processing_time_ms
      ),
      Err(e) if e.is_user_visible() => {
        warn!("阶段: {} (上一阶段 {:?}): {}", Stage::Failed, e.stage(), e)
      }
      Err(e) => error!("阶段: {} (上一阶段 {:?}): {}", Stage::Failed, e.stage(), e),
    }
    result
  }

  /// 从相机（或模拟相机）取图后分析
  pub fn capture_and_analyze(
    &self,
    request: &AnalysisRequest,
    source: &mut dyn Acquire,
  ) -> Result<AnalysisReport, AnalysisError> {
    let image = source.acquire().map_err(|e| {
      error!("图像获取失败: {}", e);
      AnalysisError::Acquisition(e)
    })?;
    self.analyze_upload(request, image)
  }

  fn run(
    &self,
    request: &AnalysisRequest,
    image: AcquiredImage,
  ) -> Result<AnalysisReport, AnalysisError> {
    let mut trail = vec![Stage::Received];
    let AcquiredImage { bytes, filename } = image;
    // 临时缓冲区归 raw 所有，任何提前返回都会随之释放
    let raw = RawImage::probe(bytes);
    debug!(
      "收到图像 {}: {} {}x{} {} 字节",
      filename,
      raw.format(),
      raw.width(),
      raw.height(),
      raw.byte_size()
    );

    self
      .validator
      .check(&raw)
      .map_err(AnalysisError::InvalidImage)?;
    trail.push(Stage::Validated);
    debug!("阶段: {}", Stage::Validated);

    let outcome = self
      .engine
      .analyze(&raw)
      .map_err(AnalysisError::Inference)?;
    trail.push(Stage::Inferred);
    debug!("阶段: {} ({})", Stage::Inferred, outcome.verdict());

    let stored = self
      .images
      .save(raw.bytes(), &filename, &request.clinic_id.to_string())
      .map_err(AnalysisError::Storage)?;
    drop(raw);
    trail.push(Stage::Stored);
    debug!("阶段: {} ({})", Stage::Stored, stored.path.display());

    let now = Utc::now();
    let record = AnalysisRecord {
      id: Uuid::new_v4(),
      patient_id: request.patient_id,
      clinic_id: request.clinic_id,
      operator_id: request.operator_id,
      result: outcome.verdict(),
      confidence_score: outcome.confidence(),
      image_path: stored.path.clone(),
      image_filename: stored.filename.clone(),
      model_version: self.engine.model_version(),
      processing_time_ms: outcome.processing_time_ms(),
      notes: request.notes.clone(),
      symptoms: request.symptoms.clone(),
      sync_status: SyncStatus::Pending,
      test_date: now,
      created_at: now,
      updated_at: now,
      synced_at: None,
    };

    let record = self.records.create(record).map_err(|e| {
      warn!("记录未提交，保留孤儿图像: {}", stored.path.display());
      AnalysisError::Persistence(e)
    })?;
    trail.push(Stage::Recorded);

    Ok(AnalysisReport {
      record,
      outcome,
      trail,
    })
  }

  pub fn get_record(&self, id: Uuid) -> Result<AnalysisRecord, AnalysisError> {
    Ok(self.records.get(id)?)
  }

  pub fn list_records(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>, AnalysisError> {
    let records = self.records.list(filter)?;
    info!("查询到 {} 条记录", records.len());
    Ok(records)
  }

  pub fn pending_sync(&self) -> Result<Vec<AnalysisRecord>, AnalysisError> {
    Ok(self.records.pending_sync()?)
  }

  pub fn mark_synced(&self, id: Uuid) -> Result<AnalysisRecord, AnalysisError> {
    Ok(self.records.mark_synced(id)?)
  }

  pub fn update_record(
    &self,
    id: Uuid,
    update: &RecordUpdate,
  ) -> Result<AnalysisRecord, AnalysisError> {
    let record = self.records.update(id, update)?;
    info!("更新记录 {}", id);
    Ok(record)
  }

  /// 已保存但没有任何记录引用的图像
  pub fn orphaned_images(&self) -> Result<Vec<PathBuf>, AnalysisError> {
    let stored = self.images.stored_images().map_err(AnalysisError::Storage)?;
    let referenced = self.records.image_paths()?;
    Ok(
      orphaned_images(&stored, &referenced)
        .into_iter()
        .cloned()
        .collect(),
    )
  }

  /// 清理图像存储中中断的写入，不涉及孤儿图像
  pub fn sweep_partials(&self) -> Result<usize, AnalysisError> {
    let removed = self.images.sweep_partials().map_err(AnalysisError::Storage)?;
    info!("清理了 {} 个未完成写入", removed);
    Ok(removed)
  }
}
