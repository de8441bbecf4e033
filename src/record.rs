// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/record.rs - 分析记录及其存取
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

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::{FromUrl, FromUrlWithScheme, classify::Verdict};

mod directory;
mod memory;

pub use self::directory::DirectoryRecordStore;
pub use self::memory::MemoryRecordStore;

#[derive(Error, Debug)]
pub enum PersistenceError {
  #[error("记录不存在: {0}")]
  NotFound(Uuid),
  #[error("记录已存在: {0}")]
  Duplicate(Uuid),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  SerdeError(#[from] serde_json::Error),
  #[error("记录锁已损坏")]
  Poisoned,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
  Pending,
  Synced,
}

impl fmt::Display for SyncStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SyncStatus::Pending => f.write_str("pending"),
      SyncStatus::Synced => f.write_str("synced"),
    }
  }
}

/// 一次成功分析留下的审计记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
  pub id: Uuid,
  pub patient_id: Uuid,
  pub clinic_id: Uuid,
  pub operator_id: Uuid,
  pub result: Verdict,
  pub confidence_score: f32,
  pub image_path: PathBuf,
  pub image_filename: String,
  pub model_version: String,
  pub processing_time_ms: f64,
  pub notes: Option<String>,
  pub symptoms: Option<String>,
  pub sync_status: SyncStatus,
  pub test_date: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub synced_at: Option<DateTime<Utc>>,
}

impl AnalysisRecord {
  /// 标记为已同步，已同步的记录保持不变。返回是否发生了变化
  pub fn mark_synced(&mut self, now: DateTime<Utc>) -> bool {
    if self.sync_status == SyncStatus::Synced {
      return false;
    }
    self.sync_status = SyncStatus::Synced;
    self.synced_at = Some(now);
    self.updated_at = now;
    true
  }

  pub fn apply(&mut self, update: &RecordUpdate, now: DateTime<Utc>) {
    if let Some(notes) = &update.notes {
      self.notes = Some(notes.clone());
    }
    if let Some(symptoms) = &update.symptoms {
      self.symptoms = Some(symptoms.clone());
    }
    self.updated_at = now;
  }
}

/// 可修改的字段，未给出的字段保持原值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
  pub notes: Option<String>,
  pub symptoms: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
  pub clinic_id: Option<Uuid>,
  pub patient_id: Option<Uuid>,
  pub result: Option<Verdict>,
  pub sync_status: Option<SyncStatus>,
}

impl RecordFilter {
  pub fn clinic(mut self, clinic_id: Uuid) -> Self {
    self.clinic_id = Some(clinic_id);
    self
  }

  pub fn patient(mut self, patient_id: Uuid) -> Self {
    self.patient_id = Some(patient_id);
    self
  }

  pub fn result(mut self, result: Verdict) -> Self {
    self.result = Some(result);
    self
  }

  pub fn sync_status(mut self, sync_status: SyncStatus) -> Self {
    self.sync_status = Some(sync_status);
    self
  }

  pub fn matches(&self, record: &AnalysisRecord) -> bool {
    self.clinic_id.is_none_or(|id| id == record.clinic_id)
      && self.patient_id.is_none_or(|id| id == record.patient_id)
      && self.result.is_none_or(|result| result == record.result)
      && self
        .sync_status
        .is_none_or(|status| status == record.sync_status)
  }
}

/// 记录存储
///
/// `create` 要么完整提交，要么不留下任何痕迹；`mark_synced` 是幂等的。
pub trait RecordStore: Send + Sync {
  fn create(&self, record: AnalysisRecord) -> Result<AnalysisRecord, PersistenceError>;

  fn get(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError>;

  /// 按条件查询，按检测时间从新到旧排列
  fn list(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>, PersistenceError>;

  fn mark_synced(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError>;

  fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<AnalysisRecord, PersistenceError>;

  fn pending_sync(&self) -> Result<Vec<AnalysisRecord>, PersistenceError> {
    self.list(&RecordFilter::default().sync_status(SyncStatus::Pending))
  }

  /// 所有记录引用的图像路径
  fn image_paths(&self) -> Result<HashSet<PathBuf>, PersistenceError> {
    Ok(
      self
        .list(&RecordFilter::default())?
        .into_iter()
        .map(|record| record.image_path)
        .collect(),
    )
  }
}

impl<R: RecordStore + ?Sized> RecordStore for std::sync::Arc<R> {
  fn create(&self, record: AnalysisRecord) -> Result<AnalysisRecord, PersistenceError> {
    (**self).create(record)
  }

  fn get(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    (**self).get(id)
  }

  fn list(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>, PersistenceError> {
    (**self).list(filter)
  }

  fn mark_synced(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    (**self).mark_synced(id)
  }

  fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<AnalysisRecord, PersistenceError> {
    (**self).update(id, update)
  }
}

pub(crate) fn newest_first(records: &mut [AnalysisRecord]) {
  records.sort_by(|a, b| b.test_date.cmp(&a.test_date).then(b.id.cmp(&a.id)));
}

pub enum RecordStoreWrapper {
  Directory(DirectoryRecordStore),
  Memory(MemoryRecordStore),
}

impl FromUrl for RecordStoreWrapper {
  type Error = PersistenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DirectoryRecordStore::SCHEME => Ok(RecordStoreWrapper::Directory(
        DirectoryRecordStore::from_url(url)?,
      )),
      MemoryRecordStore::SCHEME => Ok(RecordStoreWrapper::Memory(MemoryRecordStore::default())),
      other => Err(PersistenceError::SchemeMismatch(other.to_string())),
    }
  }
}

impl RecordStoreWrapper {
  fn inner(&self) -> &dyn RecordStore {
    match self {
      RecordStoreWrapper::Directory(store) => store,
      RecordStoreWrapper::Memory(store) => store,
    }
  }
}

impl RecordStore for RecordStoreWrapper {
  fn create(&self, record: AnalysisRecord) -> Result<AnalysisRecord, PersistenceError> {
    self.inner().create(record)
  }

  fn get(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    self.inner().get(id)
  }

  fn list(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>, PersistenceError> {
    self.inner().list(filter)
  }

  fn mark_synced(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    self.inner().mark_synced(id)
  }

  fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<AnalysisRecord, PersistenceError> {
    self.inner().update(id, update)
  }
}
