// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/record/memory.rs - 内存记录存储
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

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::{
  FromUrl, FromUrlWithScheme,
  record::{
    AnalysisRecord, PersistenceError, RecordFilter, RecordStore, RecordUpdate, newest_first,
  },
};

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
  records: RwLock<HashMap<Uuid, AnalysisRecord>>,
}

impl MemoryRecordStore {
  fn modify(
    &self,
    id: Uuid,
    change: impl FnOnce(&mut AnalysisRecord),
  ) -> Result<AnalysisRecord, PersistenceError> {
    let mut records = self.records.write().map_err(|_| PersistenceError::Poisoned)?;
    let record = records.get_mut(&id).ok_or(PersistenceError::NotFound(id))?;
    change(record);
    Ok(record.clone())
  }
}

impl FromUrlWithScheme for MemoryRecordStore {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for MemoryRecordStore {
  type Error = PersistenceError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(PersistenceError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::default())
  }
}

impl RecordStore for MemoryRecordStore {
  fn create(&self, record: AnalysisRecord) -> Result<AnalysisRecord, PersistenceError> {
    let mut records = self.records.write().map_err(|_| PersistenceError::Poisoned)?;
    if records.contains_key(&record.id) {
      return Err(PersistenceError::Duplicate(record.id));
    }
    records.insert(record.id, record.clone());
    info!("创建记录 {} ({})", record.id, record.result);
    Ok(record)
  }

  fn get(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    self
      .records
      .read()
      .map_err(|_| PersistenceError::Poisoned)?
      .get(&id)
      .cloned()
      .ok_or(PersistenceError::NotFound(id))
  }

  fn list(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>, PersistenceError> {
    let records = self.records.read().map_err(|_| PersistenceError::Poisoned)?;
    let mut found: Vec<AnalysisRecord> = records
      .values()
      .filter(|record| filter.matches(record))
      .cloned()
      .collect();
    newest_first(&mut found);
    Ok(found)
  }

  fn mark_synced(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    self.modify(id, |record| {
      if record.mark_synced(Utc::now()) {
        info!("记录 {} 已标记为同步", id);
      }
    })
  }

  fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<AnalysisRecord, PersistenceError> {
    self.modify(id, |record| record.apply(update, Utc::now()))
  }
}
