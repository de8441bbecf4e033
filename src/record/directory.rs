// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/record/directory.rs - 目录记录存储
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

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
  FromUrl, FromUrlWithScheme,
  record::{
    AnalysisRecord, PersistenceError, RecordFilter, RecordStore, RecordUpdate, newest_first,
  },
};

const RECORD_EXTENSION: &str = "json";
const PENDING_EXTENSION: &str = "json.tmp";

/// 每条记录一个 JSON 文件：`<root>/<id>.json`
///
/// 提交时先写入 `<id>.json.tmp` 并 fsync，再改名；改名是提交点，
/// 失败时删除临时文件即为回滚。
#[derive(Debug)]
pub struct DirectoryRecordStore {
  root: PathBuf,
  write_lock: Mutex<()>,
}

impl DirectoryRecordStore {
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
    let root = root.into();
    fs::create_dir_all(&root)?;
    Ok(Self {
      root,
      write_lock: Mutex::new(()),
    })
  }

  fn record_path(&self, id: Uuid) -> PathBuf {
    self.root.join(format!("{}.{}", id, RECORD_EXTENSION))
  }

  fn read(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    let path = self.record_path(id);
    let data = match fs::read(&path) {
      Ok(data) => data,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(PersistenceError::NotFound(id));
      }
      Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&data)?)
  }

  fn commit(&self, record: &AnalysisRecord) -> Result<(), PersistenceError> {
    let path = self.record_path(record.id);
    let pending = self.root.join(format!("{}.{}", record.id, PENDING_EXTENSION));

    let written = serde_json::to_vec_pretty(record)
      .map_err(PersistenceError::from)
      .and_then(|data| {
        let mut file = File::create(&pending)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&pending, &path)?;
        Ok(())
      });

    if written.is_err() && pending.exists() {
      if let Err(e) = fs::remove_file(&pending) {
        warn!("回滚记录 {} 时删除临时文件失败: {}", record.id, e);
      }
    }
    written
  }

  fn modify(
    &self,
    id: Uuid,
    change: impl FnOnce(&mut AnalysisRecord) -> bool,
  ) -> Result<AnalysisRecord, PersistenceError> {
    let _guard = self.write_lock.lock().map_err(|_| PersistenceError::Poisoned)?;
    let mut record = self.read(id)?;
    if change(&mut record) {
      self.commit(&record)?;
    }
    Ok(record)
  }
}

impl FromUrlWithScheme for DirectoryRecordStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordStore {
  type Error = PersistenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(PersistenceError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::open(url.path())
  }
}

impl RecordStore for DirectoryRecordStore {
  fn create(&self, record: AnalysisRecord) -> Result<AnalysisRecord, PersistenceError> {
    let _guard = self.write_lock.lock().map_err(|_| PersistenceError::Poisoned)?;
    if self.record_path(record.id).exists() {
      return Err(PersistenceError::Duplicate(record.id));
    }
    self.commit(&record)?;
    info!("创建记录 {} ({})", record.id, record.result);
    Ok(record)
  }

  fn get(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    self.read(id)
  }

  fn list(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>, PersistenceError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(&self.root)? {
      let path = entry?.path();
      if path.extension().is_none_or(|ext| ext != RECORD_EXTENSION) {
        continue;
      }
      let record: AnalysisRecord = match serde_json::from_slice(&fs::read(&path)?) {
        Ok(record) => record,
        Err(e) => {
          warn!("跳过无法解析的记录 {}: {}", path.display(), e);
          continue;
        }
      };
      if filter.matches(&record) {
        found.push(record);
      }
    }
    newest_first(&mut found);
    debug!("查询到 {} 条记录", found.len());
    Ok(found)
  }

  fn mark_synced(&self, id: Uuid) -> Result<AnalysisRecord, PersistenceError> {
    self.modify(id, |record| {
      let changed = record.mark_synced(Utc::now());
      if changed {
        info!("记录 {} 已标记为同步", id);
      }
      changed
    })
  }

  fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<AnalysisRecord, PersistenceError> {
    self.modify(id, |record| {
      record.apply(update, Utc::now());
      true
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::tests::sample_record;

  #[test]
  fn committed_record_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let record = sample_record();
    {
      let store = DirectoryRecordStore::open(dir.path()).unwrap();
      store.create(record.clone()).unwrap();
    }
    let store = DirectoryRecordStore::open(dir.path()).unwrap();
    assert_eq!(store.get(record.id).unwrap(), record);
  }

  #[test]
  fn no_temporary_files_remain_after_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryRecordStore::open(dir.path()).unwrap();
    store.create(sample_record()).unwrap();

    let names: Vec<String> = fs::read_dir(dir.path())
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with(".json"));
  }

  #[test]
  fn list_skips_corrupt_documents() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryRecordStore::open(dir.path()).unwrap();
    store.create(sample_record()).unwrap();
    fs::write(dir.path().join("broken.json"), b"{not json").unwrap();

    assert_eq!(store.list(&RecordFilter::default()).unwrap().len(), 1);
  }

  #[test]
  fn missing_record_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryRecordStore::open(dir.path()).unwrap();
    assert!(matches!(
      store.get(Uuid::new_v4()),
      Err(PersistenceError::NotFound(_))
    ));
  }
}
