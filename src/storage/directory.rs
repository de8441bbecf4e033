// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/storage/directory.rs - 目录图像存储
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
use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
  FromUrl, FromUrlWithScheme,
  storage::{ImageStore, StorageError, StoredImage, check_scope, extension_of},
};

const PARTIAL_SUFFIX: &str = "partial";

/// 按 `<root>/<scope>/<年>/<月>/<日>/<uuid>.<ext>` 存放图像
///
/// 数据先写入同目录下的 `.partial` 文件并 fsync，再改名为最终文件名。
/// 写入失败时删除该文件；进程中途退出遗留的 `.partial` 由 `sweep_partials` 清理。
#[derive(Debug, Clone)]
pub struct DirectoryImageStore {
  root: PathBuf,
}

impl DirectoryImageStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn day_directory(&self, scope: &str) -> PathBuf {
    let now = Utc::now();
    self
      .root
      .join(scope)
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
  }
}

impl FromUrlWithScheme for DirectoryImageStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryImageStore {
  type Error = StorageError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StorageError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::new(url.path()))
  }
}

impl ImageStore for DirectoryImageStore {
  fn save(
    &self,
    bytes: &[u8],
    original_filename: &str,
    owner_scope: &str,
  ) -> Result<StoredImage, StorageError> {
    let scope = check_scope(owner_scope)?;
    let directory = self.day_directory(scope);
    fs::create_dir_all(&directory)?;

    let extension = extension_of(original_filename);
    let filename = format!("{}.{}", Uuid::new_v4(), extension);
    let path = directory.join(&filename);
    let partial = directory.join(format!("{}.{}", filename, PARTIAL_SUFFIX));

    let written = write_durable(&partial, bytes).and_then(|_| fs::rename(&partial, &path));
    if let Err(e) = written {
      if let Err(cleanup) = fs::remove_file(&partial) {
        debug!("删除未完成写入失败 {}: {}", partial.display(), cleanup);
      }
      return Err(e.into());
    }

    info!("图像已保存: {} ({} 字节)", path.display(), bytes.len());
    Ok(StoredImage { path, filename })
  }

  fn stored_images(&self) -> Result<Vec<PathBuf>, StorageError> {
    let mut images: Vec<PathBuf> = walk(&self.root)?
      .into_iter()
      .filter(|path| !is_partial(path))
      .collect();
    images.sort();
    Ok(images)
  }

  /// 删除遗留的 `.partial` 文件
  fn sweep_partials(&self) -> Result<usize, StorageError> {
    let mut removed = 0;
    for path in walk(&self.root)? {
      if is_partial(&path) {
        fs::remove_file(&path)?;
        warn!("清理未完成写入: {}", path.display());
        removed += 1;
      }
    }
    Ok(removed)
  }
}

fn write_durable(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
  let mut file = File::create(path)?;
  file.write_all(bytes)?;
  file.sync_all()
}

fn is_partial(path: &Path) -> bool {
  path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX)
}

fn walk(root: &Path) -> Result<Vec<PathBuf>, StorageError> {
  let mut files = Vec::new();
  if !root.exists() {
    return Ok(files);
  }

  let mut pending = vec![root.to_path_buf()];
  while let Some(directory) = pending.pop() {
    for entry in fs::read_dir(&directory)? {
      let path = entry?.path();
      if path.is_dir() {
        pending.push(path);
      } else {
        files.push(path);
      }
    }
  }
  Ok(files)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn save_lays_out_scope_and_date() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryImageStore::new(dir.path());

    let stored = store.save(b"jpeg-bytes", "Smear.JPG", "clinic-7").unwrap();
    assert!(stored.filename.ends_with(".jpg"));
    assert!(stored.path.starts_with(dir.path().join("clinic-7")));
    assert_eq!(fs::read(&stored.path).unwrap(), b"jpeg-bytes");

    let relative = stored.path.strip_prefix(dir.path()).unwrap();
    assert_eq!(relative.components().count(), 5);
  }

  #[test]
  fn stored_images_skip_partials() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryImageStore::new(dir.path());
    let stored = store.save(b"a", "a.png", "clinic").unwrap();

    let leftover = stored.path.with_file_name("dead.png.partial");
    fs::write(&leftover, b"half").unwrap();

    assert_eq!(store.stored_images().unwrap(), vec![stored.path.clone()]);
    assert_eq!(store.sweep_partials().unwrap(), 1);
    assert!(!leftover.exists());
    assert!(stored.path.exists());
  }

  #[test]
  fn invalid_scope_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryImageStore::new(dir.path());
    assert!(matches!(
      store.save(b"a", "a.png", "../escape"),
      Err(StorageError::InvalidScope(_))
    ));
    assert!(store.stored_images().unwrap().is_empty());
  }

  #[test]
  fn empty_root_lists_nothing() {
    let store = DirectoryImageStore::new("/definitely/not/here");
    assert!(store.stored_images().unwrap().is_empty());
  }
}
