// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/storage.rs - 图像持久存储
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
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod directory;
mod memory;

pub use self::directory::DirectoryImageStore;
pub use self::memory::MemoryImageStore;

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("非法的归属范围: {0:?}")]
  InvalidScope(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("存储锁已损坏")]
  Poisoned,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 已持久化的图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
  pub path: PathBuf,
  pub filename: String,
}

/// 图像存储，`save` 返回成功时数据必须已经落盘
pub trait ImageStore: Send + Sync {
  fn save(
    &self,
    bytes: &[u8],
    original_filename: &str,
    owner_scope: &str,
  ) -> Result<StoredImage, StorageError>;

  /// 当前存储中的全部图像
  fn stored_images(&self) -> Result<Vec<PathBuf>, StorageError>;

  /// 清理中途中断的写入，返回清理数量。没有中间文件的存储什么也不做
  fn sweep_partials(&self) -> Result<usize, StorageError> {
    Ok(0)
  }
}

impl<S: ImageStore + ?Sized> ImageStore for std::sync::Arc<S> {
  fn save(
    &self,
    bytes: &[u8],
    original_filename: &str,
    owner_scope: &str,
  ) -> Result<StoredImage, StorageError> {
    (**self).save(bytes, original_filename, owner_scope)
  }

  fn stored_images(&self) -> Result<Vec<PathBuf>, StorageError> {
    (**self).stored_images()
  }

  fn sweep_partials(&self) -> Result<usize, StorageError> {
    (**self).sweep_partials()
  }
}

/// 归属范围会成为目录名，只允许字母数字、`-` 与 `_`
pub(crate) fn check_scope(owner_scope: &str) -> Result<&str, StorageError> {
  let valid = !owner_scope.is_empty()
    && owner_scope
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
  if valid {
    Ok(owner_scope)
  } else {
    Err(StorageError::InvalidScope(owner_scope.to_string()))
  }
}

/// 从原始文件名取小写扩展名，缺失时使用 `img`
pub(crate) fn extension_of(original_filename: &str) -> String {
  Path::new(original_filename)
    .extension()
    .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
    .unwrap_or_else(|| "img".to_string())
}

/// 没有任何记录引用的已存储图像。只做报告，不会删除
pub fn orphaned_images<'a>(
  stored: &'a [PathBuf],
  referenced: &HashSet<PathBuf>,
) -> Vec<&'a PathBuf> {
  stored
    .iter()
    .filter(|path| !referenced.contains(*path))
    .collect()
}

pub enum ImageStoreWrapper {
  Directory(DirectoryImageStore),
  Memory(MemoryImageStore),
}

impl FromUrl for ImageStoreWrapper {
  type Error = StorageError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DirectoryImageStore::SCHEME => Ok(ImageStoreWrapper::Directory(
        DirectoryImageStore::from_url(url)?,
      )),
      MemoryImageStore::SCHEME => Ok(ImageStoreWrapper::Memory(MemoryImageStore::default())),
      other => Err(StorageError::SchemeMismatch(other.to_string())),
    }
  }
}

impl ImageStore for ImageStoreWrapper {
  fn save(
    &self,
    bytes: &[u8],
    original_filename: &str,
    owner_scope: &str,
  ) -> Result<StoredImage, StorageError> {
    match self {
      ImageStoreWrapper::Directory(store) => store.save(bytes, original_filename, owner_scope),
      ImageStoreWrapper::Memory(store) => store.save(bytes, original_filename, owner_scope),
    }
  }

  fn stored_images(&self) -> Result<Vec<PathBuf>, StorageError> {
    match self {
      ImageStoreWrapper::Directory(store) => store.stored_images(),
      ImageStoreWrapper::Memory(store) => store.stored_images(),
    }
  }

  fn sweep_partials(&self) -> Result<usize, StorageError> {
    match self {
      ImageStoreWrapper::Directory(store) => store.sweep_partials(),
      ImageStoreWrapper::Memory(store) => store.sweep_partials(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scope_rejects_path_tricks() {
    assert!(check_scope("clinic-01_a").is_ok());
    assert!(check_scope("").is_err());
    assert!(check_scope("../etc").is_err());
    assert!(check_scope("a/b").is_err());
  }

  #[test]
  fn extension_is_normalised() {
    assert_eq!(extension_of("Smear.JPG"), "jpg");
    assert_eq!(extension_of("smear"), "img");
    assert_eq!(extension_of("weird.j p g"), "img");
  }

  #[test]
  fn orphans_are_unreferenced_paths() {
    let stored = vec![PathBuf::from("/a.jpg"), PathBuf::from("/b.jpg")];
    let referenced: HashSet<PathBuf> = [PathBuf::from("/a.jpg")].into_iter().collect();
    assert_eq!(orphaned_images(&stored, &referenced), vec![&stored[1]]);
  }

  #[test]
  fn wrapper_selects_store_by_scheme() {
    let url = Url::parse("memory:").unwrap();
    assert!(matches!(
      ImageStoreWrapper::from_url(&url),
      Ok(ImageStoreWrapper::Memory(_))
    ));

    let url = Url::parse("ftp://host/path").unwrap();
    assert!(matches!(
      ImageStoreWrapper::from_url(&url),
      Err(StorageError::SchemeMismatch(_))
    ));
  }
}
