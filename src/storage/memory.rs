// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/storage/memory.rs - 内存图像存储
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

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use uuid::Uuid;

use crate::{
  FromUrl, FromUrlWithScheme,
  storage::{ImageStore, StorageError, StoredImage, check_scope, extension_of},
};

/// 进程内的图像存储，进程退出即丢失
#[derive(Debug, Default)]
pub struct MemoryImageStore {
  images: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemoryImageStore {
  pub fn get(&self, path: &PathBuf) -> Option<Vec<u8>> {
    self.images.lock().ok()?.get(path).cloned()
  }

  pub fn len(&self) -> usize {
    self.images.lock().map(|images| images.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl FromUrlWithScheme for MemoryImageStore {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for MemoryImageStore {
  type Error = StorageError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StorageError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::default())
  }
}

impl ImageStore for MemoryImageStore {
  fn save(
    &self,
    bytes: &[u8],
    original_filename: &str,
    owner_scope: &str,
  ) -> Result<StoredImage, StorageError> {
    let scope = check_scope(owner_scope)?;
    let filename = format!("{}.{}", Uuid::new_v4(), extension_of(original_filename));
    let path = PathBuf::from(format!("memory/{}/{}", scope, filename));

    self
      .images
      .lock()
      .map_err(|_| StorageError::Poisoned)?
      .insert(path.clone(), bytes.to_vec());

    Ok(StoredImage { path, filename })
  }

  fn stored_images(&self) -> Result<Vec<PathBuf>, StorageError> {
    let images = self.images.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(images.keys().cloned().collect())
  }
}
