// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/input/upload.rs - 上传图像输入
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

use std::path::Path;

use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{Acquire, AcquiredImage, InputError},
};

/// 调用方提供的图像字节，只能取用一次
pub struct UploadInput {
  image: Option<AcquiredImage>,
}

impl UploadInput {
  pub fn from_bytes(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
    UploadInput {
      image: Some(AcquiredImage::new(bytes, filename)),
    }
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let filename = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| "upload".to_string());
    debug!("读取上传图像: {} ({} 字节)", path.display(), bytes.len());
    Ok(Self::from_bytes(bytes, filename))
  }
}

impl FromUrlWithScheme for UploadInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for UploadInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    Self::from_path(url.path())
  }
}

impl Acquire for UploadInput {
  fn acquire(&mut self) -> Result<AcquiredImage, InputError> {
    self.image.take().ok_or(InputError::Exhausted)
  }
}
