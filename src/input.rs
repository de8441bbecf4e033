// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/input.rs - 图像获取与原始图像
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
use std::io::Cursor;

use image::{DynamicImage, ImageReader};
use thiserror::Error;

mod capture;
mod upload;
#[cfg(feature = "v4l_capture")]
mod v4l_capture;

pub use self::capture::{CaptureInput, DEFAULT_CAPTURE_RESOLUTION};
pub use self::upload::UploadInput;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch {
    expected: &'static str,
    found: String,
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("输入已被取走")]
  Exhausted,
  #[cfg(feature = "v4l_capture")]
  #[error("设备不支持 MJPEG 输出")]
  UnsupportedPixelFormat,
}

/// 声明的图像格式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageFormat {
  Jpeg,
  Png,
  Other(String),
  Unknown,
}

impl From<image::ImageFormat> for ImageFormat {
  fn from(format: image::ImageFormat) -> Self {
    match format {
      image::ImageFormat::Jpeg => ImageFormat::Jpeg,
      image::ImageFormat::Png => ImageFormat::Png,
      other => ImageFormat::Other(format!("{:?}", other).to_lowercase()),
    }
  }
}

impl fmt::Display for ImageFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ImageFormat::Jpeg => write!(f, "jpeg"),
      ImageFormat::Png => write!(f, "png"),
      ImageFormat::Other(name) => write!(f, "{}", name),
      ImageFormat::Unknown => write!(f, "unknown"),
    }
  }
}

/// 单次分析期间存在的原始图像
///
/// 只解析文件头得到格式与尺寸，不做完整解码。无法识别的输入不会报错，
/// 而是得到 `Unknown` 格式与 0x0 尺寸，交由校验器拒绝。
#[derive(Debug, Clone)]
pub struct RawImage {
  bytes: Vec<u8>,
  format: ImageFormat,
  width: u32,
  height: u32,
}

impl RawImage {
  pub fn probe(bytes: Vec<u8>) -> Self {
    let (format, (width, height)) =
      match ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format() {
        Ok(reader) => {
          let format = reader
            .format()
            .map(ImageFormat::from)
            .unwrap_or(ImageFormat::Unknown);
          (format, reader.into_dimensions().unwrap_or((0, 0)))
        }
        Err(_) => (ImageFormat::Unknown, (0, 0)),
      };

    Self {
      bytes,
      format,
      width,
      height,
    }
  }

  pub fn format(&self) -> &ImageFormat {
    &self.format
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn byte_size(&self) -> usize {
    self.bytes.len()
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn decode(&self) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory(&self.bytes)
  }
}

/// 获取到的图像字节以及原始文件名
#[derive(Debug, Clone)]
pub struct AcquiredImage {
  pub bytes: Vec<u8>,
  pub filename: String,
}

impl AcquiredImage {
  pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
    Self {
      bytes,
      filename: filename.into(),
    }
  }
}

pub trait Acquire {
  fn acquire(&mut self) -> Result<AcquiredImage, InputError>;
}
