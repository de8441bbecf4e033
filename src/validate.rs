// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/validate.rs - 图像校验
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

use tracing::warn;

use crate::input::{ImageFormat, RawImage};

pub const MIN_DIMENSION: u32 = 100;
pub const MAX_BYTE_SIZE: usize = 10 * 1024 * 1024;

/// 校验未通过的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
  Format(ImageFormat),
  Dimensions { width: u32, height: u32 },
  Size(usize),
}

impl fmt::Display for Rejection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Rejection::Format(format) => write!(f, "不支持的图像格式: {}（仅支持 JPEG/PNG）", format),
      Rejection::Dimensions { width, height } => write!(
        f,
        "图像尺寸过小: {}x{}（至少 {}x{}）",
        width, height, MIN_DIMENSION, MIN_DIMENSION
      ),
      Rejection::Size(size) => write!(
        f,
        "图像文件过大: {} 字节（上限 {} 字节）",
        size, MAX_BYTE_SIZE
      ),
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageValidator;

impl ImageValidator {
  /// 依次检查格式、尺寸、大小，遇到第一个失败即返回
  pub fn check(&self, image: &RawImage) -> Result<(), Rejection> {
    let rejection = if !matches!(image.format(), ImageFormat::Jpeg | ImageFormat::Png) {
      Rejection::Format(image.format().clone())
    } else if image.width() < MIN_DIMENSION || image.height() < MIN_DIMENSION {
      Rejection::Dimensions {
        width: image.width(),
        height: image.height(),
      }
    } else if image.byte_size() > MAX_BYTE_SIZE {
      Rejection::Size(image.byte_size())
    } else {
      return Ok(());
    };

    match &rejection {
      Rejection::Format(format) => warn!("格式校验失败: {}", format),
      Rejection::Dimensions { width, height } => warn!("尺寸校验失败: {}x{}", width, height),
      Rejection::Size(size) => warn!("大小校验失败: {} 字节", size),
    }
    Err(rejection)
  }

  pub fn validate(&self, image: &RawImage) -> bool {
    self.check(image).is_ok()
  }
}
