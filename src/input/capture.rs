// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/input/capture.rs - 相机采集输入
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

use std::io::Cursor;

use chrono::Local;
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
use rand::Rng;
use tracing::{info, warn};

use crate::input::{Acquire, AcquiredImage, InputError};

/// 相机模组默认静态拍摄分辨率
pub const DEFAULT_CAPTURE_RESOLUTION: (u32, u32) = (2304, 1296);

const SYNTHETIC_BACKGROUND: [u8; 3] = [240, 220, 220];
const SYNTHETIC_OUTLINE: [u8; 3] = [150, 150, 150];
const SYNTHETIC_CELL_COUNT: usize = 50;
const SYNTHETIC_JPEG_QUALITY: u8 = 95;

/// 相机采集
///
/// 配置了设备且设备可用时从设备取一帧 MJPEG；否则生成一张模拟血涂片图像，
/// 保证没有物理相机时流程依旧可以跑通。
pub struct CaptureInput {
  device: Option<String>,
  resolution: (u32, u32),
}

impl Default for CaptureInput {
  fn default() -> Self {
    Self {
      device: None,
      resolution: DEFAULT_CAPTURE_RESOLUTION,
    }
  }
}

impl CaptureInput {
  pub fn with_device(mut self, device: impl Into<String>) -> Self {
    self.device = Some(device.into());
    self
  }

  pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
    self.resolution = (width, height);
    self
  }

  #[cfg(feature = "v4l_capture")]
  fn capture_device(&self) -> Option<Vec<u8>> {
    let device = self.device.as_deref()?;
    let (width, height) = self.resolution;
    match super::v4l_capture::capture_jpeg(device, width, height) {
      Ok(bytes) => {
        info!("从设备 {} 采集图像成功 ({} 字节)", device, bytes.len());
        Some(bytes)
      }
      Err(e) => {
        warn!("设备 {} 不可用: {}，改用模拟图像", device, e);
        None
      }
    }
  }

  #[cfg(not(feature = "v4l_capture"))]
  fn capture_device(&self) -> Option<Vec<u8>> {
    if let Some(device) = self.device.as_deref() {
      warn!("未启用 v4l_capture 特性，忽略设备 {}，改用模拟图像", device);
    }
    None
  }

  /// 生成模拟血涂片：浅粉底色上随机分布的细胞圆盘
  pub fn synthesize(&self) -> Result<Vec<u8>, InputError> {
    let (width, height) = self.resolution;
    let mut image = RgbImage::from_pixel(width, height, Rgb(SYNTHETIC_BACKGROUND));
    let mut rng = rand::thread_rng();

    for _ in 0..SYNTHETIC_CELL_COUNT {
      let center = (
        rng.gen_range(0..=width) as i32,
        rng.gen_range(0..=height) as i32,
      );
      let radius = rng.gen_range(20..=50);
      let color = Rgb([
        rng.gen_range(200..=255),
        rng.gen_range(180..=220),
        rng.gen_range(180..=220),
      ]);
      draw_filled_circle_mut(&mut image, center, radius, color);
      draw_hollow_circle_mut(&mut image, center, radius, Rgb(SYNTHETIC_OUTLINE));
    }

    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, SYNTHETIC_JPEG_QUALITY).encode_image(&image)?;
    Ok(buf.into_inner())
  }
}

impl Acquire for CaptureInput {
  fn acquire(&mut self) -> Result<AcquiredImage, InputError> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");

    if let Some(bytes) = self.capture_device() {
      return Ok(AcquiredImage::new(
        bytes,
        format!("camera_capture_{}.jpg", stamp),
      ));
    }

    let bytes = self.synthesize()?;
    info!("生成模拟图像 ({} 字节)", bytes.len());
    Ok(AcquiredImage::new(
      bytes,
      format!("mock_capture_{}.jpg", stamp),
    ))
  }
}
