// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/input/v4l_capture.rs - V4L 相机单帧采集
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

use tracing::debug;
use v4l::{
  Device, FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, video::Capture,
};

use crate::input::InputError;

const MJPEG: &[u8; 4] = b"MJPG";

/// 以 MJPEG 格式从设备采集一帧，返回的字节本身就是 JPEG
pub(super) fn capture_jpeg(path: &str, width: u32, height: u32) -> Result<Vec<u8>, InputError> {
  let mut device = Device::with_path(path)?;

  let mut format = device.format()?;
  format.width = width;
  format.height = height;
  format.fourcc = FourCC::new(MJPEG);
  let format = device.set_format(&format)?;
  if format.fourcc != FourCC::new(MJPEG) {
    return Err(InputError::UnsupportedPixelFormat);
  }
  debug!("设备格式: {}x{} {}", format.width, format.height, format.fourcc);

  let mut stream = Stream::with_buffers(&mut device, Type::VideoCapture, 4)?;
  let (buf, meta) = stream.next()?;
  let used = (meta.bytesused as usize).min(buf.len());

  Ok(buf[..used].to_vec())
}
