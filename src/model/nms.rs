// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/model/nms.rs - 置信度过滤与非极大值抑制
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

use std::cmp::Ordering;

use crate::model::Detection;

/// 丢弃低于置信度阈值的候选，再按类别做非极大值抑制。
/// 结果按置信度降序排列。
pub fn suppress(
  mut detections: Vec<Detection>,
  confidence_threshold: f32,
  overlap_threshold: f32,
) -> Vec<Detection> {
  detections.retain(|det| det.confidence >= confidence_threshold);
  detections.sort_by(|a, b| {
    b.confidence
      .partial_cmp(&a.confidence)
      .unwrap_or(Ordering::Equal)
  });

  let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
  for det in detections {
    let overlaps = kept
      .iter()
      .any(|best| best.class_id == det.class_id && iou(&best.bbox, &det.bbox) > overlap_threshold);
    if !overlaps {
      kept.push(det);
    }
  }

  kept
}

/// 两个 [x_min, y_min, x_max, y_max] 框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}
