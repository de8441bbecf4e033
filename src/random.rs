// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/random.rs - 可注入的随机数来源
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

use std::sync::Mutex;

use rand::Rng;

/// 回退模式使用的随机数来源
pub trait RandomSource: Send + Sync {
  /// [low, high] 区间内的均匀采样
  fn uniform(&self, low: f64, high: f64) -> f64;

  /// [0, 1) 区间内的均匀采样
  fn roll(&self) -> f64 {
    self.uniform(0.0, 1.0)
  }
}

/// 线程本地随机数生成器
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
  fn uniform(&self, low: f64, high: f64) -> f64 {
    rand::thread_rng().gen_range(low..=high)
  }

  fn roll(&self) -> f64 {
    rand::thread_rng().gen_range(0.0..1.0)
  }
}

/// 按固定序列循环给出 [0, 1] 内的取值，用于复现回退模式结果
///
/// `uniform(low, high)` 返回 `low + v * (high - low)`，`roll()` 直接返回 `v`。
#[derive(Debug)]
pub struct SequenceRandom {
  values: Vec<f64>,
  cursor: Mutex<usize>,
}

impl SequenceRandom {
  pub fn new(values: impl Into<Vec<f64>>) -> Self {
    let values: Vec<f64> = values.into();
    let values = if values.is_empty() { vec![0.0] } else { values };
    Self {
      values: values.into_iter().map(|v| v.clamp(0.0, 1.0)).collect(),
      cursor: Mutex::new(0),
    }
  }

  fn next_value(&self) -> f64 {
    let mut cursor = match self.cursor.lock() {
      Ok(cursor) => cursor,
      Err(poisoned) => poisoned.into_inner(),
    };
    let value = self.values[*cursor % self.values.len()];
    *cursor += 1;
    value
  }
}

impl RandomSource for SequenceRandom {
  fn uniform(&self, low: f64, high: f64) -> f64 {
    low + self.next_value() * (high - low)
  }

  fn roll(&self) -> f64 {
    self.next_value()
  }
}
