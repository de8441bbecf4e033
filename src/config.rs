// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/config.rs - 推理引擎配置
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

use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.45;
pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_LABEL: &str = "parasite";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("阈值 {name} 必须位于 [0, 1] 区间内, 实际为 {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("模型输入尺寸不能为 0")]
  ZeroInputSize,
}

/// 推理引擎配置，进程启动时读取一次，此后只读
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
  /// 模型文件路径，为空时直接进入回退模式
  pub model_path: Option<PathBuf>,
  /// 置信度阈值
  pub confidence_threshold: f32,
  /// NMS IOU 阈值
  pub overlap_threshold: f32,
  /// 模型输入边长
  pub input_size: u32,
  /// 类别名称，按类别索引排列
  pub labels: Vec<String>,
  /// 回退模式下是否真实等待模拟耗时
  pub simulate_latency: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      model_path: None,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
      input_size: DEFAULT_INPUT_SIZE,
      labels: vec![DEFAULT_LABEL.to_string()],
      simulate_latency: true,
    }
  }
}

impl EngineConfig {
  pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.model_path = Some(path.into());
    self
  }

  pub fn with_simulate_latency(mut self, simulate_latency: bool) -> Self {
    self.simulate_latency = simulate_latency;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    check_threshold("confidence_threshold", self.confidence_threshold)?;
    check_threshold("overlap_threshold", self.overlap_threshold)?;
    if self.input_size == 0 {
      return Err(ConfigError::ZeroInputSize);
    }
    Ok(())
  }

  /// 按类别索引取名称，越界时使用 `class-<id>`
  pub fn label_for(&self, class_id: u32) -> String {
    self
      .labels
      .get(class_id as usize)
      .cloned()
      .unwrap_or_else(|| format!("class-{}", class_id))
  }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::ThresholdOutOfRange { name, value })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let config = EngineConfig::default();
    assert_eq!(config.confidence_threshold, 0.25);
    assert_eq!(config.overlap_threshold, 0.45);
    assert_eq!(config.input_size, 640);
    assert!(config.model_path.is_none());
    assert!(config.validate().is_ok());
  }

  #[test]
  fn rejects_out_of_range_threshold() {
    let config = EngineConfig {
      overlap_threshold: 1.5,
      ..EngineConfig::default()
    };
    assert_eq!(
      config.validate(),
      Err(ConfigError::ThresholdOutOfRange {
        name: "overlap_threshold",
        value: 1.5
      })
    );
  }

  #[test]
  fn rejects_zero_input_size() {
    let config = EngineConfig {
      input_size: 0,
      ..EngineConfig::default()
    };
    assert_eq!(config.validate(), Err(ConfigError::ZeroInputSize));
  }

  #[test]
  fn unknown_class_gets_generic_label() {
    let config = EngineConfig::default();
    assert_eq!(config.label_for(0), "parasite");
    assert_eq!(config.label_for(3), "class-3");
  }
}
