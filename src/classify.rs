// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/classify.rs - 检测结果到临床结论的映射
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
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{model::DetectResult, model::Detection, random::RandomSource};

/// 无检测目标时给出的置信度
pub const NO_DETECTION_CONFIDENCE: f32 = 0.95;

const MODEL_POSITIVE_ABOVE: f32 = 0.7;
const MODEL_INCONCLUSIVE_ABOVE: f32 = 0.4;

const FALLBACK_POSITIVE_ABOVE: f32 = 0.85;
const FALLBACK_NEGATIVE_ABOVE: f32 = 0.60;
const FALLBACK_MAJORITY: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
  Positive,
  Negative,
  Inconclusive,
}

impl fmt::Display for Verdict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Verdict::Positive => "positive",
      Verdict::Negative => "negative",
      Verdict::Inconclusive => "inconclusive",
    };
    f.write_str(name)
  }
}

impl FromStr for Verdict {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "positive" => Ok(Verdict::Positive),
      "negative" => Ok(Verdict::Negative),
      "inconclusive" => Ok(Verdict::Inconclusive),
      other => Err(format!("未知结论: {}", other)),
    }
  }
}

/// 一次分析的结论，创建后不可修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationOutcome {
  verdict: Verdict,
  confidence: f32,
  processing_time_ms: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  detections: Option<Vec<Detection>>,
}

impl ClassificationOutcome {
  /// 模型模式：由检测结果得出结论
  pub fn from_detections(result: DetectResult, processing_time_ms: f64) -> Self {
    let (verdict, confidence) = classify_detections(&result);
    Self {
      verdict,
      confidence,
      processing_time_ms: processing_time_ms.max(0.0),
      detections: Some(result.items.into_vec()),
    }
  }

  /// 回退模式：由单一置信度得出结论，没有检测列表
  pub fn from_scalar(
    confidence: f32,
    processing_time_ms: f64,
    random: &dyn RandomSource,
  ) -> Self {
    Self {
      verdict: classify_scalar(confidence, random),
      confidence: confidence.clamp(0.0, 1.0),
      processing_time_ms: processing_time_ms.max(0.0),
      detections: None,
    }
  }

  pub fn verdict(&self) -> Verdict {
    self.verdict
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn processing_time_ms(&self) -> f64 {
    self.processing_time_ms
  }

  pub fn detections(&self) -> Option<&[Detection]> {
    self.detections.as_deref()
  }
}

/// 模型模式映射，返回结论与置信度
///
/// 没有检测目标视为高置信度阴性；否则按最高置信度分档，置信度即最高置信度。
pub fn classify_detections(result: &DetectResult) -> (Verdict, f32) {
  if result.is_empty() {
    return (Verdict::Negative, NO_DETECTION_CONFIDENCE);
  }

  let max_conf = result.max_confidence();
  let verdict = if max_conf > MODEL_POSITIVE_ABOVE {
    Verdict::Positive
  } else if max_conf > MODEL_INCONCLUSIVE_ABOVE {
    Verdict::Inconclusive
  } else {
    Verdict::Negative
  };
  (verdict, max_conf)
}

/// 回退模式映射
///
/// 高档以 0.7 的概率判阳性，中档以 0.7 的概率判阴性，结果本身带随机性，
/// 仅用于开发与测试时模拟流程。两个分档阈值与模型模式不同，不能合并。
pub fn classify_scalar(confidence: f32, random: &dyn RandomSource) -> Verdict {
  if confidence > FALLBACK_POSITIVE_ABOVE {
    if random.roll() < FALLBACK_MAJORITY {
      Verdict::Positive
    } else {
      Verdict::Negative
    }
  } else if confidence > FALLBACK_NEGATIVE_ABOVE {
    if random.roll() < FALLBACK_MAJORITY {
      Verdict::Negative
    } else {
      Verdict::Positive
    }
  } else {
    Verdict::Inconclusive
  }
}
