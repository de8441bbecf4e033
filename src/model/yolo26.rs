// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/model/yolo26.rs - RKNPU 上的 YOLO26 检测模型
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

use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  config::EngineConfig,
  frame::{AsNhwcFrame, RgbNhwcFrame},
  model::{DetectResult, Detection, LoadError, Model, ModelLoader, nms},
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("NPU 上下文不可用")]
  ContextPoisoned,
  #[error("输入尺寸 {found} 与模型尺寸 {expected} 不符")]
  InputShape { expected: u32, found: usize },
}

impl From<rknpu::Error> for LoadError {
  fn from(err: rknpu::Error) -> Self {
    LoadError::Invalid(err.to_string())
  }
}

pub struct Yolo26 {
  // 同一个 NPU 上下文的 set_input/run/get_outputs 必须串行
  context: Mutex<Context>,
  version: String,
  config: EngineConfig,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Yolo26Loader;

impl ModelLoader for Yolo26Loader {
  type Model = Yolo26;

  fn load(&self, config: &EngineConfig) -> Result<Self::Model, LoadError> {
    let path = config.model_path.as_ref().ok_or(LoadError::MissingPath)?;
    if !path.exists() {
      return Err(LoadError::NotFound(path.clone()));
    }

    info!("加载模型文件: {}", path.display());
    let model_data = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(LoadError::Invalid(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(LoadError::Invalid(format!(
        "输入/输出数量 {}/{} 不符合 YOLO26",
        num_inputs, num_outputs
      )));
    }

    let stem = path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "model".to_string());
    info!("模型加载完成");

    Ok(Yolo26 {
      context: Mutex::new(context),
      version: format!("yolo26-{}", stem),
      config: config.clone(),
    })
  }
}

/// 根据张量大小匹配回归和分类输出，返回 (reg, cls)
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  spatial: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  let reg_expected = 4 * spatial;
  if tensor1.len() == reg_expected && tensor2.len() % spatial == 0 {
    Some((tensor1, tensor2))
  } else if tensor2.len() == reg_expected && tensor1.len() % spatial == 0 {
    Some((tensor2, tensor1))
  } else {
    error!(
      "输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}",
      tensor1.len(),
      tensor2.len(),
      reg_expected
    );
    None
  }
}

impl Model for Yolo26 {
  type Error = Yolo26Error;

  fn infer(&self, input: &RgbNhwcFrame) -> Result<DetectResult, Self::Error> {
    if input.width() != self.config.input_size as usize || input.height() != self.config.input_size as usize {
      return Err(Yolo26Error::InputShape {
        expected: self.config.input_size,
        found: input.width(),
      });
    }

    let context = self
      .context
      .lock()
      .map_err(|_| Yolo26Error::ContextPoisoned)?;

    debug!("设置模型输入");
    context.set_input(
      0,
      input.as_nhwc(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    context.run()?;

    let output = context.get_outputs()?;
    Ok(self.postprocess(&output))
  }

  fn version(&self) -> String {
    self.version.clone()
  }
}

impl Yolo26 {
  fn postprocess(&self, output: &rknpu::Output) -> DetectResult {
    let input = self.config.input_size as f32;
    let mut items = Vec::new();

    for (head_idx, stride) in YOLO26_STRIDES.into_iter().enumerate() {
      let map = (input / stride) as usize;
      let spatial = map * map;

      let tensors = (output.get_f32(head_idx * 2), output.get_f32(head_idx * 2 + 1));
      let (tensor1, tensor2) = match tensors {
        (Ok(t1), Ok(t2)) => (t1, t2),
        (Err(e), _) | (_, Err(e)) => {
          error!("获取检测头 {} 的输出失败: {}", head_idx, e);
          continue;
        }
      };

      let Some((reg, cls)) = match_reg_cls_tensors(tensor1, tensor2, spatial) else {
        continue;
      };
      let class_num = cls.len() / spatial;

      for h in 0..map {
        for w in 0..map {
          let idx = h * map + w;

          let (score, class_id) = {
            let mut max_logit = f32::MIN;
            let mut cls_idx = 0usize;
            for c in 0..class_num {
              let logit = cls[c * spatial + idx];
              if logit > max_logit {
                max_logit = logit;
                cls_idx = c;
              }
            }
            (sigmoid(max_logit), cls_idx as u32)
          };

          if score < self.config.confidence_threshold {
            continue;
          }

          let grid_x = (w as f32) + 0.5;
          let grid_y = (h as f32) + 0.5;

          let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, input);
          let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input);
          let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input);
          let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input);

          items.push(Detection {
            label: self.config.label_for(class_id),
            class_id,
            confidence: score,
            bbox: [xmin / input, ymin / input, xmax / input, ymax / input],
          });
        }
      }
    }

    let items = nms::suppress(items, self.config.confidence_threshold, self.config.overlap_threshold);
    debug!("检测到 {} 个目标", items.len());

    DetectResult::from(items)
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
