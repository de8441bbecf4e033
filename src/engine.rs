// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/engine.rs - 推理引擎
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

//! 推理引擎在首次 `load()` 时二选一：
//!
//! - 模型模式：有可用的检测模型，输出检测列表；
//! - 回退模式：没有模型（未配置、文件缺失、后端未编译或加载失败），
//!   输出 [0.65, 0.98] 内的随机置信度并模拟 100 ~ 300 ms 的耗时。
//!
//! 选择结果在进程生命周期内不变，加载失败不会重试。

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  classify::ClassificationOutcome,
  config::EngineConfig,
  frame::RgbNhwcFrame,
  input::RawImage,
  model::{DefaultLoader, Model, ModelLoader},
  random::{RandomSource, ThreadRandom},
};

pub const FALLBACK_MODEL_VERSION: &str = "placeholder-v1.0.0";
pub const FALLBACK_CONFIDENCE_RANGE: (f64, f64) = (0.65, 0.98);
pub const FALLBACK_LATENCY_MS: (f64, f64) = (100.0, 300.0);

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("模型推理失败: {0}")]
  Model(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
  Model,
  Fallback,
}

/// 加载完成后的推理后端
pub enum Backend<M> {
  Model(M),
  Fallback,
}

impl<M> Backend<M> {
  pub fn mode(&self) -> EngineMode {
    match self {
      Backend::Model(_) => EngineMode::Model,
      Backend::Fallback => EngineMode::Fallback,
    }
  }
}

/// 推理引擎
///
/// `analyze` 不修改引擎状态，加载完成后可以在多个线程上同时调用。
/// 模型模式下的并发度由后端决定：RKNN 后端的同一个 NPU 上下文只能串行执行，
/// 因此并发的 `analyze` 会在后端内部排队；回退模式没有任何锁。
///
/// `processing_time_ms` 是实测耗时。回退模式在启用 `simulate_latency` 时
/// 实测包含模拟等待的耗时（截断到 [100, 300] ms 区间以消除调度抖动）；
/// 关闭 `simulate_latency` 时不会真正等待，此时报告抽样得到的模拟耗时。
pub struct InferenceEngine<L: ModelLoader = DefaultLoader> {
  config: EngineConfig,
  loader: L,
  backend: OnceLock<Backend<L::Model>>,
  random: Arc<dyn RandomSource>,
}

impl InferenceEngine<DefaultLoader> {
  pub fn new(config: EngineConfig) -> Self {
    Self::with_loader(config, DefaultLoader::default())
  }
}

impl<L: ModelLoader> InferenceEngine<L> {
  pub fn with_loader(config: EngineConfig, loader: L) -> Self {
    Self {
      config,
      loader,
      backend: OnceLock::new(),
      random: Arc::new(ThreadRandom),
    }
  }

  /// 替换回退模式使用的随机数来源
  pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
    self.random = random;
    self
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// 加载模型，只在第一次调用时执行，并发的首次调用会等待同一次加载完成。
  /// 任何失败都降级为回退模式，不会向上传播。
  pub fn load(&self) -> &Backend<L::Model> {
    self.backend.get_or_init(|| match self.loader.load(&self.config) {
      Ok(model) => {
        info!("推理引擎进入模型模式: {}", model.version());
        Backend::Model(model)
      }
      Err(e) => {
        warn!("模型不可用 ({})，推理引擎进入回退模式", e);
        Backend::Fallback
      }
    })
  }

  pub fn mode(&self) -> EngineMode {
    self.load().mode()
  }

  pub fn model_version(&self) -> String {
    match self.load() {
      Backend::Model(model) => model.version(),
      Backend::Fallback => FALLBACK_MODEL_VERSION.to_string(),
    }
  }

  /// 分析一张已通过校验的图像
  pub fn analyze(&self, image: &RawImage) -> Result<ClassificationOutcome, InferenceError> {
    let started = Instant::now();
    match self.load() {
      Backend::Model(model) => {
        let decoded = image.decode()?;
        let frame = RgbNhwcFrame::from_image(&decoded, self.config.input_size);
        drop(decoded);

        debug!("执行模型推理");
        let result = model
          .infer(&frame)
          .map_err(|e| InferenceError::Model(Box::new(e)))?;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        debug!("检测到 {} 个目标, 耗时 {:.2} ms", result.items.len(), elapsed);

        Ok(ClassificationOutcome::from_detections(result, elapsed))
      }
      Backend::Fallback => Ok(self.simulate(started)),
    }
  }

  fn simulate(&self, started: Instant) -> ClassificationOutcome {
    let (low, high) = FALLBACK_CONFIDENCE_RANGE;
    let confidence = self.random.uniform(low, high) as f32;

    let (low, high) = FALLBACK_LATENCY_MS;
    let latency_ms = self.random.uniform(low, high).clamp(low, high);
    let elapsed_ms = if self.config.simulate_latency {
      std::thread::sleep(Duration::from_secs_f64(latency_ms / 1000.0));
      (started.elapsed().as_secs_f64() * 1000.0).clamp(low, high)
    } else {
      latency_ms
    };

    let outcome = ClassificationOutcome::from_scalar(confidence, elapsed_ms, self.random.as_ref());
    debug!(
      "回退模式结果: {} (置信度: {:.2}, 模拟耗时: {:.2} ms, 实测: {:.2} ms)",
      outcome.verdict(),
      confidence,
      latency_ms,
      elapsed_ms
    );
    outcome
  }
}
