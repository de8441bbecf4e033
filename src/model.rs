// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/model.rs - 检测模型
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::EngineConfig, frame::RgbNhwcFrame};

pub mod nms;

#[cfg(feature = "model_rknpu")]
mod yolo26;
#[cfg(feature = "model_rknpu")]
pub use self::yolo26::{Yolo26, Yolo26Error, Yolo26Loader};

pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, input: &RgbNhwcFrame) -> Result<DetectResult, Self::Error>;
  fn version(&self) -> String;
}

/// 一次检测得到的候选目标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub label: String,
  pub class_id: u32,
  pub confidence: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn max_confidence(&self) -> f32 {
    self
      .items
      .iter()
      .map(|item| item.confidence)
      .fold(0.0, f32::max)
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("未配置模型路径")]
  MissingPath,
  #[error("模型文件不存在: {}", .0.display())]
  NotFound(PathBuf),
  #[error("未编译推理后端")]
  BackendUnavailable,
  #[error("模型加载错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  Invalid(String),
}

/// 按配置构造检测模型
pub trait ModelLoader {
  type Model: Model;

  fn load(&self, config: &EngineConfig) -> Result<Self::Model, LoadError>;
}

/// 不可能存在的模型，未编译任何后端时使用
#[derive(Debug)]
pub enum NoModel {}

impl Model for NoModel {
  type Error = std::convert::Infallible;

  fn infer(&self, _input: &RgbNhwcFrame) -> Result<DetectResult, Self::Error> {
    match *self {}
  }

  fn version(&self) -> String {
    match *self {}
  }
}

/// 总是报告后端缺失的加载器
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl ModelLoader for Unavailable {
  type Model = NoModel;

  fn load(&self, config: &EngineConfig) -> Result<Self::Model, LoadError> {
    match &config.model_path {
      None => Err(LoadError::MissingPath),
      Some(path) if !path.exists() => Err(LoadError::NotFound(path.clone())),
      Some(_) => Err(LoadError::BackendUnavailable),
    }
  }
}

#[cfg(feature = "model_rknpu")]
pub type DefaultLoader = Yolo26Loader;
#[cfg(not(feature = "model_rknpu"))]
pub type DefaultLoader = Unavailable;
