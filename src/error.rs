// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/error.rs - 分析流程错误分类
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

use thiserror::Error;
use uuid::Uuid;

use crate::{
  engine::InferenceError,
  input::InputError,
  orchestrator::Stage,
  record::PersistenceError,
  storage::StorageError,
  validate::Rejection,
};

#[derive(Error, Debug)]
pub enum AnalysisError {
  /// 用户可纠正：图像未通过校验
  #[error("图像无效: {0}")]
  InvalidImage(Rejection),
  /// 相机或上传源未能给出图像
  #[error("图像获取失败: {0}")]
  Acquisition(#[source] InputError),
  #[error("推理失败: {0}")]
  Inference(#[source] InferenceError),
  #[error("图像存储失败: {0}")]
  Storage(#[source] StorageError),
  /// 图像已保存但记录未提交，图像成为孤儿
  #[error("记录提交失败: {0}")]
  Persistence(#[source] PersistenceError),
  #[error("记录不存在: {0}")]
  NotFound(Uuid),
}

impl From<PersistenceError> for AnalysisError {
  fn from(err: PersistenceError) -> Self {
    match err {
      PersistenceError::NotFound(id) => AnalysisError::NotFound(id),
      other => AnalysisError::Persistence(other),
    }
  }
}

impl AnalysisError {
  /// 失败发生前到达的最后一个阶段，查询类错误没有阶段
  pub fn stage(&self) -> Option<Stage> {
    match self {
      AnalysisError::InvalidImage(_) | AnalysisError::Acquisition(_) => Some(Stage::Received),
      AnalysisError::Inference(_) => Some(Stage::Validated),
      AnalysisError::Storage(_) => Some(Stage::Inferred),
      AnalysisError::Persistence(_) => Some(Stage::Stored),
      AnalysisError::NotFound(_) => None,
    }
  }

  /// 是否可以把详细信息直接展示给调用方
  pub fn is_user_visible(&self) -> bool {
    matches!(
      self,
      AnalysisError::InvalidImage(_) | AnalysisError::NotFound(_)
    )
  }

  /// 给调用方的信息；内部错误只说明失败阶段，不暴露细节
  pub fn public_message(&self) -> String {
    match self {
      AnalysisError::InvalidImage(rejection) => format!("invalid image: {}", rejection),
      AnalysisError::NotFound(id) => format!("record {} not found", id),
      AnalysisError::Acquisition(_) => "analysis failed during acquisition".to_string(),
      AnalysisError::Inference(_) => "analysis failed during inference".to_string(),
      AnalysisError::Storage(_) => "analysis failed during storage".to_string(),
      AnalysisError::Persistence(_) => "analysis failed during persistence".to_string(),
    }
  }
}
