// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/task.rs - 带时限的分析任务
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

use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  error::AnalysisError,
  input::AcquiredImage,
  model::ModelLoader,
  orchestrator::{AnalysisOrchestrator, AnalysisReport, AnalysisRequest},
  record::RecordStore,
  storage::ImageStore,
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("分析超时 ({deadline:?})，分析线程仍在完成本次分析")]
  TimedOut {
    deadline: Duration,
    pending: PendingAnalysis,
  },
  #[error(transparent)]
  Analysis(#[from] AnalysisError),
  #[error("分析线程异常退出")]
  WorkerLost,
  #[error("无法启动分析线程: {0}")]
  Spawn(#[from] std::io::Error),
}

/// 超过时限但仍在运行的分析
///
/// 进程退出会连带结束分析线程，需要保证存储与提交完成的调用方应当 `wait`。
#[derive(Debug)]
pub struct PendingAnalysis {
  worker: JoinHandle<Result<AnalysisReport, AnalysisError>>,
}

impl PendingAnalysis {
  /// 阻塞到分析线程结束，返回其最终结果
  pub fn wait(self) -> Result<AnalysisReport, TaskError> {
    let result = self.worker.join().map_err(|_| {
      error!("分析线程异常退出");
      TaskError::WorkerLost
    })?;
    Ok(result?)
  }
}

/// 在独立线程上执行一次分析，调用方最多等待 `deadline`
///
/// 超时后不会中断分析：`TaskError::TimedOut` 带回仍在运行的 `PendingAnalysis`，
/// 线程会继续完成存储与提交，并由编排器记录最终结果。
#[derive(Debug, Clone, Copy)]
pub struct TimedAnalysis {
  deadline: Duration,
}

impl TimedAnalysis {
  pub fn new(deadline: Duration) -> Self {
    Self { deadline }
  }

  pub fn run_task<S, R, L>(
    self,
    orchestrator: Arc<AnalysisOrchestrator<S, R, L>>,
    request: AnalysisRequest,
    image: AcquiredImage,
  ) -> Result<AnalysisReport, TaskError>
  where
    S: ImageStore + 'static,
    R: RecordStore + 'static,
    L: ModelLoader + Send + Sync + 'static,
    L::Model: Send + Sync + 'static,
  {
    info!("开始分析任务，时限 {:?}", self.deadline);
    let (tx, rx) = mpsc::channel();

    let worker = thread::Builder::new()
      .name("xuepian-analysis".to_string())
      .spawn(move || {
        let result = orchestrator.analyze_upload(&request, image);
        // 调用方可能已超时离开
        tx.send(()).ok();
        result
      })?;
    let pending = PendingAnalysis { worker };

    match rx.recv_timeout(self.deadline) {
      Ok(()) => pending.wait(),
      Err(mpsc::RecvTimeoutError::Timeout) => {
        warn!("分析超过时限 {:?}", self.deadline);
        Err(TaskError::TimedOut {
          deadline: self.deadline,
          pending,
        })
      }
      Err(mpsc::RecvTimeoutError::Disconnected) => {
        error!("分析线程未返回结果");
        pending.wait()
      }
    }
  }
}
