// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/main.rs - 命令行入口
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

mod args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xuepian::{
  AnalysisError, AnalysisOrchestrator, FromUrl, InferenceEngine,
  input::{Acquire, CaptureInput, UploadInput},
  record::{RecordFilter, RecordStoreWrapper, RecordUpdate},
  storage::ImageStoreWrapper,
  task::{TaskError, TimedAnalysis},
};

use args::{Args, Command};

type Orchestrator = AnalysisOrchestrator<ImageStoreWrapper, RecordStoreWrapper>;

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let config = args.engine.to_config();
  config.validate()?;
  info!("模型文件路径: {:?}", config.model_path);
  info!("图像存储: {}", args.image_store);
  info!("记录存储: {}", args.record_store);

  let images = ImageStoreWrapper::from_url(&args.image_store)?;
  let records = RecordStoreWrapper::from_url(&args.record_store)?;
  let engine = Arc::new(InferenceEngine::new(config));
  let orchestrator = Arc::new(Orchestrator::new(engine, images, records));

  match args.command {
    Command::Analyze {
      file,
      request,
      timeout,
    } => {
      let image = UploadInput::from_path(&file)?.acquire()?;
      let request = request.to_request();
      let report = match timeout {
        Some(seconds) => TimedAnalysis::new(Duration::from_secs(seconds))
          .run_task(orchestrator.clone(), request, image)
          .map_err(task_failure)?,
        None => orchestrator
          .analyze_upload(&request, image)
          .map_err(analysis_failure)?,
      };
      print_json(&report)
    }
    Command::Capture { device, request } => {
      let mut source = match device {
        Some(device) => CaptureInput::default().with_device(device),
        None => CaptureInput::default(),
      };
      let report = orchestrator
        .capture_and_analyze(&request.to_request(), &mut source)
        .map_err(analysis_failure)?;
      print_json(&report)
    }
    Command::List {
      clinic,
      patient,
      status,
    } => {
      let filter = RecordFilter {
        clinic_id: clinic,
        patient_id: patient,
        result: status,
        sync_status: None,
      };
      print_json(&orchestrator.list_records(&filter).map_err(analysis_failure)?)
    }
    Command::PendingSync => print_json(&orchestrator.pending_sync().map_err(analysis_failure)?),
    Command::Show { id } => print_json(&orchestrator.get_record(id).map_err(analysis_failure)?),
    Command::Update {
      id,
      notes,
      symptoms,
    } => {
      let update = RecordUpdate { notes, symptoms };
      print_json(
        &orchestrator
          .update_record(id, &update)
          .map_err(analysis_failure)?,
      )
    }
    Command::Sync { id } => print_json(&orchestrator.mark_synced(id).map_err(analysis_failure)?),
    Command::Orphans { sweep_partials } => {
      if sweep_partials {
        orchestrator.sweep_partials().map_err(analysis_failure)?;
      }
      let orphans = orchestrator.orphaned_images().map_err(analysis_failure)?;
      info!("发现 {} 张孤儿图像", orphans.len());
      print_json(&orphans)
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// 对外只输出可公开的信息，详细原因已经写入日志
fn analysis_failure(err: AnalysisError) -> anyhow::Error {
  let body = json!({
    "error": err.public_message(),
    "stage": err.stage().map(|stage| stage.to_string()),
  });
  println!("{}", body);
  err.into()
}

/// 超时的分析仍会完成存储与提交，退出前必须等待分析线程
fn task_failure(err: TaskError) -> anyhow::Error {
  match err {
    TaskError::Analysis(err) => analysis_failure(err),
    TaskError::TimedOut { deadline, pending } => {
      warn!("分析超过时限 {:?}，等待分析线程完成存储与提交", deadline);
      let record_id = match pending.wait() {
        Ok(report) => Some(report.record.id),
        Err(e) => {
          warn!("超时的分析未能完成: {}", e);
          None
        }
      };
      let message = format!("分析超时 ({:?})", deadline);
      println!("{}", json!({ "error": message, "record_id": record_id }));
      anyhow!(message)
    }
    other => {
      println!("{}", json!({ "error": other.to_string() }));
      other.into()
    }
  }
}
