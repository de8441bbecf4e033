// 该文件是 Xuepian （血片镜检） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use url::Url;
use uuid::Uuid;

use xuepian::{
  AnalysisRequest, EngineConfig, Verdict,
  config::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_SIZE, DEFAULT_LABEL, DEFAULT_OVERLAP_THRESHOLD},
};

/// Xuepian 血片镜检分析
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub engine: EngineArgs,

  /// 图像存储位置，`folder:///path` 或 `memory:`
  #[arg(
    long,
    env = "XUEPIAN_IMAGE_STORE",
    value_name = "URL",
    default_value = "folder:///var/lib/xuepian/images"
  )]
  pub image_store: Url,

  /// 记录存储位置，`folder:///path` 或 `memory:`
  #[arg(
    long,
    env = "XUEPIAN_RECORD_STORE",
    value_name = "URL",
    default_value = "folder:///var/lib/xuepian/records"
  )]
  pub record_store: Url,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(ClapArgs, Debug)]
pub struct EngineArgs {
  /// 模型文件路径，不提供时使用回退模式
  #[arg(long, env = "XUEPIAN_MODEL_PATH", value_name = "FILE")]
  pub model_path: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "XUEPIAN_CONFIDENCE_THRESHOLD", default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
  pub confidence_threshold: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, env = "XUEPIAN_OVERLAP_THRESHOLD", default_value_t = DEFAULT_OVERLAP_THRESHOLD)]
  pub overlap_threshold: f32,

  /// 模型输入边长
  #[arg(long, env = "XUEPIAN_INPUT_SIZE", default_value_t = DEFAULT_INPUT_SIZE)]
  pub input_size: u32,

  /// 类别名称，逗号分隔
  #[arg(
    long,
    env = "XUEPIAN_LABELS",
    value_delimiter = ',',
    default_value = DEFAULT_LABEL
  )]
  pub labels: Vec<String>,

  /// 回退模式下是否真实等待模拟耗时
  #[arg(
    long,
    env = "XUEPIAN_SIMULATE_LATENCY",
    action = ArgAction::Set,
    default_value_t = true
  )]
  pub simulate_latency: bool,
}

impl EngineArgs {
  pub fn to_config(&self) -> EngineConfig {
    EngineConfig {
      model_path: self.model_path.clone(),
      confidence_threshold: self.confidence_threshold,
      overlap_threshold: self.overlap_threshold,
      input_size: self.input_size,
      labels: self.labels.clone(),
      simulate_latency: self.simulate_latency,
    }
  }
}

#[derive(ClapArgs, Debug)]
pub struct RequestArgs {
  #[arg(long, value_name = "UUID")]
  pub patient: Uuid,
  #[arg(long, value_name = "UUID")]
  pub clinic: Uuid,
  #[arg(long, value_name = "UUID")]
  pub operator: Uuid,
  #[arg(long)]
  pub notes: Option<String>,
  #[arg(long)]
  pub symptoms: Option<String>,
}

impl RequestArgs {
  pub fn to_request(&self) -> AnalysisRequest {
    AnalysisRequest {
      patient_id: self.patient,
      clinic_id: self.clinic,
      operator_id: self.operator,
      notes: self.notes.clone(),
      symptoms: self.symptoms.clone(),
    }
  }
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 分析一张图像文件
  Analyze {
    file: PathBuf,
    #[command(flatten)]
    request: RequestArgs,
    /// 等待结果的最长秒数，超时后分析仍在后台完成
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
  },
  /// 从相机采集一张图像并分析，没有相机时使用模拟图像
  Capture {
    /// V4L2 设备路径，例如 /dev/video0
    #[arg(long, value_name = "DEVICE")]
    device: Option<String>,
    #[command(flatten)]
    request: RequestArgs,
  },
  /// 查询记录，按检测时间从新到旧
  List {
    #[arg(long, value_name = "UUID")]
    clinic: Option<Uuid>,
    #[arg(long, value_name = "UUID")]
    patient: Option<Uuid>,
    /// positive / negative / inconclusive
    #[arg(long, value_name = "VERDICT")]
    status: Option<Verdict>,
  },
  /// 列出尚未同步的记录
  PendingSync,
  /// 查看一条记录
  Show { id: Uuid },
  /// 修改记录的备注或症状
  Update {
    id: Uuid,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    symptoms: Option<String>,
  },
  /// 将记录标记为已同步
  Sync { id: Uuid },
  /// 列出没有记录引用的图像
  Orphans {
    /// 先清理中断写入遗留的 .partial 文件
    #[arg(long)]
    sweep_partials: bool,
  },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn engine_defaults_come_from_library() {
    let args = Args::try_parse_from(["xuepian", "pending-sync"]).unwrap();
    assert_eq!(args.engine.to_config(), EngineConfig::default());
  }

  #[test]
  fn labels_split_on_commas() {
    let args = Args::try_parse_from([
      "xuepian",
      "--labels",
      "falciparum,vivax",
      "--simulate-latency",
      "false",
      "orphans",
    ])
    .unwrap();
    let config = args.engine.to_config();
    assert_eq!(config.labels, vec!["falciparum", "vivax"]);
    assert!(!config.simulate_latency);
  }

  #[test]
  fn list_parses_verdict() {
    let args = Args::try_parse_from(["xuepian", "list", "--status", "positive"]).unwrap();
    assert!(matches!(
      args.command,
      Command::List {
        status: Some(Verdict::Positive),
        ..
      }
    ));
  }

  #[test]
  fn orphans_sweep_is_opt_in() {
    let args = Args::try_parse_from(["xuepian", "orphans"]).unwrap();
    assert!(matches!(
      args.command,
      Command::Orphans {
        sweep_partials: false
      }
    ));

    let args = Args::try_parse_from(["xuepian", "orphans", "--sweep-partials"]).unwrap();
    assert!(matches!(
      args.command,
      Command::Orphans {
        sweep_partials: true
      }
    ));
  }
}
