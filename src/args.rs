// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::{Parser, ValueEnum};
use url::Url;

use jingjie::input::CaptureConfig;
use jingjie::model::DetectOptions;
use jingjie::server::ServerConfig;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Text,
  Json,
}

/// Jingjie 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, env = "JINGJIE_HOST", default_value = "0.0.0.0")]
  pub host: String,

  /// 监听端口
  #[arg(long, env = "JINGJIE_PORT", default_value_t = 8000)]
  pub port: u16,

  /// 推理后端地址，例如 http://127.0.0.1:9000/predict
  /// 未指定或加载失败时使用演示检测
  #[arg(long, env = "JINGJIE_MODEL", value_name = "URL")]
  pub model: Option<Url>,

  /// 采集后端
  /// - synthetic://?devices=4
  /// - v4l://?format=YUYV
  /// - gst://camera?format=MJPG
  #[arg(
    long,
    env = "JINGJIE_CAMERA",
    value_name = "URL",
    default_value = "synthetic://"
  )]
  pub camera: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.25, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.45, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  #[arg(long, default_value_t = 640)]
  pub width: u32,

  #[arg(long, default_value_t = 480)]
  pub height: u32,

  #[arg(long, default_value_t = 30)]
  pub fps: u32,

  /// 检测类别名称
  #[arg(long, default_value = "sniper")]
  pub class_label: String,

  /// 上传文件大小上限（MB）
  #[arg(long, default_value_t = 100)]
  pub max_upload_mb: usize,

  /// 每个订阅者的事件缓冲条数，满时断开该订阅者
  #[arg(long, default_value_t = 64)]
  pub subscriber_buffer: usize,

  #[arg(long, value_enum, default_value_t = LogFormat::Text)]
  pub log_format: LogFormat,
}

impl Args {
  pub fn server_config(&self) -> ServerConfig {
    ServerConfig {
      host: self.host.clone(),
      port: self.port,
      class_label: self.class_label.clone(),
      detect: DetectOptions::new(self.confidence, self.nms_threshold),
      capture: CaptureConfig {
        width: self.width,
        height: self.height,
        fps: self.fps,
      },
      subscriber_buffer: self.subscriber_buffer,
      ..ServerConfig::default()
    }
    .with_max_upload_mb(self.max_upload_mb)
  }
}
