// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/bin/watch.rs - 无界面的值守程序，把含目标的画面写入目录
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

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use jingjie::FromUrl;
use jingjie::broadcast::SubscriberSet;
use jingjie::input::{CaptureBackendWrapper, DeviceRegistry, FrameSource};
use jingjie::model::{DetectOptions, DetectorAdapter, inference_from_url};
use jingjie::output::OutputWrapper;
use jingjie::output::draw::Draw;
use jingjie::task::{LiveStreamLoop, Pipeline};
use jingjie::threat::ThreatAggregator;

/// Jingjie 值守参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理后端地址，未指定时使用演示检测
  #[arg(long, value_name = "MODEL")]
  pub model: Option<Url>,
  /// 采集后端
  #[arg(long, value_name = "SOURCE", default_value = "synthetic://")]
  pub camera: Url,
  /// 设备编号
  #[arg(long, default_value_t = 0)]
  pub device: u32,
  /// 输出路径，例如 folder:///var/lib/jingjie?record=true
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[arg(long, default_value_t = 0.25)]
  pub confidence: f32,
  #[arg(long, default_value_t = 640)]
  pub width: u32,
  #[arg(long, default_value_t = 480)]
  pub height: u32,
  #[arg(long, default_value_t = 30)]
  pub fps: u32,
  #[arg(long, default_value = "sniper")]
  pub class_label: String,

  /// 处理的帧数，0 表示直到 Ctrl-C
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("采集后端: {}", args.camera);
  info!("输出路径: {}", args.output);

  let inference = args
    .model
    .as_ref()
    .and_then(|url| match inference_from_url(url) {
      Ok(inference) => Some(inference),
      Err(e) => {
        warn!("无法加载推理后端 {}: {}", url, e);
        None
      }
    });
  let detector = DetectorAdapter::from_inference(inference, args.class_label.clone())
    .with_options(DetectOptions {
      conf_threshold: args.confidence,
      ..DetectOptions::default()
    });
  let pipeline = Pipeline::new(
    Arc::new(detector),
    Arc::new(ThreatAggregator::new()),
    Arc::new(SubscriberSet::default()),
    Arc::new(Draw::new()?),
  );

  let backend = CaptureBackendWrapper::from_url(&args.camera)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let mut source = FrameSource::new(Arc::new(backend), DeviceRegistry::new());
  source.start(args.device, args.width, args.height, args.fps)?;

  let (stop_tx, stop_rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到退出信号");
    let _ = stop_tx.send(());
  })?;

  let live = LiveStreamLoop::new(source, pipeline.clone(), output)
    .with_frame_limit(Some(args.frame_number));
  let counters = live.counters();
  let exit = live.run(stop_rx);

  let stats = pipeline.aggregator.snapshot();
  info!(
    "值守结束 ({:?}): 处理 {} 帧, 跳过 {} 次, 检测到 {} 个目标, 威胁等级 {:?}",
    exit,
    counters.frames_processed(),
    counters.ticks_skipped(),
    stats.total_detections,
    stats.threat_level
  );
  Ok(())
}
