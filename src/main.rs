// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/main.rs - 项目主程序
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

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jingjie::FromUrl;
use jingjie::input::{CaptureBackend, CaptureBackendWrapper};
use jingjie::model::{DetectorAdapter, inference_from_url};
use jingjie::server::{AppState, serve};

use args::{Args, LogFormat};

// 收到退出信号后等待已有连接（直播、订阅）结束的时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn init_tracing(format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jingjie=info"));
  match format {
    LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    LogFormat::Json => tracing_subscriber::fmt()
      .json()
      .with_env_filter(filter)
      .init(),
  }
}

fn main() -> Result<()> {
  let _ = dotenvy::dotenv();
  let args = Args::parse();
  init_tracing(args.log_format);

  let config = args.server_config();
  info!("Jingjie 警戒哨 {}", env!("CARGO_PKG_VERSION"));
  info!("采集后端: {}", args.camera);
  info!(
    "置信度阈值: {}, NMS 阈值: {}",
    config.detect.conf_threshold, config.detect.iou_threshold
  );

  // 推理客户端是阻塞的，必须在运行时之外创建和释放
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
  let detector = Arc::new(
    DetectorAdapter::from_inference(inference, config.class_label.clone())
      .with_options(config.detect),
  );
  info!("检测模式: {:?}, 模型: {}", detector.mode(), detector.model_name());

  let backend: Arc<dyn CaptureBackend> = Arc::new(CaptureBackendWrapper::from_url(&args.camera)?);
  let bind_addr = config.bind_addr();
  let state = AppState::new(config, detector.clone(), backend)?;

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()?;
  runtime.block_on(async move {
    let listener = TcpListener::bind(&bind_addr).await?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = serve(listener, state, async move {
      let _ = shutdown_rx.await;
    });
    tokio::pin!(server);

    tokio::select! {
      result = &mut server => return result,
      _ = tokio::signal::ctrl_c() => {
        info!("收到退出信号，正在关闭服务");
        let _ = shutdown_tx.send(());
      }
    }
    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
      Ok(result) => result,
      Err(_) => {
        warn!("仍有连接未关闭，强制退出");
        Ok(())
      }
    }
  })?;
  drop(runtime);
  drop(detector);

  info!("服务已退出");
  Ok(())
}
