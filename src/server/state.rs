// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/server/state.rs - 共享状态
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

use std::sync::Arc;

use ab_glyph::InvalidFont;

use crate::broadcast::SubscriberSet;
use crate::input::{CaptureBackend, DeviceRegistry};
use crate::model::DetectorAdapter;
use crate::output::LiveFeed;
use crate::output::draw::Draw;
use crate::server::ServerConfig;
use crate::task::{BatchVideoProcessor, CameraService, ImageDetection, Pipeline};
use crate::threat::ThreatAggregator;

#[derive(Clone)]
pub struct AppState {
  pub config: Arc<ServerConfig>,
  pub pipeline: Pipeline,
  pub images: Arc<ImageDetection>,
  pub videos: Arc<BatchVideoProcessor>,
  pub camera: Arc<CameraService>,
}

impl AppState {
  pub fn new(
    config: ServerConfig,
    detector: Arc<DetectorAdapter>,
    backend: Arc<dyn CaptureBackend>,
  ) -> Result<Self, InvalidFont> {
    let pipeline = Pipeline::new(
      detector,
      Arc::new(ThreatAggregator::new()),
      Arc::new(SubscriberSet::new(config.subscriber_buffer)),
      Arc::new(Draw::new()?),
    );
    let camera = CameraService::new(
      backend,
      DeviceRegistry::new(),
      pipeline.clone(),
      LiveFeed::new(),
      config.capture,
    );

    Ok(Self {
      config: Arc::new(config),
      images: Arc::new(ImageDetection::new(pipeline.clone())),
      videos: Arc::new(BatchVideoProcessor::new(pipeline.clone())),
      camera: Arc::new(camera),
      pipeline,
    })
  }
}
