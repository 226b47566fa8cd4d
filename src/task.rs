// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/task.rs - 检测任务
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

use crate::broadcast::SubscriberSet;
use crate::model::DetectorAdapter;
use crate::output::draw::Draw;
use crate::threat::ThreatAggregator;

mod batch;
mod image;
mod live;

pub use self::batch::{BatchVideoProcessor, VideoInfo, VideoReport, sampling_interval};
pub use self::image::{ImageDetection, ImageReport};
pub use self::live::{
  CameraService, CameraStatus, LIVE_CADENCE, LiveCounters, LiveStreamLoop, LoopExit,
};

/// 三条检测路径共享的协作者
#[derive(Clone)]
pub struct Pipeline {
  pub detector: Arc<DetectorAdapter>,
  pub aggregator: Arc<ThreatAggregator>,
  pub subscribers: Arc<SubscriberSet>,
  pub draw: Arc<Draw>,
}

impl Pipeline {
  pub fn new(
    detector: Arc<DetectorAdapter>,
    aggregator: Arc<ThreatAggregator>,
    subscribers: Arc<SubscriberSet>,
    draw: Arc<Draw>,
  ) -> Self {
    Self {
      detector,
      aggregator,
      subscribers,
      draw,
    }
  }
}
