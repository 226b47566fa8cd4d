// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/task/image.rs - 单张图像检测
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

use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tracing::{debug, warn};

use crate::broadcast::Event;
use crate::frame::encode_jpeg;
use crate::input::{DecodeError, decode_image};
use crate::model::roi::{filter_by_roi, resolve_roi};
use crate::model::{DetectOptions, Detection};
use crate::task::Pipeline;
use crate::threat::ThreatSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
  /// 检测耗时，毫秒
  pub time_ms: f64,
  pub detections: Vec<Detection>,
  pub image_width: u32,
  pub image_height: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub annotated_image: Option<String>,
  pub stats: ThreatSnapshot,
}

pub struct ImageDetection {
  pipeline: Pipeline,
}

impl ImageDetection {
  pub fn new(pipeline: Pipeline) -> Self {
    Self { pipeline }
  }

  /// 解码 → 检测 → ROI 过滤 → 统计/广播 → 标注
  ///
  /// 解码失败时直接返回，统计与订阅者均不受影响。
  pub fn run(
    &self,
    data: &[u8],
    options: &DetectOptions,
    roi: Option<&str>,
  ) -> Result<ImageReport, DecodeError> {
    let image = decode_image(data)?;
    let (width, height) = image.dimensions();

    let started = Instant::now();
    let detections = self.pipeline.detector.detect_with(&image, options);
    let time_ms = started.elapsed().as_secs_f64() * 1000.0;

    let roi = resolve_roi(roi, width, height);
    let detections = filter_by_roi(detections, roi.as_ref());
    debug!(
      width,
      height,
      detections = detections.len(),
      time_ms,
      "图像检测完成"
    );

    let stats = self.pipeline.aggregator.record(&detections);
    self
      .pipeline
      .subscribers
      .publish(&Event::detection_update(detections.clone(), stats.clone()));

    let annotated = self.pipeline.draw.annotate(&image, &detections);
    let annotated_image = match encode_jpeg(&annotated) {
      Ok(jpeg) => Some(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg))),
      Err(e) => {
        warn!("标注图像编码失败: {}", e);
        None
      }
    };

    Ok(ImageReport {
      time_ms,
      detections,
      image_width: width,
      image_height: height,
      annotated_image,
      stats,
    })
  }
}
