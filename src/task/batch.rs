// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/task/batch.rs - 视频文件批量检测
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

use serde::Serialize;
use tracing::{debug, info};

use crate::broadcast::Event;
use crate::input::{DecodeError, VideoDecoder};
use crate::model::Detection;
use crate::task::Pipeline;
use crate::threat::ThreatSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
  /// 秒
  pub duration: f64,
  pub fps: f64,
  pub frame_count: u64,
  pub total_detections: usize,
  pub sampled_frames: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoReport {
  pub detections: Vec<Detection>,
  pub video_info: VideoInfo,
  pub stats: ThreatSnapshot,
}

/// 每秒采样约两帧
pub fn sampling_interval(fps: f64) -> u64 {
  if fps.is_finite() && fps >= 2.0 {
    (fps / 2.0).floor() as u64
  } else {
    1
  }
}

pub struct BatchVideoProcessor {
  pipeline: Pipeline,
}

impl BatchVideoProcessor {
  pub fn new(pipeline: Pipeline) -> Self {
    Self { pipeline }
  }

  /// 解码到结束后一次性写入统计并广播；解码失败时不改变任何共享状态
  pub fn process(&self, mut decoder: Box<dyn VideoDecoder>) -> Result<VideoReport, DecodeError> {
    let fps = decoder.fps();
    let interval = sampling_interval(fps);
    debug!(
      fps,
      interval,
      hint = ?decoder.frame_count_hint(),
      "开始处理视频"
    );

    let mut detections = Vec::new();
    let mut frame_count = 0u64;
    let mut sampled_frames = 0u64;
    while let Some(image) = decoder.next_frame()? {
      let index = frame_count;
      frame_count += 1;
      if index % interval != 0 {
        continue;
      }
      sampled_frames += 1;
      detections.extend(
        self
          .pipeline
          .detector
          .detect(&image)
          .into_iter()
          .map(|d| d.at_frame(index, fps)),
      );
    }
    drop(decoder);

    let video_info = VideoInfo {
      duration: if fps > 0.0 {
        frame_count as f64 / fps
      } else {
        0.0
      },
      fps,
      frame_count,
      total_detections: detections.len(),
      sampled_frames,
    };
    let stats = self.pipeline.aggregator.record(&detections);
    self.pipeline.subscribers.publish(&Event::video_processed(
      detections.clone(),
      stats.clone(),
      video_info.clone(),
    ));
    info!(
      frames = frame_count,
      sampled = sampled_frames,
      detections = detections.len(),
      "视频处理完成"
    );

    Ok(VideoReport {
      detections,
      video_info,
      stats,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::broadcast::SubscriberSet;
  use crate::model::DetectorAdapter;
  use crate::output::draw::Draw;
  use crate::threat::ThreatAggregator;
  use image::RgbImage;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicBool, Ordering};

  struct FakeVideo {
    fps: f64,
    remaining: u64,
    fail_at: Option<u64>,
    read: u64,
    dropped: Arc<AtomicBool>,
  }

  impl FakeVideo {
    fn new(fps: f64, frames: u64) -> Self {
      Self {
        fps,
        remaining: frames,
        fail_at: None,
        read: 0,
        dropped: Arc::new(AtomicBool::new(false)),
      }
    }
  }

  impl Drop for FakeVideo {
    fn drop(&mut self) {
      self.dropped.store(true, Ordering::SeqCst);
    }
  }

  impl VideoDecoder for FakeVideo {
    fn fps(&self) -> f64 {
      self.fps
    }

    fn frame_count_hint(&self) -> Option<u64> {
      Some(self.remaining)
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, DecodeError> {
      if self.fail_at == Some(self.read) {
        return Err(DecodeError::Video("corrupt".into()));
      }
      if self.remaining == 0 {
        return Ok(None);
      }
      self.remaining -= 1;
      self.read += 1;
      Ok(Some(RgbImage::new(40, 40)))
    }
  }

  fn processor() -> (BatchVideoProcessor, Pipeline) {
    let pipeline = Pipeline::new(
      Arc::new(DetectorAdapter::demo("sniper")),
      Arc::new(ThreatAggregator::new()),
      Arc::new(SubscriberSet::default()),
      Arc::new(Draw::new().unwrap()),
    );
    (BatchVideoProcessor::new(pipeline.clone()), pipeline)
  }

  #[test]
  fn interval_from_fps() {
    assert_eq!(sampling_interval(30.0), 15);
    assert_eq!(sampling_interval(25.0), 12);
    assert_eq!(sampling_interval(3.0), 1);
    assert_eq!(sampling_interval(1.0), 1);
    assert_eq!(sampling_interval(0.0), 1);
    assert_eq!(sampling_interval(f64::NAN), 1);
  }

  #[test]
  fn samples_every_interval() {
    let (processor, pipeline) = processor();
    let (_id, mut rx) = pipeline.subscribers.register();

    let report = processor.process(Box::new(FakeVideo::new(30.0, 300))).unwrap();
    assert_eq!(report.video_info.frame_count, 300);
    assert_eq!(report.video_info.sampled_frames, 20);
    assert!((report.video_info.duration - 10.0).abs() < 1e-9);
    assert_eq!(report.detections.len(), 20);

    let indices: Vec<u64> = report
      .detections
      .iter()
      .map(|d| d.frame_index.unwrap())
      .collect();
    assert_eq!(indices, (0..300).step_by(15).collect::<Vec<_>>());
    let last = report.detections.last().unwrap();
    assert!((last.video_timestamp.unwrap() - 285.0 / 30.0).abs() < 1e-9);

    assert_eq!(report.stats.total_detections, 20);
    assert_eq!(pipeline.aggregator.snapshot().total_detections, 20);

    let event = rx.try_recv().unwrap();
    assert!(event.contains("\"type\":\"video_processed\""));
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn decode_error_leaves_state_untouched() {
    let (processor, pipeline) = processor();
    let (_id, mut rx) = pipeline.subscribers.register();

    let mut video = FakeVideo::new(30.0, 100);
    video.fail_at = Some(40);
    let dropped = video.dropped.clone();

    assert!(processor.process(Box::new(video)).is_err());
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(pipeline.aggregator.snapshot().total_detections, 0);
    assert!(pipeline.aggregator.history().is_empty());
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn empty_video_still_reports() {
    let (processor, _pipeline) = processor();
    let report = processor.process(Box::new(FakeVideo::new(24.0, 0))).unwrap();
    assert_eq!(report.video_info.frame_count, 0);
    assert_eq!(report.video_info.duration, 0.0);
    assert!(report.detections.is_empty());
  }
}
