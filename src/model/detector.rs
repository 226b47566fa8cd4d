// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/model/detector.rs - 检测器适配层
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

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::{BBox, DetectOptions, Detection, Inference, InferenceError, RawDetection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorMode {
  Ready,
  Demo,
}

/// 无模型时的占位检测器，在画面中心给出一个固定目标
#[derive(Debug, Clone)]
pub struct DemoDetector {
  class_label: String,
}

impl DemoDetector {
  pub const CONFIDENCE: f32 = 0.66;
  /// 目标框占画面宽高的比例
  pub const BOX_RATIO: f32 = 0.25;

  pub fn new(class_label: impl Into<String>) -> Self {
    Self {
      class_label: class_label.into(),
    }
  }

  pub fn detect(&self, image: &RgbImage, at: DateTime<Utc>) -> Detection {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let (bw, bh) = (w * Self::BOX_RATIO, h * Self::BOX_RATIO);
    let (cx, cy) = (w / 2.0, h / 2.0);
    let mut det = Detection::new(
      self.class_label.clone(),
      Self::CONFIDENCE,
      BBox::new(cx - bw / 2.0, cy - bh / 2.0, cx + bw / 2.0, cy + bh / 2.0),
    );
    det.source_timestamp = at;
    det
  }
}

/// 包装真实推理后端
pub struct ReadyDetector {
  inference: Box<dyn Inference>,
  class_label: String,
}

impl ReadyDetector {
  pub fn new(inference: Box<dyn Inference>, class_label: impl Into<String>) -> Self {
    Self {
      inference,
      class_label: class_label.into(),
    }
  }

  pub fn name(&self) -> &str {
    self.inference.name()
  }

  pub fn detect(
    &self,
    image: &RgbImage,
    options: &DetectOptions,
    at: DateTime<Utc>,
  ) -> Result<Vec<Detection>, InferenceError> {
    let raw = self.inference.infer(image, options)?;
    let total = raw.len();
    let detections: Vec<Detection> = raw
      .into_iter()
      .filter_map(|item| self.normalize(item, image.width(), image.height(), at))
      .collect();
    if detections.len() != total {
      debug!("丢弃 {} 个无效的原始检测", total - detections.len());
    }
    Ok(detections)
  }

  /// 坐标排序并裁剪到图像范围，置信度非法或面积为零的丢弃
  fn normalize(
    &self,
    raw: RawDetection,
    width: u32,
    height: u32,
    at: DateTime<Utc>,
  ) -> Option<Detection> {
    if !raw.score.is_finite() || raw.bbox.iter().any(|v| !v.is_finite()) {
      return None;
    }
    let (w, h) = (width as f32, height as f32);
    let [ax, ay, bx, by] = raw.bbox;
    let bbox = BBox::new(
      ax.min(bx).clamp(0.0, w),
      ay.min(by).clamp(0.0, h),
      ax.max(bx).clamp(0.0, w),
      ay.max(by).clamp(0.0, h),
    );
    if !bbox.is_valid() {
      return None;
    }
    let mut det = Detection::new(self.class_label.clone(), raw.score.clamp(0.0, 1.0), bbox);
    det.source_timestamp = at;
    Some(det)
  }
}

enum Variant {
  Ready(ReadyDetector),
  Demo(DemoDetector),
}

/// 统一的检测入口，构造时选定变体，之后不再改变
pub struct DetectorAdapter {
  variant: Variant,
  fallback: DemoDetector,
  options: DetectOptions,
}

impl DetectorAdapter {
  pub fn demo(class_label: impl Into<String>) -> Self {
    let label = class_label.into();
    Self {
      variant: Variant::Demo(DemoDetector::new(label.clone())),
      fallback: DemoDetector::new(label),
      options: DetectOptions::default(),
    }
  }

  pub fn ready(inference: Box<dyn Inference>, class_label: impl Into<String>) -> Self {
    let label = class_label.into();
    Self {
      variant: Variant::Ready(ReadyDetector::new(inference, label.clone())),
      fallback: DemoDetector::new(label),
      options: DetectOptions::default(),
    }
  }

  /// 有后端则使用真实检测，否则降级为演示模式
  pub fn from_inference(inference: Option<Box<dyn Inference>>, class_label: impl Into<String>) -> Self {
    match inference {
      Some(inference) => Self::ready(inference, class_label),
      None => {
        warn!("未配置推理后端，使用演示检测");
        Self::demo(class_label)
      }
    }
  }

  pub fn with_options(mut self, options: DetectOptions) -> Self {
    self.options = options.clamped();
    self
  }

  pub fn options(&self) -> DetectOptions {
    self.options
  }

  pub fn is_ready(&self) -> bool {
    matches!(self.variant, Variant::Ready(_))
  }

  pub fn mode(&self) -> DetectorMode {
    match self.variant {
      Variant::Ready(_) => DetectorMode::Ready,
      Variant::Demo(_) => DetectorMode::Demo,
    }
  }

  pub fn model_name(&self) -> &str {
    match &self.variant {
      Variant::Ready(ready) => ready.name(),
      Variant::Demo(_) => "demo",
    }
  }

  pub fn class_label(&self) -> &str {
    &self.fallback.class_label
  }

  pub fn detect(&self, image: &RgbImage) -> Vec<Detection> {
    self.detect_with(image, &self.options)
  }

  /// 不会失败：推理错误降级为演示检测
  pub fn detect_with(&self, image: &RgbImage, options: &DetectOptions) -> Vec<Detection> {
    let options = options.clamped();
    let now = Utc::now();
    let detections = match &self.variant {
      Variant::Ready(ready) => match ready.detect(image, &options, now) {
        Ok(detections) => detections,
        Err(e) => {
          warn!("推理失败，降级为演示检测: {}", e);
          vec![self.fallback.detect(image, now)]
        }
      },
      Variant::Demo(demo) => vec![demo.detect(image, now)],
    };
    detections
      .into_iter()
      .filter(|d| d.confidence >= options.conf_threshold)
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  struct FixedInference {
    items: Vec<RawDetection>,
    calls: Arc<AtomicUsize>,
  }

  impl Inference for FixedInference {
    fn name(&self) -> &str {
      "fixed"
    }

    fn infer(
      &self,
      _image: &RgbImage,
      _options: &DetectOptions,
    ) -> Result<Vec<RawDetection>, InferenceError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(self.items.clone())
    }
  }

  struct BrokenInference;

  impl Inference for BrokenInference {
    fn name(&self) -> &str {
      "broken"
    }

    fn infer(
      &self,
      _image: &RgbImage,
      _options: &DetectOptions,
    ) -> Result<Vec<RawDetection>, InferenceError> {
      Err(InferenceError::Runtime("boom".into()))
    }
  }

  fn raw(score: f32, bbox: [f32; 4]) -> RawDetection {
    RawDetection {
      class_id: 0,
      score,
      bbox,
    }
  }

  #[test]
  fn demo_box_is_centered() {
    let adapter = DetectorAdapter::demo("sniper");
    let dets = adapter.detect(&RgbImage::new(640, 480));
    assert_eq!(dets.len(), 1);
    let det = &dets[0];
    assert_eq!(det.class_label, "sniper");
    assert_eq!(det.confidence, DemoDetector::CONFIDENCE);
    assert_eq!(det.bbox, BBox::new(240.0, 180.0, 400.0, 300.0));
    assert_eq!(adapter.mode(), DetectorMode::Demo);
    assert!(!adapter.is_ready());
  }

  #[test]
  fn ready_normalizes_and_filters() {
    let calls = Arc::new(AtomicUsize::new(0));
    let inference = FixedInference {
      items: vec![
        raw(0.9, [50.0, 60.0, 10.0, 20.0]),
        raw(0.1, [0.0, 0.0, 10.0, 10.0]),
        raw(0.8, [5.0, 5.0, 5.0, 30.0]),
        raw(0.7, [-10.0, -10.0, 1000.0, 1000.0]),
      ],
      calls: calls.clone(),
    };
    let adapter = DetectorAdapter::ready(Box::new(inference), "sniper");
    let dets = adapter.detect(&RgbImage::new(100, 100));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].bbox, BBox::new(10.0, 20.0, 50.0, 60.0));
    assert_eq!(dets[1].bbox, BBox::new(0.0, 0.0, 100.0, 100.0));
    assert!(adapter.is_ready());
  }

  #[test]
  fn inference_error_falls_back_to_demo() {
    let adapter = DetectorAdapter::ready(Box::new(BrokenInference), "sniper");
    let dets = adapter.detect(&RgbImage::new(200, 200));
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].confidence, DemoDetector::CONFIDENCE);
  }

  #[test]
  fn threshold_applies_to_demo_output() {
    let adapter = DetectorAdapter::demo("sniper").with_options(DetectOptions::new(0.9, 0.45));
    assert!(adapter.detect(&RgbImage::new(64, 64)).is_empty());
  }

  #[test]
  fn missing_backend_selects_demo() {
    let adapter = DetectorAdapter::from_inference(None, "sniper");
    assert_eq!(adapter.mode(), DetectorMode::Demo);
    assert_eq!(adapter.model_name(), "demo");
  }
}
