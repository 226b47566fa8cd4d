// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/model.rs - 检测模型与检测结果
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
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 本系统唯一的检测类别
pub const DEFAULT_CLASS_LABEL: &str = "sniper";

pub const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// 像素坐标下的边界框 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BBox {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn is_valid(&self) -> bool {
    self.x1 < self.x2 && self.y1 < self.y2
  }
}

impl From<[f32; 4]> for BBox {
  fn from(v: [f32; 4]) -> Self {
    BBox::new(v[0], v[1], v[2], v[3])
  }
}

impl From<BBox> for [f32; 4] {
  fn from(b: BBox) -> Self {
    [b.x1, b.y1, b.x2, b.y2]
  }
}

/// 一次检测得到的目标实例，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  #[serde(rename = "class")]
  pub class_label: String,
  pub confidence: f32,
  pub bbox: BBox,
  #[serde(rename = "detected_at")]
  pub source_timestamp: DateTime<Utc>,
  /// 仅批量视频结果携带
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub frame_index: Option<u64>,
  /// 视频内的秒数偏移（frame_index / fps）
  #[serde(
    rename = "timestamp",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub video_timestamp: Option<f64>,
}

impl Detection {
  pub fn new(class_label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
    Self {
      class_label: class_label.into(),
      confidence,
      bbox,
      source_timestamp: Utc::now(),
      frame_index: None,
      video_timestamp: None,
    }
  }

  pub fn at_frame(mut self, frame_index: u64, fps: f64) -> Self {
    self.frame_index = Some(frame_index);
    self.video_timestamp = Some(if fps > 0.0 {
      frame_index as f64 / fps
    } else {
      0.0
    });
    self
  }
}

/// 推理后端返回的原始检测，坐标为像素坐标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
  #[serde(default)]
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
  pub conf_threshold: f32,
  /// 原样传递给推理后端的 NMS 阈值
  pub iou_threshold: f32,
}

impl Default for DetectOptions {
  fn default() -> Self {
    Self {
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
    }
  }
}

impl DetectOptions {
  pub fn new(conf_threshold: f32, iou_threshold: f32) -> Self {
    Self {
      conf_threshold,
      iou_threshold,
    }
    .clamped()
  }

  /// 阈值限制在 [0, 1]，非法数值回退到默认值
  pub fn clamped(self) -> Self {
    let clamp = |v: f32, default: f32| {
      if v.is_finite() {
        v.clamp(0.0, 1.0)
      } else {
        default
      }
    };
    Self {
      conf_threshold: clamp(self.conf_threshold, DEFAULT_CONF_THRESHOLD),
      iou_threshold: clamp(self.iou_threshold, DEFAULT_IOU_THRESHOLD),
    }
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理后端不可用: {0}")]
  Unavailable(String),
  #[error("输入无效: {0}")]
  InvalidInput(String),
  #[error("推理运行错误: {0}")]
  Runtime(String),
}

/// 不透明的推理能力：输入一张图像，输出原始检测
pub trait Inference: Send + Sync {
  fn name(&self) -> &str;

  fn infer(
    &self,
    image: &RgbImage,
    options: &DetectOptions,
  ) -> Result<Vec<RawDetection>, InferenceError>;
}

mod detector;
pub mod roi;
pub use self::detector::{DemoDetector, DetectorAdapter, DetectorMode, ReadyDetector};

#[cfg(feature = "http_inference")]
mod http_inference;
#[cfg(feature = "http_inference")]
pub use self::http_inference::HttpInference;

/// 按 URL 方案创建推理后端
pub fn inference_from_url(url: &url::Url) -> Result<Box<dyn Inference>, InferenceError> {
  match url.scheme() {
    #[cfg(feature = "http_inference")]
    "http" | "https" => {
      use crate::FromUrl;
      Ok(Box::new(HttpInference::from_url(url)?))
    }
    other => Err(InferenceError::Unavailable(format!(
      "不支持的推理后端: {}",
      other
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn detection_serializes_with_wire_names() {
    let det = Detection::new("sniper", 0.5, BBox::new(1.0, 2.0, 3.0, 4.0)).at_frame(30, 30.0);
    let value = serde_json::to_value(&det).unwrap();
    assert_eq!(value["class"], "sniper");
    assert_eq!(value["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
    assert_eq!(value["frame_index"], 30);
    assert_eq!(value["timestamp"], 1.0);
    assert!(value.get("detected_at").is_some());
  }

  #[test]
  fn live_detection_omits_video_fields() {
    let det = Detection::new("sniper", 0.5, BBox::new(0.0, 0.0, 1.0, 1.0));
    let value = serde_json::to_value(&det).unwrap();
    assert!(value.get("frame_index").is_none());
    assert!(value.get("timestamp").is_none());
  }

  #[test]
  fn unknown_inference_scheme() {
    let url = url::Url::parse("rknn:///opt/model.rknn").unwrap();
    assert!(matches!(
      inference_from_url(&url),
      Err(InferenceError::Unavailable(_))
    ));
  }

  #[test]
  fn options_are_clamped() {
    let opts = DetectOptions::new(1.5, f32::NAN);
    assert_eq!(opts.conf_threshold, 1.0);
    assert_eq!(opts.iou_threshold, DEFAULT_IOU_THRESHOLD);
  }
}
