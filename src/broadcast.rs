// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/broadcast.rs - 订阅者事件广播
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

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::model::Detection;
use crate::task::VideoInfo;
use crate::threat::ThreatSnapshot;

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
  Started,
  Stopped,
}

/// 推送给订阅者的事件，序列化为带 `type` 字段的 JSON
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
  DetectionUpdate {
    detections: Vec<Detection>,
    stats: ThreatSnapshot,
    timestamp: DateTime<Utc>,
  },
  LiveDetection {
    detections: Vec<Detection>,
    stats: ThreatSnapshot,
    timestamp: DateTime<Utc>,
  },
  VideoProcessed {
    detections: Vec<Detection>,
    stats: ThreatSnapshot,
    video_info: VideoInfo,
    timestamp: DateTime<Utc>,
  },
  CameraStatus {
    status: CameraState,
    message: String,
    timestamp: DateTime<Utc>,
  },
}

impl Event {
  pub fn detection_update(detections: Vec<Detection>, stats: ThreatSnapshot) -> Self {
    Event::DetectionUpdate {
      detections,
      stats,
      timestamp: Utc::now(),
    }
  }

  pub fn live_detection(detections: Vec<Detection>, stats: ThreatSnapshot) -> Self {
    Event::LiveDetection {
      detections,
      stats,
      timestamp: Utc::now(),
    }
  }

  pub fn video_processed(
    detections: Vec<Detection>,
    stats: ThreatSnapshot,
    video_info: VideoInfo,
  ) -> Self {
    Event::VideoProcessed {
      detections,
      stats,
      video_info,
      timestamp: Utc::now(),
    }
  }

  pub fn camera_status(status: CameraState, message: impl Into<String>) -> Self {
    Event::CameraStatus {
      status,
      message: message.into(),
      timestamp: Utc::now(),
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Event::DetectionUpdate { .. } => "detection_update",
      Event::LiveDetection { .. } => "live_detection",
      Event::VideoProcessed { .. } => "video_processed",
      Event::CameraStatus { .. } => "camera_status",
    }
  }
}

/// 当前连接的订阅者集合
///
/// 每个订阅者持有一个有界通道。投递使用 `try_send`，通道满或已关闭的订阅者
/// 直接移出集合，发布方永远不会被慢订阅者阻塞。
pub struct SubscriberSet {
  subscribers: Mutex<HashMap<Uuid, mpsc::Sender<String>>>,
  buffer: usize,
}

impl Default for SubscriberSet {
  fn default() -> Self {
    Self::new(DEFAULT_SUBSCRIBER_BUFFER)
  }
}

impl SubscriberSet {
  pub fn new(buffer: usize) -> Self {
    Self {
      subscribers: Mutex::new(HashMap::new()),
      buffer: buffer.max(1),
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<String>>> {
    self
      .subscribers
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn register(&self) -> (Uuid, mpsc::Receiver<String>) {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(self.buffer);
    self.lock().insert(id, tx);
    info!(subscriber_id = %id, "订阅者已连接");
    (id, rx)
  }

  /// 可重复调用
  pub fn unregister(&self, id: &Uuid) {
    if self.lock().remove(id).is_some() {
      info!(subscriber_id = %id, "订阅者已断开");
    }
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 尽力投递，不向发布方返回错误
  pub fn publish(&self, event: &Event) {
    let payload = match serde_json::to_string(event) {
      Ok(payload) => payload,
      Err(e) => {
        error!("事件序列化失败: {}", e);
        return;
      }
    };
    self.publish_raw(event.kind(), payload);
  }

  fn publish_raw(&self, kind: &str, payload: String) {
    // 先拍快照再投递，投递期间不持锁
    let targets: Vec<(Uuid, mpsc::Sender<String>)> = self
      .lock()
      .iter()
      .map(|(id, tx)| (*id, tx.clone()))
      .collect();
    debug!(kind, subscribers = targets.len(), "广播事件");

    let mut failed = Vec::new();
    for (id, tx) in targets {
      match tx.try_send(payload.clone()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
          warn!(subscriber_id = %id, "订阅者缓冲区已满，移除");
          failed.push(id);
        }
        Err(TrySendError::Closed(_)) => {
          debug!(subscriber_id = %id, "订阅者通道已关闭，移除");
          failed.push(id);
        }
      }
    }

    if !failed.is_empty() {
      let mut subscribers = self.lock();
      for id in &failed {
        subscribers.remove(id);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn failed_subscriber_is_removed_others_receive() {
    let set = SubscriberSet::new(4);
    let (_a, mut rx_a) = set.register();
    let (b, rx_b) = set.register();
    let (_c, mut rx_c) = set.register();
    drop(rx_b);

    set.publish(&Event::camera_status(CameraState::Started, "ok"));

    assert_eq!(set.len(), 2);
    let msg = rx_a.recv().await.unwrap();
    assert!(msg.contains("\"type\":\"camera_status\""));
    assert!(rx_c.recv().await.is_some());

    set.unregister(&b);
    assert_eq!(set.len(), 2);
  }

  #[test]
  fn full_buffer_drops_slow_subscriber() {
    let set = SubscriberSet::new(1);
    let (_id, _rx) = set.register();
    set.publish(&Event::camera_status(CameraState::Stopped, "1"));
    assert_eq!(set.len(), 1);
    set.publish(&Event::camera_status(CameraState::Stopped, "2"));
    assert!(set.is_empty());
  }

  #[test]
  fn unregister_is_idempotent() {
    let set = SubscriberSet::default();
    let (id, _rx) = set.register();
    set.unregister(&id);
    set.unregister(&id);
    assert!(set.is_empty());
  }

  #[test]
  fn event_shape() {
    let event = Event::camera_status(CameraState::Stopped, "摄像头已停止");
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "camera_status");
    assert_eq!(value["status"], "stopped");
    assert!(value.get("timestamp").is_some());
  }
}
