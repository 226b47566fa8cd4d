// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/threat.rs - 威胁态势统计
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

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::model::Detection;

/// 严格大于该置信度才计为高置信度
pub const HIGH_CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
  #[default]
  Low,
  Medium,
  High,
}

impl ThreatLevel {
  /// 只由本批次决定，与历史无关
  pub fn from_batch(detections: &[Detection]) -> Self {
    if detections
      .iter()
      .any(|d| d.confidence > HIGH_CONFIDENCE_THRESHOLD)
    {
      ThreatLevel::High
    } else if !detections.is_empty() {
      ThreatLevel::Medium
    } else {
      ThreatLevel::Low
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
  /// 只清零计数器与等级，保留历史
  Counters,
  All,
}

/// 某一时刻的统计快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreatSnapshot {
  pub total_detections: u64,
  pub high_confidence_detections: u64,
  pub last_detection_at: Option<DateTime<Utc>>,
  pub threat_level: ThreatLevel,
  /// 最近一批检测的数量
  pub active_threats: usize,
  /// 最近一批非空检测的平均置信度
  pub confidence_avg: f32,
  pub history_len: usize,
}

#[derive(Debug, Default)]
struct ThreatState {
  total_detections: u64,
  high_confidence_detections: u64,
  last_detection_at: Option<DateTime<Utc>>,
  threat_level: ThreatLevel,
  active_threats: usize,
  confidence_avg: f32,
  history: VecDeque<Detection>,
}

impl ThreatState {
  fn snapshot(&self) -> ThreatSnapshot {
    ThreatSnapshot {
      total_detections: self.total_detections,
      high_confidence_detections: self.high_confidence_detections,
      last_detection_at: self.last_detection_at,
      threat_level: self.threat_level,
      active_threats: self.active_threats,
      confidence_avg: self.confidence_avg,
      history_len: self.history.len(),
    }
  }
}

/// 进程内唯一的威胁统计，所有读写都经过同一把锁
#[derive(Debug, Default)]
pub struct ThreatAggregator {
  state: Mutex<ThreatState>,
}

impl ThreatAggregator {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, ThreatState> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn record(&self, detections: &[Detection]) -> ThreatSnapshot {
    let high = detections
      .iter()
      .filter(|d| d.confidence > HIGH_CONFIDENCE_THRESHOLD)
      .count();
    let level = ThreatLevel::from_batch(detections);
    let avg = if detections.is_empty() {
      None
    } else {
      Some(detections.iter().map(|d| d.confidence).sum::<f32>() / detections.len() as f32)
    };

    let mut state = self.lock();
    state.total_detections += detections.len() as u64;
    state.high_confidence_detections += high as u64;
    if !detections.is_empty() {
      state.last_detection_at = Some(Utc::now());
    }
    state.threat_level = level;
    state.active_threats = detections.len();
    if let Some(avg) = avg {
      state.confidence_avg = avg;
    }

    state.history.extend(detections.iter().cloned());
    let overflow = state.history.len().saturating_sub(HISTORY_CAPACITY);
    state.history.drain(..overflow);

    debug!(
      batch = detections.len(),
      high,
      total = state.total_detections,
      "更新威胁统计"
    );
    state.snapshot()
  }

  pub fn reset(&self, scope: ResetScope) {
    let mut state = self.lock();
    let history = match scope {
      ResetScope::Counters => std::mem::take(&mut state.history),
      ResetScope::All => VecDeque::new(),
    };
    *state = ThreatState {
      history,
      ..ThreatState::default()
    };
    info!("威胁统计已重置 ({:?})", scope);
  }

  pub fn snapshot(&self) -> ThreatSnapshot {
    self.lock().snapshot()
  }

  /// 最旧的在前
  pub fn history(&self) -> Vec<Detection> {
    self.lock().history.iter().cloned().collect()
  }
}
