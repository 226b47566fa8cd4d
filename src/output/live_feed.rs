// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/output/live_feed.rs - 实时画面分发
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

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::frame::{Frame, FrameError};
use crate::model::Detection;
use crate::output::{OutputError, Render};

const LIVE_FEED_CAPACITY: usize = 4;

#[derive(Error, Debug)]
pub enum LiveFeedError {
  #[error("帧编码错误: {0}")]
  Encode(#[from] FrameError),
}

/// 已编码 JPEG 帧的有损广播，跟不上的观看者直接跳帧
///
/// 每次直播由 [`LiveFeed::open`] 开启一个新频道，[`LiveFeed::close`]
/// 释放发送端后，所有观看者的流随之结束。
#[derive(Clone, Default)]
pub struct LiveFeed {
  tx: Arc<Mutex<Option<broadcast::Sender<Bytes>>>>,
}

impl LiveFeed {
  pub fn new() -> Self {
    Self::default()
  }

  fn sender(&self) -> Option<broadcast::Sender<Bytes>> {
    self
      .tx
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .clone()
  }

  /// 开启新频道，上一频道的观看者随之结束
  pub fn open(&self) {
    let (tx, _) = broadcast::channel(LIVE_FEED_CAPACITY);
    *self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
  }

  pub fn close(&self) {
    self
      .tx
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .take();
  }

  pub fn is_open(&self) -> bool {
    self.sender().is_some()
  }

  /// 未在直播时返回 None
  pub fn subscribe(&self) -> Option<broadcast::Receiver<Bytes>> {
    self.sender().map(|tx| tx.subscribe())
  }

  pub fn viewers(&self) -> usize {
    self.sender().map_or(0, |tx| tx.receiver_count())
  }

  /// 没有观看者时不做编码
  pub fn push(&self, frame: &Frame) -> Result<(), LiveFeedError> {
    let Some(tx) = self.sender() else {
      return Ok(());
    };
    if tx.receiver_count() == 0 {
      return Ok(());
    }
    let jpeg = frame.to_jpeg()?;
    // 发送失败只意味着观看者恰好全部离开
    let _ = tx.send(Bytes::from(jpeg));
    Ok(())
  }
}

impl Render<Frame, [Detection]> for LiveFeed {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, _result: &[Detection]) -> Result<(), Self::Error> {
    self.push(frame).map_err(OutputError::from)
  }
}
