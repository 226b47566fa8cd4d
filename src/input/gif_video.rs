// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/input/gif_video.rs - GIF 动画解码
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

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, Delay, DynamicImage, RgbImage};
use tracing::debug;

use crate::input::{DecodeError, VideoDecoder};

// 浏览器对 0 延迟按 100ms 处理
const DEFAULT_GIF_FPS: f64 = 10.0;
// 解码线程最多领先读取方的帧数
const DECODE_AHEAD: usize = 2;

type Decoded = Result<(RgbImage, Delay), DecodeError>;

/// 进程内解码的 GIF 动画
///
/// 解码在单独的线程里逐帧进行，经有界通道交给读取方，
/// 同一时刻驻留的帧数不超过 `DECODE_AHEAD + 2`。
pub struct GifVideo {
  frames: Option<Receiver<Decoded>>,
  first: Option<RgbImage>,
  fps: f64,
  decoded: Arc<AtomicU64>,
  worker: Option<JoinHandle<()>>,
}

impl GifVideo {
  /// 解出第一帧以确定帧率，格式错误或没有帧时直接失败
  pub fn new(data: Vec<u8>) -> Result<Self, DecodeError> {
    let (tx, rx) = mpsc::sync_channel(DECODE_AHEAD);
    let decoded = Arc::new(AtomicU64::new(0));
    let counter = decoded.clone();
    let worker = thread::Builder::new()
      .name("gif-decode".to_string())
      .spawn(move || decode_frames(data, tx, counter))?;

    let mut video = Self {
      frames: Some(rx),
      first: None,
      fps: DEFAULT_GIF_FPS,
      decoded,
      worker: Some(worker),
    };
    let (first, delay) = match video.recv()? {
      Some(first) => first,
      None => return Err(DecodeError::Video("GIF 中没有任何帧".to_string())),
    };
    let (numer, denom) = delay.numer_denom_ms();
    if numer > 0 {
      video.fps = 1000.0 * denom as f64 / numer as f64;
    }
    video.first = Some(first);
    debug!("GIF 解码开始: {:.2} fps", video.fps);
    Ok(video)
  }

  /// 解码线程已经解出的帧数
  pub fn decoded_frames(&self) -> u64 {
    self.decoded.load(Ordering::Relaxed)
  }

  fn recv(&mut self) -> Result<Option<(RgbImage, Delay)>, DecodeError> {
    let Some(frames) = self.frames.as_ref() else {
      return Ok(None);
    };
    match frames.recv() {
      Ok(Ok(frame)) => Ok(Some(frame)),
      Ok(Err(e)) => {
        self.frames = None;
        Err(e)
      }
      // 解码线程正常结束
      Err(_) => {
        self.frames = None;
        Ok(None)
      }
    }
  }
}

fn decode_frames(data: Vec<u8>, tx: SyncSender<Decoded>, decoded: Arc<AtomicU64>) {
  let decoder = match GifDecoder::new(Cursor::new(data)) {
    Ok(decoder) => decoder,
    Err(e) => {
      let _ = tx.send(Err(e.into()));
      return;
    }
  };
  for frame in decoder.into_frames() {
    let item = match frame {
      Ok(frame) => {
        let delay = frame.delay();
        let image = DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8();
        decoded.fetch_add(1, Ordering::Relaxed);
        Ok((image, delay))
      }
      Err(e) => Err(DecodeError::from(e)),
    };
    let failed = item.is_err();
    // 读取方已放弃
    if tx.send(item).is_err() || failed {
      return;
    }
  }
}

impl VideoDecoder for GifVideo {
  fn fps(&self) -> f64 {
    self.fps
  }

  fn frame_count_hint(&self) -> Option<u64> {
    None
  }

  fn next_frame(&mut self) -> Result<Option<RgbImage>, DecodeError> {
    if let Some(first) = self.first.take() {
      return Ok(Some(first));
    }
    Ok(self.recv()?.map(|(image, _)| image))
  }
}

impl Drop for GifVideo {
  fn drop(&mut self) {
    // 先断开通道，阻塞在发送上的解码线程随即退出
    self.frames = None;
    if let Some(worker) = self.worker.take() {
      let _ = worker.join();
    }
  }
}
