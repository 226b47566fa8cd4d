// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/task/live.rs - 实时检测循环
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

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::broadcast::{CameraState, Event};
use crate::frame::Frame;
use crate::input::{
  CaptureBackend, CaptureConfig, DeviceRegistry, FrameSource, FrameSourceError, FrameSourceState,
};
use crate::model::Detection;
use crate::output::{LiveFeed, Render};
use crate::task::Pipeline;

/// 约 30 Hz
pub const LIVE_CADENCE: Duration = Duration::from_millis(33);

#[derive(Debug, Default)]
pub struct LiveCounters {
  frames_processed: AtomicU64,
  ticks_skipped: AtomicU64,
}

impl LiveCounters {
  pub fn frames_processed(&self) -> u64 {
    self.frames_processed.load(Ordering::Relaxed)
  }

  pub fn ticks_skipped(&self) -> u64 {
    self.ticks_skipped.load(Ordering::Relaxed)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
  /// 收到停止信号
  Stopped,
  /// 帧源失效
  SourceLost,
  /// 达到指定帧数
  FrameLimit,
}

/// 按固定节拍驱动 帧源 → 检测 → 标注 → 统计/广播 → 输出
pub struct LiveStreamLoop<O> {
  source: FrameSource,
  pipeline: Pipeline,
  output: O,
  cadence: Duration,
  frame_limit: Option<u64>,
  counters: Arc<LiveCounters>,
}

impl<O> LiveStreamLoop<O>
where
  O: Render<Frame, [Detection]>,
  O::Error: Display,
{
  pub fn new(source: FrameSource, pipeline: Pipeline, output: O) -> Self {
    Self {
      source,
      pipeline,
      output,
      cadence: LIVE_CADENCE,
      frame_limit: None,
      counters: Arc::new(LiveCounters::default()),
    }
  }

  pub fn with_cadence(mut self, cadence: Duration) -> Self {
    self.cadence = cadence;
    self
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit.filter(|n| *n > 0);
    self
  }

  pub fn counters(&self) -> Arc<LiveCounters> {
    self.counters.clone()
  }

  /// 处理一个节拍，没有帧时返回 false
  pub fn tick(&mut self) -> bool {
    let Some(frame) = self.source.get_frame() else {
      self.counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
      return false;
    };

    let detections = self.pipeline.detector.detect(&frame.image);
    let annotated = Frame {
      image: self.pipeline.draw.annotate(&frame.image, &detections),
      ..frame
    };

    if !detections.is_empty() {
      let snapshot = self.pipeline.aggregator.record(&detections);
      debug!(
        frame = annotated.index,
        detections = detections.len(),
        "实时检测到目标"
      );
      self
        .pipeline
        .subscribers
        .publish(&Event::live_detection(detections.clone(), snapshot));
    }

    if let Err(e) = self.output.render_result(&annotated, &detections) {
      warn!("输出帧失败: {}", e);
    }
    self.counters.frames_processed.fetch_add(1, Ordering::Relaxed);
    true
  }

  /// 运行到停止信号、帧源失效或达到帧数上限；返回前释放帧源
  pub fn run(mut self, stop: mpsc::Receiver<()>) -> LoopExit {
    info!("实时检测循环开始");
    let exit = loop {
      if self.source.state() != FrameSourceState::Started {
        break LoopExit::SourceLost;
      }

      let started = Instant::now();
      self.tick();

      if self
        .frame_limit
        .is_some_and(|n| self.counters.frames_processed() >= n)
      {
        break LoopExit::FrameLimit;
      }

      let remaining = self.cadence.saturating_sub(started.elapsed());
      match stop.recv_timeout(remaining) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => break LoopExit::Stopped,
        Err(RecvTimeoutError::Timeout) => {}
      }
    };
    self.source.stop();
    info!(
      frames = self.counters.frames_processed(),
      skipped = self.counters.ticks_skipped(),
      "实时检测循环结束: {:?}",
      exit
    );
    exit
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
  pub is_streaming: bool,
  pub device_id: Option<u32>,
  #[serde(flatten)]
  pub config: CaptureConfig,
  pub frames_processed: u64,
}

struct RunningCamera {
  device_id: u32,
  config: CaptureConfig,
  stop_tx: mpsc::Sender<()>,
  handle: JoinHandle<LoopExit>,
  counters: Arc<LiveCounters>,
}

/// 摄像头的启动/停止入口，同一时间只运行一个实时循环
///
/// 启停由 `transition` 串行化；打开设备期间不持有 `running`，
/// 查询状态不会被缓慢的设备初始化阻塞。
pub struct CameraService {
  backend: Arc<dyn CaptureBackend>,
  registry: DeviceRegistry,
  pipeline: Pipeline,
  feed: LiveFeed,
  config: CaptureConfig,
  transition: Mutex<()>,
  running: Mutex<Option<RunningCamera>>,
}

impl CameraService {
  pub fn new(
    backend: Arc<dyn CaptureBackend>,
    registry: DeviceRegistry,
    pipeline: Pipeline,
    feed: LiveFeed,
    config: CaptureConfig,
  ) -> Self {
    Self {
      backend,
      registry,
      pipeline,
      feed,
      config,
      transition: Mutex::new(()),
      running: Mutex::new(None),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Option<RunningCamera>> {
    self
      .running
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn lock_transition(&self) -> MutexGuard<'_, ()> {
    self
      .transition
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// 当前直播画面；每次启动开启新频道，循环结束时关闭
  pub fn feed(&self) -> &LiveFeed {
    &self.feed
  }

  /// 设备打开失败时不会留下运行中的循环
  pub fn start(&self, device_id: u32) -> Result<CameraStatus, FrameSourceError> {
    let _transition = self.lock_transition();
    let finished = {
      let mut running = self.lock();
      match running.as_ref() {
        Some(current) if !current.handle.is_finished() => {
          return Err(FrameSourceError::InvalidState(FrameSourceState::Started));
        }
        _ => running.take(),
      }
    };
    // 上一次循环已自行结束（设备失效），回收线程
    if let Some(finished) = finished {
      let _ = finished.handle.join();
    }

    let mut source = FrameSource::new(self.backend.clone(), self.registry.clone());
    source.start(
      device_id,
      self.config.width,
      self.config.height,
      self.config.fps,
    )?;

    self.feed.open();
    let live = LiveStreamLoop::new(source, self.pipeline.clone(), self.feed.clone());
    let counters = live.counters();
    let (stop_tx, stop_rx) = mpsc::channel();
    let subscribers = self.pipeline.subscribers.clone();
    let feed = self.feed.clone();
    let handle = thread::Builder::new()
      .name(format!("live-{}", device_id))
      .spawn(move || {
        let exit = live.run(stop_rx);
        feed.close();
        if exit == LoopExit::SourceLost {
          subscribers.publish(&Event::camera_status(
            CameraState::Stopped,
            format!("摄像头 {} 已断开", device_id),
          ));
        }
        exit
      })
      .map_err(|e| {
        error!("无法创建实时检测线程: {}", e);
        self.feed.close();
        FrameSourceError::DeviceUnavailable(crate::input::CaptureError::DeviceUnavailable {
          device_id,
          reason: e.to_string(),
        })
      })?;

    *self.lock() = Some(RunningCamera {
      device_id,
      config: self.config,
      stop_tx,
      handle,
      counters,
    });

    self.pipeline.subscribers.publish(&Event::camera_status(
      CameraState::Started,
      format!("摄像头 {} 已启动", device_id),
    ));
    info!(device_id, "摄像头已启动");
    Ok(self.status())
  }

  /// 未运行时也返回成功；返回时设备已释放，直播观看者的流已结束
  pub fn stop(&self) -> bool {
    let _transition = self.lock_transition();
    let Some(current) = self.lock().take() else {
      return false;
    };
    let _ = current.stop_tx.send(());
    match current.handle.join() {
      Ok(exit) => debug!("实时循环退出: {:?}", exit),
      Err(_) => {
        error!("实时检测线程异常退出");
        self.feed.close();
      }
    }
    self.pipeline.subscribers.publish(&Event::camera_status(
      CameraState::Stopped,
      format!("摄像头 {} 已停止", current.device_id),
    ));
    info!(device_id = current.device_id, "摄像头已停止");
    true
  }

  pub fn status(&self) -> CameraStatus {
    match self.lock().as_ref() {
      Some(current) => CameraStatus {
        is_streaming: !current.handle.is_finished(),
        device_id: Some(current.device_id),
        config: current.config,
        frames_processed: current.counters.frames_processed(),
      },
      None => CameraStatus {
        is_streaming: false,
        device_id: None,
        config: self.config,
        frames_processed: 0,
      },
    }
  }
}

impl Drop for CameraService {
  fn drop(&mut self) {
    self.stop();
  }
}
