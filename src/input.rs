// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::FromUrl;
use crate::frame::{Frame, FrameError};

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("设备 {0} 正被占用")]
  DeviceBusy(u32),
  #[error("设备 {device_id} 不可用: {reason}")]
  DeviceUnavailable { device_id: u32, reason: String },
  #[error("读取帧失败: {0}")]
  Read(String),
  #[error("帧格式错误: {0}")]
  Frame(#[from] FrameError),
  #[error("设备已断开: {0}")]
  Disconnected(String),
  #[error("视频流已结束")]
  EndOfStream,
}

impl CaptureError {
  /// 致命错误使帧源进入 Stopped，其余视为瞬时失败
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      CaptureError::Disconnected(_) | CaptureError::EndOfStream
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureConfig {
  pub width: u32,
  pub height: u32,
  pub fps: u32,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      width: 640,
      height: 480,
      fps: 30,
    }
  }
}

/// 一个已打开的采集设备，析构即释放
pub trait CaptureDevice: Send {
  fn read_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

/// 采集后端，负责按编号打开设备
pub trait CaptureBackend: Send + Sync {
  fn name(&self) -> &str;

  fn open(
    &self,
    device_id: u32,
    config: &CaptureConfig,
  ) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// 进程内的设备占用表
#[derive(Clone, Default)]
pub struct DeviceRegistry {
  busy: Arc<Mutex<HashSet<u32>>>,
}

impl DeviceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashSet<u32>> {
    self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn claim(&self, device_id: u32) -> Result<DeviceClaim, CaptureError> {
    if !self.lock().insert(device_id) {
      return Err(CaptureError::DeviceBusy(device_id));
    }
    Ok(DeviceClaim {
      registry: self.clone(),
      device_id,
    })
  }

  pub fn is_busy(&self, device_id: u32) -> bool {
    self.lock().contains(&device_id)
  }
}

/// 占用凭据，析构时归还设备
pub struct DeviceClaim {
  registry: DeviceRegistry,
  device_id: u32,
}

impl Drop for DeviceClaim {
  fn drop(&mut self) {
    self.registry.lock().remove(&self.device_id);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSourceState {
  Idle,
  Started,
  Stopped,
}

#[derive(Error, Debug)]
pub enum FrameSourceError {
  #[error("帧源状态为 {0:?}，只能从 Idle 启动")]
  InvalidState(FrameSourceState),
  #[error("设备不可用: {0}")]
  DeviceUnavailable(#[from] CaptureError),
  #[error("摄像头未在运行")]
  NotStreaming,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameSourceStatus {
  pub state: FrameSourceState,
  pub device_id: Option<u32>,
  #[serde(flatten)]
  pub config: CaptureConfig,
  pub frames_read: u64,
}

enum SourceState {
  Idle,
  Started {
    device_id: u32,
    device: Box<dyn CaptureDevice>,
    _claim: DeviceClaim,
  },
  Stopped,
}

/// 单个采集设备的生命周期：Idle → Started → Stopped
pub struct FrameSource {
  backend: Arc<dyn CaptureBackend>,
  registry: DeviceRegistry,
  config: CaptureConfig,
  state: SourceState,
  frames_read: u64,
}

impl FrameSource {
  pub fn new(backend: Arc<dyn CaptureBackend>, registry: DeviceRegistry) -> Self {
    Self {
      backend,
      registry,
      config: CaptureConfig::default(),
      state: SourceState::Idle,
      frames_read: 0,
    }
  }

  /// 失败时保持 Idle
  pub fn start(
    &mut self,
    device_id: u32,
    width: u32,
    height: u32,
    fps: u32,
  ) -> Result<(), FrameSourceError> {
    let current = self.state();
    if current != FrameSourceState::Idle {
      return Err(FrameSourceError::InvalidState(current));
    }

    let config = CaptureConfig { width, height, fps };
    let claim = self.registry.claim(device_id)?;
    let device = self.backend.open(device_id, &config)?;

    info!(
      device_id,
      backend = self.backend.name(),
      "采集设备已打开 {}x{}@{}",
      width,
      height,
      fps
    );
    self.config = config;
    self.state = SourceState::Started {
      device_id,
      device,
      _claim: claim,
    };
    Ok(())
  }

  /// 读取下一帧；结束或瞬时失败时返回 None
  pub fn get_frame(&mut self) -> Option<Frame> {
    let SourceState::Started {
      device, device_id, ..
    } = &mut self.state
    else {
      return None;
    };
    let device_id = *device_id;

    match device.read_frame() {
      Ok(image) => {
        let frame = Frame::new(image, self.frames_read);
        self.frames_read += 1;
        Some(frame)
      }
      Err(e) if e.is_fatal() => {
        warn!(device_id, "采集设备失效: {}", e);
        self.stop();
        None
      }
      Err(e) => {
        debug!(device_id, "读取帧失败: {}", e);
        None
      }
    }
  }

  /// 任意状态下均可调用，重复调用无副作用
  pub fn stop(&mut self) {
    match std::mem::replace(&mut self.state, SourceState::Stopped) {
      SourceState::Started { device_id, .. } => {
        info!(device_id, "采集设备已释放");
      }
      SourceState::Idle => {
        self.state = SourceState::Idle;
      }
      SourceState::Stopped => {}
    }
  }

  pub fn state(&self) -> FrameSourceState {
    match self.state {
      SourceState::Idle => FrameSourceState::Idle,
      SourceState::Started { .. } => FrameSourceState::Started,
      SourceState::Stopped => FrameSourceState::Stopped,
    }
  }

  pub fn device_id(&self) -> Option<u32> {
    match self.state {
      SourceState::Started { device_id, .. } => Some(device_id),
      _ => None,
    }
  }

  pub fn config(&self) -> CaptureConfig {
    self.config
  }

  pub fn status(&self) -> FrameSourceStatus {
    FrameSourceStatus {
      state: self.state(),
      device_id: self.device_id(),
      config: self.config,
      frames_read: self.frames_read,
    }
  }
}

impl Drop for FrameSource {
  fn drop(&mut self) {
    self.stop();
  }
}

mod synthetic;
pub use self::synthetic::SyntheticCapture;

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lCapture, V4lInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerCapture, GStreamerInputError, GStreamerInputPipelineBuilder, GStreamerVideoDecoder,
};

mod image_file;
pub use self::image_file::{DecodeError, decode_image};

mod gif_video;
pub use self::gif_video::GifVideo;

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "v4l_input")]
  #[error("V4L 输入错误: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 按 URL 方案选择的采集后端
pub enum CaptureBackendWrapper {
  Synthetic(SyntheticCapture),
  #[cfg(feature = "v4l_input")]
  V4l(V4lCapture),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerCapture),
}

impl FromUrl for CaptureBackendWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    if url.scheme() == SyntheticCapture::SCHEME {
      return Ok(CaptureBackendWrapper::Synthetic(SyntheticCapture::from_url(
        url,
      )?));
    }
    #[cfg(feature = "v4l_input")]
    {
      if url.scheme() == V4lCapture::SCHEME {
        return Ok(CaptureBackendWrapper::V4l(V4lCapture::from_url(url)?));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    {
      if url.scheme() == GStreamerCapture::SCHEME {
        return Ok(CaptureBackendWrapper::GStreamer(GStreamerCapture::from_url(
          url,
        )?));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl CaptureBackend for CaptureBackendWrapper {
  fn name(&self) -> &str {
    match self {
      CaptureBackendWrapper::Synthetic(backend) => backend.name(),
      #[cfg(feature = "v4l_input")]
      CaptureBackendWrapper::V4l(backend) => backend.name(),
      #[cfg(feature = "gstreamer_input")]
      CaptureBackendWrapper::GStreamer(backend) => backend.name(),
    }
  }

  fn open(
    &self,
    device_id: u32,
    config: &CaptureConfig,
  ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    match self {
      CaptureBackendWrapper::Synthetic(backend) => backend.open(device_id, config),
      #[cfg(feature = "v4l_input")]
      CaptureBackendWrapper::V4l(backend) => backend.open(device_id, config),
      #[cfg(feature = "gstreamer_input")]
      CaptureBackendWrapper::GStreamer(backend) => backend.open(device_id, config),
    }
  }
}

/// 有限长度的视频解码器，析构即释放解码资源
pub trait VideoDecoder: Send {
  fn fps(&self) -> f64;

  /// 容器声明的帧数，未知时为 None
  fn frame_count_hint(&self) -> Option<u64>;

  /// Ok(None) 表示正常结束
  fn next_frame(&mut self) -> Result<Option<RgbImage>, DecodeError>;
}

const GIF_MAGIC: &[u8] = b"GIF8";

/// 根据内容选择解码器：GIF 在进程内解码，其余交给 GStreamer
pub fn open_video(data: Vec<u8>) -> Result<Box<dyn VideoDecoder>, DecodeError> {
  if data.is_empty() {
    return Err(DecodeError::Empty);
  }
  if data.starts_with(GIF_MAGIC) {
    return Ok(Box::new(GifVideo::new(data)?));
  }

  #[cfg(feature = "gstreamer_input")]
  {
    Ok(Box::new(GStreamerVideoDecoder::from_bytes(&data)?))
  }
  #[cfg(not(feature = "gstreamer_input"))]
  {
    Err(DecodeError::Unsupported(
      "未启用 gstreamer_input，仅支持 GIF 视频".to_string(),
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct ScriptedDevice {
    script: Vec<Result<RgbImage, CaptureError>>,
  }

  impl CaptureDevice for ScriptedDevice {
    fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
      if self.script.is_empty() {
        Ok(RgbImage::new(2, 2))
      } else {
        self.script.remove(0)
      }
    }
  }

  struct ScriptedBackend {
    opens: AtomicUsize,
    fail: bool,
    script: Mutex<Vec<Result<RgbImage, CaptureError>>>,
  }

  impl ScriptedBackend {
    fn new(fail: bool, script: Vec<Result<RgbImage, CaptureError>>) -> Arc<Self> {
      Arc::new(Self {
        opens: AtomicUsize::new(0),
        fail,
        script: Mutex::new(script),
      })
    }
  }

  impl CaptureBackend for ScriptedBackend {
    fn name(&self) -> &str {
      "scripted"
    }

    fn open(
      &self,
      device_id: u32,
      _config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
      self.opens.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        return Err(CaptureError::DeviceUnavailable {
          device_id,
          reason: "no such device".into(),
        });
      }
      let script = std::mem::take(&mut *self.script.lock().unwrap());
      Ok(Box::new(ScriptedDevice { script }))
    }
  }

  #[test]
  fn busy_device_fails_and_stays_idle() {
    let registry = DeviceRegistry::new();
    let backend = ScriptedBackend::new(false, vec![]);
    let mut first = FrameSource::new(backend.clone(), registry.clone());
    first.start(0, 64, 48, 30).unwrap();

    let mut second = FrameSource::new(backend.clone(), registry.clone());
    let err = second.start(0, 64, 48, 30).unwrap_err();
    assert!(matches!(
      err,
      FrameSourceError::DeviceUnavailable(CaptureError::DeviceBusy(0))
    ));
    assert_eq!(second.state(), FrameSourceState::Idle);
    assert_eq!(backend.opens.load(Ordering::SeqCst), 1);

    first.stop();
    assert!(!registry.is_busy(0));
    second.start(0, 64, 48, 30).unwrap();
    assert_eq!(second.state(), FrameSourceState::Started);
  }

  #[test]
  fn open_failure_releases_claim() {
    let registry = DeviceRegistry::new();
    let mut source = FrameSource::new(ScriptedBackend::new(true, vec![]), registry.clone());
    assert!(source.start(3, 64, 48, 30).is_err());
    assert_eq!(source.state(), FrameSourceState::Idle);
    assert!(!registry.is_busy(3));
  }

  #[test]
  fn stop_is_idempotent_from_any_state() {
    let mut source = FrameSource::new(ScriptedBackend::new(false, vec![]), DeviceRegistry::new());
    source.stop();
    assert_eq!(source.state(), FrameSourceState::Idle);
    assert!(source.get_frame().is_none());

    source.start(1, 8, 8, 30).unwrap();
    assert!(source.get_frame().is_some());
    source.stop();
    source.stop();
    assert_eq!(source.state(), FrameSourceState::Stopped);
    assert!(source.get_frame().is_none());
    assert!(matches!(
      source.start(1, 8, 8, 30),
      Err(FrameSourceError::InvalidState(FrameSourceState::Stopped))
    ));
  }

  #[test]
  fn transient_failure_keeps_started_fatal_stops() {
    let backend = ScriptedBackend::new(
      false,
      vec![
        Err(CaptureError::Read("timeout".into())),
        Ok(RgbImage::new(4, 4)),
        Err(CaptureError::Disconnected("unplugged".into())),
      ],
    );
    let registry = DeviceRegistry::new();
    let mut source = FrameSource::new(backend, registry.clone());
    source.start(0, 4, 4, 30).unwrap();

    assert!(source.get_frame().is_none());
    assert_eq!(source.state(), FrameSourceState::Started);
    let frame = source.get_frame().unwrap();
    assert_eq!(frame.index, 0);
    assert!(source.get_frame().is_none());
    assert_eq!(source.state(), FrameSourceState::Stopped);
    assert!(!registry.is_busy(0));
  }

  #[test]
  fn capture_backend_from_url() {
    let url = url::Url::parse("synthetic://").unwrap();
    let backend = CaptureBackendWrapper::from_url(&url).unwrap();
    assert_eq!(backend.name(), "synthetic");
    let url = url::Url::parse("ftp://camera").unwrap();
    assert!(matches!(
      CaptureBackendWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }

  #[test]
  fn open_video_rejects_empty() {
    assert!(matches!(open_video(Vec::new()), Err(DecodeError::Empty)));
  }
}
