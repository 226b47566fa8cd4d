// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 输入
//!
//! 提供两类输入：
//! - 摄像头采集后端 `gst://camera?format=YUY2&io-mode=2&rotate=90`，设备为 `/dev/video{N}`
//! - 视频文件回放 `gst://file/path/to/video.mp4`，到达结尾即视为设备断开
//!
//! 另外 [`GStreamerVideoDecoder`] 把上传的视频写入临时文件，
//! 通过 `filesrc ! decodebin` 逐帧解码。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;
use std::io::Write;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::input::{
  CaptureBackend, CaptureConfig, CaptureDevice, CaptureError, DecodeError, VideoDecoder,
};
use crate::{FromUrl, FromUrlWithScheme};

const STATE_CHANGE_TIMEOUT_SECS: u64 = 5;
const LIVE_PULL_TIMEOUT_MS: u64 = 500;
const FILE_PULL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_FILE_FPS: f64 = 30.0;

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式")]
  UnsupportedFormat,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("临时文件错误: {0}")]
  TempFile(#[from] std::io::Error),
}

impl From<GStreamerInputError> for DecodeError {
  fn from(err: GStreamerInputError) -> Self {
    DecodeError::Video(err.to_string())
  }
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: Option<String>,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        let format = format
          .as_ref()
          .map(|f| format!(",format={}", f))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw{},width={},height={},framerate={}/1",
          camera, io_mode, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
    }
  }
}

/// 管道末端 appsink 的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
  /// 实时源，只保留最新帧
  Live,
  /// 文件源，不丢帧，不按时钟同步
  File,
}

impl SinkMode {
  fn appsink(&self) -> &'static str {
    match self {
      SinkMode::Live => "appsink name=sink max-buffers=2 drop=true",
      SinkMode::File => "appsink name=sink max-buffers=8 drop=false sync=false",
    }
  }
}

#[derive(Default)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn camera(mut self, camera: &str, config: &CaptureConfig, query: &CameraQuery) -> Self {
    self.items.push(GStreamerInputBuilderItem::CameraSource {
      camera: camera.to_string(),
      io_mode: query.io_mode,
      format: query.format.clone(),
      width: config.width,
      height: config.height,
      fps: config.fps,
    });
    self
  }

  pub fn file(mut self, path: &str) -> Self {
    self
      .items
      .push(GStreamerInputBuilderItem::FileSource(path.to_string()));
    self
  }

  pub fn rotate(mut self, rotate: Option<u32>) -> Self {
    if let Some(item) = Self::video_flip(rotate) {
      self.items.push(item);
    }
    self
  }

  pub fn target_format(mut self, format: &str) -> Self {
    self.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: format.to_string(),
    });
    self
  }

  fn video_flip(rotate: Option<u32>) -> Option<GStreamerInputBuilderItem> {
    let method = match rotate? {
      90 => 1,
      180 => 2,
      270 => 3,
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method })
  }

  pub fn description(&self, mode: SinkMode) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!("{} ! {}", basic_pipeline, mode.appsink())
  }

  pub fn build(self, mode: SinkMode) -> Result<GStreamerPipeline, GStreamerInputError> {
    gst::init()?;

    let description = self.description(mode);
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkNotFound)?;

    let handle = GStreamerPipeline { pipeline, appsink };
    handle.pipeline.set_state(gst::State::Playing)?;
    let (result, _, _) = handle
      .pipeline
      .state(gst::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
    result?;
    Ok(handle)
  }
}

/// 运行中的管道，析构时切换到 Null 释放设备
pub struct GStreamerPipeline {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerPipeline {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl GStreamerPipeline {
  fn try_pull(&self, timeout: gst::ClockTime) -> Option<gst::Sample> {
    self.appsink.try_pull_sample(timeout)
  }

  fn is_eos(&self) -> bool {
    self.appsink.is_eos()
  }

  fn bus_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
      gst::MessageView::Error(err) => Some(err.error().to_string()),
      _ => None,
    }
  }

  fn duration_secs(&self) -> Option<f64> {
    self
      .pipeline
      .query_duration::<gst::ClockTime>()
      .map(|d| d.nseconds() as f64 / 1e9)
  }
}

fn sample_video_info(sample: &gst::Sample) -> Result<gst_video::VideoInfo, GStreamerInputError> {
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;
  gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)
}

/// 按行拷贝，处理行尾对齐填充
fn sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let info = sample_video_info(sample)?;
  let (width, height) = (info.width(), info.height());
  let stride = info.stride()[0] as usize;
  let row = width as usize * 3;

  let map = buffer.map_readable()?;
  let data = map.as_slice();
  let expected = stride * (height as usize).saturating_sub(1) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let bgr = match info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  let mut pixels = Vec::with_capacity(row * height as usize);
  for y in 0..height as usize {
    let line = &data[y * stride..y * stride + row];
    if bgr {
      for px in line.chunks_exact(3) {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      pixels.extend_from_slice(line);
    }
  }
  RgbImage::from_raw(width, height, pixels).ok_or(GStreamerInputError::BufferSizeMismatch {
    expected: row * height as usize,
    actual: 0,
  })
}

/// 摄像头管道的附加参数
#[derive(Debug, Clone, Default)]
pub struct CameraQuery {
  pub io_mode: Option<u32>,
  pub format: Option<String>,
  pub rotate: Option<u32>,
}

enum CaptureSource {
  Camera(CameraQuery),
  File { path: String, rotate: Option<u32> },
}

/// GStreamer 采集后端
pub struct GStreamerCapture {
  source: CaptureSource,
}

impl FromUrlWithScheme for GStreamerCapture {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerCapture {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let rotate = query.get("rotate").and_then(|v| v.parse::<u32>().ok());

    let source = match url.host_str() {
      Some("camera") => CaptureSource::Camera(CameraQuery {
        io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
        format: query.get("format").cloned(),
        rotate,
      }),
      Some("file") => CaptureSource::File {
        path: urlencoding::decode(url.path())
          .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))?
          .into_owned(),
        rotate,
      },
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };
    Ok(Self { source })
  }
}

impl CaptureBackend for GStreamerCapture {
  fn name(&self) -> &str {
    match self.source {
      CaptureSource::Camera(_) => "gst-camera",
      CaptureSource::File { .. } => "gst-file",
    }
  }

  fn open(
    &self,
    device_id: u32,
    config: &CaptureConfig,
  ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    let builder = match &self.source {
      CaptureSource::Camera(query) => GStreamerInputPipelineBuilder::new()
        .camera(&format!("/dev/video{}", device_id), config, query)
        .rotate(query.rotate),
      CaptureSource::File { path, rotate } => {
        GStreamerInputPipelineBuilder::new().file(path).rotate(*rotate)
      }
    };
    let pipeline = builder
      .target_format("RGB")
      .build(SinkMode::Live)
      .map_err(|e| CaptureError::DeviceUnavailable {
        device_id,
        reason: e.to_string(),
      })?;
    Ok(Box::new(GStreamerDevice { pipeline }))
  }
}

struct GStreamerDevice {
  pipeline: GStreamerPipeline,
}

impl CaptureDevice for GStreamerDevice {
  fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
    match self
      .pipeline
      .try_pull(gst::ClockTime::from_mseconds(LIVE_PULL_TIMEOUT_MS))
    {
      Some(sample) => sample_to_rgb(&sample).map_err(|e| CaptureError::Read(e.to_string())),
      None if self.pipeline.is_eos() => Err(CaptureError::EndOfStream),
      None => match self.pipeline.bus_error() {
        Some(err) => Err(CaptureError::Disconnected(err)),
        None => Err(CaptureError::Read("等待帧超时".to_string())),
      },
    }
  }
}

/// 上传视频的解码器，临时文件随解码器一起释放
pub struct GStreamerVideoDecoder {
  pipeline: GStreamerPipeline,
  first: Option<RgbImage>,
  fps: f64,
  frame_count_hint: Option<u64>,
  _spool: NamedTempFile,
}

impl GStreamerVideoDecoder {
  pub fn from_bytes(data: &[u8]) -> Result<Self, GStreamerInputError> {
    let mut spool = NamedTempFile::new()?;
    spool.write_all(data)?;
    spool.flush()?;
    let path = spool.path().to_string_lossy().into_owned();

    let pipeline = GStreamerInputPipelineBuilder::new()
      .file(&path)
      .target_format("RGB")
      .build(SinkMode::File)?;

    // 预取第一帧以得到帧率
    let sample = pipeline
      .try_pull(gst::ClockTime::from_seconds(FILE_PULL_TIMEOUT_SECS))
      .ok_or_else(|| {
        GStreamerInputError::PipelineError(
          pipeline
            .bus_error()
            .unwrap_or_else(|| "无法读取第一帧".to_string()),
        )
      })?;
    let info = sample_video_info(&sample)?;
    let rate = info.fps();
    let fps = if rate.numer() > 0 && rate.denom() > 0 {
      rate.numer() as f64 / rate.denom() as f64
    } else {
      DEFAULT_FILE_FPS
    };
    let first = sample_to_rgb(&sample)?;
    let frame_count_hint = pipeline
      .duration_secs()
      .map(|secs| (secs * fps).round() as u64);

    debug!("视频解码器就绪: {:.2} fps, 约 {:?} 帧", fps, frame_count_hint);
    Ok(Self {
      pipeline,
      first: Some(first),
      fps,
      frame_count_hint,
      _spool: spool,
    })
  }
}

impl VideoDecoder for GStreamerVideoDecoder {
  fn fps(&self) -> f64 {
    self.fps
  }

  fn frame_count_hint(&self) -> Option<u64> {
    self.frame_count_hint
  }

  fn next_frame(&mut self) -> Result<Option<RgbImage>, DecodeError> {
    if let Some(first) = self.first.take() {
      return Ok(Some(first));
    }
    match self
      .pipeline
      .try_pull(gst::ClockTime::from_seconds(FILE_PULL_TIMEOUT_SECS))
    {
      Some(sample) => Ok(Some(sample_to_rgb(&sample)?)),
      None if self.pipeline.is_eos() => Ok(None),
      None => Err(DecodeError::Video(
        self
          .pipeline
          .bus_error()
          .unwrap_or_else(|| "读取帧超时".to_string()),
      )),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn camera_pipeline_description() {
    let query = CameraQuery {
      io_mode: Some(2),
      format: Some("YUY2".to_string()),
      rotate: Some(90),
    };
    let config = CaptureConfig {
      width: 640,
      height: 480,
      fps: 30,
    };
    let description = GStreamerInputPipelineBuilder::new()
      .camera("/dev/video1", &config, &query)
      .rotate(query.rotate)
      .target_format("RGB")
      .description(SinkMode::Live);
    assert_eq!(
      description,
      "v4l2src device=/dev/video1 io-mode=2 ! video/x-raw,format=YUY2,width=640,height=480,framerate=30/1 ! videoflip method=1 ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink max-buffers=2 drop=true"
    );
  }

  #[test]
  fn url_hosts() {
    assert!(GStreamerCapture::from_url(&Url::parse("gst://camera?format=MJPG").unwrap()).is_ok());
    assert!(GStreamerCapture::from_url(&Url::parse("gst://file/tmp/a.mp4").unwrap()).is_ok());
    assert!(matches!(
      GStreamerCapture::from_url(&Url::parse("gst://rtsp/x").unwrap()),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }
}
