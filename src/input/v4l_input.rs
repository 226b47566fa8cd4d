// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/input/v4l_input.rs - V4L 视频输入
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

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Device, FourCC};

use crate::frame::Frame;
use crate::input::{CaptureBackend, CaptureConfig, CaptureDevice, CaptureError};
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
}

const MMAP_BUFFERS: u32 = 4;
// 设备被拔出时 VIDIOC_DQBUF 返回的 errno
const ENODEV: i32 = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Yuyv,
  Mjpeg,
  Rgb24,
}

impl PixelFormat {
  fn parse(s: &str) -> Result<Self, V4lInputError> {
    match s.to_ascii_uppercase().as_str() {
      "YUYV" => Ok(PixelFormat::Yuyv),
      "MJPG" | "MJPEG" => Ok(PixelFormat::Mjpeg),
      "RGB3" | "RGB" => Ok(PixelFormat::Rgb24),
      other => Err(V4lInputError::UnsupportedPixelFormat(other.to_string())),
    }
  }

  fn fourcc(&self) -> FourCC {
    match self {
      PixelFormat::Yuyv => FourCC::new(b"YUYV"),
      PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
      PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
    }
  }
}

/// 直接读取 /dev/videoN 的采集后端
///
/// `v4l://?format=MJPG`，默认 YUYV。
pub struct V4lCapture {
  format: PixelFormat,
}

impl FromUrlWithScheme for V4lCapture {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lCapture {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }
    let format = match url.query_pairs().find(|(k, _)| k == "format") {
      Some((_, v)) => PixelFormat::parse(&v)?,
      None => PixelFormat::Yuyv,
    };
    Ok(Self { format })
  }
}

impl CaptureBackend for V4lCapture {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn open(
    &self,
    device_id: u32,
    config: &CaptureConfig,
  ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    let unavailable = |e: std::io::Error| CaptureError::DeviceUnavailable {
      device_id,
      reason: e.to_string(),
    };

    let device = Device::new(device_id as usize).map_err(unavailable)?;
    let mut format = device.format().map_err(unavailable)?;
    format.width = config.width;
    format.height = config.height;
    format.fourcc = self.format.fourcc();
    let format = device.set_format(&format).map_err(unavailable)?;
    if format.fourcc != self.format.fourcc() {
      return Err(CaptureError::DeviceUnavailable {
        device_id,
        reason: format!("设备不支持 {}", self.format.fourcc()),
      });
    }
    if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
      // 部分设备不允许设置帧率，按设备默认值继续
      info!(device_id, "设置帧率失败: {}", e);
    }

    let stream =
      Stream::with_buffers(&device, Type::VideoCapture, MMAP_BUFFERS).map_err(unavailable)?;

    info!(
      device_id,
      "V4L 设备已打开: {}x{} {}", format.width, format.height, format.fourcc
    );
    Ok(Box::new(V4lDevice {
      stream,
      _device: device,
      width: format.width,
      height: format.height,
      format: self.format,
    }))
  }
}

struct V4lDevice {
  stream: Stream<'static>,
  _device: Device,
  width: u32,
  height: u32,
  format: PixelFormat,
}

impl CaptureDevice for V4lDevice {
  fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
    let (buf, _meta) = self.stream.next().map_err(|e| {
      if e.raw_os_error() == Some(ENODEV) || e.kind() == std::io::ErrorKind::BrokenPipe {
        CaptureError::Disconnected(e.to_string())
      } else {
        CaptureError::Read(e.to_string())
      }
    })?;

    let frame = match self.format {
      PixelFormat::Yuyv => Frame::from_yuyv(self.width, self.height, buf, 0)?.image,
      PixelFormat::Rgb24 => Frame::from_rgb24(self.width, self.height, buf, 0)?.image,
      PixelFormat::Mjpeg => image::load_from_memory(buf)
        .map_err(|e| CaptureError::Read(e.to_string()))?
        .to_rgb8(),
    };
    Ok(frame)
  }
}
