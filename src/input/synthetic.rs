// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/input/synthetic.rs - 合成测试画面
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

use image::{Rgb, RgbImage};
use url::Url;

use crate::input::{CaptureBackend, CaptureConfig, CaptureDevice, CaptureError, InputError};
use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_DEVICE_COUNT: u32 = 4;

/// 不依赖硬件的采集后端，生成滚动的渐变条纹
///
/// `synthetic://?devices=2` 限制可用的设备编号个数。
pub struct SyntheticCapture {
  devices: u32,
}

impl Default for SyntheticCapture {
  fn default() -> Self {
    Self {
      devices: DEFAULT_DEVICE_COUNT,
    }
  }
}

impl FromUrlWithScheme for SyntheticCapture {
  const SCHEME: &'static str = "synthetic";
}

impl FromUrl for SyntheticCapture {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch);
    }
    let devices = url
      .query_pairs()
      .find(|(k, _)| k == "devices")
      .and_then(|(_, v)| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_DEVICE_COUNT);
    Ok(Self { devices })
  }
}

impl CaptureBackend for SyntheticCapture {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn open(
    &self,
    device_id: u32,
    config: &CaptureConfig,
  ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    if device_id >= self.devices {
      return Err(CaptureError::DeviceUnavailable {
        device_id,
        reason: format!("合成后端只有 {} 个设备", self.devices),
      });
    }
    if config.width == 0 || config.height == 0 {
      return Err(CaptureError::DeviceUnavailable {
        device_id,
        reason: "分辨率不能为 0".to_string(),
      });
    }
    Ok(Box::new(SyntheticDevice {
      width: config.width,
      height: config.height,
      tick: 0,
      seed: device_id,
    }))
  }
}

struct SyntheticDevice {
  width: u32,
  height: u32,
  tick: u32,
  seed: u32,
}

impl CaptureDevice for SyntheticDevice {
  fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
    let (tick, seed) = (self.tick, self.seed);
    self.tick = self.tick.wrapping_add(1);
    Ok(RgbImage::from_fn(self.width, self.height, |x, y| {
      let r = (x.wrapping_add(tick.wrapping_mul(4)) % 256) as u8;
      let g = (y % 256) as u8;
      let b = (seed.wrapping_mul(64) % 256) as u8;
      Rgb([r, g, b])
    }))
  }
}
