// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/frame.rs - 帧定义
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
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;
const YUYV_BYTES_PER_PAIR: usize = 4;
const JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("图像编码错误: {0}")]
  Encode(#[from] image::ImageError),
}

/// 采集得到的一帧 RGB 图像
#[derive(Debug, Clone)]
pub struct Frame {
  pub image: RgbImage,
  /// 帧序号，由帧源单调递增
  pub index: u64,
  pub captured_at: DateTime<Utc>,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64) -> Self {
    Self {
      image,
      index,
      captured_at: Utc::now(),
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 从紧凑排列的 RGB24（HWC）缓冲区构造帧
  pub fn from_rgb24(width: u32, height: u32, data: &[u8], index: u64) -> Result<Self, FrameError> {
    let expected = width as usize * height as usize * RGB_CHANNELS;
    check_len(expected, data.len())?;
    let image = RgbImage::from_raw(width, height, data[..expected].to_vec()).ok_or(
      FrameError::BufferSizeMismatch {
        expected,
        actual: data.len(),
      },
    )?;
    Ok(Self::new(image, index))
  }

  /// 从 YUYV 4:2:2 缓冲区构造帧（大多数 USB 摄像头的默认格式）
  pub fn from_yuyv(width: u32, height: u32, data: &[u8], index: u64) -> Result<Self, FrameError> {
    // 像素数为奇数时最后一对只用到第一个亮度
    let expected = (width as usize * height as usize).div_ceil(2) * YUYV_BYTES_PER_PAIR;
    check_len(expected, data.len())?;
    let image = RgbImage::from_fn(width, height, |x, y| {
      let pair = (y as usize * width as usize + x as usize) / 2;
      let base = pair * YUYV_BYTES_PER_PAIR;
      let luma = if x % 2 == 0 { data[base] } else { data[base + 2] };
      yuv_to_rgb(luma, data[base + 1], data[base + 3])
    });
    Ok(Self::new(image, index))
  }

  pub fn to_jpeg(&self) -> Result<Vec<u8>, FrameError> {
    encode_jpeg(&self.image)
  }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, FrameError> {
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).encode_image(image)?;
  Ok(buffer)
}

fn check_len(expected: usize, actual: usize) -> Result<(), FrameError> {
  if actual < expected {
    return Err(FrameError::BufferSizeMismatch { expected, actual });
  }
  Ok(())
}

// BT.601
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
  let y = y as f32;
  let u = u as f32 - 128.0;
  let v = v as f32 - 128.0;
  let r = y + 1.402 * v;
  let g = y - 0.344_136 * u - 0.714_136 * v;
  let b = y + 1.772 * u;
  Rgb([
    r.round().clamp(0.0, 255.0) as u8,
    g.round().clamp(0.0, 255.0) as u8,
    b.round().clamp(0.0, 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rgb24_rejects_short_buffer() {
    let err = Frame::from_rgb24(4, 4, &[0u8; 10], 0).unwrap_err();
    assert!(matches!(
      err,
      FrameError::BufferSizeMismatch {
        expected: 48,
        actual: 10
      }
    ));
  }

  #[test]
  fn yuyv_neutral_chroma_is_gray() {
    let data = [128u8, 128, 200, 128];
    let frame = Frame::from_yuyv(2, 1, &data, 0).unwrap();
    assert_eq!(frame.image.get_pixel(0, 0), &Rgb([128, 128, 128]));
    assert_eq!(frame.image.get_pixel(1, 0), &Rgb([200, 200, 200]));
  }

  #[test]
  fn yuyv_odd_pixel_count_uses_whole_pairs() {
    let data = [10u8, 128, 20, 128, 30, 128, 40, 128];
    let frame = Frame::from_yuyv(3, 1, &data, 0).unwrap();
    assert_eq!(frame.image.get_pixel(2, 0), &Rgb([30, 30, 30]));

    let err = Frame::from_yuyv(3, 1, &data[..6], 0).unwrap_err();
    assert!(matches!(
      err,
      FrameError::BufferSizeMismatch {
        expected: 8,
        actual: 6
      }
    ));
  }

  #[test]
  fn jpeg_has_soi_marker() {
    let frame = Frame::new(RgbImage::new(8, 8), 0);
    let jpeg = frame.to_jpeg().unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
  }
}
