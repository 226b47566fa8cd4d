// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/input/image_file.rs - 上传图像解码
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

use image::{ImageReader, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("文件为空")]
  Empty,
  #[error("不支持的格式: {0}")]
  Unsupported(String),
  #[error("图像解码失败: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("视频解码失败: {0}")]
  Video(String),
}

/// 按内容识别格式并解码为 RGB
pub fn decode_image(data: &[u8]) -> Result<RgbImage, DecodeError> {
  if data.is_empty() {
    return Err(DecodeError::Empty);
  }
  let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
  if reader.format().is_none() {
    return Err(DecodeError::Unsupported("无法识别的图像格式".to_string()));
  }
  Ok(reader.decode()?.to_rgb8())
}
