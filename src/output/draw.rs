// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::model::Detection;

static FONT_DATA: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_PADDING: i32 = 3;
const BANNER_FONT_SIZE: f32 = 24.0;
const BANNER_TEXT: &str = "THREAT DETECTED";
const BOX_THICKNESS: i32 = 2;
const THREAT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub struct Draw {
  font: FontRef<'static>,
  label_scale: PxScale,
  banner_scale: PxScale,
  color: Rgb<u8>,
}

impl Draw {
  pub fn new() -> Result<Self, InvalidFont> {
    Ok(Self {
      font: FontRef::try_from_slice(FONT_DATA)?,
      label_scale: PxScale::from(LABEL_FONT_SIZE),
      banner_scale: PxScale::from(BANNER_FONT_SIZE),
      color: THREAT_COLOR,
    })
  }

  /// 返回标注后的副本，原图不变
  pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.clone();
    self.annotate_in_place(&mut canvas, detections);
    canvas
  }

  pub fn annotate_in_place(&self, image: &mut RgbImage, detections: &[Detection]) {
    for det in detections {
      self.draw_bbox_with_label(image, det);
    }
    if !detections.is_empty() {
      self.draw_banner(image);
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, det: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (det.bbox.x1.floor() as i32).clamp(0, w - 1);
    let y_min = (det.bbox.y1.floor() as i32).clamp(0, h - 1);
    let x_max = (det.bbox.x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (det.bbox.y2.ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框加粗为 2 像素，向内收缩
    for t in 0..BOX_THICKNESS {
      let bw = x_max - x_min + 1 - 2 * t;
      let bh = y_max - y_min + 1 - 2 * t;
      if bw <= 0 || bh <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(bw as u32, bh as u32);
      draw_hollow_rect_mut(image, rect, self.color);
    }

    let label = format!(
      "{} {:.1}%",
      det.class_label.to_uppercase(),
      det.confidence * 100.0
    );
    let (tw, th) = text_size(self.label_scale, &self.font, &label);
    let label_w = (tw as i32 + 2 * LABEL_PADDING).min(w - x_min);
    let label_h = th as i32 + 2 * LABEL_PADDING;
    // 放在框上方，放不下时贴着框内侧
    let label_y = if y_min >= label_h { y_min - label_h } else { y_min };
    if label_w > 0 && label_h > 0 {
      let rect = Rect::at(x_min, label_y).of_size(label_w as u32, label_h as u32);
      draw_filled_rect_mut(image, rect, self.color);
      draw_text_mut(
        image,
        TEXT_COLOR,
        x_min + LABEL_PADDING,
        label_y + LABEL_PADDING,
        self.label_scale,
        &self.font,
        &label,
      );
    }
  }

  fn draw_banner(&self, image: &mut RgbImage) {
    let (tw, th) = text_size(self.banner_scale, &self.font, BANNER_TEXT);
    let bw = (tw as i32 + 4 * LABEL_PADDING).min(image.width() as i32);
    let bh = (th as i32 + 4 * LABEL_PADDING).min(image.height() as i32);
    if bw <= 0 || bh <= 0 {
      return;
    }
    draw_filled_rect_mut(image, Rect::at(0, 0).of_size(bw as u32, bh as u32), self.color);
    draw_text_mut(
      image,
      TEXT_COLOR,
      2 * LABEL_PADDING,
      2 * LABEL_PADDING,
      self.banner_scale,
      &self.font,
      BANNER_TEXT,
    );
  }
}

/// 检测结果的文本记录，每行一个目标
pub struct Record;

impl Record {
  pub fn format(detections: &[Detection]) -> String {
    detections
      .iter()
      .map(|d| {
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          d.class_label, d.confidence, d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2
        )
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  pub fn record(detections: &[Detection], path: &std::path::Path) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), Self::format(detections))
  }
}
