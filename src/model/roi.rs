// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/model/roi.rs - 感兴趣区域过滤
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

use tracing::warn;

use crate::model::{BBox, Detection};

/// 半开区间求交，仅接触边缘（零面积）不算相交
pub fn intersects(a: &BBox, b: &BBox) -> bool {
  a.x1.max(b.x1) < a.x2.min(b.x2) && a.y1.max(b.y1) < a.y2.min(b.y2)
}

/// roi 为 None 时原样返回
pub fn filter_by_roi(detections: Vec<Detection>, roi: Option<&BBox>) -> Vec<Detection> {
  match roi {
    None => detections,
    Some(roi) => detections
      .into_iter()
      .filter(|d| intersects(&d.bbox, roi))
      .collect(),
  }
}

/// 归一化到 [0, 1] 的感兴趣区域
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl Roi {
  /// 解析 "x1,y1,x2,y2"，分量个数不对或不是有限数时返回 None
  pub fn parse_normalized(raw: &str) -> Option<Self> {
    let parts = raw
      .split(',')
      .map(|p| p.trim().parse::<f32>().ok().filter(|v| v.is_finite()))
      .collect::<Option<Vec<f32>>>()?;

    match parts.as_slice() {
      &[x1, y1, x2, y2] => Some(Roi {
        x1: x1.clamp(0.0, 1.0),
        y1: y1.clamp(0.0, 1.0),
        x2: x2.clamp(0.0, 1.0),
        y2: y2.clamp(0.0, 1.0),
      }),
      _ => None,
    }
  }

  pub fn to_pixels(&self, width: u32, height: u32) -> BBox {
    let (w, h) = (width as f32, height as f32);
    BBox::new(self.x1 * w, self.y1 * h, self.x2 * w, self.y2 * h)
  }
}

/// 请求中的 ROI 字符串转换为像素坐标，格式错误时降级为不过滤
pub fn resolve_roi(raw: Option<&str>, width: u32, height: u32) -> Option<BBox> {
  let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
  match Roi::parse_normalized(raw) {
    Some(roi) => Some(roi.to_pixels(width, height)),
    None => {
      warn!("ROI 格式无效，忽略过滤: {:?}", raw);
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection::new("sniper", 0.9, BBox::new(x1, y1, x2, y2))
  }

  #[test]
  fn touching_edges_do_not_intersect() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    assert!(!intersects(&a, &BBox::new(10.0, 0.0, 20.0, 10.0)));
    assert!(!intersects(&a, &BBox::new(0.0, 10.0, 10.0, 20.0)));
    assert!(intersects(&a, &BBox::new(9.5, 9.5, 20.0, 20.0)));
  }

  #[test]
  fn no_roi_is_identity() {
    let dets = vec![det(0.0, 0.0, 1.0, 1.0), det(50.0, 50.0, 60.0, 60.0)];
    assert_eq!(filter_by_roi(dets.clone(), None), dets);
  }

  #[test]
  fn keeps_only_intersecting() {
    let roi = BBox::new(0.0, 0.0, 20.0, 20.0);
    let dets = vec![
      det(5.0, 5.0, 10.0, 10.0),
      det(20.0, 0.0, 30.0, 10.0),
      det(15.0, 15.0, 40.0, 40.0),
    ];
    let kept = filter_by_roi(dets, Some(&roi));
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].bbox.x1, 5.0);
    assert_eq!(kept[1].bbox.x1, 15.0);
  }

  #[test]
  fn roi_is_clamped_then_denormalized() {
    let roi = Roi::parse_normalized("-0.5, 0.25, 1.5, 0.75").unwrap();
    assert_eq!(roi.to_pixels(200, 100), BBox::new(0.0, 25.0, 200.0, 75.0));
  }

  #[test]
  fn malformed_roi_degrades_to_none() {
    assert_eq!(Roi::parse_normalized("0.1,0.2,0.3"), None);
    assert_eq!(Roi::parse_normalized("a,b,c,d"), None);
    assert_eq!(Roi::parse_normalized("0.1,0.2,0.3,0.4,0.5"), None);
    assert_eq!(Roi::parse_normalized("0.1,NaN,0.3,0.4"), None);
    assert_eq!(resolve_roi(Some("oops"), 100, 100), None);
    assert_eq!(resolve_roi(Some(""), 100, 100), None);
    assert_eq!(resolve_roi(None, 100, 100), None);
  }
}
