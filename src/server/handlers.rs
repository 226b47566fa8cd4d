// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/server/handlers.rs - 接口处理函数
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

use std::convert::Infallible;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::input::{FrameSourceError, open_video};
use crate::model::{DetectOptions, Detection};
use crate::server::{ApiError, ApiResult, AppState};
use crate::task::{CameraStatus, ImageReport, VideoReport};
use crate::threat::{ResetScope, ThreatSnapshot};

/// multipart 表单中的上传文件与检测参数
#[derive(Default)]
struct Upload {
  file: Option<Bytes>,
  conf_threshold: Option<f32>,
  iou_threshold: Option<f32>,
  roi: Option<String>,
}

impl Upload {
  async fn read(mut multipart: Multipart) -> ApiResult<Self> {
    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await? {
      let name = field.name().unwrap_or_default().to_string();
      match name.as_str() {
        "file" | "image" | "video" => upload.file = Some(field.bytes().await?),
        "conf_threshold" | "confidence" => {
          upload.conf_threshold = Some(parse_number(&name, &field.text().await?)?)
        }
        "iou_threshold" => upload.iou_threshold = Some(parse_number(&name, &field.text().await?)?),
        "roi" => upload.roi = Some(field.text().await?),
        _ => debug!("忽略未知表单字段: {}", name),
      }
    }
    Ok(upload)
  }

  fn take_file(&mut self) -> ApiResult<Bytes> {
    self
      .file
      .take()
      .ok_or_else(|| ApiError::bad_request("缺少上传文件字段 file"))
  }
}

fn parse_number(name: &str, raw: &str) -> ApiResult<f32> {
  raw
    .trim()
    .parse()
    .map_err(|_| ApiError::bad_request(format!("{} 不是合法的数值: {:?}", name, raw)))
}

pub async fn detect_image(
  State(state): State<AppState>,
  multipart: Multipart,
) -> ApiResult<Json<ImageReport>> {
  let mut upload = Upload::read(multipart).await?;
  let data = upload.take_file()?;
  let defaults = state.config.detect;
  let options = DetectOptions::new(
    upload.conf_threshold.unwrap_or(defaults.conf_threshold),
    upload.iou_threshold.unwrap_or(defaults.iou_threshold),
  );
  let roi = upload.roi;

  let images = state.images.clone();
  let report = tokio::task::spawn_blocking(move || images.run(&data, &options, roi.as_deref()))
    .await
    .map_err(ApiError::internal)??;
  Ok(Json(report))
}

pub async fn detect_video(
  State(state): State<AppState>,
  multipart: Multipart,
) -> ApiResult<Json<VideoReport>> {
  let data = Upload::read(multipart).await?.take_file()?;
  info!("收到视频文件 {} 字节", data.len());

  let videos = state.videos.clone();
  let report = tokio::task::spawn_blocking(move || {
    let decoder = open_video(data.to_vec())?;
    videos.process(decoder)
  })
  .await
  .map_err(ApiError::internal)??;
  Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
pub struct CameraStartRequest {
  #[serde(default, alias = "device_id")]
  camera_id: u32,
}

pub async fn camera_start(
  State(state): State<AppState>,
  request: Option<Json<CameraStartRequest>>,
) -> ApiResult<Json<Value>> {
  let device_id = request.map(|Json(r)| r.camera_id).unwrap_or_default();
  let camera = state.camera.clone();
  let status = tokio::task::spawn_blocking(move || camera.start(device_id))
    .await
    .map_err(ApiError::internal)??;
  Ok(Json(json!({
    "success": true,
    "message": format!("摄像头 {} 已启动", device_id),
    "status": status,
  })))
}

pub async fn camera_stop(State(state): State<AppState>) -> ApiResult<Json<Value>> {
  let camera = state.camera.clone();
  let stopped = tokio::task::spawn_blocking(move || camera.stop())
    .await
    .map_err(ApiError::internal)?;
  let message = if stopped {
    "摄像头已停止"
  } else {
    "摄像头未在运行"
  };
  Ok(Json(json!({ "success": true, "message": message })))
}

pub async fn camera_status(State(state): State<AppState>) -> ApiResult<Json<CameraStatus>> {
  let camera = state.camera.clone();
  let status = tokio::task::spawn_blocking(move || camera.status())
    .await
    .map_err(ApiError::internal)?;
  Ok(Json(status))
}

const MJPEG_BOUNDARY: &str = "frame";

fn mjpeg_part(jpeg: &Bytes) -> Bytes {
  let header = format!(
    "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
    MJPEG_BOUNDARY,
    jpeg.len()
  );
  let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
  part.extend_from_slice(header.as_bytes());
  part.extend_from_slice(jpeg);
  part.extend_from_slice(b"\r\n");
  Bytes::from(part)
}

/// 慢速观看者直接跳过积压的帧；摄像头停止或断开时流随之结束
pub async fn camera_stream(State(state): State<AppState>) -> ApiResult<Response> {
  let rx = state
    .camera
    .feed()
    .subscribe()
    .ok_or(ApiError::Camera(FrameSourceError::NotStreaming))?;
  let stream = futures_util::stream::unfold(rx, |mut rx| async move {
    loop {
      match rx.recv().await {
        Ok(jpeg) => return Some((Ok::<_, Infallible>(mjpeg_part(&jpeg)), rx)),
        Err(RecvError::Lagged(skipped)) => debug!("直播观看者落后，跳过 {} 帧", skipped),
        Err(RecvError::Closed) => return None,
      }
    }
  });

  Ok((
    [
      (
        header::CONTENT_TYPE,
        format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
      ),
      (header::CACHE_CONTROL, "no-cache".to_string()),
    ],
    Body::from_stream(stream),
  )
    .into_response())
}

pub async fn stats(State(state): State<AppState>) -> Json<ThreatSnapshot> {
  Json(state.pipeline.aggregator.snapshot())
}

pub async fn history(State(state): State<AppState>) -> Json<Vec<Detection>> {
  Json(state.pipeline.aggregator.history())
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetQuery {
  #[serde(default)]
  clear_history: bool,
}

pub async fn reset_stats(
  State(state): State<AppState>,
  Query(query): Query<ResetQuery>,
) -> Json<Value> {
  let scope = if query.clear_history {
    ResetScope::All
  } else {
    ResetScope::Counters
  };
  state.pipeline.aggregator.reset(scope);
  Json(json!({
    "success": true,
    "stats": state.pipeline.aggregator.snapshot(),
  }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
  Json(json!({
    "status": "ok",
    "mode": state.pipeline.detector.mode(),
    "version": env!("CARGO_PKG_VERSION"),
  }))
}

pub async fn model_info(State(state): State<AppState>) -> Json<Value> {
  let detector = &state.pipeline.detector;
  let options = detector.options();
  Json(json!({
    "name": detector.model_name(),
    "classes": [detector.class_label()],
    "confidence_threshold": options.conf_threshold,
    "iou_threshold": options.iou_threshold,
    "mode": detector.mode(),
  }))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mjpeg_part_layout() {
    let part = mjpeg_part(&Bytes::from_static(b"JPEG"));
    assert_eq!(
      &part[..],
      b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
    );
  }

  #[test]
  fn numbers_are_validated() {
    assert_eq!(parse_number("conf_threshold", " 0.5 ").unwrap(), 0.5);
    assert!(matches!(
      parse_number("conf_threshold", "high"),
      Err(ApiError::BadRequest(_))
    ));
  }
}
