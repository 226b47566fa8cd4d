// 该文件是 Jingjie （警戒哨） 项目的一部分。
// tests/api.rs - HTTP 接口测试
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
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::Router;
use futures_util::StreamExt;
use image::codecs::gif::GifEncoder;
use image::{Delay, Frame, ImageFormat, Rgba, RgbaImage, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use jingjie::input::{CaptureConfig, SyntheticCapture};
use jingjie::model::DetectorAdapter;
use jingjie::server::{AppState, ServerConfig, create_router};

const BOUNDARY: &str = "jingjie-test-boundary";

fn state() -> AppState {
  let config = ServerConfig {
    capture: CaptureConfig {
      width: 64,
      height: 48,
      fps: 30,
    },
    ..ServerConfig::default()
  };
  AppState::new(
    config,
    Arc::new(DetectorAdapter::demo("sniper")),
    Arc::new(SyntheticCapture::default()),
  )
  .unwrap()
}

fn png(width: u32, height: u32) -> Vec<u8> {
  let mut buf = Cursor::new(Vec::new());
  RgbImage::new(width, height)
    .write_to(&mut buf, ImageFormat::Png)
    .unwrap();
  buf.into_inner()
}

fn gif(frames: u32, delay_ms: u32) -> Vec<u8> {
  let mut buf = Vec::new();
  {
    let mut encoder = GifEncoder::new(&mut buf);
    let frames = (0..frames).map(|i| {
      let image = RgbaImage::from_pixel(32, 32, Rgba([0, (i * 30) as u8, 0, 255]));
      Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1))
    });
    encoder.encode_frames(frames).unwrap();
  }
  buf
}

enum Part<'a> {
  File(&'a str, &'a [u8]),
  Text(&'a str, &'a str),
}

fn multipart(parts: &[Part]) -> Vec<u8> {
  let mut body = Vec::new();
  for part in parts {
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    match part {
      Part::File(name, data) => {
        body.extend_from_slice(
          format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"upload.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            name
          )
          .as_bytes(),
        );
        body.extend_from_slice(data);
      }
      Part::Text(name, value) => {
        body.extend_from_slice(
          format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
            name, value
          )
          .as_bytes(),
        );
      }
    }
    body.extend_from_slice(b"\r\n");
  }
  body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
  body
}

fn upload(uri: &str, parts: &[Part]) -> Request<Body> {
  Request::post(uri)
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={}", BOUNDARY),
    )
    .body(Body::from(multipart(parts)))
    .unwrap()
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
  let response = app.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
  (status, value)
}

fn get(uri: &str) -> Request<Body> {
  Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
  Request::post(uri)
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(json.to_string()))
    .unwrap()
}

#[tokio::test]
async fn health_and_model_info() {
  let app = create_router(state());

  let (status, body) = call(&app, get("/api/health")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "ok");
  assert_eq!(body["mode"], "demo");

  let (status, body) = call(&app, get("/api/model-info")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["name"], "demo");
  assert_eq!(body["classes"], serde_json::json!(["sniper"]));
}

#[tokio::test]
async fn detect_image_updates_stats() {
  let app = create_router(state());
  let image = png(160, 120);

  let (status, body) = call(
    &app,
    upload(
      "/detect/image",
      &[Part::File("file", &image), Part::Text("conf_threshold", "0.5")],
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["image_width"], 160);
  assert_eq!(body["image_height"], 120);
  assert_eq!(body["detections"].as_array().unwrap().len(), 1);
  assert_eq!(body["detections"][0]["class"], "sniper");
  assert!(
    body["annotated_image"]
      .as_str()
      .unwrap()
      .starts_with("data:image/jpeg;base64,")
  );

  let (_, stats) = call(&app, get("/api/stats")).await;
  assert_eq!(stats["total_detections"], 1);
  assert_eq!(stats["threat_level"], "MEDIUM");
}

#[tokio::test]
async fn detect_image_roi_and_threshold() {
  let app = create_router(state());
  let image = png(100, 100);

  let (_, body) = call(
    &app,
    upload(
      "/detect/image",
      &[Part::File("file", &image), Part::Text("roi", "0,0,0.1,0.1")],
    ),
  )
  .await;
  assert!(body["detections"].as_array().unwrap().is_empty());

  let (_, body) = call(
    &app,
    upload(
      "/detect/image",
      &[Part::File("file", &image), Part::Text("conf_threshold", "0.8")],
    ),
  )
  .await;
  assert!(body["detections"].as_array().unwrap().is_empty());

  let (status, _) = call(
    &app,
    upload(
      "/detect/image",
      &[Part::File("file", &image), Part::Text("roi", "garbage")],
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn detect_image_rejects_bad_uploads() {
  let app = create_router(state());

  let (status, body) = call(&app, upload("/detect/image", &[Part::Text("roi", "0,0,1,1")])).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["detail"].is_string());

  let (status, _) = call(
    &app,
    upload("/detect/image", &[Part::File("file", b"definitely not an image")]),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, _) = call(
    &app,
    upload(
      "/detect/image",
      &[
        Part::File("file", &png(10, 10)),
        Part::Text("conf_threshold", "high"),
      ],
    ),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (_, stats) = call(&app, get("/api/stats")).await;
  assert_eq!(stats["total_detections"], 0);
}

#[tokio::test]
async fn detect_video_reports_sampled_frames() {
  let app = create_router(state());
  let video = gif(12, 100);

  let (status, body) = call(&app, upload("/detect/video", &[Part::File("file", &video)])).await;
  assert_eq!(status, StatusCode::OK);
  // 10 fps → 每 5 帧采样一次：0, 5, 10
  assert_eq!(body["video_info"]["frame_count"], 12);
  assert_eq!(body["video_info"]["sampled_frames"], 3);
  assert_eq!(body["video_info"]["fps"], 10.0);
  let detections = body["detections"].as_array().unwrap();
  assert_eq!(detections.len(), 3);
  assert_eq!(detections[1]["frame_index"], 5);
  assert_eq!(detections[1]["timestamp"], 0.5);
  assert_eq!(body["stats"]["total_detections"], 3);
}

#[tokio::test]
async fn detect_video_rejects_empty_file() {
  let app = create_router(state());
  let (status, _) = call(&app, upload("/detect/video", &[Part::File("file", b"")])).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn camera_lifecycle() {
  let app = create_router(state());

  let (status, body) = call(&app, post_json("/camera/start", r#"{"camera_id": 2}"#)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["success"], true);
  assert_eq!(body["status"]["device_id"], 2);

  let (status, body) = call(&app, post_json("/camera/start", r#"{"camera_id": 2}"#)).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["success"], false);

  let (_, body) = call(&app, get("/camera/status")).await;
  assert_eq!(body["is_streaming"], true);
  assert_eq!(body["width"], 64);

  let response = app.clone().oneshot(get("/camera/stream")).await.unwrap();
  assert_eq!(
    response.headers()[header::CONTENT_TYPE],
    "multipart/x-mixed-replace; boundary=frame"
  );
  let mut stream = response.into_body().into_data_stream();
  let part = tokio::time::timeout(Duration::from_secs(2), stream.next())
    .await
    .expect("no frame within 2s")
    .unwrap()
    .unwrap();
  assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));

  let (status, body) = call(&app, Request::post("/camera/stop").body(Body::empty()).unwrap()).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["success"], true);

  // 停止后观看者的流随之结束
  let ended = tokio::time::timeout(Duration::from_secs(2), async {
    while let Some(chunk) = stream.next().await {
      chunk.unwrap();
    }
  })
  .await;
  assert!(ended.is_ok());

  let (_, body) = call(&app, get("/camera/status")).await;
  assert_eq!(body["is_streaming"], false);

  let (status, body) = call(&app, get("/camera/stream")).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["success"], false);
}

#[tokio::test]
async fn camera_start_failure_is_reported() {
  let app = create_router(state());
  let (status, body) = call(&app, post_json("/camera/start", r#"{"camera_id": 42}"#)).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["success"], false);
  assert!(body["message"].as_str().unwrap().contains("42"));
}

#[tokio::test]
async fn reset_stats_scopes() {
  let app = create_router(state());
  let image = png(50, 50);
  call(&app, upload("/detect/image", &[Part::File("file", &image)])).await;

  let (status, body) = call(&app, Request::post("/api/reset-stats").body(Body::empty()).unwrap()).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["stats"]["total_detections"], 0);
  let (_, history) = call(&app, get("/api/history")).await;
  assert_eq!(history.as_array().unwrap().len(), 1);

  call(
    &app,
    Request::post("/api/reset-stats?clear_history=true")
      .body(Body::empty())
      .unwrap(),
  )
  .await;
  let (_, history) = call(&app, get("/api/history")).await;
  assert!(history.as_array().unwrap().is_empty());
}
