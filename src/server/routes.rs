// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/server/routes.rs - 路由表
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

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use crate::server::AppState;
use crate::server::handlers::{
  camera_start, camera_status, camera_stop, camera_stream, detect_image, detect_video, health,
  history, model_info, reset_stats, stats,
};
use crate::server::ws::websocket_handler;

pub fn create_router(state: AppState) -> Router {
  let detect_routes = Router::new()
    .route("/detect/image", post(detect_image))
    .route("/detect/video", post(detect_video))
    // 旧版单图接口
    .route("/api/detect", post(detect_image))
    .layer(DefaultBodyLimit::max(state.config.max_upload_bytes));

  let camera_routes = Router::new()
    .route("/camera/start", post(camera_start))
    .route("/camera/stop", post(camera_stop))
    .route("/camera/status", get(camera_status))
    .route("/camera/stream", get(camera_stream));

  let api_routes = Router::new()
    .route("/api/stats", get(stats))
    .route("/api/history", get(history))
    .route("/api/reset-stats", post(reset_stats))
    .route("/api/health", get(health))
    .route("/api/model-info", get(model_info));

  Router::new()
    .merge(detect_routes)
    .merge(camera_routes)
    .merge(api_routes)
    .route("/ws", get(websocket_handler))
    .with_state(state)
}
