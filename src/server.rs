// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/server.rs - HTTP / WebSocket 服务
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

use std::future::Future;

use tokio::net::TcpListener;
use tracing::info;

mod config;
mod error;
mod handlers;
mod routes;
mod state;
mod ws;

pub use self::config::ServerConfig;
pub use self::error::{ApiError, ApiResult};
pub use self::routes::create_router;
pub use self::state::AppState;

/// 在给定监听器上运行服务，直到 `shutdown` 完成
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
  F: Future<Output = ()> + Send + 'static,
{
  if let Ok(addr) = listener.local_addr() {
    info!("服务监听于 http://{}", addr);
  }
  axum::serve(listener, create_router(state))
    .with_graceful_shutdown(shutdown)
    .await
}
