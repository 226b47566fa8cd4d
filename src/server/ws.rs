// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/server/ws.rs - 事件订阅通道
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

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{trace, warn};

use crate::server::AppState;

pub async fn websocket_handler(
  ws: WebSocketUpgrade,
  State(state): State<AppState>,
) -> impl IntoResponse {
  ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// 连接期间把订阅通道中的事件转发给客户端，任一方向结束即注销
async fn handle_socket(socket: WebSocket, state: AppState) {
  let (mut sender, mut receiver) = socket.split();
  let subscribers = state.pipeline.subscribers.clone();
  let (subscriber_id, mut rx) = subscribers.register();

  let mut send_task = tokio::spawn(async move {
    while let Some(event) = rx.recv().await {
      if sender.send(Message::Text(event)).await.is_err() {
        break;
      }
    }
  });

  let mut recv_task = tokio::spawn(async move {
    while let Some(message) = receiver.next().await {
      match message {
        Ok(Message::Close(_)) => break,
        Ok(Message::Ping(data)) => trace!("收到 ping: {} 字节", data.len()),
        Ok(_) => {}
        Err(e) => {
          warn!(subscriber_id = %subscriber_id, "连接错误: {}", e);
          break;
        }
      }
    }
  });

  tokio::select! {
    _ = &mut send_task => recv_task.abort(),
    _ = &mut recv_task => send_task.abort(),
  }

  subscribers.unregister(&subscriber_id);
}
