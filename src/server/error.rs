// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/server/error.rs - 接口错误
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

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::input::{DecodeError, FrameSourceError};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("请求无效: {0}")]
  BadRequest(String),
  #[error("上传内容超过大小限制")]
  PayloadTooLarge,
  #[error("无法解码上传内容: {0}")]
  Decode(#[from] DecodeError),
  #[error("{0}")]
  Camera(#[from] FrameSourceError),
  #[error("内部错误: {0}")]
  Internal(String),
}

impl ApiError {
  pub fn bad_request(msg: impl Into<String>) -> Self {
    Self::BadRequest(msg.into())
  }

  pub fn internal(msg: impl ToString) -> Self {
    Self::Internal(msg.to_string())
  }

  fn status_code(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
      ApiError::Decode(DecodeError::Empty | DecodeError::Unsupported(_)) => {
        StatusCode::BAD_REQUEST
      }
      ApiError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::Camera(_) => StatusCode::CONFLICT,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<MultipartError> for ApiError {
  fn from(e: MultipartError) -> Self {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
      ApiError::PayloadTooLarge
    } else {
      ApiError::BadRequest(e.body_text())
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status_code();
    let body = match &self {
      // 摄像头接口沿用 {success, message}
      ApiError::Camera(e) => {
        warn!("摄像头操作失败: {}", e);
        json!({ "success": false, "message": e.to_string() })
      }
      ApiError::Internal(msg) => {
        error!("内部错误: {}", msg);
        json!({ "detail": self.to_string() })
      }
      _ => {
        warn!("请求失败: {}", self);
        json!({ "detail": self.to_string() })
      }
    };
    (status, Json(body)).into_response()
  }
}
