// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/server/config.rs - 服务配置
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

use crate::broadcast::DEFAULT_SUBSCRIBER_BUFFER;
use crate::input::CaptureConfig;
use crate::model::{DEFAULT_CLASS_LABEL, DetectOptions};

const DEFAULT_MAX_UPLOAD_MB: usize = 100;

/// 已校验的服务配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
  pub class_label: String,
  /// 请求未给出阈值时使用
  pub detect: DetectOptions,
  /// 摄像头启动参数
  pub capture: CaptureConfig,
  pub max_upload_bytes: usize,
  pub subscriber_buffer: usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: "0.0.0.0".to_string(),
      port: 8000,
      class_label: DEFAULT_CLASS_LABEL.to_string(),
      detect: DetectOptions::default(),
      capture: CaptureConfig::default(),
      max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
      subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
    }
  }
}

impl ServerConfig {
  pub fn bind_addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  pub fn with_max_upload_mb(mut self, mb: usize) -> Self {
    self.max_upload_bytes = mb.max(1) * 1024 * 1024;
    self
  }
}
