// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/lib.rs - 库主文件
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

//! 警戒哨：对图像、视频文件和摄像头画面做目标检测，维护威胁统计并向订阅者推送事件。

pub mod broadcast;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod server;
pub mod task;
pub mod threat;

/// 从 URL 构造组件，采集后端、推理后端和输出都按方案选择实现
pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

/// 只接受单一方案的组件
pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}
