// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/model/http_inference.rs - 远程 HTTP 推理后端
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

use std::time::Duration;

use image::RgbImage;
use reqwest::blocking::{
  Client,
  multipart::{Form, Part},
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::FromUrl;
use crate::frame::encode_jpeg;
use crate::model::{DetectOptions, Inference, InferenceError, RawDetection};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// 通过 multipart 上传 JPEG 到远程推理服务
///
/// URL 形如 `http://host:port/predict?timeout=10`，查询参数 timeout 为秒数。
/// 阻塞客户端，不能在异步运行时内部构造或析构。
pub struct HttpInference {
  client: Client,
  endpoint: url::Url,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PredictResponse {
  Wrapped { detections: Vec<RawDetection> },
  Bare(Vec<RawDetection>),
}

impl HttpInference {
  pub fn new(endpoint: url::Url, timeout: Duration) -> Result<Self, InferenceError> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| InferenceError::Unavailable(e.to_string()))?;
    info!("远程推理后端: {}", endpoint);
    Ok(Self { client, endpoint })
  }
}

impl FromUrl for HttpInference {
  type Error = InferenceError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != "http" && url.scheme() != "https" {
      return Err(InferenceError::Unavailable(format!(
        "不支持的推理后端协议: {}",
        url.scheme()
      )));
    }
    let timeout = url
      .query_pairs()
      .find(|(k, _)| k == "timeout")
      .and_then(|(_, v)| v.parse::<u64>().ok())
      .unwrap_or(DEFAULT_TIMEOUT_SECS);

    let mut endpoint = url.clone();
    let kept: Vec<(String, String)> = url
      .query_pairs()
      .filter(|(k, _)| k != "timeout")
      .map(|(k, v)| (k.into_owned(), v.into_owned()))
      .collect();
    if kept.is_empty() {
      endpoint.set_query(None);
    } else {
      endpoint.query_pairs_mut().clear().extend_pairs(kept);
    }

    Self::new(endpoint, Duration::from_secs(timeout))
  }
}

impl Inference for HttpInference {
  fn name(&self) -> &str {
    self.endpoint.as_str()
  }

  fn infer(
    &self,
    image: &RgbImage,
    options: &DetectOptions,
  ) -> Result<Vec<RawDetection>, InferenceError> {
    let jpeg = encode_jpeg(image).map_err(|e| InferenceError::InvalidInput(e.to_string()))?;
    let part = Part::bytes(jpeg)
      .file_name("frame.jpg")
      .mime_str("image/jpeg")
      .map_err(|e| InferenceError::Runtime(e.to_string()))?;
    let form = Form::new()
      .part("file", part)
      .text("conf_threshold", options.conf_threshold.to_string())
      .text("iou_threshold", options.iou_threshold.to_string());

    let resp = self
      .client
      .post(self.endpoint.clone())
      .multipart(form)
      .send()
      .map_err(|e| InferenceError::Unavailable(e.to_string()))?;

    if !resp.status().is_success() {
      return Err(InferenceError::Runtime(format!(
        "推理服务返回 {}",
        resp.status()
      )));
    }

    let parsed: PredictResponse = resp
      .json()
      .map_err(|e| InferenceError::Runtime(e.to_string()))?;
    let detections = match parsed {
      PredictResponse::Wrapped { detections } => detections,
      PredictResponse::Bare(detections) => detections,
    };
    debug!("远程推理返回 {} 个检测", detections.len());
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timeout_query_is_consumed() {
    let url = url::Url::parse("http://127.0.0.1:9000/predict?timeout=3&model=v2").unwrap();
    let backend = HttpInference::from_url(&url).unwrap();
    assert_eq!(backend.name(), "http://127.0.0.1:9000/predict?model=v2");
  }

  #[test]
  fn rejects_other_schemes() {
    let url = url::Url::parse("ftp://example.com/predict").unwrap();
    assert!(HttpInference::from_url(&url).is_err());
  }

  #[test]
  fn accepts_both_response_shapes() {
    let wrapped: PredictResponse =
      serde_json::from_str(r#"{"detections":[{"score":0.5,"bbox":[0,0,1,1]}]}"#).unwrap();
    let bare: PredictResponse =
      serde_json::from_str(r#"[{"class_id":1,"score":0.5,"bbox":[0,0,1,1]}]"#).unwrap();
    assert!(matches!(wrapped, PredictResponse::Wrapped { detections } if detections.len() == 1));
    assert!(matches!(bare, PredictResponse::Bare(detections) if detections[0].class_id == 1));
  }
}
