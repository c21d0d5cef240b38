// 该文件是 Dongfeng （东风） 项目的一部分。
// src/model/loader.rs - 模型资源加载
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

//! # 模型资源
//!
//! 模型资源是一个目录，包含描述文件 `model.json` 和若干权重分片：
//!
//! ```json
//! {
//!   "name": "yolov5n",
//!   "format": "onnx",
//!   "inputShape": [1, 640, 640, 3],
//!   "weightsManifest": [{ "paths": ["group1-shard1of2.bin", "group1-shard2of2.bin"] }],
//!   "boxFormat": "xyxy",
//!   "normalizedBoxes": false
//! }
//! ```
//!
//! 分片按顺序拼接成完整的模型文件。目录可以通过 `file://`、`http://`
//! 或 `https://` 访问；直接指向 `.onnx` 文件的地址视为只有一个分片的资源。

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  config::DetectConfig,
  model::{BoxFormat, BuildModel, InputShape, ModelError, ModelHandle, ModelInfo},
  task::StopToken,
  tensor::TensorLedger,
};

const MANIFEST_FILE: &str = "model.json";
const SINGLE_FILE_EXTENSION: &str = ".onnx";

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("不支持的地址方案: {0}")]
  UnsupportedScheme(String),
  #[error("无效的模型地址: {0}")]
  Url(#[from] url::ParseError),
  #[error("无效的文件路径: {0}")]
  InvalidPath(Url),
  #[error("读取 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("下载失败: {0}")]
  Http(#[from] reqwest::Error),
  #[error("模型描述文件解析失败: {0}")]
  Manifest(#[from] serde_json::Error),
  #[error("不支持的模型格式 '{found}'，期望 '{expected}'")]
  UnsupportedFormat { expected: String, found: String },
  #[error("模型输入形状无效: {0}")]
  InvalidShape(String),
  #[error("模型权重为空")]
  EmptyWeights,
  #[error("推理引擎构建失败: {0}")]
  Build(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("模型预热失败: {0}")]
  WarmUp(#[source] ModelError),
  #[error("加载任务异常退出: {0}")]
  Join(#[from] tokio::task::JoinError),
  #[error("模型加载已取消")]
  Cancelled,
}

/// `model.json` 描述文件
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default = "default_format")]
  pub format: String,
  pub input_shape: Vec<i64>,
  pub weights_manifest: Vec<WeightGroup>,
  #[serde(default)]
  pub box_format: BoxFormat,
  #[serde(default)]
  pub normalized_boxes: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightGroup {
  pub paths: Vec<String>,
}

fn default_format() -> String {
  "onnx".to_string()
}

/// 加载进度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadProgress {
  /// 已完成的比例，单调不减，范围 [0, 1]
  pub fraction: f32,
  /// 仅在最后一次通知（预热完成，比例为 1）时为 false
  pub loading: bool,
}

struct ProgressReporter<'a, F: FnMut(LoadProgress)> {
  observer: &'a mut F,
  last: f32,
}

impl<'a, F: FnMut(LoadProgress)> ProgressReporter<'a, F> {
  fn new(observer: &'a mut F) -> Self {
    Self {
      observer,
      last: 0.0,
    }
  }

  fn report(&mut self, fraction: f32) {
    let fraction = fraction.clamp(0.0, 1.0).max(self.last);
    self.last = fraction;
    (self.observer)(LoadProgress {
      fraction,
      loading: true,
    });
  }

  fn finish(&mut self) {
    self.last = 1.0;
    (self.observer)(LoadProgress {
      fraction: 1.0,
      loading: false,
    });
  }
}

struct ResolvedAsset {
  info: ModelInfo,
  format: String,
  shards: Vec<Url>,
}

async fn fetch(url: &Url) -> Result<Vec<u8>, LoadError> {
  match url.scheme() {
    "file" => {
      let path = url
        .to_file_path()
        .map_err(|_| LoadError::InvalidPath(url.clone()))?;
      tokio::fs::read(&path)
        .await
        .map_err(|source| LoadError::Io { path, source })
    }
    "http" | "https" => {
      let response = reqwest::get(url.clone()).await?.error_for_status()?;
      Ok(response.bytes().await?.to_vec())
    }
    scheme => Err(LoadError::UnsupportedScheme(scheme.to_string())),
  }
}

fn manifest_url(url: &Url) -> Result<Url, LoadError> {
  let path = url.path();
  if path.ends_with(".json") {
    Ok(url.clone())
  } else if path.ends_with('/') {
    Ok(url.join(MANIFEST_FILE)?)
  } else {
    let mut manifest = url.clone();
    manifest.set_path(&format!("{}/{}", path, MANIFEST_FILE));
    Ok(manifest)
  }
}

async fn resolve_asset(url: &Url, config: &DetectConfig) -> Result<ResolvedAsset, LoadError> {
  if url.path().ends_with(SINGLE_FILE_EXTENSION) {
    debug!("单文件模型: {}", url);
    return Ok(ResolvedAsset {
      info: ModelInfo::new(config.model_name.clone(), config.fallback_input_shape),
      format: default_format(),
      shards: vec![url.clone()],
    });
  }

  let manifest_url = manifest_url(url)?;
  info!("读取模型描述文件: {}", manifest_url);
  let manifest: AssetManifest = serde_json::from_slice(&fetch(&manifest_url).await?)?;

  let input_shape = InputShape::from_dims(&manifest.input_shape).map_err(LoadError::InvalidShape)?;
  let shards = manifest
    .weights_manifest
    .iter()
    .flat_map(|group| group.paths.iter())
    .map(|path| manifest_url.join(path))
    .collect::<Result<Vec<_>, _>>()?;

  Ok(ResolvedAsset {
    info: ModelInfo {
      name: manifest.name.unwrap_or_else(|| config.model_name.clone()),
      input_shape,
      box_format: manifest.box_format,
      normalized_boxes: manifest.normalized_boxes,
    },
    format: manifest.format,
    shards,
  })
}

/// 加载并预热模型
///
/// 进度通过 `observer` 回调通知；`stop` 被取消后在下一个分片前返回
/// [`LoadError::Cancelled`]。
pub async fn load_model<B, F>(
  url: &Url,
  builder: B,
  config: &DetectConfig,
  ledger: &TensorLedger,
  stop: &StopToken,
  mut observer: F,
) -> Result<ModelHandle<B::Model>, LoadError>
where
  B: BuildModel,
  F: FnMut(LoadProgress),
{
  let mut progress = ProgressReporter::new(&mut observer);
  progress.report(0.0);

  let asset = resolve_asset(url, config).await?;
  if asset.format != B::FORMAT {
    return Err(LoadError::UnsupportedFormat {
      expected: B::FORMAT.to_string(),
      found: asset.format,
    });
  }

  let total = asset.shards.len();
  let mut bytes = Vec::new();
  for (index, shard) in asset.shards.iter().enumerate() {
    if stop.is_cancelled() {
      return Err(LoadError::Cancelled);
    }
    let data = fetch(shard).await?;
    debug!("分片 {}/{}: {} ({} 字节)", index + 1, total, shard, data.len());
    bytes.extend_from_slice(&data);
    progress.report((index + 1) as f32 / total as f32);
  }

  if bytes.is_empty() {
    return Err(LoadError::EmptyWeights);
  }
  info!(
    "模型 {} 下载完成: {:.2} MB",
    asset.info.name,
    bytes.len() as f64 / (1024.0 * 1024.0)
  );

  let info = asset.info;
  let build_info = info.clone();
  let engine = tokio::task::spawn_blocking(move || builder.build(bytes, &build_info))
    .await?
    .map_err(|e| LoadError::Build(Box::new(e)))?;
  let handle = ModelHandle::new(engine, info);

  if stop.is_cancelled() {
    return Err(LoadError::Cancelled);
  }
  handle.warm_up(ledger).await.map_err(LoadError::WarmUp)?;

  progress.finish();
  info!("模型加载完成");
  Ok(handle)
}
