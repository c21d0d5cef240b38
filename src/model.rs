// 该文件是 Dongfeng （东风） 项目的一部分。
// src/model.rs - 模型
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

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::RGB_CHANNELS,
  tensor::{Tensor, TensorLedger, TensorScope},
};

mod loader;
pub use self::loader::{AssetManifest, LoadError, LoadProgress, WeightGroup, load_model};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxError, OnnxModel, OnnxModelBuilder};

/// 推理引擎
///
/// 实现者只负责执行计算图；形状检查、异步调度和张量释放由 [`ModelHandle`] 处理。
pub trait Model: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, input: &Tensor) -> Result<RawDetections, Self::Error>;
}

/// 由模型字节构建推理引擎
pub trait BuildModel: Send + 'static {
  type Model: Model;
  type Error: std::error::Error + Send + Sync + 'static;
  /// 描述文件中 `format` 字段的取值
  const FORMAT: &'static str;

  fn build(self, bytes: Vec<u8>, info: &ModelInfo) -> Result<Self::Model, Self::Error>;
}

/// 模型输入形状 `(batch, height, width, channels)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
  pub batch: usize,
  pub height: usize,
  pub width: usize,
  pub channels: usize,
}

impl InputShape {
  pub fn new(height: usize, width: usize) -> Self {
    Self {
      batch: 1,
      height,
      width,
      channels: RGB_CHANNELS,
    }
  }

  /// 从清单中的维度解析，要求 batch 为 1、通道为 3
  pub fn from_dims(dims: &[i64]) -> Result<Self, String> {
    let [batch, height, width, channels] = dims else {
      return Err(format!("输入形状必须是 4 维，实际为 {:?}", dims));
    };
    if *batch != 1 && *batch != -1 {
      return Err(format!("batch 必须为 1，实际为 {}", batch));
    }
    if *channels != RGB_CHANNELS as i64 {
      return Err(format!("通道数必须为 3，实际为 {}", channels));
    }
    if *height <= 0 || *width <= 0 {
      return Err(format!("输入尺寸无效: {}x{}", width, height));
    }
    Ok(Self::new(*height as usize, *width as usize))
  }

  pub fn dims(&self) -> [usize; 4] {
    [self.batch, self.height, self.width, self.channels]
  }

  pub fn as_tuple(&self) -> (usize, usize, usize, usize) {
    (self.batch, self.height, self.width, self.channels)
  }
}

/// 模型输出的边框排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxFormat {
  /// left, top, right, bottom
  #[default]
  Xyxy,
  /// top, left, bottom, right
  Yxyx,
}

impl BoxFormat {
  /// 转为 `[x_min, y_min, x_max, y_max]`
  pub fn to_xyxy(self, raw: [f32; 4]) -> [f32; 4] {
    match self {
      BoxFormat::Xyxy => raw,
      BoxFormat::Yxyx => [raw[1], raw[0], raw[3], raw[2]],
    }
  }
}

/// 模型元信息
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
  pub name: String,
  pub input_shape: InputShape,
  pub box_format: BoxFormat,
  /// 边框坐标是否归一化到 [0, 1]
  pub normalized_boxes: bool,
}

impl ModelInfo {
  pub fn new(name: impl Into<String>, input_shape: InputShape) -> Self {
    Self {
      name: name.into(),
      input_shape,
      box_format: BoxFormat::default(),
      normalized_boxes: false,
    }
  }
}

/// 推理引擎返回的三个平行数组
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
  /// 每个检测 4 个坐标
  pub boxes: Vec<f32>,
  pub scores: Vec<f32>,
  pub classes: Vec<u32>,
}

impl RawDetections {
  pub fn new(boxes: Vec<f32>, scores: Vec<f32>, classes: Vec<u32>) -> Result<Self, ModelError> {
    let raw = Self {
      boxes,
      scores,
      classes,
    };
    raw.check()?;
    Ok(raw)
  }

  /// 检查三个数组的检测数量一致
  pub fn check(&self) -> Result<(), ModelError> {
    let count = self.scores.len();
    if self.boxes.len() != count * 4 || self.classes.len() != count {
      return Err(ModelError::OutputMismatch {
        boxes: self.boxes.len(),
        scores: self.scores.len(),
        classes: self.classes.len(),
      });
    }
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  pub fn box_at(&self, index: usize) -> Option<[f32; 4]> {
    match self.boxes.get(index * 4..index * 4 + 4)? {
      &[x1, y1, x2, y2] => Some([x1, y1, x2, y2]),
      _ => None,
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("输入形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: [usize; 4],
    actual: [usize; 4],
  },
  #[error("模型输出数量不一致: boxes {boxes}, scores {scores}, classes {classes}")]
  OutputMismatch {
    boxes: usize,
    scores: usize,
    classes: usize,
  },
  #[error("推理引擎错误: {0}")]
  Engine(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("推理任务异常退出: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// 已加载并预热的模型
///
/// 整个应用只有一个实例，各输入源通过 `Arc` 只读共享。
pub struct ModelHandle<M> {
  engine: Arc<M>,
  info: ModelInfo,
}

impl<M: Model> ModelHandle<M> {
  pub fn new(engine: M, info: ModelInfo) -> Self {
    Self {
      engine: Arc::new(engine),
      info,
    }
  }

  pub fn info(&self) -> &ModelInfo {
    &self.info
  }

  pub fn input_shape(&self) -> InputShape {
    self.info.input_shape
  }

  /// 异步推理
  ///
  /// 张量被移入阻塞线程池，推理结束后立即释放；其余输出由引擎丢弃。
  pub async fn infer(&self, tensor: Tensor) -> Result<RawDetections, ModelError> {
    let expected = self.info.input_shape.dims();
    let actual = tensor.shape();
    if expected != actual {
      return Err(ModelError::ShapeMismatch { expected, actual });
    }

    let engine = Arc::clone(&self.engine);
    let raw = tokio::task::spawn_blocking(move || {
      let result = engine.infer(&tensor);
      drop(tensor);
      result
    })
    .await?
    .map_err(|e| ModelError::Engine(Box::new(e)))?;

    raw.check()?;
    debug!("推理得到 {} 个候选目标", raw.len());
    Ok(raw)
  }

  /// 用全 1 张量跑一次推理并丢弃结果
  pub async fn warm_up(&self, ledger: &TensorLedger) -> Result<(), ModelError> {
    info!("预热模型 {}", self.info.name);
    let scope = TensorScope::enter(ledger, "warm-up");
    let ones = scope.ones(self.info.input_shape);
    let now = std::time::Instant::now();
    let raw = self.infer(ones).await?;
    info!("预热完成，耗时: {:.2?}，输出 {} 个候选", now.elapsed(), raw.len());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Echo;

  #[derive(Error, Debug)]
  #[error("echo failed")]
  struct EchoError;

  impl Model for Echo {
    type Error = EchoError;

    fn infer(&self, input: &Tensor) -> Result<RawDetections, Self::Error> {
      let [_, h, w, _] = input.shape();
      Ok(RawDetections {
        boxes: vec![0.0, 0.0, w as f32, h as f32],
        scores: vec![1.0],
        classes: vec![0],
      })
    }
  }

  #[test]
  fn input_shape_from_manifest_dims() {
    assert_eq!(
      InputShape::from_dims(&[1, 320, 416, 3]).unwrap(),
      InputShape::new(320, 416)
    );
    assert!(InputShape::from_dims(&[2, 640, 640, 3]).is_err());
    assert!(InputShape::from_dims(&[1, 640, 640, 1]).is_err());
    assert!(InputShape::from_dims(&[1, 640, 640]).is_err());
  }

  #[test]
  fn yxyx_boxes_are_reordered() {
    assert_eq!(
      BoxFormat::Yxyx.to_xyxy([1.0, 2.0, 3.0, 4.0]),
      [2.0, 1.0, 4.0, 3.0]
    );
  }

  #[test]
  fn mismatched_outputs_rejected() {
    let err = RawDetections::new(vec![0.0; 8], vec![0.5], vec![1]).unwrap_err();
    assert!(matches!(err, ModelError::OutputMismatch { boxes: 8, .. }));
  }

  #[tokio::test]
  async fn infer_checks_shape_and_releases_tensor() {
    let ledger = TensorLedger::new();
    let handle = ModelHandle::new(Echo, ModelInfo::new("echo", InputShape::new(8, 8)));

    let scope = TensorScope::enter(&ledger, "test");
    let wrong = scope.ones(InputShape::new(4, 4));
    let err = handle.infer(wrong).await.unwrap_err();
    assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    assert_eq!(ledger.live_tensors(), 0);

    let right = scope.ones(InputShape::new(8, 8));
    let raw = handle.infer(right).await.unwrap();
    assert_eq!(raw.box_at(0), Some([0.0, 0.0, 8.0, 8.0]));
    assert_eq!(raw.box_at(1), None);
    assert_eq!(ledger.live_tensors(), 0);
  }
}
