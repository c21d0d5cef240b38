// 该文件是 Dongfeng （东风） 项目的一部分。
// src/app.rs - 应用上下文
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

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  config::DetectConfig,
  frame::Frame,
  labels::ClassTable,
  model::{BuildModel, LoadError, LoadProgress, Model, ModelError, ModelHandle, load_model},
  output::{Detection, Surface, render_detections},
  preprocess::{Preprocessed, PreprocessError, preprocess},
  task::StopToken,
  tensor::{TensorLedger, TensorScope},
};

/// 单帧检测失败
#[derive(Error, Debug)]
pub enum DetectError {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Model(#[from] ModelError),
}

/// 应用上下文
///
/// 持有唯一的模型句柄、配置、类别表和张量账本。
/// 多个输入源通过 `Arc<App>` 共享同一个实例。
pub struct App<M> {
  model: ModelHandle<M>,
  config: DetectConfig,
  classes: ClassTable,
  ledger: TensorLedger,
}

impl<M: Model> App<M> {
  pub fn new(model: ModelHandle<M>, config: DetectConfig) -> Self {
    Self {
      model,
      config,
      classes: ClassTable::coco(),
      ledger: TensorLedger::new(),
    }
  }

  pub fn with_classes(mut self, classes: ClassTable) -> Self {
    self.classes = classes;
    self
  }

  /// 下载、构建并预热模型，然后创建应用上下文
  pub async fn load<B, F>(
    url: &Url,
    builder: B,
    config: DetectConfig,
    stop: &StopToken,
    observer: F,
  ) -> Result<Self, LoadError>
  where
    B: BuildModel<Model = M>,
    F: FnMut(LoadProgress),
  {
    let ledger = TensorLedger::new();
    let model = load_model(url, builder, &config, &ledger, stop, observer).await?;
    Ok(Self {
      model,
      config,
      classes: ClassTable::coco(),
      ledger,
    })
  }

  pub fn model(&self) -> &ModelHandle<M> {
    &self.model
  }

  pub fn config(&self) -> &DetectConfig {
    &self.config
  }

  pub fn classes(&self) -> &ClassTable {
    &self.classes
  }

  pub fn ledger(&self) -> &TensorLedger {
    &self.ledger
  }

  /// 对一帧执行 预处理 → 推理 → 绘制
  ///
  /// 本帧创建的张量在返回前全部释放，失败时也一样。
  pub async fn detect_frame<S: Surface + ?Sized>(
    &self,
    frame: &Frame,
    surface: &mut S,
  ) -> Result<Vec<Detection>, DetectError> {
    let shape = self.model.input_shape();
    let (raw, ratios) = {
      let scope = TensorScope::enter(&self.ledger, "frame");
      let Preprocessed { tensor, ratios, .. } =
        preprocess(&scope, frame, shape.width as u32, shape.height as u32)?;
      (self.model.infer(tensor).await?, ratios)
    };

    let detections = render_detections(
      surface,
      self.config.class_threshold,
      &raw,
      ratios,
      self.model.info(),
      &self.classes,
    );
    debug!(
      "本帧检测 {} 个目标，存活张量 {}",
      detections.len(),
      self.ledger.live_tensors()
    );
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{InputShape, ModelInfo, RawDetections},
    output::RecordingSurface,
    tensor::Tensor,
  };

  struct Fixed;

  impl Model for Fixed {
    type Error = std::io::Error;

    fn infer(&self, _input: &Tensor) -> Result<RawDetections, Self::Error> {
      Ok(RawDetections {
        boxes: vec![0.0, 0.0, 32.0, 16.0, 8.0, 8.0, 16.0, 16.0],
        scores: vec![0.9, 0.1],
        classes: vec![0, 2],
      })
    }
  }

  fn app() -> App<Fixed> {
    let handle = ModelHandle::new(Fixed, ModelInfo::new("fixed", InputShape::new(32, 32)));
    App::new(handle, DetectConfig::default())
  }

  #[tokio::test]
  async fn detect_frame_filters_and_releases() {
    let app = app();
    let mut surface = RecordingSurface::new(32, 32);
    let frame = Frame::filled(64, 32, [128, 128, 128]);

    let detections = app.detect_frame(&frame, &mut surface).await.unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label, "person");
    // 64x32 的帧 y 比例为 2
    assert_eq!(detections[0].bbox, [0.0, 0.0, 32.0, 32.0]);
    assert_eq!(app.ledger().live_tensors(), 0);
  }

  #[tokio::test]
  async fn empty_frame_is_preprocess_error() {
    let app = app();
    let mut surface = RecordingSurface::new(32, 32);
    let err = app
      .detect_frame(&Frame::new(0, 0), &mut surface)
      .await
      .unwrap_err();
    assert!(matches!(err, DetectError::Preprocess(_)));
    assert_eq!(app.ledger().live_tensors(), 0);
  }
}
