// 该文件是 Dongfeng （东风） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理引擎
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

use ort::session::{Session, builder::GraphOptimizationLevel};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  model::{BuildModel, InputShape, Model, ModelInfo, RawDetections},
  tensor::Tensor,
};

/// 检测模型至少需要的输出数量：边框、置信度、类别
const ONNX_MIN_OUTPUTS: usize = 3;

#[derive(Error, Debug)]
pub enum OnnxError {
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(String),
  #[error("模型输出数量不足: 期望至少 {ONNX_MIN_OUTPUTS} 个, 实际 {0} 个")]
  MissingOutputs(usize),
  #[error("第 {index} 个输出无法读取: {reason}")]
  BadOutput { index: usize, reason: String },
}

impl OnnxError {
  fn runtime(e: impl std::fmt::Display) -> Self {
    OnnxError::Runtime(e.to_string())
  }
}

/// 基于 ONNX Runtime 的检测模型
///
/// ONNX Runtime 的会话执行需要独占访问，多个输入源共享同一模型时按顺序执行。
pub struct OnnxModel {
  session: Mutex<Session>,
  input_shape: InputShape,
}

#[derive(Debug, Default)]
pub struct OnnxModelBuilder {
  intra_threads: Option<usize>,
}

impl OnnxModelBuilder {
  pub fn intra_threads(mut self, threads: Option<usize>) -> Self {
    self.intra_threads = threads;
    self
  }
}

impl BuildModel for OnnxModelBuilder {
  type Model = OnnxModel;
  type Error = OnnxError;
  const FORMAT: &'static str = "onnx";

  fn build(self, bytes: Vec<u8>, info: &ModelInfo) -> Result<Self::Model, Self::Error> {
    info!("创建 ONNX Runtime 推理会话: {}", info.name);
    let mut builder = Session::builder()
      .map_err(OnnxError::runtime)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(OnnxError::runtime)?;
    if let Some(threads) = self.intra_threads {
      debug!("推理线程数: {}", threads);
      builder = builder
        .with_intra_threads(threads)
        .map_err(OnnxError::runtime)?;
    }
    let session = builder
      .commit_from_memory(&bytes)
      .map_err(OnnxError::runtime)?;

    debug!("模型输入形状: {:?}", info.input_shape.dims());
    Ok(OnnxModel {
      session: Mutex::new(session),
      input_shape: info.input_shape,
    })
  }
}

impl Model for OnnxModel {
  type Error = OnnxError;

  fn infer(&self, input: &Tensor) -> Result<RawDetections, Self::Error> {
    debug!("设置模型输入");
    let value = ort::value::Tensor::from_array((self.input_shape.dims(), input.to_vec().into_boxed_slice()))
      .map_err(OnnxError::runtime)?;

    debug!("执行模型推理");
    let mut session = self.session.lock();
    let outputs = session
      .run(ort::inputs![value])
      .map_err(OnnxError::runtime)?;

    debug!("获取模型输出");
    let values: Vec<_> = outputs.iter().map(|(_, value)| value).collect();
    if values.len() < ONNX_MIN_OUTPUTS {
      return Err(OnnxError::MissingOutputs(values.len()));
    }

    let (_, boxes) = values[0]
      .try_extract_tensor::<f32>()
      .map_err(|e| OnnxError::BadOutput {
        index: 0,
        reason: e.to_string(),
      })?;
    let (_, scores) = values[1]
      .try_extract_tensor::<f32>()
      .map_err(|e| OnnxError::BadOutput {
        index: 1,
        reason: e.to_string(),
      })?;

    // 类别输出可能是浮点也可能是整数
    let classes: Vec<u32> = match values[2].try_extract_tensor::<f32>() {
      Ok((_, data)) => data.iter().map(|&c| c.max(0.0) as u32).collect(),
      Err(_) => {
        let (_, data) =
          values[2]
            .try_extract_tensor::<i64>()
            .map_err(|e| OnnxError::BadOutput {
              index: 2,
              reason: e.to_string(),
            })?;
        data.iter().map(|&c| c.max(0) as u32).collect()
      }
    };

    let raw = RawDetections {
      boxes: boxes.to_vec(),
      scores: scores.to_vec(),
      classes,
    };
    debug!("模型输出 {} 个候选，其余 {} 个输出丢弃", raw.len(), values.len() - ONNX_MIN_OUTPUTS);
    Ok(raw)
  }
}
