// 该文件是 Dongfeng （东风） 项目的一部分。
// src/preprocess.rs - 帧预处理
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

use image::{RgbImage, imageops::FilterType};
use ndarray::Array4;
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{Frame, RGB_CHANNELS},
  tensor::{Tensor, TensorScope},
};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入帧尺寸为空: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("模型输入尺寸为空: {width}x{height}")]
  EmptyTarget { width: u32, height: u32 },
  #[error("张量形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
}

/// 从模型输入空间映射回原始帧空间的比例
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRatios {
  pub x: f32,
  pub y: f32,
}

impl ScaleRatios {
  /// 按帧尺寸计算补齐后的边长和比例，边长取宽高中的较大者
  pub fn for_frame(width: u32, height: u32) -> Result<(u32, Self), PreprocessError> {
    if width == 0 || height == 0 {
      return Err(PreprocessError::EmptyFrame { width, height });
    }
    let side = width.max(height);
    let ratios = Self {
      x: side as f32 / width as f32,
      y: side as f32 / height as f32,
    };
    Ok((side, ratios))
  }
}

/// 预处理结果
#[derive(Debug)]
pub struct Preprocessed {
  pub tensor: Tensor,
  pub ratios: ScaleRatios,
  pub side: u32,
}

/// 在右侧和下方补零，得到 `side × side` 的正方形图像
pub fn pad_to_square(image: &RgbImage, side: u32) -> RgbImage {
  let mut padded = RgbImage::new(side, side);
  image::imageops::replace(&mut padded, image, 0, 0);
  padded
}

/// 将一帧转换为 `(1, target_h, target_w, 3)` 的归一化张量
///
/// 补齐、缩放产生的中间图像在返回前释放，只有最终张量登记在 `scope` 中。
pub fn preprocess(
  scope: &TensorScope,
  frame: &Frame,
  target_w: u32,
  target_h: u32,
) -> Result<Preprocessed, PreprocessError> {
  if target_w == 0 || target_h == 0 {
    return Err(PreprocessError::EmptyTarget {
      width: target_w,
      height: target_h,
    });
  }

  let (side, ratios) = ScaleRatios::for_frame(frame.width(), frame.height())?;
  debug!(
    "预处理帧 {}x{} -> 补齐 {}x{} -> 缩放 {}x{}",
    frame.width(),
    frame.height(),
    side,
    side,
    target_w,
    target_h
  );

  let data = {
    let padded = pad_to_square(frame.as_image(), side);
    let resized = image::imageops::resize(&padded, target_w, target_h, FilterType::Triangle);
    resized
      .into_raw()
      .into_iter()
      .map(|value| f32::from(value) / 255.0)
      .collect::<Vec<f32>>()
  };

  let array = Array4::from_shape_vec(
    (1, target_h as usize, target_w as usize, RGB_CHANNELS),
    data,
  )?;

  Ok(Preprocessed {
    tensor: scope.track(array),
    ratios,
    side,
  })
}
