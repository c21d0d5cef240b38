// 该文件是 Dongfeng （东风） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::{Rgb, RgbImage};
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 一帧 RGB 图像，HWC 排列
///
/// 帧由输入源持有，检测流程只读访问。尺寸可以为 0，
/// 表示输入源当前没有可显示的内容。
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
}

impl Frame {
  /// 全黑帧
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      image: RgbImage::new(width, height),
    }
  }

  /// 纯色帧
  pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
    Self {
      image: RgbImage::from_pixel(width, height, Rgb(color)),
    }
  }

  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    RgbImage::from_raw(width, height, data)
      .map(|image| Self { image })
      .ok_or(FrameError::LengthMismatch {
        expected,
        actual: 0,
      })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn is_empty(&self) -> bool {
    self.width() == 0 || self.height() == 0
  }

  pub fn as_image(&self) -> &RgbImage {
    &self.image
  }

  pub fn as_hwc(&self) -> &[u8] {
    self.image.as_raw()
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

impl AsRef<RgbImage> for Frame {
  fn as_ref(&self) -> &RgbImage {
    &self.image
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_raw_checks_length() {
    let err = Frame::from_raw(2, 2, vec![0u8; 11]).unwrap_err();
    assert_eq!(
      err,
      FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    );

    let frame = Frame::from_raw(2, 2, vec![7u8; 12]).unwrap();
    assert_eq!((frame.width(), frame.height()), (2, 2));
    assert_eq!(frame.as_hwc()[0], 7);
  }

  #[test]
  fn zero_sized_frame_is_empty() {
    assert!(Frame::new(0, 10).is_empty());
    assert!(!Frame::new(1, 1).is_empty());
  }
}
