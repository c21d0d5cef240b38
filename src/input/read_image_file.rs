// 该文件是 Dongfeng （东风） 项目的一部分。
// src/input/read_image_file.rs - 读取静态图像文件
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

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::Frame,
  input::{FrameSource, SourceKind},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 静态图像
///
/// 图像解码后一直保留，每次读取得到同一帧。
pub struct ImageFileInput {
  frame: Frame,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = decoded_path(url);
    let image = ImageReader::open(&path)?.with_guessed_format()?.decode()?;
    info!("读取图像 {}: {}x{}", path, image.width(), image.height());

    Ok(ImageFileInput {
      frame: Frame::from(image.to_rgb8()),
    })
  }
}

impl ImageFileInput {
  pub fn from_frame(frame: Frame) -> Self {
    Self { frame }
  }
}

impl FrameSource for ImageFileInput {
  type Error = ImageFileInputError;

  fn kind(&self) -> SourceKind {
    SourceKind::Image
  }

  fn dimensions(&self) -> (u32, u32) {
    (self.frame.width(), self.frame.height())
  }

  fn has_active_stream(&self) -> bool {
    false
  }

  fn read_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    Ok(Some(self.frame.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_is_io_error() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }

  #[test]
  fn reads_same_frame_repeatedly() {
    let mut input = ImageFileInput::from_frame(Frame::filled(3, 2, [9, 8, 7]));
    let first = input.read_frame().unwrap().unwrap();
    let second = input.read_frame().unwrap().unwrap();
    assert_eq!(first.as_hwc(), second.as_hwc());
    assert_eq!(input.dimensions(), (3, 2));
  }
}
