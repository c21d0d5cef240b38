// 该文件是 Dongfeng （东风） 项目的一部分。
// src/input.rs - 输入源
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

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

mod image_sequence;
pub use self::image_sequence::{ImageSequenceInput, ImageSequenceInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
  /// 静态图像，只检测一次
  Image,
  Camera,
  Video,
}

impl SourceKind {
  pub fn is_streaming(self) -> bool {
    !matches!(self, SourceKind::Image)
  }
}

/// 帧来源
///
/// 对应页面上的图像、摄像头和视频元素。`read_frame` 返回 `Ok(None)`
/// 表示当前没有新帧，不代表结束；是否结束由尺寸和活动流状态判断。
pub trait FrameSource: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn kind(&self) -> SourceKind;

  /// 当前画面尺寸，没有内容时为 `(0, 0)`
  fn dimensions(&self) -> (u32, u32);

  fn has_active_stream(&self) -> bool;

  fn read_frame(&mut self) -> Result<Option<Frame>, Self::Error>;

  /// 尺寸为 0 且没有活动流
  fn is_ended(&self) -> bool {
    let (width, height) = self.dimensions();
    (width == 0 || height == 0) && !self.has_active_stream()
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("图像序列输入错误: {0}")]
  ImageSequenceInputError(#[from] ImageSequenceInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  ImageSequence(ImageSequenceInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      ImageSequenceInput::SCHEME => Ok(InputWrapper::ImageSequence(
        ImageSequenceInput::from_url(url)?,
      )),
      #[cfg(feature = "gstreamer_input")]
      GStreamerInputPipelineBuilder::SCHEME => {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        Ok(InputWrapper::GStreamerInput(input))
      }
      scheme => Err(InputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl FrameSource for InputWrapper {
  type Error = InputError;

  fn kind(&self) -> SourceKind {
    match self {
      InputWrapper::ReadImageFile(input) => input.kind(),
      InputWrapper::ImageSequence(input) => input.kind(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.kind(),
    }
  }

  fn dimensions(&self) -> (u32, u32) {
    match self {
      InputWrapper::ReadImageFile(input) => input.dimensions(),
      InputWrapper::ImageSequence(input) => input.dimensions(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.dimensions(),
    }
  }

  fn has_active_stream(&self) -> bool {
    match self {
      InputWrapper::ReadImageFile(input) => input.has_active_stream(),
      InputWrapper::ImageSequence(input) => input.has_active_stream(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.has_active_stream(),
    }
  }

  fn read_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    match self {
      InputWrapper::ReadImageFile(input) => Ok(input.read_frame()?),
      InputWrapper::ImageSequence(input) => Ok(input.read_frame()?),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => Ok(input.read_frame()?),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_input_scheme() {
    let url = url::Url::parse("rtsp://camera.local/live").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(s)) if s == "rtsp"
    ));
  }

  #[test]
  fn image_url_opens_still_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    image::RgbImage::new(6, 4).save(&path).unwrap();

    let url = url::Url::parse(&format!("image://{}", path.display())).unwrap();
    let input = InputWrapper::from_url(&url).unwrap();
    assert_eq!(input.kind(), SourceKind::Image);
    assert_eq!(input.dimensions(), (6, 4));
    assert!(!input.is_ended());
  }
}
