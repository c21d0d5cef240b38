// 该文件是 Dongfeng （东风） 项目的一部分。
// src/output.rs - 绘制表面与输出定义
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
use url::Url;

use crate::{FromUrl, frame::Frame};

pub mod draw;
pub use self::draw::{Detection, DrawStyle, render_detections};

mod recording;
pub use self::recording::{DrawCommand, RecordingSurface};

#[cfg(feature = "save_image_file")]
mod image_surface;
#[cfg(feature = "save_image_file")]
pub use self::image_surface::{ImageSurface, ImageSurfaceError, embedded_font, load_font};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

pub type Color = [u8; 3];

/// 表面坐标系中的矩形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl Rect {
  pub fn from_corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    Self {
      x: x_min,
      y: y_min,
      width: x_max - x_min,
      height: y_max - y_min,
    }
  }
}

/// 二维绘制表面
///
/// 尺寸为像素单位。叠加层每帧先整体清除再绘制，不跨帧累积。
pub trait Surface {
  fn width(&self) -> u32;
  fn height(&self) -> u32;
  fn clear(&mut self);
  fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: f32);
  fn fill_rect(&mut self, rect: Rect, color: Color);
  fn fill_text(&mut self, text: &str, x: f32, y: f32, size: f32, color: Color);

  /// 文本宽度估计
  fn measure_text(&self, text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * 0.55
  }
}

/// 将叠加层与原始帧组合后输出
pub trait Render<S>: Sized {
  type Error;
  fn render_result(
    &self,
    frame: &Frame,
    surface: &S,
    detections: &[Detection],
  ) -> Result<(), Self::Error>;
}

/// 不输出任何内容
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl<S> Render<S> for NullOutput {
  type Error = std::convert::Infallible;

  fn render_result(
    &self,
    _frame: &Frame,
    _surface: &S,
    _detections: &[Detection],
  ) -> Result<(), Self::Error> {
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Null(NullOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "save_image_file")]
    use crate::FromUrlWithScheme;

    match url.scheme() {
      "null" => Ok(OutputWrapper::Null(NullOutput)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      scheme => Err(OutputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

#[cfg(feature = "save_image_file")]
impl Render<ImageSurface> for OutputWrapper {
  type Error = OutputError;

  fn render_result(
    &self,
    frame: &Frame,
    surface: &ImageSurface,
    detections: &[Detection],
  ) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Null(_) => Ok(()),
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, surface, detections)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, surface, detections)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn null_output_from_url() {
    let url = Url::parse("null:").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Ok(OutputWrapper::Null(_))
    ));
  }

  #[test]
  fn unknown_output_scheme() {
    let url = Url::parse("rtsp://localhost/live").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch(s)) if s == "rtsp"
    ));
  }
}
