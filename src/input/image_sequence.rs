// 该文件是 Dongfeng （东风） 项目的一部分。
// src/input/image_sequence.rs - 按文件名顺序读取目录中的图像帧
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::Frame,
  input::{FrameSource, SourceKind},
};

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum ImageSequenceInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("目录 {path} 读取失败: {source}")]
  IoError {
    path: String,
    source: std::io::Error,
  },
  #[error("目录 {0} 中没有图像帧")]
  Empty(String),
  #[error("帧 {path} 解码失败: {source}")]
  ImageError {
    path: String,
    source: image::ImageError,
  },
}

/// 把目录中的图像当作视频播放
///
/// `frames:///data/clip` 读取目录下的 png/jpg/bmp 文件，按文件名排序。
/// 最后一帧读出后尺寸变为 0，循环随之结束。
pub struct ImageSequenceInput {
  paths: Vec<PathBuf>,
  cursor: usize,
  dimensions: (u32, u32),
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "frames";
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageSequenceInputError::SchemeMismatch);
    }
    Self::open(decoded_path(url))
  }
}

impl ImageSequenceInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, ImageSequenceInputError> {
    let directory = directory.as_ref();
    let io_error = |source| ImageSequenceInputError::IoError {
      path: directory.display().to_string(),
      source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory).map_err(io_error)? {
      let path = entry.map_err(io_error)?.path();
      let is_frame = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
      if is_frame {
        paths.push(path);
      }
    }
    paths.sort();

    let Some(first) = paths.first() else {
      return Err(ImageSequenceInputError::Empty(
        directory.display().to_string(),
      ));
    };
    let dimensions =
      image::image_dimensions(first).map_err(|source| ImageSequenceInputError::ImageError {
        path: first.display().to_string(),
        source,
      })?;

    info!(
      "打开图像序列 {}: {} 帧, {}x{}",
      directory.display(),
      paths.len(),
      dimensions.0,
      dimensions.1
    );
    Ok(Self {
      paths,
      cursor: 0,
      dimensions,
    })
  }

  pub fn remaining(&self) -> usize {
    self.paths.len() - self.cursor
  }
}

impl FrameSource for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn kind(&self) -> SourceKind {
    SourceKind::Video
  }

  fn dimensions(&self) -> (u32, u32) {
    self.dimensions
  }

  fn has_active_stream(&self) -> bool {
    false
  }

  fn read_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    let Some(path) = self.paths.get(self.cursor) else {
      self.dimensions = (0, 0);
      return Ok(None);
    };
    self.cursor += 1;

    let image = image::open(path).map_err(|source| ImageSequenceInputError::ImageError {
      path: path.display().to_string(),
      source,
    })?;
    debug!("读取帧 {}", path.display());

    let frame = Frame::from(image.to_rgb8());
    self.dimensions = if self.cursor < self.paths.len() {
      (frame.width(), frame.height())
    } else {
      (0, 0)
    };
    Ok(Some(frame))
  }
}
