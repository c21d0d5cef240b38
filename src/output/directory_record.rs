// 该文件是 Dongfeng （东风） 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录检测结果
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

use chrono::{Datelike, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::Frame,
  output::{Detection, ImageSurface, Render},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 目录记录输出
///
/// `record:///data/out` 保存叠加后的画面和同名 `.txt` 检测记录，
/// 目录按 年/月/日 划分。`?record=id` 记录类别编号而非名称，
/// `?always` 在没有检测时也保存。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  label_with_name: bool,
  always: bool,
  frame_counter: Mutex<u16>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let label_with_name = !uri.query_pairs().any(|(k, v)| k == "record" && v == "id");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(decoded_path(uri)),
      label_with_name,
      always,
      frame_counter: Mutex::new(0),
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    let mut counter = self.frame_counter.lock();
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn record(&self, detections: &[Detection], path: &Path) -> Result<(), std::io::Error> {
    let records: Vec<String> = detections
      .iter()
      .map(|d| {
        let name = if self.label_with_name {
          d.label.clone()
        } else {
          d.class_id.to_string()
        };
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          name, d.score, d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]
        )
      })
      .collect();
    std::fs::write(path.with_extension("txt"), records.join("\n"))
  }
}

impl Render<ImageSurface> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &Frame,
    surface: &ImageSurface,
    detections: &[Detection],
  ) -> Result<(), Self::Error> {
    if !self.always && detections.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    surface.composite(frame).save(&path)?;
    self.record(detections, &path)?;
    debug!("记录 {} 个检测到 {}", detections.len(), path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::output::embedded_font;

  fn output_for(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let url = url::Url::parse(&format!("record://{}{}", dir.display(), query)).unwrap();
    DirectoryRecordOutput::from_url(&url).unwrap()
  }

  fn files_with_extension(root: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else if path.extension().is_some_and(|e| e == ext) {
          found.push(path);
        }
      }
    }
    found
  }

  #[test]
  fn skips_empty_frames_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let surface = ImageSurface::new(8, 8, embedded_font().unwrap());
    let frame = Frame::filled(8, 8, [0, 0, 0]);

    output_for(dir.path(), "")
      .render_result(&frame, &surface, &[])
      .unwrap();
    assert!(files_with_extension(dir.path(), "png").is_empty());

    output_for(dir.path(), "?always")
      .render_result(&frame, &surface, &[])
      .unwrap();
    assert_eq!(files_with_extension(dir.path(), "png").len(), 1);
  }

  #[test]
  fn writes_record_with_class_ids() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_for(dir.path(), "?record=id");
    let detection = Detection {
      index: 0,
      class_id: 16,
      label: "dog".to_string(),
      score: 0.5,
      bbox: [1.0, 2.0, 3.0, 4.0],
    };
    output
      .render_result(
        &Frame::filled(8, 8, [0, 0, 0]),
        &ImageSurface::new(8, 8, embedded_font().unwrap()),
        &[detection],
      )
      .unwrap();

    let records = files_with_extension(dir.path(), "txt");
    assert_eq!(records.len(), 1);
    let text = std::fs::read_to_string(&records[0]).unwrap();
    assert_eq!(text, "16, 0.5000, 1.0, 2.0, 3.0, 4.0");
  }
}
