// 该文件是 Dongfeng （东风） 项目的一部分。
// src/output/recording.rs - 记录绘制指令的表面
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

use crate::output::{Color, Rect, Surface};

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
  StrokeRect {
    rect: Rect,
    color: Color,
    line_width: f32,
  },
  FillRect {
    rect: Rect,
    color: Color,
  },
  Text {
    text: String,
    x: f32,
    y: f32,
    size: f32,
    color: Color,
  },
}

/// 只记录绘制指令，不产生像素
///
/// 当前可见内容为上次清除之后的指令。
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
  width: u32,
  height: u32,
  commands: Vec<DrawCommand>,
  clear_count: usize,
}

impl RecordingSurface {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      commands: Vec::new(),
      clear_count: 0,
    }
  }

  pub fn commands(&self) -> &[DrawCommand] {
    &self.commands
  }

  pub fn clear_count(&self) -> usize {
    self.clear_count
  }

  pub fn stroked_rects(&self) -> Vec<Rect> {
    self
      .commands
      .iter()
      .filter_map(|c| match c {
        DrawCommand::StrokeRect { rect, .. } => Some(*rect),
        _ => None,
      })
      .collect()
  }

  pub fn texts(&self) -> Vec<&str> {
    self
      .commands
      .iter()
      .filter_map(|c| match c {
        DrawCommand::Text { text, .. } => Some(text.as_str()),
        _ => None,
      })
      .collect()
  }
}

impl Surface for RecordingSurface {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn clear(&mut self) {
    self.commands.clear();
    self.clear_count += 1;
  }

  fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: f32) {
    self.commands.push(DrawCommand::StrokeRect {
      rect,
      color,
      line_width,
    });
  }

  fn fill_rect(&mut self, rect: Rect, color: Color) {
    self.commands.push(DrawCommand::FillRect { rect, color });
  }

  fn fill_text(&mut self, text: &str, x: f32, y: f32, size: f32, color: Color) {
    self.commands.push(DrawCommand::Text {
      text: text.to_string(),
      x,
      y,
      size,
      color,
    });
  }
}
