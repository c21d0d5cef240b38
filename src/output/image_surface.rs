// 该文件是 Dongfeng （东风） 项目的一部分。
// src/output/image_surface.rs - 基于图像的绘制表面
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage, RgbImage, imageops::FilterType};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::Frame,
  output::{Color, Rect, Surface},
};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

#[derive(Error, Debug)]
pub enum ImageSurfaceError {
  #[error("无法读取字体文件 {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("无效的字体文件: {0}")]
  InvalidFont(String),
}

/// 内置的标签字体
pub fn embedded_font() -> Result<FontArc, ImageSurfaceError> {
  FontArc::try_from_slice(EMBEDDED_FONT)
    .map_err(|_| ImageSurfaceError::InvalidFont("内置字体".to_string()))
}

/// 从文件加载标签字体
pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, ImageSurfaceError> {
  let path = path.as_ref();
  let bytes = std::fs::read(path).map_err(|source| ImageSurfaceError::Io {
    path: path.display().to_string(),
    source,
  })?;
  let font = FontArc::try_from_vec(bytes)
    .map_err(|_| ImageSurfaceError::InvalidFont(path.display().to_string()))?;
  info!("加载标签字体: {}", path.display());
  Ok(font)
}

/// 透明 RGBA 叠加层
///
/// 尺寸固定为模型输入尺寸。
pub struct ImageSurface {
  overlay: RgbaImage,
  font: FontArc,
}

impl ImageSurface {
  pub fn new(width: u32, height: u32, font: FontArc) -> Self {
    Self {
      overlay: RgbaImage::from_pixel(width, height, TRANSPARENT),
      font,
    }
  }

  pub fn overlay(&self) -> &RgbaImage {
    &self.overlay
  }

  /// 把帧缩放到表面尺寸，再叠加检测结果
  pub fn composite(&self, frame: &Frame) -> RgbImage {
    let (width, height) = self.overlay.dimensions();
    let base = if frame.width() == width && frame.height() == height {
      frame.as_image().clone()
    } else {
      debug!(
        "合成时缩放帧 {}x{} -> {}x{}",
        frame.width(),
        frame.height(),
        width,
        height
      );
      image::imageops::resize(frame.as_image(), width, height, FilterType::Triangle)
    };

    let mut canvas = image::DynamicImage::ImageRgb8(base).to_rgba8();
    image::imageops::overlay(&mut canvas, &self.overlay, 0, 0);
    image::DynamicImage::ImageRgba8(canvas).to_rgb8()
  }

  fn pixel_rect(&self, rect: Rect) -> Option<imageproc::rect::Rect> {
    let x = rect.x.floor() as i32;
    let y = rect.y.floor() as i32;
    let width = rect.width.round() as i64;
    let height = rect.height.round() as i64;
    if width <= 0 || height <= 0 {
      return None;
    }
    Some(imageproc::rect::Rect::at(x, y).of_size(width as u32, height as u32))
  }
}

fn opaque(color: Color) -> Rgba<u8> {
  Rgba([color[0], color[1], color[2], 0xFF])
}

impl Surface for ImageSurface {
  fn width(&self) -> u32 {
    self.overlay.width()
  }

  fn height(&self) -> u32 {
    self.overlay.height()
  }

  fn clear(&mut self) {
    self.overlay.pixels_mut().for_each(|p| *p = TRANSPARENT);
  }

  fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: f32) {
    // 线宽向内收缩绘制
    let thickness = line_width.round().max(1.0);
    let mut inset = 0.0;
    while inset < thickness {
      let inner = Rect {
        x: rect.x + inset,
        y: rect.y + inset,
        width: rect.width - 2.0 * inset,
        height: rect.height - 2.0 * inset,
      };
      match self.pixel_rect(inner) {
        Some(r) => draw_hollow_rect_mut(&mut self.overlay, r, opaque(color)),
        None => break,
      }
      inset += 1.0;
    }
  }

  fn fill_rect(&mut self, rect: Rect, color: Color) {
    if let Some(r) = self.pixel_rect(rect) {
      draw_filled_rect_mut(&mut self.overlay, r, opaque(color));
    }
  }

  fn fill_text(&mut self, text: &str, x: f32, y: f32, size: f32, color: Color) {
    draw_text_mut(
      &mut self.overlay,
      opaque(color),
      x.round() as i32,
      y.round() as i32,
      PxScale::from(size),
      &self.font,
      text,
    );
  }

  fn measure_text(&self, text: &str, size: f32) -> f32 {
    text_size(PxScale::from(size), &self.font, text).0 as f32
  }
}
