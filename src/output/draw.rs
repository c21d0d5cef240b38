// 该文件是 Dongfeng （东风） 项目的一部分。
// src/output/draw.rs - 目标检测结果解码与绘制
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

use tracing::{debug, warn};

use crate::{
  labels::ClassTable,
  model::{ModelInfo, RawDetections},
  output::{Color, Rect, Surface},
  preprocess::ScaleRatios,
};

/// Ultralytics 调色板，按类别编号循环取色
const PALETTE: [Color; 20] = [
  [0xFF, 0x38, 0x38],
  [0xFF, 0x9D, 0x97],
  [0xFF, 0x70, 0x1F],
  [0xFF, 0xB2, 0x1D],
  [0xCF, 0xD2, 0x31],
  [0x48, 0xF9, 0x0A],
  [0x92, 0xCC, 0x17],
  [0x3D, 0xDB, 0x86],
  [0x1A, 0x93, 0x34],
  [0x00, 0xD4, 0xBB],
  [0x2C, 0x99, 0xA8],
  [0x00, 0xC2, 0xFF],
  [0x34, 0x45, 0x93],
  [0x64, 0x73, 0xFF],
  [0x00, 0x18, 0xEC],
  [0x84, 0x38, 0xFF],
  [0x52, 0x00, 0x85],
  [0xCB, 0x38, 0xFF],
  [0xFF, 0x95, 0xC8],
  [0xFF, 0x37, 0xC7],
];

const LABEL_TEXT_COLOR: Color = [0xFF, 0xFF, 0xFF];
const MIN_FONT_SIZE: f32 = 14.0;
const MIN_LINE_WIDTH: f32 = 2.5;

/// 解码后的检测结果，坐标位于表面像素空间
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub index: usize,
  pub class_id: u32,
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

impl Detection {
  pub fn rect(&self) -> Rect {
    Rect::from_corners(self.bbox[0], self.bbox[1], self.bbox[2], self.bbox[3])
  }

  /// 标签文本，例如 `person - 87.5%`
  pub fn caption(&self) -> String {
    format!("{} - {:.1}%", self.label, self.score * 100.0)
  }
}

/// 绘制样式，随表面尺寸缩放
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawStyle {
  pub font_size: f32,
  pub line_width: f32,
}

impl DrawStyle {
  pub fn for_surface(width: u32, height: u32) -> Self {
    let (w, h) = (width as f32, height as f32);
    Self {
      font_size: (w.max(h) / 40.0).round().max(MIN_FONT_SIZE),
      line_width: (w.min(h) / 200.0).max(MIN_LINE_WIDTH),
    }
  }

  pub fn color(class_id: u32) -> Color {
    PALETTE[class_id as usize % PALETTE.len()]
  }
}

/// 按阈值过滤原始输出，并映射到表面坐标
///
/// 置信度低于阈值或为 NaN 的检测被直接丢弃。坐标先按模型的边框格式转换，
/// 乘以比例还原补齐前的范围，再按表面与模型输入的尺寸比缩放，最后裁剪到表面内。
/// 裁剪后没有面积的边框不返回。三个数组长度不一致时不返回任何检测。
pub fn decode_detections(
  raw: &RawDetections,
  threshold: f32,
  ratios: ScaleRatios,
  model: &ModelInfo,
  surface_size: (u32, u32),
  classes: &ClassTable,
) -> Vec<Detection> {
  if let Err(e) = raw.check() {
    warn!("跳过无效的模型输出: {}", e);
    return Vec::new();
  }

  let (surface_w, surface_h) = (surface_size.0 as f32, surface_size.1 as f32);
  let model_w = model.input_shape.width as f32;
  let model_h = model.input_shape.height as f32;
  let (unit_x, unit_y) = if model.normalized_boxes {
    (model_w, model_h)
  } else {
    (1.0, 1.0)
  };
  let scale_x = ratios.x * surface_w / model_w;
  let scale_y = ratios.y * surface_h / model_h;

  let mut detections = Vec::new();
  for (index, (&score, &class_id)) in raw.scores.iter().zip(&raw.classes).enumerate() {
    if !(score >= threshold) {
      continue;
    }
    let Some(raw_box) = raw.box_at(index) else {
      continue;
    };

    let [x1, y1, x2, y2] = model.box_format.to_xyxy(raw_box);
    let x_min = (x1.min(x2) * unit_x * scale_x).clamp(0.0, surface_w);
    let x_max = (x1.max(x2) * unit_x * scale_x).clamp(0.0, surface_w);
    let y_min = (y1.min(y2) * unit_y * scale_y).clamp(0.0, surface_h);
    let y_max = (y1.max(y2) * unit_y * scale_y).clamp(0.0, surface_h);
    if !(x_min < x_max && y_min < y_max) {
      debug!("检测 {} 裁剪后为空，跳过", index);
      continue;
    }

    detections.push(Detection {
      index,
      class_id,
      label: classes.label(class_id).to_string(),
      score,
      bbox: [x_min, y_min, x_max, y_max],
    });
  }
  detections
}

/// 清除表面并绘制全部检测
pub fn draw_detections<S: Surface + ?Sized>(surface: &mut S, detections: &[Detection]) {
  surface.clear();
  let style = DrawStyle::for_surface(surface.width(), surface.height());

  for detection in detections {
    let color = DrawStyle::color(detection.class_id);
    let rect = detection.rect();
    surface.stroke_rect(rect, color, style.line_width);

    // 标签放在边框左上角上方，超出顶部时贴着表面顶部
    let caption = detection.caption();
    let text_width = surface.measure_text(&caption, style.font_size);
    let y_text = rect.y - (style.font_size + style.line_width);
    let label_y = y_text.max(0.0);
    surface.fill_rect(
      Rect {
        x: (rect.x - 1.0).max(0.0),
        y: label_y,
        width: text_width + style.line_width,
        height: style.font_size + style.line_width,
      },
      color,
    );
    surface.fill_text(
      &caption,
      (rect.x - 1.0).max(0.0),
      if y_text < 0.0 { 1.0 } else { y_text + 1.0 },
      style.font_size,
      LABEL_TEXT_COLOR,
    );
  }
}

/// 过滤、映射并绘制一帧的检测结果，返回实际绘制的检测
///
/// 不做非极大值抑制；模型输出中重叠的边框会全部绘制。
pub fn render_detections<S: Surface + ?Sized>(
  surface: &mut S,
  threshold: f32,
  raw: &RawDetections,
  ratios: ScaleRatios,
  model: &ModelInfo,
  classes: &ClassTable,
) -> Vec<Detection> {
  let detections = decode_detections(
    raw,
    threshold,
    ratios,
    model,
    (surface.width(), surface.height()),
    classes,
  );
  draw_detections(surface, &detections);
  debug!(
    "绘制 {} / {} 个检测 (阈值 {})",
    detections.len(),
    raw.len(),
    threshold
  );
  detections
}
