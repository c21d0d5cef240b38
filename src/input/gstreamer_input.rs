// 该文件是 Dongfeng （东风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频与摄像头输入
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

//! 基于 GStreamer 的视频文件与摄像头输入。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## URL 格式
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=30&rotate=90`
//! - `gst://file/data/clip.mp4?rotate=180`
//!
//! 管道最终统一转为 RGB，由 appsink 输出。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::Frame,
  input::{FrameSource, SourceKind},
};

/// 每次读取等待新帧的时长
const PULL_TIMEOUT_MS: u64 = 200;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("元素无法转换为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式")]
  UnsupportedFormat,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  kind: SourceKind,
  dimensions: (u32, u32),
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str| query.get(key).and_then(|v| v.parse::<u32>().ok());
    let width = parse("width").unwrap_or(DEFAULT_CAMERA_WIDTH);
    let height = parse("height").unwrap_or(DEFAULT_CAMERA_HEIGHT);

    let mut items = vec![GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      io_mode: parse("io-mode"),
      format: query
        .get("format")
        .cloned()
        .unwrap_or_else(|| String::from("YUY2")),
      width,
      height,
      fps: parse("fps").unwrap_or(DEFAULT_CAMERA_FPS),
    }];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));

    // 旋转 90/270 度后宽高互换
    let dimensions = match query.get("rotate").map(String::as_str) {
      Some("90") | Some("270") => (height, width),
      _ => (width, height),
    };

    Self {
      kind: SourceKind::Camera,
      dimensions,
      items,
    }
  }

  fn build_file_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = vec![GStreamerInputBuilderItem::FileSource(path.to_string())];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));

    // 文件的尺寸在第一帧到达后才知道
    Self {
      kind: SourceKind::Video,
      dimensions: (0, 0),
      items,
    }
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let (method, direction) = match rotate? {
      "90" => (1, 1),
      "180" => (2, 2),
      "270" => (3, 3),
      _ => (0, 0),
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method, direction })
  }

  pub fn pipeline_description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.pipeline_description();
    info!("GStreamer 管道: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      kind: self.kind,
      dimensions: self.dimensions,
      ended: false,
    })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let path = decoded_path(url);
    let mut builder = match url.host_str() {
      Some("camera") => Self::build_camera_pipeline(&path, &query),
      Some("file") => Self::build_file_pipeline(&path, &query),
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(builder)
  }
}

/// GStreamer 视频输入
///
/// 管道播放到结尾后尺寸归零、活动流结束。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  kind: SourceKind,
  dimensions: (u32, u32),
  ended: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

impl FrameSource for GStreamerInput {
  type Error = GStreamerInputError;

  fn kind(&self) -> SourceKind {
    self.kind
  }

  fn dimensions(&self) -> (u32, u32) {
    self.dimensions
  }

  fn has_active_stream(&self) -> bool {
    !self.ended
  }

  fn read_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    if self.ended {
      return Ok(None);
    }

    let timeout = gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS);
    let Some(sample) = self.appsink.try_pull_sample(timeout) else {
      if self.appsink.is_eos() {
        info!("GStreamer 管道播放结束");
        self.ended = true;
        self.dimensions = (0, 0);
      } else {
        debug!("等待新帧超时");
      }
      return Ok(None);
    };

    let frame = convert_sample(sample)?;
    self.dimensions = (frame.width(), frame.height());
    Ok(Some(frame))
  }
}

fn convert_sample(sample: gst::Sample) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * height.saturating_sub(1) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 行之间可能有填充，按 stride 逐行拷贝
  let mut pixels = Vec::with_capacity(width * height * 3);
  for row in 0..height {
    let line = &data[row * stride..row * stride + width * 3];
    match video_info.format() {
      gst_video::VideoFormat::Rgb => pixels.extend_from_slice(line),
      gst_video::VideoFormat::Bgr => {
        for px in line.chunks_exact(3) {
          pixels.extend_from_slice(&[px[2], px[1], px[0]]);
        }
      }
      _ => return Err(GStreamerInputError::UnsupportedFormat),
    }
  }

  Frame::from_raw(width as u32, height as u32, pixels).map_err(|e| {
    GStreamerInputError::PipelineError(e.to_string())
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn camera_pipeline_from_url() {
    let url = Url::parse("gst://camera/dev/video0?width=320&height=240&fps=30&rotate=90").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert_eq!(builder.kind, SourceKind::Camera);
    assert_eq!(builder.dimensions, (240, 320));
    assert_eq!(
      builder.pipeline_description(),
      "v4l2src device=/dev/video0 ! video/x-raw,format=YUY2,width=320,height=240,framerate=30/1 \
       ! videoflip method=1 video-direction=1 ! videoconvert ! video/x-raw,format=RGB \
       ! appsink max-buffers=2 drop=true name=sink"
    );
  }

  #[test]
  fn file_pipeline_starts_without_dimensions() {
    let url = Url::parse("gst://file/data/clip.mp4").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert_eq!(builder.kind, SourceKind::Video);
    assert_eq!(builder.dimensions, (0, 0));
    assert!(builder.pipeline_description().starts_with("filesrc location=/data/clip.mp4 ! decodebin"));
  }

  #[test]
  fn unknown_host_rejected() {
    let url = Url::parse("gst://rtsp/live").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }
}
