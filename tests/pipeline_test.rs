// 该文件是 Dongfeng （东风） 项目的一部分。
// tests/pipeline_test.rs - 检测流程集成测试
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

use std::{
  collections::VecDeque,
  sync::{Arc, Mutex},
  time::Duration,
};

use dongfeng::{
  App, DetectConfig, Frame, StopToken,
  input::{FrameSource, ImageFileInput, SourceKind},
  model::{BuildModel, InputShape, LoadProgress, Model, ModelHandle, ModelInfo, RawDetections},
  output::{Detection, NullOutput, RecordingSurface, Render, Surface},
  task::{ContinuousTask, LoopState, OneShotTask, StopReason, TaskError},
  tensor::Tensor,
};
use thiserror::Error;
use url::Url;

const MODEL_SIZE: usize = 16;

#[derive(Error, Debug)]
#[error("红色帧无法推理")]
struct RedFrameError;

/// 对纯红帧推理失败，其它帧返回两个固定检测
struct PickyModel;

impl Model for PickyModel {
  type Error = RedFrameError;

  fn infer(&self, input: &Tensor) -> Result<RawDetections, Self::Error> {
    let view = input.view();
    if view[[0, 0, 0, 0]] > 0.99 && view[[0, 0, 0, 1]] < 0.01 {
      return Err(RedFrameError);
    }
    Ok(RawDetections {
      boxes: vec![1.0, 1.0, 8.0, 8.0, 2.0, 2.0, 4.0, 4.0],
      scores: vec![0.9, 0.1],
      classes: vec![0, 1],
    })
  }
}

#[derive(Error, Debug)]
#[error("读取失败")]
struct ScriptError;

/// 按脚本依次给出帧的视频源
struct ScriptedSource {
  frames: VecDeque<Frame>,
  kind: SourceKind,
  endless: Option<Frame>,
  reads: Arc<Mutex<usize>>,
}

impl ScriptedSource {
  fn video(frames: Vec<Frame>) -> Self {
    Self {
      frames: frames.into(),
      kind: SourceKind::Video,
      endless: None,
      reads: Arc::new(Mutex::new(0)),
    }
  }

  fn camera(frame: Frame) -> Self {
    Self {
      frames: VecDeque::new(),
      kind: SourceKind::Camera,
      endless: Some(frame),
      reads: Arc::new(Mutex::new(0)),
    }
  }
}

impl FrameSource for ScriptedSource {
  type Error = ScriptError;

  fn kind(&self) -> SourceKind {
    self.kind
  }

  fn dimensions(&self) -> (u32, u32) {
    match self.frames.front().or(self.endless.as_ref()) {
      Some(frame) => (frame.width(), frame.height()),
      None => (0, 0),
    }
  }

  fn has_active_stream(&self) -> bool {
    self.endless.is_some()
  }

  fn read_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    *self.reads.lock().unwrap() += 1;
    Ok(self.frames.pop_front().or_else(|| self.endless.clone()))
  }
}

/// 记录每帧输出的检测数量
#[derive(Default)]
struct CountingOutput {
  counts: Mutex<Vec<usize>>,
}

impl Render<RecordingSurface> for CountingOutput {
  type Error = std::convert::Infallible;

  fn render_result(
    &self,
    _frame: &Frame,
    _surface: &RecordingSurface,
    detections: &[Detection],
  ) -> Result<(), Self::Error> {
    self.counts.lock().unwrap().push(detections.len());
    Ok(())
  }
}

fn app(config: DetectConfig) -> App<PickyModel> {
  let info = ModelInfo::new("picky", InputShape::new(MODEL_SIZE, MODEL_SIZE));
  App::new(ModelHandle::new(PickyModel, info), config.with_refresh_hz(1000))
}

fn surface() -> RecordingSurface {
  RecordingSurface::new(MODEL_SIZE as u32, MODEL_SIZE as u32)
}

fn dark() -> Frame {
  Frame::filled(16, 16, [10, 10, 10])
}

fn red() -> Frame {
  Frame::filled(16, 16, [255, 0, 0])
}

#[tokio::test]
async fn still_image_detected_once() {
  let app = app(DetectConfig::default());
  let mut input = ImageFileInput::from_frame(Frame::filled(16, 8, [0, 0, 0]));
  let mut surface = surface();
  let output = CountingOutput::default();

  let summary = OneShotTask
    .run(&app, &mut input, &mut surface, &output)
    .await
    .unwrap();

  assert_eq!(summary.frames, 1);
  assert_eq!(summary.detections, 1);
  assert_eq!(*output.counts.lock().unwrap(), vec![1]);
  // 16x8 的帧 y 比例为 2
  assert_eq!(surface.stroked_rects()[0].height, 14.0);
  assert_eq!(surface.texts(), vec!["person - 90.0%"]);
  assert_eq!(app.ledger().live_tensors(), 0);
}

#[tokio::test]
async fn still_image_failure_propagates() {
  let app = app(DetectConfig::default());
  let mut input = ImageFileInput::from_frame(red());
  let err = OneShotTask
    .run(&app, &mut input, &mut surface(), &NullOutput)
    .await
    .unwrap_err();
  assert!(matches!(err, TaskError::Detect(_)));
  assert_eq!(app.ledger().live_tensors(), 0);
}

#[tokio::test]
async fn ended_source_clears_without_reading() {
  let app = app(DetectConfig::default());
  let mut input = ScriptedSource::video(Vec::new());
  let reads = Arc::clone(&input.reads);
  let mut surface = surface();
  surface.stroke_rect(
    dongfeng::output::Rect::from_corners(0.0, 0.0, 4.0, 4.0),
    [0, 0, 0],
    1.0,
  );

  let task = ContinuousTask::new(StopToken::new());
  let summary = task
    .run(&app, &mut input, &mut surface, &NullOutput)
    .await
    .unwrap();

  assert_eq!(summary.stop_reason, StopReason::SourceEnded);
  assert_eq!(summary.frames, 0);
  assert_eq!(*reads.lock().unwrap(), 0);
  assert!(surface.commands().is_empty());
  assert_eq!(surface.clear_count(), 1);
  assert_eq!(task.state(), LoopState::Idle);
}

#[tokio::test]
async fn failed_frame_does_not_stop_video() {
  let app = app(DetectConfig::default());
  let mut input = ScriptedSource::video(vec![dark(), red(), dark()]);
  let mut surface = surface();
  let output = CountingOutput::default();

  let summary = ContinuousTask::new(StopToken::new())
    .run(&app, &mut input, &mut surface, &output)
    .await
    .unwrap();

  assert_eq!(summary.stop_reason, StopReason::SourceEnded);
  assert_eq!(summary.frames, 2);
  assert_eq!(summary.failed, 1);
  assert_eq!(summary.detections, 2);
  assert_eq!(*output.counts.lock().unwrap(), vec![1, 1]);
  assert_eq!(app.ledger().live_tensors(), 0);
  assert!(app.ledger().total_tensors() >= 3);
  // 循环结束时清除叠加层
  assert!(surface.commands().is_empty());
}

#[tokio::test]
async fn consecutive_failures_stop_loop() {
  let app = app(DetectConfig::default().with_max_consecutive_failures(2));
  let mut input = ScriptedSource::video(vec![red(), red(), dark()]);
  let mut surface = surface();

  let err = ContinuousTask::new(StopToken::new())
    .run(&app, &mut input, &mut surface, &NullOutput)
    .await
    .unwrap_err();

  assert!(matches!(err, TaskError::TooManyFailures { count: 2, .. }));
  assert_eq!(input.frames.len(), 1);
  assert_eq!(app.ledger().live_tensors(), 0);
}

#[tokio::test]
async fn frame_limit_stops_camera() {
  let app = app(DetectConfig::default());
  let mut input = ScriptedSource::camera(dark());
  let summary = ContinuousTask::new(StopToken::new())
    .with_frame_number(Some(3))
    .run(&app, &mut input, &mut surface(), &NullOutput)
    .await
    .unwrap();
  assert_eq!(summary.stop_reason, StopReason::FrameLimit);
  assert_eq!(summary.frames, 3);
}

#[tokio::test]
async fn stop_token_ends_camera_loop() {
  let app = Arc::new(app(DetectConfig::default()));
  let stop = StopToken::new();
  let task = ContinuousTask::new(stop.clone());

  let handle = {
    let app = Arc::clone(&app);
    let task = task.clone();
    tokio::spawn(async move {
      let mut input = ScriptedSource::camera(dark());
      let mut surface = surface();
      let summary = task
        .run(&app, &mut input, &mut surface, &NullOutput)
        .await;
      (summary, surface)
    })
  };

  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(task.state(), LoopState::Detecting);
  stop.cancel();

  let (summary, surface) = tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .unwrap()
    .unwrap();
  let summary = summary.unwrap();
  assert_eq!(summary.stop_reason, StopReason::Stopped);
  assert!(surface.commands().is_empty());
  assert_eq!(task.state(), LoopState::Idle);
  assert_eq!(app.ledger().live_tensors(), 0);
}

#[tokio::test]
async fn cancelled_before_start_reads_nothing() {
  let app = app(DetectConfig::default());
  let stop = StopToken::new();
  stop.cancel();
  let mut input = ScriptedSource::camera(dark());
  let reads = Arc::clone(&input.reads);

  let summary = ContinuousTask::new(stop)
    .run(&app, &mut input, &mut surface(), &NullOutput)
    .await
    .unwrap();
  assert_eq!(summary.stop_reason, StopReason::Stopped);
  assert_eq!(*reads.lock().unwrap(), 0);
}

struct PickyBuilder;

impl BuildModel for PickyBuilder {
  type Model = PickyModel;
  type Error = std::io::Error;
  const FORMAT: &'static str = "onnx";

  fn build(self, bytes: Vec<u8>, _info: &ModelInfo) -> Result<Self::Model, Self::Error> {
    assert_eq!(bytes, b"0123456789");
    Ok(PickyModel)
  }
}

#[tokio::test]
async fn app_loads_with_progress() {
  let dir = tempfile::tempdir().unwrap();
  std::fs::write(
    dir.path().join("model.json"),
    r#"{
      "name": "picky",
      "format": "onnx",
      "inputShape": [1, 16, 16, 3],
      "weightsManifest": [{ "paths": ["a.bin", "b.bin", "c.bin"] }]
    }"#,
  )
  .unwrap();
  std::fs::write(dir.path().join("a.bin"), b"0123").unwrap();
  std::fs::write(dir.path().join("b.bin"), b"456").unwrap();
  std::fs::write(dir.path().join("c.bin"), b"789").unwrap();

  let mut events: Vec<LoadProgress> = Vec::new();
  let url = Url::from_directory_path(dir.path()).unwrap();
  let app = App::load(
    &url,
    PickyBuilder,
    DetectConfig::default(),
    &StopToken::new(),
    |p| events.push(p),
  )
  .await
  .unwrap();

  assert_eq!(app.model().input_shape(), InputShape::new(16, 16));
  assert_eq!(app.ledger().live_tensors(), 0);
  assert_eq!(app.ledger().total_tensors(), 1);

  let fractions: Vec<f32> = events.iter().map(|p| p.fraction).collect();
  assert_eq!(fractions.first(), Some(&0.0));
  assert_eq!(fractions.last(), Some(&1.0));
  assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
  assert!(events.iter().filter(|p| !p.loading).count() == 1);
  assert!(!events.last().unwrap().loading);
}
