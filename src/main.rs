// 该文件是 Dongfeng （东风） 项目的一部分。
// src/main.rs - 命令行入口
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

use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use dongfeng::{
  App, DetectConfig, FromUrl, StopToken,
  config::{
    DEFAULT_CLASS_THRESHOLD, DEFAULT_INPUT_SIZE, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_MODEL_NAME, DEFAULT_REFRESH_HZ,
  },
  input::{FrameSource, InputWrapper},
  model::{InputShape, OnnxModel, OnnxModelBuilder},
  output::{ImageSurface, NullOutput, OutputWrapper, embedded_font, load_font},
  task::{ContinuousTask, OneShotTask, TaskError, TaskSummary},
};

/// Dongfeng 目标检测演示
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址：model.json 所在目录或 .onnx 文件（file/http/https）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，可重复；image://、frames://、gst://camera/...、gst://file/...
  #[arg(long = "input", value_name = "SOURCE", required = true)]
  pub inputs: Vec<Url>,
  /// 输出，按顺序对应输入；缺省不输出。image://、record://、null:
  #[arg(long = "output", value_name = "OUTPUT")]
  pub outputs: Vec<Url>,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_CLASS_THRESHOLD)]
  pub threshold: f32,
  #[arg(long, default_value = DEFAULT_MODEL_NAME)]
  pub model_name: String,
  /// 视频与摄像头的刷新频率
  #[arg(long, default_value_t = DEFAULT_REFRESH_HZ)]
  pub refresh_hz: u32,
  #[arg(long, default_value_t = DEFAULT_MAX_CONSECUTIVE_FAILURES)]
  pub max_failures: usize,
  /// 模型为单个 .onnx 文件时使用的输入尺寸
  #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
  pub input_size: usize,
  /// 标签字体（TTF/OTF），缺省使用内置字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  /// 最多处理的帧数，0 表示不限
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: usize,
  #[arg(long)]
  pub intra_threads: Option<usize>,
}

async fn run_source(
  app: Arc<App<OnnxModel>>,
  mut input: InputWrapper,
  mut surface: ImageSurface,
  output: OutputWrapper,
  task: ContinuousTask,
) -> Result<TaskSummary, TaskError> {
  if input.kind().is_streaming() {
    task.run(&app, &mut input, &mut surface, &output).await
  } else {
    OneShotTask
      .run(&app, &mut input, &mut surface, &output)
      .await
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  for input in &args.inputs {
    info!("输入来源: {}", input);
  }

  let config = DetectConfig::default()
    .with_model_name(args.model_name.clone())
    .with_class_threshold(args.threshold)
    .with_refresh_hz(args.refresh_hz)
    .with_max_consecutive_failures(args.max_failures)
    .with_fallback_input_shape(InputShape::new(args.input_size, args.input_size));
  config.validate()?;

  let stop = StopToken::new();
  {
    let stop = stop.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      stop.cancel();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
  }

  let builder = OnnxModelBuilder::default().intra_threads(args.intra_threads);
  let app = App::load(&args.model, builder, config, &stop, |progress| {
    if progress.loading {
      info!("加载模型: {:.0}%", progress.fraction * 100.0);
    } else {
      info!("模型就绪");
    }
  })
  .await?;
  let app = Arc::new(app);

  let font = match &args.font {
    Some(path) => load_font(path)?,
    None => embedded_font()?,
  };
  let shape = app.model().input_shape();
  let frame_number = (args.frame_number > 0).then_some(args.frame_number);

  let mut handles = Vec::with_capacity(args.inputs.len());
  for (index, input_url) in args.inputs.iter().enumerate() {
    let input = InputWrapper::from_url(input_url)?;
    let output = match args.outputs.get(index) {
      Some(url) => OutputWrapper::from_url(url)?,
      None => OutputWrapper::Null(NullOutput),
    };
    let surface = ImageSurface::new(shape.width as u32, shape.height as u32, font.clone());
    let task = ContinuousTask::new(stop.clone()).with_frame_number(frame_number);

    info!("启动输入源 {}: {:?}", input_url, input.kind());
    handles.push((
      input_url.clone(),
      tokio::spawn(run_source(Arc::clone(&app), input, surface, output, task)),
    ));
  }

  let mut failed = 0;
  for (url, handle) in handles {
    match handle.await? {
      Ok(summary) => info!(
        "{} 完成: {} 帧, {} 个检测, {} 帧失败",
        url, summary.frames, summary.detections, summary.failed
      ),
      Err(e) => {
        error!("{} 失败: {}", url, e);
        failed += 1;
      }
    }
  }

  info!("存活张量: {}", app.ledger().live_tensors());
  if failed > 0 {
    return Err(anyhow!("{} 个输入源失败", failed));
  }
  Ok(())
}
