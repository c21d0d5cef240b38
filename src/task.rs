// 该文件是 Dongfeng （东风） 项目的一部分。
// src/task.rs - 检测任务循环
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
  sync::Notify,
  time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
  app::{App, DetectError},
  input::FrameSource,
  model::Model,
  output::{Render, Surface},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Default)]
struct StopInner {
  cancelled: AtomicBool,
  notify: Notify,
}

/// 停止标志
///
/// 可以克隆到其它任务或信号处理函数中，取消后不可恢复。
#[derive(Debug, Clone, Default)]
pub struct StopToken {
  inner: Arc<StopInner>,
}

impl StopToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.inner.cancelled.store(true, Ordering::SeqCst);
    self.inner.notify.notify_waiters();
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.cancelled.load(Ordering::SeqCst)
  }

  /// 等待取消
  pub async fn cancelled(&self) {
    loop {
      let notified = self.inner.notify.notified();
      tokio::pin!(notified);
      // 先登记再检查，避免错过检查之后的通知
      notified.as_mut().enable();
      if self.is_cancelled() {
        return;
      }
      notified.await;
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
  #[default]
  Idle,
  Detecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  /// 输入源尺寸为 0 且没有活动流
  SourceEnded,
  Stopped,
  FrameLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
  pub frames: usize,
  pub failed: usize,
  pub detections: usize,
  pub stop_reason: StopReason,
}

impl TaskSummary {
  fn new(stop_reason: StopReason) -> Self {
    Self {
      frames: 0,
      failed: 0,
      detections: 0,
      stop_reason,
    }
  }
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("没有输入帧")]
  NoFrame,
  #[error("读取输入失败: {0}")]
  Source(#[source] BoxError),
  #[error("检测失败: {0}")]
  Detect(#[from] DetectError),
  #[error("输出失败: {0}")]
  Output(#[source] BoxError),
  #[error("连续 {count} 帧失败，停止任务: {last}")]
  TooManyFailures {
    count: usize,
    #[source]
    last: Box<TaskError>,
  },
}

/// 处理一帧：读取 → 检测 → 输出
///
/// 返回 `Ok(None)` 表示输入源暂时没有帧。
async fn process_frame<M, I, S, O>(
  app: &App<M>,
  input: &mut I,
  surface: &mut S,
  output: &O,
) -> Result<Option<usize>, TaskError>
where
  M: Model,
  I: FrameSource,
  S: Surface,
  O: Render<S>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  let Some(frame) = input
    .read_frame()
    .map_err(|e| TaskError::Source(Box::new(e)))?
  else {
    return Ok(None);
  };

  let now = std::time::Instant::now();
  let detections = app.detect_frame(&frame, surface).await?;
  let elapsed = now.elapsed();
  output
    .render_result(&frame, surface, &detections)
    .map_err(|e| TaskError::Output(Box::new(e)))?;
  debug!(
    "检测完成，耗时: {:.2?} / {:.2?}",
    elapsed,
    now.elapsed()
  );
  Ok(Some(detections.len()))
}

/// 静态图像：只检测一次，错误直接返回
#[derive(Debug, Default, Clone, Copy)]
pub struct OneShotTask;

impl OneShotTask {
  pub async fn run<M, I, S, O>(
    self,
    app: &App<M>,
    input: &mut I,
    surface: &mut S,
    output: &O,
  ) -> Result<TaskSummary, TaskError>
  where
    M: Model,
    I: FrameSource,
    S: Surface,
    O: Render<S>,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    info!("开始单帧检测...");
    let detections = process_frame(app, input, surface, output)
      .await?
      .ok_or(TaskError::NoFrame)?;
    info!("检测到 {} 个目标", detections);

    Ok(TaskSummary {
      frames: 1,
      failed: 0,
      detections,
      stop_reason: StopReason::SourceEnded,
    })
  }
}

/// 视频与摄像头：按刷新频率逐帧检测
///
/// 每次循环开始时检查停止标志和输入源状态。单帧失败只记录警告，
/// 连续失败达到上限后停止。退出循环时清除表面。
#[derive(Debug, Default, Clone)]
pub struct ContinuousTask {
  stop: StopToken,
  frame_number: Option<usize>,
  state: Arc<Mutex<LoopState>>,
}

impl ContinuousTask {
  pub fn new(stop: StopToken) -> Self {
    Self {
      stop,
      ..Self::default()
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn state(&self) -> LoopState {
    *self.state.lock()
  }

  fn transition(&self, next: LoopState) {
    let mut state = self.state.lock();
    if *state != next {
      debug!("循环状态 {:?} -> {:?}", *state, next);
      *state = next;
    }
  }

  fn finish<S: Surface>(&self, surface: &mut S) {
    surface.clear();
    self.transition(LoopState::Idle);
  }

  pub async fn run<M, I, S, O>(
    &self,
    app: &App<M>,
    input: &mut I,
    surface: &mut S,
    output: &O,
  ) -> Result<TaskSummary, TaskError>
  where
    M: Model,
    I: FrameSource,
    S: Surface,
    O: Render<S>,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    if input.is_ended() {
      info!("输入源没有内容，不启动检测循环");
      self.finish(surface);
      return Ok(TaskSummary::new(StopReason::SourceEnded));
    }

    info!("开始检测循环...");
    self.transition(LoopState::Detecting);
    let limit = app.config().max_consecutive_failures;
    let mut ticker = interval(app.config().refresh_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut summary = TaskSummary::new(StopReason::Stopped);
    let mut consecutive_failures = 0;
    summary.stop_reason = loop {
      if self.stop.is_cancelled() {
        warn!("收到停止信号，退出任务循环");
        break StopReason::Stopped;
      }
      if input.is_ended() {
        info!("输入源结束，退出任务循环");
        break StopReason::SourceEnded;
      }
      let attempted = summary.frames + summary.failed;
      if self.frame_number.is_some_and(|n| attempted >= n) {
        info!("达到指定帧数 {}, 退出任务循环", attempted);
        break StopReason::FrameLimit;
      }

      tokio::select! {
        _ = ticker.tick() => {}
        _ = self.stop.cancelled() => {
          warn!("收到停止信号，退出任务循环");
          break StopReason::Stopped;
        }
      }

      match process_frame(app, input, surface, output).await {
        Ok(Some(detections)) => {
          summary.frames += 1;
          summary.detections += detections;
          consecutive_failures = 0;
        }
        Ok(None) => debug!("输入源暂无新帧"),
        Err(e) => {
          summary.failed += 1;
          consecutive_failures += 1;
          warn!(
            "第 {} 帧处理失败 ({}/{}): {}",
            summary.frames + summary.failed,
            consecutive_failures,
            limit,
            e
          );
          if consecutive_failures >= limit {
            self.finish(surface);
            return Err(TaskError::TooManyFailures {
              count: consecutive_failures,
              last: Box::new(e),
            });
          }
        }
      }
    };

    self.finish(surface);
    info!(
      "任务完成: {} 帧, {} 帧失败, {} 个检测 ({:?})",
      summary.frames, summary.failed, summary.detections, summary.stop_reason
    );
    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn stop_token_wakes_waiters() {
    let stop = StopToken::new();
    let waiter = {
      let stop = stop.clone();
      tokio::spawn(async move { stop.cancelled().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!stop.is_cancelled());
    stop.cancel();
    tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .unwrap()
      .unwrap();
    assert!(stop.is_cancelled());
  }

  #[tokio::test]
  async fn cancelled_returns_immediately_after_cancel() {
    let stop = StopToken::new();
    stop.cancel();
    tokio::time::timeout(Duration::from_millis(100), stop.cancelled())
      .await
      .unwrap();
  }

  #[test]
  fn new_task_is_idle() {
    let task = ContinuousTask::new(StopToken::new()).with_frame_number(Some(3));
    assert_eq!(task.state(), LoopState::Idle);
    assert_eq!(task.frame_number, Some(3));
  }
}
