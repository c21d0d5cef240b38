// 该文件是 Dongfeng （东风） 项目的一部分。
// src/config.rs - 检测配置
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

use std::time::Duration;

use thiserror::Error;

use crate::model::InputShape;

/// 默认模型名称
pub const DEFAULT_MODEL_NAME: &str = "yolov5n";
/// 默认置信度阈值
pub const DEFAULT_CLASS_THRESHOLD: f32 = 0.2;
/// 默认刷新频率（Hz），对应显示器的刷新节拍
pub const DEFAULT_REFRESH_HZ: u32 = 60;
/// 连续失败帧数上限
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 30;
/// 单文件模型缺少清单时使用的输入尺寸
pub const DEFAULT_INPUT_SIZE: usize = 640;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须位于 [0, 1]，实际为 {0}")]
  InvalidThreshold(f32),
  #[error("刷新频率必须大于 0")]
  InvalidRefreshRate,
  #[error("连续失败上限必须大于 0")]
  InvalidFailureLimit,
}

/// 检测流程配置
#[derive(Debug, Clone)]
pub struct DetectConfig {
  pub model_name: String,
  pub class_threshold: f32,
  pub refresh_hz: u32,
  pub max_consecutive_failures: usize,
  pub fallback_input_shape: InputShape,
}

impl Default for DetectConfig {
  fn default() -> Self {
    Self {
      model_name: DEFAULT_MODEL_NAME.to_string(),
      class_threshold: DEFAULT_CLASS_THRESHOLD,
      refresh_hz: DEFAULT_REFRESH_HZ,
      max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
      fallback_input_shape: InputShape::new(DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE),
    }
  }
}

impl DetectConfig {
  pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
    self.model_name = name.into();
    self
  }

  pub fn with_class_threshold(mut self, threshold: f32) -> Self {
    self.class_threshold = threshold;
    self
  }

  pub fn with_refresh_hz(mut self, refresh_hz: u32) -> Self {
    self.refresh_hz = refresh_hz;
    self
  }

  pub fn with_max_consecutive_failures(mut self, limit: usize) -> Self {
    self.max_consecutive_failures = limit;
    self
  }

  pub fn with_fallback_input_shape(mut self, shape: InputShape) -> Self {
    self.fallback_input_shape = shape;
    self
  }

  /// 两次刷新之间的时间间隔
  pub fn refresh_interval(&self) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(self.refresh_hz.max(1)))
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.class_threshold) {
      return Err(ConfigError::InvalidThreshold(self.class_threshold));
    }
    if self.refresh_hz == 0 {
      return Err(ConfigError::InvalidRefreshRate);
    }
    if self.max_consecutive_failures == 0 {
      return Err(ConfigError::InvalidFailureLimit);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_demo_constants() {
    let config = DetectConfig::default();
    assert_eq!(config.model_name, "yolov5n");
    assert_eq!(config.class_threshold, 0.2);
    assert_eq!(config.fallback_input_shape.dims(), [1, 640, 640, 3]);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn rejects_out_of_range_threshold() {
    let config = DetectConfig::default().with_class_threshold(1.5);
    assert_eq!(config.validate(), Err(ConfigError::InvalidThreshold(1.5)));
  }

  #[test]
  fn refresh_interval_follows_rate() {
    let config = DetectConfig::default().with_refresh_hz(50);
    assert_eq!(config.refresh_interval(), Duration::from_millis(20));
  }
}
