// 该文件是 Dongfeng （东风） 项目的一部分。
// src/tensor.rs - 张量与作用域管理
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

//! # 张量作用域
//!
//! 每一帧的处理都在一个 [`TensorScope`] 中进行。作用域内创建的
//! [`Tensor`] 在离开时被释放，无论处理成功还是失败。
//! [`TensorLedger`] 记录当前存活的张量数量和字节数，整个应用共享一份。
//!
//! ```
//! use dongfeng::tensor::{TensorLedger, TensorScope};
//! use dongfeng::model::InputShape;
//!
//! let ledger = TensorLedger::new();
//! {
//!   let scope = TensorScope::enter(&ledger, "warm-up");
//!   let _ones = scope.ones(InputShape::new(4, 4));
//!   assert_eq!(ledger.live_tensors(), 1);
//! }
//! assert_eq!(ledger.live_tensors(), 0);
//! ```

use std::sync::{
  Arc,
  atomic::{AtomicU64, AtomicUsize, Ordering},
};

use ndarray::{Array4, ArrayView4};
use tracing::{debug, warn};

use crate::model::InputShape;

#[derive(Debug, Default)]
struct LedgerInner {
  live_tensors: AtomicUsize,
  live_bytes: AtomicUsize,
  peak_tensors: AtomicUsize,
  total_tensors: AtomicU64,
}

/// 张量分配账本
#[derive(Debug, Default, Clone)]
pub struct TensorLedger {
  inner: Arc<LedgerInner>,
}

impl TensorLedger {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn live_tensors(&self) -> usize {
    self.inner.live_tensors.load(Ordering::SeqCst)
  }

  pub fn live_bytes(&self) -> usize {
    self.inner.live_bytes.load(Ordering::SeqCst)
  }

  pub fn peak_tensors(&self) -> usize {
    self.inner.peak_tensors.load(Ordering::SeqCst)
  }

  pub fn total_tensors(&self) -> u64 {
    self.inner.total_tensors.load(Ordering::SeqCst)
  }

  fn acquire(&self, bytes: usize) {
    let live = self.inner.live_tensors.fetch_add(1, Ordering::SeqCst) + 1;
    self.inner.live_bytes.fetch_add(bytes, Ordering::SeqCst);
    self.inner.total_tensors.fetch_add(1, Ordering::SeqCst);
    self.inner.peak_tensors.fetch_max(live, Ordering::SeqCst);
  }

  fn release(&self, bytes: usize) {
    self.inner.live_tensors.fetch_sub(1, Ordering::SeqCst);
    self.inner.live_bytes.fetch_sub(bytes, Ordering::SeqCst);
  }
}

/// 一次处理的张量作用域
///
/// 作用域本身不持有张量；每个张量在析构时归还账本。
/// 作用域结束时若仍有张量存活，说明有张量被移出了作用域，记录警告。
pub struct TensorScope {
  ledger: TensorLedger,
  name: &'static str,
  live: Arc<AtomicUsize>,
}

impl TensorScope {
  pub fn enter(ledger: &TensorLedger, name: &'static str) -> Self {
    debug!("进入张量作用域: {}", name);
    Self {
      ledger: ledger.clone(),
      name,
      live: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// 当前作用域内存活的张量数
  pub fn live_tensors(&self) -> usize {
    self.live.load(Ordering::SeqCst)
  }

  /// 将数组登记到本作用域
  pub fn track(&self, data: Array4<f32>) -> Tensor {
    let bytes = data.len() * std::mem::size_of::<f32>();
    self.ledger.acquire(bytes);
    self.live.fetch_add(1, Ordering::SeqCst);
    Tensor {
      data,
      guard: TensorGuard {
        bytes,
        ledger: self.ledger.clone(),
        scope_live: Arc::clone(&self.live),
      },
    }
  }

  /// 全 1 张量，用于模型预热
  pub fn ones(&self, shape: InputShape) -> Tensor {
    self.track(Array4::ones(shape.as_tuple()))
  }
}

impl Drop for TensorScope {
  fn drop(&mut self) {
    let leaked = self.live_tensors();
    if leaked > 0 {
      warn!("张量作用域 {} 结束时仍有 {} 个张量存活", self.name, leaked);
    } else {
      debug!("离开张量作用域: {}", self.name);
    }
  }
}

struct TensorGuard {
  bytes: usize,
  ledger: TensorLedger,
  scope_live: Arc<AtomicUsize>,
}

impl Drop for TensorGuard {
  fn drop(&mut self) {
    self.scope_live.fetch_sub(1, Ordering::SeqCst);
    self.ledger.release(self.bytes);
  }
}

/// NHWC 排列的 f32 张量
pub struct Tensor {
  data: Array4<f32>,
  guard: TensorGuard,
}

impl Tensor {
  pub fn shape(&self) -> [usize; 4] {
    let dim = self.data.dim();
    [dim.0, dim.1, dim.2, dim.3]
  }

  pub fn view(&self) -> ArrayView4<'_, f32> {
    self.data.view()
  }

  pub fn bytes(&self) -> usize {
    self.guard.bytes
  }

  /// 连续内存中的数据，按标准布局复制
  pub fn to_vec(&self) -> Vec<f32> {
    self.data.iter().copied().collect()
  }
}

impl std::fmt::Debug for Tensor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Tensor")
      .field("shape", &self.shape())
      .field("bytes", &self.guard.bytes)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ledger_tracks_live_and_peak() {
    let ledger = TensorLedger::new();
    let scope = TensorScope::enter(&ledger, "test");
    let a = scope.ones(InputShape::new(2, 2));
    let b = scope.ones(InputShape::new(2, 2));
    assert_eq!(ledger.live_tensors(), 2);
    assert_eq!(ledger.live_bytes(), 2 * 12 * 4);
    assert_eq!(scope.live_tensors(), 2);
    drop(a);
    drop(b);
    assert_eq!(ledger.live_tensors(), 0);
    assert_eq!(ledger.live_bytes(), 0);
    assert_eq!(ledger.peak_tensors(), 2);
    assert_eq!(ledger.total_tensors(), 2);
  }

  #[test]
  fn tensor_released_on_early_return() {
    fn fails(scope: &TensorScope) -> Result<(), &'static str> {
      let _input = scope.ones(InputShape::new(8, 8));
      Err("boom")
    }

    let ledger = TensorLedger::new();
    let scope = TensorScope::enter(&ledger, "test");
    assert!(fails(&scope).is_err());
    assert_eq!(ledger.live_tensors(), 0);
  }

  #[test]
  fn tensor_shape_is_nhwc() {
    let ledger = TensorLedger::new();
    let scope = TensorScope::enter(&ledger, "test");
    let tensor = scope.ones(InputShape::new(3, 5));
    assert_eq!(tensor.shape(), [1, 3, 5, 3]);
    assert_eq!(tensor.to_vec().len(), 45);
  }
}
