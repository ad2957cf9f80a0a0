// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/scope.rs - 张量作用域
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::borrow::Cow;

use tracing::{debug, trace};

/// 张量作用域
///
/// 每次推理调用打开一个作用域，期间分配的所有中间张量都登记在这里；
/// 作用域关闭（显式 close 或 Drop，包括错误路径的栈展开）时统一结算。
/// 实际的内存释放由 Rust 所有权保证，作用域负责逐次调用的用量审计，
/// 避免中间张量在帧与帧之间悄悄累积。
pub struct TensorScope {
  /// 作用域标签（日志用）
  label: Cow<'static, str>,
  /// 已登记的中间张量
  entries: Vec<ScopeEntry>,
  /// 是否已经结算
  closed: bool,
}

struct ScopeEntry {
  name: Cow<'static, str>,
  bytes: usize,
}

/// 作用域结算报告
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeReport {
  /// 结算掉的中间张量数量
  pub tensors: usize,
  /// 结算掉的总字节数
  pub bytes: usize,
}

impl TensorScope {
  /// 打开一个新的张量作用域
  pub fn open(label: impl Into<Cow<'static, str>>) -> Self {
    let label = label.into();
    trace!("打开张量作用域: {}", label);
    Self {
      label,
      entries: Vec::new(),
      closed: false,
    }
  }

  /// 登记一个中间张量（按字节计）
  pub fn track(&mut self, name: impl Into<Cow<'static, str>>, bytes: usize) {
    let name = name.into();
    trace!("作用域 {} 登记张量 {}: {} 字节", self.label, name, bytes);
    self.entries.push(ScopeEntry { name, bytes });
  }

  /// 登记一个 f32 中间张量（按元素个数计）
  pub fn track_f32(&mut self, name: impl Into<Cow<'static, str>>, len: usize) {
    self.track(name, len * size_of::<f32>());
  }

  /// 登记一个 u8 像素缓冲（按元素个数计）
  pub fn track_u8(&mut self, name: impl Into<Cow<'static, str>>, len: usize) {
    self.track(name, len);
  }

  /// 已登记的中间张量数量
  pub fn tracked(&self) -> usize {
    self.entries.len()
  }

  /// 已登记的中间张量总字节数
  pub fn tracked_bytes(&self) -> usize {
    self.entries.iter().map(|e| e.bytes).sum()
  }

  /// 显式关闭作用域并结算
  ///
  /// 返回本次结算掉的张量数量与总字节数；已结算过的作用域返回零。
  pub fn close(mut self) -> ScopeReport {
    self.settle()
  }

  fn settle(&mut self) -> ScopeReport {
    if self.closed {
      return ScopeReport {
        tensors: 0,
        bytes: 0,
      };
    }
    self.closed = true;
    let report = ScopeReport {
      tensors: self.entries.len(),
      bytes: self.tracked_bytes(),
    };
    debug!(
      "关闭张量作用域 {}: 释放 {} 个中间张量，共 {} 字节",
      self.label, report.tensors, report.bytes,
    );
    self.entries.clear();
    report
  }
}

impl Drop for TensorScope {
  fn drop(&mut self) {
    // 错误路径同样结算，保证逐帧不泄漏
    self.settle();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn track_accumulates_count_and_bytes() {
    let mut scope = TensorScope::open("test");
    scope.track_u8("padded", 640 * 640 * 3);
    scope.track_f32("input", 416 * 416 * 3);
    assert_eq!(scope.tracked(), 2);
    assert_eq!(
      scope.tracked_bytes(),
      640 * 640 * 3 + 416 * 416 * 3 * size_of::<f32>()
    );
  }

  #[test]
  fn close_settles_everything_tracked() {
    let mut scope = TensorScope::open("test");
    scope.track_u8("padded", 100);
    scope.track_f32("input", 10);

    let tracked = scope.tracked();
    let tracked_bytes = scope.tracked_bytes();
    let report = scope.close();

    // 结算必须覆盖登记的全部张量，账面归零
    assert_eq!(report.tensors, tracked);
    assert_eq!(report.bytes, tracked_bytes);
    assert_eq!(report.bytes, 100 + 10 * size_of::<f32>());
  }

  #[test]
  fn empty_scope_settles_to_zero() {
    let scope = TensorScope::open("test");
    assert_eq!(
      scope.close(),
      ScopeReport {
        tensors: 0,
        bytes: 0,
      }
    );
  }
}
