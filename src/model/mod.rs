// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/model/mod.rs - 模型模块
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod yolo_onnx;

use ndarray::Array4;
use thiserror::Error;

pub use yolo_onnx::{YoloOnnx, YoloOnnxBuilder, YoloOnnxError};

use crate::scope::TensorScope;

/// 输出张量未对齐
#[derive(Debug, Error)]
#[error("输出张量未对齐: boxes={boxes}, scores={scores}, classes={classes}")]
pub struct AlignmentError {
  pub boxes: usize,
  pub scores: usize,
  pub classes: usize,
}

/// 模型原始输出
///
/// 三个展平缓冲：boxes 每个检测占 4 个元素 [y1, x1, y2, x2]（模型像素坐标），
/// scores 与 classes 每个检测各占 1 个。缓冲由模型一次性拷出，
/// 运行时内部内存随之释放。
pub struct RawDetections {
  pub boxes: Box<[f32]>,
  pub scores: Box<[f32]>,
  pub classes: Box<[f32]>,
}

impl RawDetections {
  /// 检测数量（以 scores 为准）
  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  /// 校验三个缓冲按同一检测数对齐
  pub fn validate(&self) -> Result<(), AlignmentError> {
    let n = self.scores.len();
    if self.boxes.len() == 4 * n && self.classes.len() == n {
      Ok(())
    } else {
      Err(AlignmentError {
        boxes: self.boxes.len(),
        scores: self.scores.len(),
        classes: self.classes.len(),
      })
    }
  }

  /// 第 i 个检测的边界框 [y1, x1, y2, x2]
  ///
  /// 调用前应先通过 validate。
  pub fn bbox(&self, i: usize) -> [f32; 4] {
    [
      self.boxes[4 * i],
      self.boxes[4 * i + 1],
      self.boxes[4 * i + 2],
      self.boxes[4 * i + 3],
    ]
  }
}

/// 检测模型 trait
pub trait Model {
  type Error;

  /// 模型输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  /// 执行一次推理
  ///
  /// 输入为 NHWC [1, H, W, 3] 张量，所有中间张量登记到传入的作用域。
  fn execute(
    &mut self,
    input: Array4<f32>,
    scope: &mut TensorScope,
  ) -> Result<RawDetections, Self::Error>;
}

impl<M: Model + ?Sized> Model for &mut M {
  type Error = M::Error;

  fn input_size(&self) -> (u32, u32) {
    (**self).input_size()
  }

  fn execute(
    &mut self,
    input: Array4<f32>,
    scope: &mut TensorScope,
  ) -> Result<RawDetections, Self::Error> {
    (**self).execute(input, scope)
  }
}
