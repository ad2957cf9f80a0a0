// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/detector.rs - 检测器与结果解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::debug;

use crate::input::Frame;
use crate::model::{AlignmentError, Model, RawDetections};
use crate::output::{Overlay, OverlayContext};
use crate::preprocess::Preprocessor;
use crate::scope::TensorScope;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 检测结果
#[derive(Clone, Debug)]
pub struct Detection {
  /// 边界框左上角 x 坐标（原始帧坐标）
  pub x: f32,
  /// 边界框左上角 y 坐标（原始帧坐标）
  pub y: f32,
  /// 边界框宽度
  pub width: f32,
  /// 边界框高度
  pub height: f32,
  /// 置信度
  pub confidence: f32,
  /// 类别索引
  pub class_id: usize,
  /// 类别名称
  pub class_name: String,
}

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
  #[error(transparent)]
  Alignment(#[from] AlignmentError),
}

/// 检测器错误
#[derive(Debug, Error)]
pub enum DetectorError {
  /// 置信度阈值必须在 [0, 1] 区间
  #[error("置信度阈值必须在 [0, 1] 区间: {0}")]
  InvalidThreshold(f32),
}

/// 把模型原始输出解码为帧坐标下的检测结果
///
/// boxes 使用模型像素坐标 [y1, x1, y2, x2]，按补边比例换算回原始帧坐标并
/// 裁剪到帧边界，低于阈值的检测被过滤掉。
pub fn decode_detections(
  raw: &RawDetections,
  ctx: &OverlayContext,
) -> Result<Vec<Detection>, DecodeError> {
  raw.validate()?;

  let (frame_w, frame_h) = ctx.frame_size;
  let (model_w, model_h) = ctx.model_size;
  // 模型像素坐标 -> 补边正方形坐标 -> 原始帧坐标
  let sx = ctx.ratios.x * frame_w as f32 / model_w as f32;
  let sy = ctx.ratios.y * frame_h as f32 / model_h as f32;

  let mut detections = Vec::new();
  for i in 0..raw.len() {
    let confidence = raw.scores[i];
    if confidence < ctx.threshold {
      continue;
    }

    let [y1, x1, y2, x2] = raw.bbox(i);
    let x1 = (x1 * sx).clamp(0.0, frame_w as f32);
    let y1 = (y1 * sy).clamp(0.0, frame_h as f32);
    let x2 = (x2 * sx).clamp(0.0, frame_w as f32);
    let y2 = (y2 * sy).clamp(0.0, frame_h as f32);

    // 负值和非有限的类别值不能直接截断成索引，一律按未知处理
    let raw_class = raw.classes[i];
    let class_id = if raw_class.is_finite() && raw_class >= 0.0 {
      raw_class as usize
    } else {
      usize::MAX
    };
    let class_name = COCO_CLASSES
      .get(class_id)
      .map(|name| name.to_string())
      .unwrap_or_else(|| "unknown".to_string());

    detections.push(Detection {
      x: x1,
      y: y1,
      width: (x2 - x1).max(0.0),
      height: (y2 - y1).max(0.0),
      confidence,
      class_id,
      class_name,
    });
  }

  debug!(
    "解码完成: {} 个候选中 {} 个超过阈值 {:.2}",
    raw.len(),
    detections.len(),
    ctx.threshold,
  );

  Ok(detections)
}

/// 检测器
///
/// 组合预处理器和置信度阈值，驱动一次完整的 预处理 -> 推理 -> 叠加渲染。
pub struct Detector {
  /// 帧预处理器
  preprocessor: Preprocessor,
  /// 置信度阈值
  threshold: f32,
}

impl Detector {
  /// 创建一个新的检测器
  pub fn new(model_width: u32, model_height: u32, threshold: f32) -> Result<Self, DetectorError> {
    if !(0.0..=1.0).contains(&threshold) {
      return Err(DetectorError::InvalidThreshold(threshold));
    }
    Ok(Self {
      preprocessor: Preprocessor::new(model_width, model_height),
      threshold,
    })
  }

  /// 按模型自报的输入尺寸创建检测器
  pub fn for_model<M: Model>(model: &M, threshold: f32) -> Result<Self, DetectorError> {
    let (width, height) = model.input_size();
    Self::new(width, height, threshold)
  }

  /// 对一帧执行检测并渲染叠加层
  pub fn detect_frame<M, O>(
    &self,
    frame: &Frame,
    model: &mut M,
    overlay: &mut O,
    scope: &mut TensorScope,
  ) -> anyhow::Result<Vec<Detection>>
  where
    M: Model,
    M::Error: std::error::Error + Sync + Send + 'static,
    O: Overlay,
  {
    let input = self.preprocessor.run(frame, scope)?;
    let ratios = input.ratios;
    let raw = model.execute(input.tensor, scope)?;

    let ctx = OverlayContext {
      threshold: self.threshold,
      ratios,
      frame_size: (frame.width(), frame.height()),
      model_size: self.preprocessor.model_size(),
    };

    overlay.render_overlay(frame, &raw, &ctx)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::preprocess::ScaleRatios;

  fn ctx(threshold: f32, frame: (u32, u32), model: (u32, u32)) -> OverlayContext {
    let max = frame.0.max(frame.1) as f32;
    OverlayContext {
      threshold,
      ratios: ScaleRatios {
        x: max / frame.0 as f32,
        y: max / frame.1 as f32,
      },
      frame_size: frame,
      model_size: model,
    }
  }

  fn raw(boxes: Vec<f32>, scores: Vec<f32>, classes: Vec<f32>) -> RawDetections {
    RawDetections {
      boxes: boxes.into_boxed_slice(),
      scores: scores.into_boxed_slice(),
      classes: classes.into_boxed_slice(),
    }
  }

  #[test]
  fn threshold_filters_detections() {
    let raw = raw(
      vec![0.0, 0.0, 10.0, 10.0, 0.0, 0.0, 10.0, 10.0],
      vec![0.9, 0.3],
      vec![0.0, 0.0],
    );
    let out = decode_detections(&raw, &ctx(0.5, (416, 416), (416, 416))).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].class_name, "person");
  }

  #[test]
  fn score_equal_to_threshold_passes() {
    let raw = raw(vec![0.0, 0.0, 10.0, 10.0], vec![0.5], vec![2.0]);
    let out = decode_detections(&raw, &ctx(0.5, (416, 416), (416, 416))).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].class_name, "car");
  }

  #[test]
  fn boxes_scale_back_to_frame_coordinates() {
    // 640x480 帧，模型 416：补成 640 方形后缩到 416，
    // 模型坐标 208 对应帧坐标 320
    let raw = raw(vec![104.0, 104.0, 208.0, 208.0], vec![0.9], vec![16.0]);
    let out = decode_detections(&raw, &ctx(0.5, (640, 480), (416, 416))).unwrap();
    let d = &out[0];
    assert!((d.x - 160.0).abs() < 1e-3);
    assert!((d.y - 160.0).abs() < 1e-3);
    assert!((d.width - 160.0).abs() < 1e-3);
    assert!((d.height - 160.0).abs() < 1e-3);
    assert_eq!(d.class_name, "dog");
  }

  #[test]
  fn boxes_are_clamped_to_the_frame() {
    // y2 落在补边区域，换算后超出帧高，应被裁剪
    let raw = raw(vec![0.0, 0.0, 416.0, 416.0], vec![0.9], vec![0.0]);
    let out = decode_detections(&raw, &ctx(0.5, (640, 480), (416, 416))).unwrap();
    let d = &out[0];
    assert!((d.width - 640.0).abs() < 1e-3);
    assert!((d.height - 480.0).abs() < 1e-3);
  }

  #[test]
  fn unknown_class_ids_get_a_fallback_name() {
    let raw = raw(vec![0.0, 0.0, 10.0, 10.0], vec![0.9], vec![200.0]);
    let out = decode_detections(&raw, &ctx(0.5, (416, 416), (416, 416))).unwrap();
    assert_eq!(out[0].class_name, "unknown");
  }

  #[test]
  fn negative_or_nan_class_values_are_unknown() {
    let raw = raw(
      vec![0.0, 0.0, 10.0, 10.0, 0.0, 0.0, 10.0, 10.0],
      vec![0.9, 0.9],
      vec![-1.0, f32::NAN],
    );
    let out = decode_detections(&raw, &ctx(0.5, (416, 416), (416, 416))).unwrap();
    assert_eq!(out.len(), 2);
    for det in &out {
      assert_eq!(det.class_name, "unknown");
    }
  }

  #[test]
  fn misaligned_raw_output_is_an_error() {
    let raw = raw(vec![0.0, 0.0, 10.0], vec![0.9], vec![0.0]);
    assert!(decode_detections(&raw, &ctx(0.5, (416, 416), (416, 416))).is_err());
  }

  #[test]
  fn empty_raw_output_decodes_to_empty() {
    let raw = raw(vec![], vec![], vec![]);
    let out = decode_detections(&raw, &ctx(0.5, (416, 416), (416, 416))).unwrap();
    assert!(out.is_empty());
  }

  #[test]
  fn detector_rejects_out_of_range_threshold() {
    assert!(Detector::new(416, 416, 1.5).is_err());
    assert!(Detector::new(416, 416, -0.1).is_err());
    assert!(Detector::new(416, 416, 0.5).is_ok());
  }
}
