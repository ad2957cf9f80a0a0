// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/output/console.rs - 日志叠加输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use tracing::info;

use super::{Overlay, OverlayContext};
use crate::detector::{Detection, decode_detections};
use crate::input::Frame;
use crate::model::RawDetections;

/// 日志叠加输出
///
/// 把每帧的检测结果打印到日志，没有真正的渲染表面。
pub struct ConsoleOverlay {
  /// 已渲染帧数
  frames: u64,
  /// 累计检测数
  total_detections: u64,
}

impl ConsoleOverlay {
  /// 创建一个新的日志叠加输出
  pub fn new() -> Self {
    Self {
      frames: 0,
      total_detections: 0,
    }
  }
}

impl Default for ConsoleOverlay {
  fn default() -> Self {
    Self::new()
  }
}

impl Overlay for ConsoleOverlay {
  fn render_overlay(
    &mut self,
    frame: &Frame,
    raw: &RawDetections,
    ctx: &OverlayContext,
  ) -> Result<Vec<Detection>> {
    let detections = decode_detections(raw, ctx)?;

    self.frames += 1;
    self.total_detections += detections.len() as u64;

    if !detections.is_empty() {
      info!("帧 {} 检测到 {} 个目标:", frame.index, detections.len());
      for det in &detections {
        info!(
          "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
          det.class_name,
          det.confidence * 100.0,
          det.x,
          det.y,
          det.width,
          det.height,
        );
      }
    }

    Ok(detections)
  }

  fn clear(&mut self) -> Result<()> {
    info!("渲染目标已清除");
    Ok(())
  }

  fn finish(&mut self) -> Result<()> {
    info!(
      "输出完成: {} 帧，共 {} 个检测",
      self.frames, self.total_detections,
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::preprocess::ScaleRatios;

  #[test]
  fn render_decodes_and_counts() {
    let mut overlay = ConsoleOverlay::new();
    let frame = Frame {
      image: image::RgbImage::new(416, 416),
      index: 0,
      timestamp_ms: 0,
    };
    let raw = RawDetections {
      boxes: vec![0.0, 0.0, 10.0, 10.0].into_boxed_slice(),
      scores: vec![0.9].into_boxed_slice(),
      classes: vec![0.0].into_boxed_slice(),
    };
    let ctx = OverlayContext {
      threshold: 0.5,
      ratios: ScaleRatios { x: 1.0, y: 1.0 },
      frame_size: (416, 416),
      model_size: (416, 416),
    };

    let detections = overlay.render_overlay(&frame, &raw, &ctx).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(overlay.frames, 1);
    assert_eq!(overlay.total_detections, 1);
    overlay.clear().unwrap();
    overlay.finish().unwrap();
  }
}
