// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/output/json_record.rs - JSON 记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info};

use super::{Overlay, OverlayContext};
use crate::detector::{Detection, decode_detections};
use crate::input::Frame;
use crate::model::RawDetections;

/// JSON 记录输出
///
/// 把每个非空帧的检测结果写成目录下的一个 JSON 文件，文件名带帧索引。
pub struct JsonRecordOutput {
  /// 记录目录
  dir: PathBuf,
  /// 已写入的文件数
  written: u64,
}

impl JsonRecordOutput {
  /// 创建一个新的 JSON 记录输出
  pub fn new(dir: &str) -> Result<Self> {
    let dir = PathBuf::from(dir);
    std::fs::create_dir_all(&dir)
      .with_context(|| format!("无法创建记录目录: {}", dir.display()))?;
    info!("JSON 记录输出到目录: {}", dir.display());
    Ok(Self { dir, written: 0 })
  }

  /// 已写入的文件数
  pub fn written(&self) -> u64 {
    self.written
  }
}

impl Overlay for JsonRecordOutput {
  fn render_overlay(
    &mut self,
    frame: &Frame,
    raw: &RawDetections,
    ctx: &OverlayContext,
  ) -> Result<Vec<Detection>> {
    let detections = decode_detections(raw, ctx)?;

    // 空帧不落盘
    if detections.is_empty() {
      return Ok(detections);
    }

    let record = json!({
      "frame": frame.index,
      "timestamp_ms": frame.timestamp_ms,
      "recorded_at": chrono::Utc::now().to_rfc3339(),
      "width": frame.width(),
      "height": frame.height(),
      "detections": detections.iter().map(|det| json!({
        "class": det.class_name,
        "class_id": det.class_id,
        "confidence": det.confidence,
        "bbox": [det.x, det.y, det.width, det.height],
      })).collect::<Vec<_>>(),
    });

    let path = self.dir.join(format!("frame_{:06}.json", frame.index));
    std::fs::write(&path, serde_json::to_string_pretty(&record)?)
      .with_context(|| format!("无法写入记录文件: {}", path.display()))?;

    self.written += 1;
    debug!("已写入记录文件: {}", path.display());

    Ok(detections)
  }

  fn clear(&mut self) -> Result<()> {
    debug!("记录输出清除（无渲染表面，仅记录事件）");
    Ok(())
  }

  fn finish(&mut self) -> Result<()> {
    info!("记录完成: 共写入 {} 个文件", self.written);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::preprocess::ScaleRatios;

  fn record_dir() -> PathBuf {
    std::env::temp_dir().join(format!(
      "huiyan-record-test-{}-{:?}",
      std::process::id(),
      std::thread::current().id()
    ))
  }

  fn ctx() -> OverlayContext {
    OverlayContext {
      threshold: 0.5,
      ratios: ScaleRatios { x: 1.0, y: 1.0 },
      frame_size: (416, 416),
      model_size: (416, 416),
    }
  }

  fn frame(index: u64) -> Frame {
    Frame {
      image: image::RgbImage::new(416, 416),
      index,
      timestamp_ms: index * 33,
    }
  }

  #[test]
  fn writes_one_file_per_nonempty_frame() {
    let dir = record_dir();
    let mut output = JsonRecordOutput::new(dir.to_str().unwrap()).unwrap();

    let nonempty = RawDetections {
      boxes: vec![0.0, 0.0, 10.0, 10.0].into_boxed_slice(),
      scores: vec![0.9].into_boxed_slice(),
      classes: vec![0.0].into_boxed_slice(),
    };
    let empty = RawDetections {
      boxes: vec![].into_boxed_slice(),
      scores: vec![].into_boxed_slice(),
      classes: vec![].into_boxed_slice(),
    };

    output.render_overlay(&frame(0), &nonempty, &ctx()).unwrap();
    output.render_overlay(&frame(1), &empty, &ctx()).unwrap();
    output.render_overlay(&frame(2), &nonempty, &ctx()).unwrap();

    assert_eq!(output.written(), 2);
    assert!(dir.join("frame_000000.json").exists());
    assert!(!dir.join("frame_000001.json").exists());
    assert!(dir.join("frame_000002.json").exists());

    let text = std::fs::read_to_string(dir.join("frame_000000.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["frame"], 0);
    assert_eq!(value["detections"][0]["class"], "person");

    std::fs::remove_dir_all(dir).unwrap();
  }
}
