// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/output/mod.rs - 叠加输出模块
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod console;
mod json_record;

use anyhow::Result;

pub use console::ConsoleOverlay;
pub use json_record::JsonRecordOutput;

use crate::detector::Detection;
use crate::input::Frame;
use crate::model::RawDetections;
use crate::preprocess::ScaleRatios;

/// 叠加渲染上下文
///
/// 解码模型原始输出所需的全部几何信息与阈值，由检测器逐帧提供。
pub struct OverlayContext {
  /// 置信度阈值
  pub threshold: f32,
  /// 坐标缩放比
  pub ratios: ScaleRatios,
  /// 原始帧尺寸 (宽, 高)
  pub frame_size: (u32, u32),
  /// 模型输入尺寸 (宽, 高)
  pub model_size: (u32, u32),
}

/// 叠加输出 trait
///
/// 渲染器收到模型原始输出后自行解码并展示，返回解码后的检测结果；
/// 输入关闭时任务循环调用一次 clear 清除渲染目标。
pub trait Overlay {
  /// 渲染一帧的叠加层
  fn render_overlay(
    &mut self,
    frame: &Frame,
    raw: &RawDetections,
    ctx: &OverlayContext,
  ) -> Result<Vec<Detection>>;

  /// 清除渲染目标
  fn clear(&mut self) -> Result<()>;

  /// 完成输出
  fn finish(&mut self) -> Result<()> {
    Ok(())
  }
}

impl<O: Overlay + ?Sized> Overlay for Box<O> {
  fn render_overlay(
    &mut self,
    frame: &Frame,
    raw: &RawDetections,
    ctx: &OverlayContext,
  ) -> Result<Vec<Detection>> {
    (**self).render_overlay(frame, raw, ctx)
  }

  fn clear(&mut self) -> Result<()> {
    (**self).clear()
  }

  fn finish(&mut self) -> Result<()> {
    (**self).finish()
  }
}

/// 创建叠加输出
///
/// 指定记录目录时逐帧写 JSON 记录，否则输出到日志。
pub fn create_overlay(record_dir: Option<&str>) -> Result<Box<dyn Overlay>> {
  match record_dir {
    Some(dir) => Ok(Box::new(JsonRecordOutput::new(dir)?)),
    None => Ok(Box::new(ConsoleOverlay::new())),
  }
}
