// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/input/mod.rs - 输入源模块
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod image_sequence;
mod image_source;
#[cfg(feature = "v4l_input")]
mod v4l2_source;

use std::path::Path;

use anyhow::Result;
use image::RgbImage;

pub use image_sequence::ImageSequenceSource;
pub use image_source::ImageSource;
#[cfg(feature = "v4l_input")]
pub use v4l2_source::V4l2Source;

/// 帧数据
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  /// 帧宽度
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  /// 帧高度
  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 输入源类型
pub enum InputSourceType {
  /// 单张图片
  Image,
  /// 图片序列（按文件名排序的目录）
  ImageSequence,
  /// V4L2 摄像头
  V4l2,
}

/// 输入源 trait
pub trait InputSource: Iterator<Item = Result<Frame>> {
  /// 获取输入源类型
  fn source_type(&self) -> InputSourceType;

  /// 获取帧宽度
  fn width(&self) -> u32;

  /// 获取帧高度
  fn height(&self) -> u32;

  /// 获取帧率（如果适用）
  fn fps(&self) -> Option<f64>;

  /// 输入源是否仍然存活
  ///
  /// 宽度为 0 且没有活动流时视为已关闭，任务循环据此清除渲染目标并停止。
  fn is_live(&self) -> bool {
    self.width() > 0
  }
}

impl<S: InputSource + ?Sized> InputSource for Box<S> {
  fn source_type(&self) -> InputSourceType {
    (**self).source_type()
  }

  fn width(&self) -> u32 {
    (**self).width()
  }

  fn height(&self) -> u32 {
    (**self).height()
  }

  fn fps(&self) -> Option<f64> {
    (**self).fps()
  }

  fn is_live(&self) -> bool {
    (**self).is_live()
  }
}

/// 图片文件扩展名
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

pub(crate) fn is_image_path(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let lower = ext.to_lowercase();
      IMAGE_EXTENSIONS.contains(&lower.as_str())
    })
    .unwrap_or(false)
}

/// 从路径创建输入源
pub fn create_input_source(source: &str) -> Result<Box<dyn InputSource>> {
  // V4L2 设备
  if source.starts_with("/dev/video") || source.starts_with("v4l2://") {
    #[cfg(feature = "v4l_input")]
    {
      let device_path = source.trim_start_matches("v4l2://");
      return Ok(Box::new(V4l2Source::new(device_path)?));
    }
    #[cfg(not(feature = "v4l_input"))]
    anyhow::bail!("未启用 v4l_input 特性，无法打开摄像头: {}", source);
  }

  let path = Path::new(source);

  // 图片目录视为帧序列
  if path.is_dir() {
    return Ok(Box::new(ImageSequenceSource::new(source)?));
  }

  // 单张图片
  if is_image_path(path) {
    return Ok(Box::new(ImageSource::new(source)?));
  }

  anyhow::bail!("无法识别的输入来源: {}", source)
}
