// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/input/image_sequence.rs - 图片序列输入源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use image::ImageReader;
use tracing::debug;

use super::{Frame, InputSource, InputSourceType, is_image_path};

/// 图片序列输入源
///
/// 把一个目录下的图片按文件名排序后当作视频帧逐张回放，
/// 图片耗尽即视为源关闭。各帧尺寸允许不同。
pub struct ImageSequenceSource {
  /// 待回放的图片路径队列
  paths: VecDeque<PathBuf>,
  /// 首帧宽度（标称值）
  width: u32,
  /// 首帧高度（标称值）
  height: u32,
  /// 帧索引
  frame_index: u64,
  /// 开始时间
  start_time: Instant,
}

impl ImageSequenceSource {
  /// 创建一个新的图片序列输入源
  pub fn new(dir: &str) -> Result<Self> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
      .with_context(|| format!("无法读取目录: {}", dir))?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_image_path(path))
      .collect();
    paths.sort();

    if paths.is_empty() {
      anyhow::bail!("目录中没有图片文件: {}", dir);
    }

    let (width, height) = image::image_dimensions(&paths[0])
      .with_context(|| format!("无法读取图片尺寸: {}", paths[0].display()))?;

    debug!("图片序列共 {} 帧，首帧 {}x{}", paths.len(), width, height);

    Ok(Self {
      paths: paths.into(),
      width,
      height,
      frame_index: 0,
      start_time: Instant::now(),
    })
  }
}

impl Iterator for ImageSequenceSource {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.paths.pop_front()?;

    let image = match ImageReader::open(&path)
      .with_context(|| format!("无法打开图片文件: {}", path.display()))
      .and_then(|reader| {
        reader
          .decode()
          .with_context(|| format!("无法解码图片文件: {}", path.display()))
      }) {
      Ok(img) => img.to_rgb8(),
      Err(e) => return Some(Err(e)),
    };

    let frame = Frame {
      image,
      index: self.frame_index,
      timestamp_ms: self.start_time.elapsed().as_millis() as u64,
    };

    self.frame_index += 1;
    Some(Ok(frame))
  }
}

impl InputSource for ImageSequenceSource {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::ImageSequence
  }

  fn width(&self) -> u32 {
    if self.paths.is_empty() { 0 } else { self.width }
  }

  fn height(&self) -> u32 {
    if self.paths.is_empty() { 0 } else { self.height }
  }

  fn fps(&self) -> Option<f64> {
    None
  }

  fn is_live(&self) -> bool {
    !self.paths.is_empty()
  }
}
