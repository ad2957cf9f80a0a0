// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::pin::Pin;
use std::time::Instant;

use anyhow::{Context, Result};
use image::RgbImage;
use tracing::{info, warn};
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{Frame, InputSource, InputSourceType};

/// 默认请求的采集宽度
const DEFAULT_WIDTH: u32 = 640;
/// 默认请求的采集高度
const DEFAULT_HEIGHT: u32 = 480;
/// mmap 缓冲区个数
const BUFFER_COUNT: u32 = 4;

/// V4L2 摄像头输入源
///
/// v4l 库的 Stream 借用 Device，这里用 Pin<Box> 固定 Device 的内存位置，
/// 使得可以在同一个结构体里同时持有设备和引用它的流。
pub struct V4l2Source {
  /// V4L2 设备（Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期实际受 device 约束）
  stream: Option<Stream<'static>>,
  /// 帧索引
  frame_index: u64,
  /// 视频宽度
  width: u32,
  /// 视频高度
  height: u32,
  /// 帧率（从驱动读取）
  fps: Option<f64>,
  /// 开始时间
  start_time: Instant,
}

impl V4l2Source {
  /// 创建一个新的 V4L2 摄像头输入源
  pub fn new(device_path: &str) -> Result<Self> {
    let device = Box::pin(
      Device::with_path(device_path).with_context(|| format!("无法打开设备: {}", device_path))?,
    );

    // 请求 YUYV 格式；驱动可能返回调整后的实际尺寸
    let mut format = device.format()?;
    format.width = DEFAULT_WIDTH;
    format.height = DEFAULT_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;

    if format.fourcc != FourCC::new(b"YUYV") {
      anyhow::bail!("设备不支持 YUYV 格式: {}", device_path);
    }

    let width = format.width;
    let height = format.height;
    let fps = Self::query_fps(&device);

    info!(
      "摄像头 {} 已打开: {}x{} @ {} fps",
      device_path,
      width,
      height,
      fps.map(|f| f.to_string()).unwrap_or_else(|| "?".into()),
    );

    let mut source = Self {
      device,
      stream: None,
      frame_index: 0,
      width,
      height,
      fps,
      start_time: Instant::now(),
    };

    // SAFETY: 把设备引用的生命周期延长到 'static。
    // 1. device 被 Pin<Box> 固定在堆上，结构体移动时地址不变
    // 2. stream 与 device 存在同一个结构体里，不会单独逃逸
    // 3. Drop 实现先 take 掉 stream，保证它在 device 之前释放
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, BUFFER_COUNT)
        .context("无法创建捕获流")?
    };

    source.stream = Some(stream);
    Ok(source)
  }

  /// 从驱动读取帧率
  fn query_fps(device: &Device) -> Option<f64> {
    match device.params() {
      Ok(params) => {
        let interval = params.interval;
        if interval.numerator == 0 {
          None
        } else {
          Some(interval.denominator as f64 / interval.numerator as f64)
        }
      }
      Err(e) => {
        warn!("无法读取摄像头帧率: {}", e);
        None
      }
    }
  }

  /// 将 YUYV 格式转换为 RGB
  fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);

    for chunk in yuyv.chunks_exact(4) {
      let u = chunk[1] as f32 - 128.0;
      let v = chunk[3] as f32 - 128.0;

      for &y in [chunk[0], chunk[2]].iter() {
        let y = y as f32;
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }

    rgb
  }
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    // 必须在 device 之前释放 stream
    self.stream.take();
  }
}

impl Iterator for V4l2Source {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    match stream.next() {
      Ok((buffer, _meta)) => {
        let rgb_data = Self::yuyv_to_rgb(buffer);

        let image = match RgbImage::from_raw(self.width, self.height, rgb_data) {
          Some(img) => img,
          None => {
            return Some(Err(anyhow::anyhow!(
              "捕获缓冲与 {}x{} 尺寸不符",
              self.width,
              self.height
            )));
          }
        };

        let frame = Frame {
          image,
          index: self.frame_index,
          timestamp_ms: self.start_time.elapsed().as_millis() as u64,
        };

        self.frame_index += 1;
        Some(Ok(frame))
      }
      Err(e) => Some(Err(anyhow::anyhow!("无法捕获帧: {}", e))),
    }
  }
}

impl InputSource for V4l2Source {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::V4l2
  }

  fn width(&self) -> u32 {
    if self.stream.is_some() { self.width } else { 0 }
  }

  fn height(&self) -> u32 {
    if self.stream.is_some() { self.height } else { 0 }
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }

  fn is_live(&self) -> bool {
    self.stream.is_some()
  }
}
