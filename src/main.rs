// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::cell::Cell;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use huiyan::FromUrl;
use huiyan::args::Args;
use huiyan::detector::Detector;
use huiyan::input::{InputSourceType, create_input_source};
use huiyan::model::{Model, YoloOnnxBuilder};
use huiyan::output::create_overlay;
use huiyan::task::{CancelToken, ContinuousTask, OneShotTask, Task};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let args = Args::parse();

  info!("Huiyan 检测叠加管线");
  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("置信度阈值: {}", args.confidence);

  // 加载模型
  info!("正在加载模型...");
  let builder = match url::Url::parse(&args.model) {
    Ok(url) => YoloOnnxBuilder::from_url(&url)?,
    Err(_) => YoloOnnxBuilder::from_path(&args.model),
  };
  let mut model = builder
    .fallback_size(args.model_size, args.model_size)
    .build()?;
  let (model_width, model_height) = model.input_size();
  info!("模型加载完成，输入尺寸 {}x{}", model_width, model_height);

  // 打开输入源
  info!("正在打开输入源...");
  let input_source = create_input_source(&args.input)?;
  info!(
    "输入源已打开: {}x{} {}",
    input_source.width(),
    input_source.height(),
    match input_source.source_type() {
      InputSourceType::Image => "图片",
      InputSourceType::ImageSequence => "图片序列",
      InputSourceType::V4l2 => "V4L2 摄像头",
    }
  );

  let overlay = create_overlay(args.record.as_deref())?;
  let detector = Detector::for_model(&model, args.confidence)?;

  // Ctrl-C 触发取消令牌，任务循环在下一帧边界退出
  let cancel = CancelToken::new();
  {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      cancel.cancel();
    })
    .context("无法设置 Ctrl-C 处理器")?;
  }

  let total_detections = Rc::new(Cell::new(0usize));
  let counter = Rc::clone(&total_detections);
  let callback = Box::new(move |detections: &[huiyan::detector::Detection]| {
    counter.set(counter.get() + detections.len());
  });

  info!("开始处理...");
  match input_source.source_type() {
    InputSourceType::Image => {
      OneShotTask::new(detector)
        .with_callback(callback)
        .run_task(input_source, &mut model, overlay)?;
    }
    _ => {
      let frame_limit = if args.max_frames > 0 {
        Some(args.max_frames)
      } else {
        None
      };
      ContinuousTask::new(detector, cancel)
        .with_frame_limit(frame_limit)
        .with_callback(callback)
        .run_task(input_source, &mut model, overlay)?;
    }
  }

  info!("处理完成! 总检测数: {}", total_detections.get());
  Ok(())
}
