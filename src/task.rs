// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/task.rs - 任务循环
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::detector::{Detection, Detector};
use crate::input::InputSource;
use crate::model::Model;
use crate::output::Overlay;
use crate::scope::TensorScope;

/// 取消令牌
///
/// 可以跨线程克隆，通常由信号处理器触发。取消属于主动关闭，
/// 任务循环不会为此清除渲染目标。
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  /// 创建一个新的取消令牌
  pub fn new() -> Self {
    Self::default()
  }

  /// 请求取消
  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  /// 是否已请求取消
  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// 检测结果回调
pub type DetectionCallback = Box<dyn FnMut(&[Detection])>;

/// 任务 trait
pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 单帧任务
///
/// 从输入源取恰好一帧，执行一次检测并渲染。
pub struct OneShotTask {
  detector: Detector,
  on_detections: Option<DetectionCallback>,
}

impl OneShotTask {
  /// 创建一个新的单帧任务
  pub fn new(detector: Detector) -> Self {
    Self {
      detector,
      on_detections: None,
    }
  }

  /// 设置检测结果回调
  pub fn with_callback(mut self, callback: DetectionCallback) -> Self {
    self.on_detections = Some(callback);
    self
  }
}

impl<I, M, ME, O> Task<I, M, O> for OneShotTask
where
  I: InputSource,
  ME: std::error::Error + Sync + Send + 'static,
  M: Model<Error = ME>,
  O: Overlay,
{
  type Error = anyhow::Error;

  fn run_task(mut self, mut input: I, mut model: M, mut output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input
      .next()
      .ok_or_else(|| anyhow::anyhow!("没有输入帧"))?
      .context("读取输入帧失败")?;

    let now = std::time::Instant::now();
    let mut scope = TensorScope::open("单帧检测");
    let detections = self
      .detector
      .detect_frame(&frame, &mut model, &mut output, &mut scope)?;
    let released = scope.close();
    info!(
      "检测完成，释放中间张量 {} 字节，耗时: {:.2?}",
      released.bytes,
      now.elapsed(),
    );

    if !detections.is_empty() {
      if let Some(callback) = self.on_detections.as_mut() {
        callback(&detections);
      }
    }

    output.finish()?;
    Ok(())
  }
}

/// 连续任务
///
/// 逐帧串行地执行 取帧 -> 检测 -> 渲染，上一帧完全处理完才取下一帧。
/// 退出路径有三条：
/// - 取消令牌被触发：主动关闭，不清除渲染目标；
/// - 输入源关闭（不再存活或迭代结束）：清除一次渲染目标后停止；
/// - 模型或渲染出错：携带上下文向上传播，同样不清除渲染目标。
pub struct ContinuousTask {
  detector: Detector,
  cancel: CancelToken,
  frame_limit: Option<u64>,
  on_detections: Option<DetectionCallback>,
}

impl ContinuousTask {
  /// 创建一个新的连续任务
  pub fn new(detector: Detector, cancel: CancelToken) -> Self {
    Self {
      detector,
      cancel,
      frame_limit: None,
      on_detections: None,
    }
  }

  /// 设置最大处理帧数
  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  /// 设置检测结果回调
  ///
  /// 只在该帧有至少一个检测时调用。
  pub fn with_callback(mut self, callback: DetectionCallback) -> Self {
    self.on_detections = Some(callback);
    self
  }
}

impl<I, M, ME, O> Task<I, M, O> for ContinuousTask
where
  I: InputSource,
  ME: std::error::Error + Sync + Send + 'static,
  M: Model<Error = ME>,
  O: Overlay,
{
  type Error = anyhow::Error;

  fn run_task(mut self, mut input: I, mut model: M, mut output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut processed: u64 = 0;
    let mut total_detections: u64 = 0;

    loop {
      if self.cancel.is_cancelled() {
        warn!("收到取消请求，退出任务循环");
        break;
      }

      if !input.is_live() {
        info!("输入源已关闭，清除渲染目标");
        output.clear()?;
        break;
      }

      let frame = match input.next() {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => return Err(e).context("读取输入帧失败"),
        None => {
          info!("输入帧耗尽，清除渲染目标");
          output.clear()?;
          break;
        }
      };

      let now = std::time::Instant::now();
      let mut scope = TensorScope::open("连续检测");
      let detections = self
        .detector
        .detect_frame(&frame, &mut model, &mut output, &mut scope)?;
      let released = scope.close();
      info!(
        "第 {} 帧处理完成，{} 个检测，释放中间张量 {} 字节，耗时: {:.2?}",
        frame.index,
        detections.len(),
        released.bytes,
        now.elapsed(),
      );

      total_detections += detections.len() as u64;
      if !detections.is_empty() {
        if let Some(callback) = self.on_detections.as_mut() {
          callback(&detections);
        }
      }

      processed += 1;
      if self.frame_limit.map(|n| processed >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", processed);
        break;
      }
    }

    output.finish()?;
    info!("任务完成: {} 帧，共 {} 个检测", processed, total_detections);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use image::RgbImage;
  use ndarray::Array4;

  use super::*;
  use crate::detector::decode_detections;
  use crate::input::{Frame, InputSourceType};
  use crate::model::RawDetections;
  use crate::output::OverlayContext;

  struct MockSource {
    frames: Vec<Frame>,
  }

  impl MockSource {
    fn with_frames(count: usize) -> Self {
      let frames = (0..count)
        .map(|i| Frame {
          image: RgbImage::new(8, 8),
          index: i as u64,
          timestamp_ms: i as u64 * 33,
        })
        .collect();
      Self { frames }
    }

    fn empty() -> Self {
      Self { frames: Vec::new() }
    }
  }

  impl Iterator for MockSource {
    type Item = anyhow::Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
      if self.frames.is_empty() {
        None
      } else {
        Some(Ok(self.frames.remove(0)))
      }
    }
  }

  impl InputSource for MockSource {
    fn source_type(&self) -> InputSourceType {
      InputSourceType::ImageSequence
    }

    fn width(&self) -> u32 {
      if self.frames.is_empty() { 0 } else { 8 }
    }

    fn height(&self) -> u32 {
      self.width()
    }

    fn fps(&self) -> Option<f64> {
      None
    }
  }

  #[derive(Debug, thiserror::Error)]
  #[error("模拟推理失败")]
  struct MockModelError;

  struct MockModel {
    calls: Rc<RefCell<u64>>,
    fail_on_call: Option<u64>,
    detections_every_other: bool,
  }

  impl MockModel {
    fn new(calls: Rc<RefCell<u64>>) -> Self {
      Self {
        calls,
        fail_on_call: None,
        detections_every_other: false,
      }
    }
  }

  impl Model for MockModel {
    type Error = MockModelError;

    fn input_size(&self) -> (u32, u32) {
      (8, 8)
    }

    fn execute(
      &mut self,
      _input: Array4<f32>,
      _scope: &mut TensorScope,
    ) -> Result<RawDetections, Self::Error> {
      let mut calls = self.calls.borrow_mut();
      *calls += 1;
      if self.fail_on_call == Some(*calls) {
        return Err(MockModelError);
      }

      // 奇数次调用返回一个检测，偶数次为空
      let empty = self.detections_every_other && *calls % 2 == 0;
      if empty {
        Ok(RawDetections {
          boxes: vec![].into_boxed_slice(),
          scores: vec![].into_boxed_slice(),
          classes: vec![].into_boxed_slice(),
        })
      } else {
        Ok(RawDetections {
          boxes: vec![0.0, 0.0, 4.0, 4.0].into_boxed_slice(),
          scores: vec![0.9].into_boxed_slice(),
          classes: vec![0.0].into_boxed_slice(),
        })
      }
    }
  }

  #[derive(Default)]
  struct MockOverlay {
    renders: u64,
    clears: u64,
  }

  impl Overlay for MockOverlay {
    fn render_overlay(
      &mut self,
      _frame: &Frame,
      raw: &RawDetections,
      ctx: &OverlayContext,
    ) -> anyhow::Result<Vec<Detection>> {
      self.renders += 1;
      Ok(decode_detections(raw, ctx)?)
    }

    fn clear(&mut self) -> anyhow::Result<()> {
      self.clears += 1;
      Ok(())
    }
  }

  fn detector() -> Detector {
    Detector::new(8, 8, 0.5).unwrap()
  }

  #[test]
  fn closed_source_clears_once_without_inference() {
    let calls = Rc::new(RefCell::new(0));
    let clears = Rc::new(RefCell::new(MockOverlay::default()));

    let overlay = Rc::clone(&clears);
    struct SharedOverlay(Rc<RefCell<MockOverlay>>);
    impl Overlay for SharedOverlay {
      fn render_overlay(
        &mut self,
        frame: &Frame,
        raw: &RawDetections,
        ctx: &OverlayContext,
      ) -> anyhow::Result<Vec<Detection>> {
        self.0.borrow_mut().render_overlay(frame, raw, ctx)
      }
      fn clear(&mut self) -> anyhow::Result<()> {
        self.0.borrow_mut().clear()
      }
    }

    let task = ContinuousTask::new(detector(), CancelToken::new());
    task
      .run_task(
        MockSource::empty(),
        MockModel::new(Rc::clone(&calls)),
        SharedOverlay(overlay),
      )
      .unwrap();

    assert_eq!(*calls.borrow(), 0);
    assert_eq!(clears.borrow().clears, 1);
    assert_eq!(clears.borrow().renders, 0);
  }

  #[test]
  fn every_frame_is_processed_then_target_cleared() {
    let calls = Rc::new(RefCell::new(0));
    let received = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&received);
    let mut model = MockModel::new(Rc::clone(&calls));
    model.detections_every_other = true;

    let task = ContinuousTask::new(detector(), CancelToken::new()).with_callback(Box::new(
      move |detections: &[Detection]| {
        sink.borrow_mut().push(detections.len());
      },
    ));

    task
      .run_task(MockSource::with_frames(4), model, MockOverlay::default())
      .unwrap();

    assert_eq!(*calls.borrow(), 4);
    // 回调只在非空帧触发：第 1、3 次调用
    assert_eq!(*received.borrow(), vec![1, 1]);
  }

  #[test]
  fn cancelled_task_stops_without_clearing() {
    let calls = Rc::new(RefCell::new(0));
    let cancel = CancelToken::new();
    cancel.cancel();

    struct CountingOverlay(Rc<RefCell<u64>>);
    impl Overlay for CountingOverlay {
      fn render_overlay(
        &mut self,
        _frame: &Frame,
        raw: &RawDetections,
        ctx: &OverlayContext,
      ) -> anyhow::Result<Vec<Detection>> {
        Ok(decode_detections(raw, ctx)?)
      }
      fn clear(&mut self) -> anyhow::Result<()> {
        *self.0.borrow_mut() += 1;
        Ok(())
      }
    }

    let clears = Rc::new(RefCell::new(0));
    let task = ContinuousTask::new(detector(), cancel);
    task
      .run_task(
        MockSource::with_frames(4),
        MockModel::new(Rc::clone(&calls)),
        CountingOverlay(Rc::clone(&clears)),
      )
      .unwrap();

    assert_eq!(*calls.borrow(), 0);
    assert_eq!(*clears.borrow(), 0);
  }

  #[test]
  fn frame_limit_stops_the_loop_early() {
    let calls = Rc::new(RefCell::new(0));
    let task = ContinuousTask::new(detector(), CancelToken::new()).with_frame_limit(Some(2));
    task
      .run_task(
        MockSource::with_frames(10),
        MockModel::new(Rc::clone(&calls)),
        MockOverlay::default(),
      )
      .unwrap();
    assert_eq!(*calls.borrow(), 2);
  }

  #[test]
  fn model_error_aborts_and_propagates() {
    let calls = Rc::new(RefCell::new(0));
    let mut model = MockModel::new(Rc::clone(&calls));
    model.fail_on_call = Some(2);

    let task = ContinuousTask::new(detector(), CancelToken::new());
    let result = task.run_task(MockSource::with_frames(5), model, MockOverlay::default());

    assert!(result.is_err());
    assert_eq!(*calls.borrow(), 2);
  }

  #[test]
  fn one_shot_runs_a_single_frame() {
    let calls = Rc::new(RefCell::new(0));
    let task = OneShotTask::new(detector());
    task
      .run_task(
        MockSource::with_frames(1),
        MockModel::new(Rc::clone(&calls)),
        MockOverlay::default(),
      )
      .unwrap();
    assert_eq!(*calls.borrow(), 1);
  }

  #[test]
  fn one_shot_without_frames_is_an_error() {
    let calls = Rc::new(RefCell::new(0));
    let task = OneShotTask::new(detector());
    let result = task.run_task(
      MockSource::empty(),
      MockModel::new(Rc::clone(&calls)),
      MockOverlay::default(),
    );
    assert!(result.is_err());
  }
}
