// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/preprocess.rs - 帧预处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use thiserror::Error;
use tracing::trace;

use crate::input::Frame;
use crate::scope::TensorScope;

/// 预处理错误
#[derive(Debug, Error)]
pub enum PreprocessError {
  /// 输入帧尺寸无效
  #[error("输入帧尺寸无效: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
}

/// 坐标缩放比
///
/// 把模型输入空间的坐标换算回原始帧坐标时使用：
/// x = max(w, h) / w，y = max(w, h) / h。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRatios {
  pub x: f32,
  pub y: f32,
}

/// 预处理结果
pub struct ModelInput {
  /// NHWC 格式的模型输入张量，形状 [1, H, W, 3]，值域 [0, 1]
  pub tensor: Array4<f32>,
  /// 坐标缩放比
  pub ratios: ScaleRatios,
}

/// 帧预处理器
///
/// 把任意尺寸的 RGB 帧变换为模型要求的方形输入：
/// 先在右侧和下方补零像素凑成正方形（不平移图像内容），
/// 再双线性缩放到模型尺寸，最后除以 255 归一化并加 batch 维。
pub struct Preprocessor {
  /// 模型输入宽度
  model_width: u32,
  /// 模型输入高度
  model_height: u32,
}

impl Preprocessor {
  /// 创建一个新的预处理器
  pub fn new(model_width: u32, model_height: u32) -> Self {
    Self {
      model_width,
      model_height,
    }
  }

  /// 模型输入尺寸 (宽, 高)
  pub fn model_size(&self) -> (u32, u32) {
    (self.model_width, self.model_height)
  }

  /// 预处理一帧
  ///
  /// 中间缓冲登记到传入的张量作用域里，随作用域关闭一起结算。
  pub fn run(&self, frame: &Frame, scope: &mut TensorScope) -> Result<ModelInput, PreprocessError> {
    let width = frame.width();
    let height = frame.height();

    if width == 0 || height == 0 {
      return Err(PreprocessError::EmptyFrame { width, height });
    }

    let max_size = width.max(height);
    let ratios = ScaleRatios {
      x: max_size as f32 / width as f32,
      y: max_size as f32 / height as f32,
    };

    // 非方形的帧先补成正方形，补边在右侧与下方，填充为黑色
    let resized = if width == height {
      let resized = imageops::resize(
        &frame.image,
        self.model_width,
        self.model_height,
        FilterType::Triangle,
      );
      scope.track_u8("缩放缓冲", resized.len());
      resized
    } else {
      let mut padded = RgbImage::new(max_size, max_size);
      imageops::replace(&mut padded, &frame.image, 0, 0);
      scope.track_u8("补边缓冲", padded.len());
      let resized = imageops::resize(
        &padded,
        self.model_width,
        self.model_height,
        FilterType::Triangle,
      );
      scope.track_u8("缩放缓冲", resized.len());
      resized
    };

    // NHWC [1, H, W, 3]，归一化到 [0, 1]
    let mut tensor = Array4::<f32>::zeros((
      1,
      self.model_height as usize,
      self.model_width as usize,
      3,
    ));
    for (x, y, pixel) in resized.enumerate_pixels() {
      for c in 0..3 {
        tensor[[0, y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
      }
    }

    trace!(
      "预处理完成: {}x{} -> {}x{}, 缩放比 ({:.3}, {:.3})",
      width, height, self.model_width, self.model_height, ratios.x, ratios.y,
    );

    Ok(ModelInput { tensor, ratios })
  }
}
