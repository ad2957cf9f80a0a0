// 该文件是 Huiyan （慧眼） 项目的一部分。
// src/model/yolo_onnx.rs - onnxruntime 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::ValueType;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Model, RawDetections};
use crate::scope::TensorScope;
use crate::{FromUrl, FromUrlWithScheme};

/// onnxruntime 模型错误
#[derive(Debug, Error)]
pub enum YoloOnnxError {
  /// 模型加载或推理错误
  #[error("模型运行时错误: {0}")]
  Runtime(#[from] ort::Error),
  /// 模型结构不符合预期
  #[error("模型结构无效: {0}")]
  ModelInvalid(String),
  /// 模型路径无效
  #[error("模型路径无效: {0}")]
  ModelPath(String),
}

/// onnxruntime 模型构建器
pub struct YoloOnnxBuilder {
  /// 模型文件路径
  model_path: String,
  /// 模型输入维度为动态时使用的回退尺寸 (宽, 高)
  fallback_size: (u32, u32),
  /// 算子内线程数
  intra_threads: usize,
}

impl YoloOnnxBuilder {
  /// 从文件路径创建构建器
  pub fn from_path(path: impl Into<String>) -> Self {
    Self {
      model_path: path.into(),
      fallback_size: (640, 640),
      intra_threads: 4,
    }
  }

  /// 设置动态维度时的回退尺寸
  pub fn fallback_size(mut self, width: u32, height: u32) -> Self {
    self.fallback_size = (width, height);
    self
  }

  /// 设置算子内线程数
  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads;
    self
  }

  /// 加载模型并构建检测器
  pub fn build(self) -> Result<YoloOnnx, YoloOnnxError> {
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.intra_threads)?
      .commit_from_file(&self.model_path)?;

    if session.inputs.is_empty() {
      return Err(YoloOnnxError::ModelInvalid("模型没有输入".into()));
    }
    if session.outputs.len() < 3 {
      return Err(YoloOnnxError::ModelInvalid(format!(
        "模型输出少于 3 个（实际 {} 个），需要 boxes/scores/classes",
        session.outputs.len()
      )));
    }

    let input_size = Self::read_input_size(&session, self.fallback_size)?;
    let output_names: Vec<String> = session
      .outputs
      .iter()
      .take(3)
      .map(|o| o.name.clone())
      .collect();

    info!(
      "模型 {} 已加载: 输入 {}x{}, 输出 {:?}",
      self.model_path, input_size.0, input_size.1, output_names,
    );

    Ok(YoloOnnx {
      session,
      input_size,
      output_names,
    })
  }

  /// 从模型元数据读取输入尺寸
  ///
  /// 要求 NHWC [N, H, W, 3]；H/W 为动态维（非正值）时退回构建器指定的尺寸。
  fn read_input_size(
    session: &Session,
    fallback: (u32, u32),
  ) -> Result<(u32, u32), YoloOnnxError> {
    let input = &session.inputs[0];
    let dims: Vec<i64> = match &input.input_type {
      ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
      other => {
        return Err(YoloOnnxError::ModelInvalid(format!(
          "模型输入 {} 不是张量: {:?}",
          input.name, other
        )));
      }
    };

    if dims.len() != 4 {
      return Err(YoloOnnxError::ModelInvalid(format!(
        "模型输入 {} 维度数为 {}，需要 4 维 NHWC",
        input.name,
        dims.len()
      )));
    }
    if dims[3] != 3 {
      return Err(YoloOnnxError::ModelInvalid(format!(
        "模型输入必须为 NHWC（最后一维为 3），实际形状 {:?}",
        dims
      )));
    }

    let (height, width) = (dims[1], dims[2]);
    if height <= 0 || width <= 0 {
      warn!(
        "模型输入尺寸为动态维 {:?}，使用回退尺寸 {}x{}",
        dims, fallback.0, fallback.1
      );
      return Ok(fallback);
    }

    Ok((width as u32, height as u32))
  }
}

impl FromUrl for YoloOnnxBuilder {
  type Error = YoloOnnxError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloOnnxError::ModelPath(format!(
        "不支持的模型 URL 协议: {}",
        url.scheme()
      )));
    }
    let path = urlencoding::decode(url.path())
      .map_err(|e| YoloOnnxError::ModelPath(format!("路径解码失败: {}", e)))?;
    Ok(Self::from_path(path.into_owned()))
  }
}

impl FromUrlWithScheme for YoloOnnxBuilder {
  const SCHEME: &'static str = "onnx";
}

/// onnxruntime 检测模型
///
/// 输出约定：前三个输出依次为 boxes [N, 4]（[y1, x1, y2, x2] 模型像素坐标）、
/// scores [N] 与 classes [N]。
pub struct YoloOnnx {
  /// onnxruntime 会话
  session: Session,
  /// 模型输入尺寸 (宽, 高)
  input_size: (u32, u32),
  /// 前三个输出的名字
  output_names: Vec<String>,
}

impl YoloOnnx {
  fn extract_output(
    outputs: &ort::session::SessionOutputs,
    name: &str,
  ) -> Result<Box<[f32]>, YoloOnnxError> {
    let value = outputs
      .get(name)
      .ok_or_else(|| YoloOnnxError::ModelInvalid(format!("缺少输出: {}", name)))?;
    let (_shape, data) = value.try_extract_tensor::<f32>()?;
    // 拷出到独立缓冲，随即允许运行时释放内部内存
    Ok(data.to_vec().into_boxed_slice())
  }
}

impl Model for YoloOnnx {
  type Error = YoloOnnxError;

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn execute(
    &mut self,
    input: Array4<f32>,
    scope: &mut TensorScope,
  ) -> Result<RawDetections, Self::Error> {
    scope.track_f32("模型输入", input.len());

    let tensor = ort::value::Tensor::from_array(input)?;
    let outputs = self.session.run(ort::inputs![tensor])?;

    let boxes = Self::extract_output(&outputs, &self.output_names[0])?;
    let scores = Self::extract_output(&outputs, &self.output_names[1])?;
    let classes = Self::extract_output(&outputs, &self.output_names[2])?;

    scope.track_f32("boxes", boxes.len());
    scope.track_f32("scores", scores.len());
    scope.track_f32("classes", classes.len());

    debug!("推理完成: {} 个候选检测", scores.len());

    Ok(RawDetections {
      boxes,
      scores,
      classes,
    })
  }
}
