// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/classifier.rs - 图像分类模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Candidate, InputShape, Model, ShapeError, rank_candidates, shape_from_query},
  url_path,
};

const CLASSIFIER_NUM_INPUTS: u32 = 1;
const CLASSIFIER_NUM_OUTPUTS: u32 = 1;

#[derive(Error, Debug)]
pub enum ClassifierError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("输入形状错误: {0}")]
  ShapeError(#[from] ShapeError),
  #[error("输入张量大小错误: 期望 {expected} 字节, 实际 {actual} 字节")]
  TensorSizeMismatch { expected: usize, actual: usize },
}

impl ClassifierError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    ClassifierError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct ClassifierBuilder {
  model_path: String,
  shape: InputShape,
  softmax: bool,
  threshold: f32,
  flags: InitFlags,
}

impl FromUrlWithScheme for ClassifierBuilder {
  const SCHEME: &'static str = "classify";
}

impl FromUrl for ClassifierBuilder {
  type Error = ClassifierError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ClassifierError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let softmax = url
      .query_pairs()
      .any(|(k, v)| k == "softmax" && v != "0" && v != "false");

    Ok(ClassifierBuilder {
      model_path: url_path(url),
      shape: shape_from_query(url)?,
      softmax,
      threshold: 0.0,
      flags: InitFlags::default(),
    })
  }
}

impl ClassifierBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn build(self) -> Result<Classifier, ClassifierError> {
    info!("加载分类模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let context = Context::new(&model_data, self.flags)?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| ClassifierError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| ClassifierError::invalid("无法获取输出数量", e))?;

    if num_inputs != CLASSIFIER_NUM_INPUTS || num_outputs != CLASSIFIER_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        CLASSIFIER_NUM_INPUTS, CLASSIFIER_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(ClassifierError::invalid(
        &format!("输入/输出数量为 {}/{}", num_inputs, num_outputs),
        rknpu::Error::InvalidModel,
      ));
    }

    info!(
      "分类模型加载完成, 输入 {}x{}x{}",
      self.shape.height, self.shape.width, self.shape.channels
    );

    Ok(Classifier {
      context,
      shape: self.shape,
      softmax: self.softmax,
      threshold: self.threshold,
    })
  }
}

pub struct Classifier {
  context: Context,
  shape: InputShape,
  softmax: bool,
  threshold: f32,
}

impl Model for Classifier {
  type Error = ClassifierError;

  fn input_shape(&self) -> InputShape {
    self.shape
  }

  fn infer(&self, tensor: &[u8], top_k: usize) -> Result<Vec<Candidate>, Self::Error> {
    let expected = self.shape.tensor_len();
    if tensor.len() != expected {
      return Err(ClassifierError::TensorSizeMismatch {
        expected,
        actual: tensor.len(),
      });
    }

    self
      .context
      .set_input(0, tensor, TensorFormat::NHWC, TensorType::UInt8)?;
    self.context.run()?;
    let output = self.context.get_outputs()?;
    let scores = output.get_f32(0)?;
    debug!("分类输出长度: {}", scores.len());

    Ok(classify_scores(scores, self.softmax, self.threshold, top_k))
  }
}

/// 把类别分数向量转换为排序后的候选列表
pub fn classify_scores(scores: &[f32], softmax: bool, threshold: f32, top_k: usize) -> Vec<Candidate> {
  let normalized: Vec<f32> = if softmax {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
  } else {
    scores.to_vec()
  };

  let items = normalized
    .into_iter()
    .enumerate()
    .map(|(id, score)| Candidate::Classification {
      label_id: id as u32,
      score,
    })
    .collect();
  rank_candidates(items, threshold, top_k)
}
