// 该文件是 Liuguang （流光） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, config::Mode, geometry::Dimension};

/// 推理加速器
///
/// 输入为 NHWC 排列的 u8 张量，输出按分数降序排列且不超过 `top_k` 个。
/// 推理耗时由调用方计时。
pub trait Model {
  type Error;

  fn input_shape(&self) -> InputShape;
  fn infer(&self, tensor: &[u8], top_k: usize) -> Result<Vec<Candidate>, Self::Error>;
}

/// 模型输入形状，顺序固定为 (batch, height, width, channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
  pub batch: u32,
  pub height: u32,
  pub width: u32,
  pub channels: u32,
}

impl InputShape {
  pub fn input_size(&self) -> Dimension {
    Dimension::new(self.width, self.height)
  }

  pub fn tensor_len(&self) -> usize {
    self.batch as usize * self.height as usize * self.width as usize * self.channels as usize
  }
}

/// 相对输入尺寸的归一化坐标框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub top_left: (f32, f32),
  pub bottom_right: (f32, f32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
  Classification {
    label_id: u32,
    score: f32,
  },
  Detection {
    label_id: u32,
    score: f32,
    bbox: BoundingBox,
  },
}

impl Candidate {
  pub fn label_id(&self) -> u32 {
    match self {
      Candidate::Classification { label_id, .. } | Candidate::Detection { label_id, .. } => {
        *label_id
      }
    }
  }

  pub fn score(&self) -> f32 {
    match self {
      Candidate::Classification { score, .. } | Candidate::Detection { score, .. } => *score,
    }
  }
}

/// 过滤低于阈值的候选，按分数降序排列后截断到 `top_k`
pub fn rank_candidates(mut items: Vec<Candidate>, threshold: f32, top_k: usize) -> Vec<Candidate> {
  items.retain(|c| c.score() >= threshold);
  items.sort_by(|a, b| b.score().total_cmp(&a.score()));
  items.truncate(top_k);
  items
}

#[derive(Error, Debug)]
pub enum ShapeError {
  #[error("模型地址缺少参数: {0}")]
  MissingParameter(&'static str),
  #[error("模型地址参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
  #[error("仅支持 3 通道 RGB 输入，实际为 {0}")]
  UnsupportedChannels(u32),
  #[error("仅支持 batch 为 1 的输入，实际为 {0}")]
  UnsupportedBatch(u32),
}

/// 从模型 URL 的查询参数读取输入形状
///
/// `height` 与 `width` 必填，`batch` 默认 1，`channels` 默认 3。
pub fn shape_from_query(url: &Url) -> Result<InputShape, ShapeError> {
  let query: HashMap<String, String> = url
    .query_pairs()
    .map(|(k, v)| (String::from(k), String::from(v)))
    .collect();

  let read = |name: &'static str, default: Option<u32>| -> Result<u32, ShapeError> {
    match query.get(name) {
      Some(value) => match value.parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ShapeError::InvalidParameter(name, value.clone())),
      },
      None => default.ok_or(ShapeError::MissingParameter(name)),
    }
  };

  let shape = InputShape {
    batch: read("batch", Some(1))?,
    height: read("height", None)?,
    width: read("width", None)?,
    channels: read("channels", Some(3))?,
  };

  if shape.channels != 3 {
    return Err(ShapeError::UnsupportedChannels(shape.channels));
  }
  if shape.batch != 1 {
    return Err(ShapeError::UnsupportedBatch(shape.batch));
  }
  Ok(shape)
}

mod classifier;
pub use self::classifier::{Classifier, ClassifierBuilder, ClassifierError};

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26Builder, Yolo26Detector, Yolo26Error};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("Classifier error: {0}")]
  ClassifierError(#[from] ClassifierError),
  #[cfg(feature = "model_yolo26")]
  #[error("YOLO26 error: {0}")]
  Yolo26Error(#[from] Yolo26Error),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
  #[error("Model {scheme}:// produces {actual:?} results, this program expects {expected:?}")]
  ModeMismatch {
    scheme: String,
    expected: Mode,
    actual: Mode,
  },
}

pub enum ModelWrapper {
  Classifier(Classifier),
  #[cfg(feature = "model_yolo26")]
  Yolo26(Yolo26Detector),
}

impl ModelWrapper {
  /// 由 URL 方案判断模型输出的结果类型
  pub fn scheme_mode(url: &Url) -> Result<Mode, ModelError> {
    match url.scheme() {
      ClassifierBuilder::SCHEME => Ok(Mode::Classification),
      #[cfg(feature = "model_yolo26")]
      Yolo26Builder::SCHEME => Ok(Mode::Detection),
      other => Err(ModelError::SchemeMismatch(other.to_string())),
    }
  }

  /// 在加载模型之前确认它与程序的推理类型一致
  pub fn check_mode(url: &Url, expected: Mode) -> Result<(), ModelError> {
    let actual = Self::scheme_mode(url)?;
    if actual != expected {
      return Err(ModelError::ModeMismatch {
        scheme: url.scheme().to_string(),
        expected,
        actual,
      });
    }
    Ok(())
  }

  pub fn mode(&self) -> Mode {
    match self {
      ModelWrapper::Classifier(_) => Mode::Classification,
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(_) => Mode::Detection,
    }
  }

  /// 按 URL 方案加载模型，`threshold` 为最低分数
  pub fn load(url: &Url, threshold: f32) -> Result<Self, ModelError> {
    #[cfg(feature = "model_yolo26")]
    {
      if url.scheme() == Yolo26Builder::SCHEME {
        let model = Yolo26Builder::from_url(url)?
          .threshold(threshold)
          .build()?;
        return Ok(ModelWrapper::Yolo26(model));
      }
    }

    match url.scheme() {
      ClassifierBuilder::SCHEME => {
        let model = ClassifierBuilder::from_url(url)?
          .threshold(threshold)
          .build()?;
        Ok(ModelWrapper::Classifier(model))
      }
      other => Err(ModelError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Model for ModelWrapper {
  type Error = ModelError;

  fn input_shape(&self) -> InputShape {
    match self {
      ModelWrapper::Classifier(model) => model.input_shape(),
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(model) => model.input_shape(),
    }
  }

  fn infer(&self, tensor: &[u8], top_k: usize) -> Result<Vec<Candidate>, Self::Error> {
    match self {
      ModelWrapper::Classifier(model) => model.infer(tensor, top_k).map_err(ModelError::from),
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(model) => model.infer(tensor, top_k).map_err(ModelError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classification(label_id: u32, score: f32) -> Candidate {
    Candidate::Classification { label_id, score }
  }

  #[test]
  fn ranking_filters_sorts_and_truncates() {
    let items = vec![
      classification(0, 0.2),
      classification(1, 0.9),
      classification(2, 0.05),
      classification(3, 0.5),
    ];
    let ranked = rank_candidates(items, 0.1, 2);
    let ids: Vec<u32> = ranked.iter().map(Candidate::label_id).collect();
    assert_eq!(ids, vec![1, 3]);
  }

  #[test]
  fn shape_comes_from_query() {
    let url = Url::parse("classify:///opt/mobilenet.rknn?height=224&width=300").unwrap();
    let shape = shape_from_query(&url).unwrap();
    assert_eq!(
      shape,
      InputShape {
        batch: 1,
        height: 224,
        width: 300,
        channels: 3
      }
    );
    assert_eq!(shape.input_size(), Dimension::new(300, 224));
    assert_eq!(shape.tensor_len(), 224 * 300 * 3);
  }

  #[test]
  fn shape_rejects_missing_or_bad_values() {
    let missing = Url::parse("classify:///m.rknn?width=224").unwrap();
    assert!(matches!(
      shape_from_query(&missing),
      Err(ShapeError::MissingParameter("height"))
    ));
    let zero = Url::parse("classify:///m.rknn?width=0&height=224").unwrap();
    assert!(matches!(
      shape_from_query(&zero),
      Err(ShapeError::InvalidParameter("width", _))
    ));
    let gray = Url::parse("classify:///m.rknn?width=224&height=224&channels=1").unwrap();
    assert!(matches!(
      shape_from_query(&gray),
      Err(ShapeError::UnsupportedChannels(1))
    ));
  }

  #[test]
  fn model_scheme_must_match_the_program() {
    let classify = Url::parse("classify:///m.rknn?height=224&width=224").unwrap();
    assert!(ModelWrapper::check_mode(&classify, Mode::Classification).is_ok());
    assert!(matches!(
      ModelWrapper::check_mode(&classify, Mode::Detection),
      Err(ModelError::ModeMismatch {
        expected: Mode::Detection,
        actual: Mode::Classification,
        ..
      })
    ));

    #[cfg(feature = "model_yolo26")]
    {
      let yolo = Url::parse("yolo26:///m.rknn?height=640&width=640").unwrap();
      assert!(ModelWrapper::check_mode(&yolo, Mode::Detection).is_ok());
      assert!(matches!(
        ModelWrapper::check_mode(&yolo, Mode::Classification),
        Err(ModelError::ModeMismatch {
          actual: Mode::Detection,
          ..
        })
      ));
    }
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("onnx:///m.onnx").unwrap();
    assert!(matches!(
      ModelWrapper::load(&url, 0.1),
      Err(ModelError::SchemeMismatch(_))
    ));
  }
}
