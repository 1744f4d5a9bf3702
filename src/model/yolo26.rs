// 该文件是 Liuguang （流光） 项目的一部分。
// src/model/yolo26.rs - YOLO26 检测模型
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
  model::{
    BoundingBox, Candidate, InputShape, Model, ShapeError, rank_candidates, shape_from_query,
  },
  url_path,
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_DEFAULT_CLASS_NUM: usize = 80;
const YOLO26_STRIDES: [u32; 3] = [8, 16, 32];

#[derive(Error, Debug)]
pub enum Yolo26Error {
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
  #[error("输入尺寸 {0}x{1} 不能被最大步长 32 整除")]
  UnalignedInput(u32, u32),
  #[error("输入张量大小错误: 期望 {expected} 字节, 实际 {actual} 字节")]
  TensorSizeMismatch { expected: usize, actual: usize },
  #[error(
    "检测头 {head} 输出大小不匹配: 张量 {first}/{second}, 期望回归 {reg_expected}, 分类 {cls_expected}"
  )]
  OutputSizeMismatch {
    head: usize,
    first: usize,
    second: usize,
    reg_expected: usize,
    cls_expected: usize,
  },
}

impl Yolo26Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

pub struct Yolo26Builder {
  model_path: String,
  shape: InputShape,
  class_num: usize,
  threshold: f32,
  flags: InitFlags,
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = "yolo26";
}

impl FromUrl for Yolo26Builder {
  type Error = Yolo26Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolo26Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let class_num = url
      .query_pairs()
      .find(|(k, _)| k == "classes")
      .and_then(|(_, v)| v.parse::<usize>().ok())
      .filter(|n| *n > 0)
      .unwrap_or(YOLO26_DEFAULT_CLASS_NUM);

    Ok(Yolo26Builder {
      model_path: url_path(url),
      shape: shape_from_query(url)?,
      class_num,
      threshold: 0.0,
      flags: InitFlags::default(),
    })
  }
}

impl Yolo26Builder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn build(self) -> Result<Yolo26Detector, Yolo26Error> {
    let max_stride = YOLO26_STRIDES[YOLO26_STRIDES.len() - 1];
    if self.shape.width % max_stride != 0 || self.shape.height % max_stride != 0 {
      return Err(Yolo26Error::UnalignedInput(
        self.shape.width,
        self.shape.height,
      ));
    }

    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!(" 查询 SDK 版本失败: {}", e);
        return Err(Yolo26Error::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(Yolo26Error::invalid(
        &format!("输入/输出数量为 {}/{}", num_inputs, num_outputs),
        rknpu::Error::InvalidModel,
      ));
    }

    info!(
      "检测模型加载完成, 输入 {}x{}, {} 类",
      self.shape.width, self.shape.height, self.class_num
    );

    Ok(Yolo26Detector {
      context,
      shape: self.shape,
      class_num: self.class_num,
      threshold: self.threshold,
    })
  }
}

pub struct Yolo26Detector {
  context: Context,
  shape: InputShape,
  class_num: usize,
  threshold: f32,
}

/// 一个检测头的回归与分类输出
pub struct HeadOutput<'a> {
  pub reg: &'a [f32],
  pub cls: &'a [f32],
}

/// 根据张量大小匹配回归和分类输出
///
/// 大小对不上说明模型与声明的输入形状或类别数不一致，每帧都会失败。
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
  head_idx: usize,
) -> Result<HeadOutput<'a>, Yolo26Error> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Ok(HeadOutput {
      reg: tensor1,
      cls: tensor2,
    })
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    debug!("检测头 {}: 输出顺序交换", head_idx);
    Ok(HeadOutput {
      reg: tensor2,
      cls: tensor1,
    })
  } else {
    error!(
      "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}, 期望分类: {}",
      head_idx,
      tensor1.len(),
      tensor2.len(),
      reg_expected,
      cls_expected
    );
    Err(Yolo26Error::OutputSizeMismatch {
      head: head_idx,
      first: tensor1.len(),
      second: tensor2.len(),
      reg_expected,
      cls_expected,
    })
  }
}

/// 解码三个检测头
///
/// 每个网格取分数最高的类别，框坐标归一化到输入尺寸并截断到 [0, 1]。
pub fn decode_heads(
  heads: &[Option<HeadOutput<'_>>],
  shape: InputShape,
  class_num: usize,
  threshold: f32,
) -> Vec<Candidate> {
  let input_w = shape.width as f32;
  let input_h = shape.height as f32;
  let mut items = Vec::new();

  for (head_idx, (head, stride)) in heads.iter().zip(YOLO26_STRIDES).enumerate() {
    let Some(head) = head else {
      debug!("跳过检测头 {}", head_idx);
      continue;
    };
    let map_h = (shape.height / stride) as usize;
    let map_w = (shape.width / stride) as usize;
    let spatial = map_h * map_w;
    let stride = stride as f32;

    for h in 0..map_h {
      for w in 0..map_w {
        let idx = h * map_w + w;

        let (score, class_id) = {
          let mut max_logit = f32::MIN;
          let mut cls_idx = 0usize;
          for c in 0..class_num {
            let logit = head.cls[c * spatial + idx];
            if logit > max_logit {
              max_logit = logit;
              cls_idx = c;
            }
          }
          (sigmoid(max_logit), cls_idx as u32)
        };

        if score < threshold {
          continue;
        }

        let cx = head.reg[idx];
        let cy = head.reg[spatial + idx];
        let cw = head.reg[2 * spatial + idx];
        let ch = head.reg[3 * spatial + idx];

        let grid_x = (w as f32) + 0.5;
        let grid_y = (h as f32) + 0.5;

        let xmin = ((grid_x - cx) * stride).clamp(0.0, input_w);
        let ymin = ((grid_y - cy) * stride).clamp(0.0, input_h);
        let xmax = ((grid_x + cw) * stride).clamp(0.0, input_w);
        let ymax = ((grid_y + ch) * stride).clamp(0.0, input_h);

        items.push(Candidate::Detection {
          label_id: class_id,
          score,
          bbox: BoundingBox {
            top_left: (xmin / input_w, ymin / input_h),
            bottom_right: (xmax / input_w, ymax / input_h),
          },
        });
      }
    }
  }

  items
}

impl Model for Yolo26Detector {
  type Error = Yolo26Error;

  fn input_shape(&self) -> InputShape {
    self.shape
  }

  fn infer(&self, tensor: &[u8], top_k: usize) -> Result<Vec<Candidate>, Self::Error> {
    let expected = self.shape.tensor_len();
    if tensor.len() != expected {
      return Err(Yolo26Error::TensorSizeMismatch {
        expected,
        actual: tensor.len(),
      });
    }

    self
      .context
      .set_input(0, tensor, TensorFormat::NHWC, TensorType::UInt8)?;
    self.context.run()?;
    let output = self.context.get_outputs()?;

    // RKNN 输出顺序可能不同，按张量大小区分回归和分类
    let mut heads = Vec::with_capacity(YOLO26_STRIDES.len());
    for (head_idx, stride) in YOLO26_STRIDES.iter().enumerate() {
      let spatial = (self.shape.height / stride) as usize * (self.shape.width / stride) as usize;
      let tensor1 = output.get_f32(head_idx * 2)?;
      let tensor2 = output.get_f32(head_idx * 2 + 1)?;
      heads.push(Some(match_reg_cls_tensors(
        tensor1,
        tensor2,
        4 * spatial,
        self.class_num * spatial,
        head_idx,
      )?));
    }

    let items = decode_heads(&heads, self.shape, self.class_num, self.threshold);
    debug!("检测到 {} 个候选", items.len());
    let ranked = rank_candidates(items, self.threshold, top_k);
    debug!("检测结果: {:?}", ranked);
    Ok(ranked)
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;

  const SHAPE: InputShape = InputShape {
    batch: 1,
    height: 64,
    width: 64,
    channels: 3,
  };

  #[test]
  fn decodes_single_confident_cell() {
    // 步长 32 的检测头为 2x2 网格，两个类别
    let spatial = 4;
    let class_num = 2;
    let mut cls = vec![-10.0f32; class_num * spatial];
    let mut reg = vec![0.0f32; 4 * spatial];
    // 网格 (h=0, w=1)，类别 1
    let idx = 1;
    cls[spatial + idx] = 5.0;
    reg[idx] = 0.5;
    reg[spatial + idx] = 0.5;
    reg[2 * spatial + idx] = 0.5;
    reg[3 * spatial + idx] = 0.5;

    let heads = vec![
      None,
      None,
      Some(HeadOutput {
        reg: &reg,
        cls: &cls,
      }),
    ];
    let items = decode_heads(&heads, SHAPE, class_num, 0.5);
    assert_eq!(items.len(), 1);
    let Candidate::Detection {
      label_id,
      score,
      bbox,
    } = &items[0]
    else {
      panic!("expected a detection");
    };
    assert_eq!(*label_id, 1);
    assert!(*score > 0.99);
    assert_eq!(bbox.top_left, (0.5, 0.0));
    assert_eq!(bbox.bottom_right, (1.0, 0.5));
  }

  #[test]
  fn boxes_are_clamped_to_the_input() {
    let spatial = 4;
    let cls = vec![3.0f32; spatial];
    let reg = vec![10.0f32; 4 * spatial];
    let heads = vec![
      None,
      None,
      Some(HeadOutput {
        reg: &reg,
        cls: &cls,
      }),
    ];
    for item in decode_heads(&heads, SHAPE, 1, 0.1) {
      let Candidate::Detection { bbox, .. } = item else {
        panic!("expected a detection");
      };
      assert_eq!(bbox.top_left, (0.0, 0.0));
      assert_eq!(bbox.bottom_right, (1.0, 1.0));
    }
  }

  #[test]
  fn swapped_outputs_are_recognised() {
    let reg = vec![0.0f32; 8];
    let cls = vec![0.0f32; 6];
    let head = match_reg_cls_tensors(&cls, &reg, 8, 6, 0).unwrap();
    assert_eq!(head.reg.len(), 8);
    assert_eq!(head.cls.len(), 6);
  }

  #[test]
  fn mismatched_output_sizes_are_an_error() {
    // 类别数声明错误时两个张量都对不上
    let reg = vec![0.0f32; 8];
    let cls = vec![0.0f32; 10];
    let err = match_reg_cls_tensors(&reg, &cls, 8, 6, 2)
      .err()
      .expect("mismatched sizes must fail");
    assert!(matches!(
      err,
      Yolo26Error::OutputSizeMismatch {
        head: 2,
        first: 8,
        second: 10,
        reg_expected: 8,
        cls_expected: 6,
      }
    ));
    assert!(match_reg_cls_tensors(&cls, &cls, 8, 6, 0).is_err());
  }

  #[test]
  fn builder_reads_shape_and_classes() {
    let url = Url::parse("yolo26:///opt/yolo26n.rknn?height=640&width=640&classes=20").unwrap();
    let builder = Yolo26Builder::from_url(&url).unwrap().threshold(0.3);
    assert_eq!(builder.class_num, 20);
    assert_eq!(builder.threshold, 0.3);
    assert_eq!(builder.shape.input_size().height, 640);

    let unaligned = Url::parse("yolo26:///opt/y.rknn?height=300&width=300").unwrap();
    assert!(matches!(
      Yolo26Builder::from_url(&unaligned).unwrap().build(),
      Err(Yolo26Error::UnalignedInput(300, 300))
    ));
  }
}
