// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/draw.rs - 推理结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::Path, time::Duration};

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::Rgba;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::PipelineConfig,
  geometry::PipelineGeometry,
  label::LabelMap,
  model::Candidate,
  output::{
    Compositor,
    overlay::{OverlayError, OverlayRenderer},
  },
};

pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/freefont/FreeMonoBold.ttf";

#[derive(Error, Debug)]
pub enum FontError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] InvalidFont),
}

/// 指定字号的字体
#[derive(Clone)]
pub struct OverlayFont {
  font: FontArc,
  scale: PxScale,
}

impl OverlayFont {
  pub fn load(path: impl AsRef<Path>, size: f32) -> Result<Self, FontError> {
    let path = path.as_ref();
    info!("加载字体: {}", path.display());
    let data = std::fs::read(path)?;
    Self::from_bytes(data, size)
  }

  pub fn from_bytes(data: Vec<u8>, size: f32) -> Result<Self, FontError> {
    Ok(Self {
      font: FontArc::try_from_vec(data)?,
      scale: PxScale::from(size),
    })
  }

  pub fn font(&self) -> &FontArc {
    &self.font
  }

  pub fn scale(&self) -> PxScale {
    self.scale
  }
}

/// 检测框标题，没有标签名时只显示分数
pub fn caption(labels: Option<&LabelMap>, label_id: u32, score: f32) -> String {
  match labels.and_then(|l| l.get(label_id)) {
    Some(name) => format!("{} {:.2}", name, score),
    None => format!("{:.2}", score),
  }
}

fn elapsed_ms(elapsed: Duration) -> f64 {
  elapsed.as_secs_f64() * 1000.0
}

/// 分类模式的状态文字：`<标签> <分数>\n<耗时>ms`
pub fn classification_status(
  labels: Option<&LabelMap>,
  label_id: u32,
  score: f32,
  elapsed: Duration,
) -> String {
  let name = labels
    .and_then(|l| l.get(label_id))
    .map(str::to_string)
    .unwrap_or_else(|| label_id.to_string());
  format!("{} {:.2}\n{:.2}ms", name, score, elapsed_ms(elapsed))
}

/// 检测模式的状态文字：`<耗时>ms`
pub fn detection_status(elapsed: Duration) -> String {
  format!("{:.2}ms", elapsed_ms(elapsed))
}

/// 把候选结果画到叠加层上
pub struct Draw {
  box_color: Rgba<u8>,
  text_color: Rgba<u8>,
  font: Option<OverlayFont>,
}

impl Draw {
  pub fn new(config: &PipelineConfig, font: Option<OverlayFont>) -> Self {
    Self {
      box_color: Rgba(config.box_color),
      text_color: Rgba(config.text_color),
      font,
    }
  }

  /// 一个完整的绘制周期：清空、逐个绘制、一次提交
  ///
  /// 分类结果不画框，只由状态文字展示。
  pub fn render<C>(
    &self,
    overlay: &mut OverlayRenderer<C>,
    geometry: &PipelineGeometry,
    candidates: &[Candidate],
    labels: Option<&LabelMap>,
  ) -> Result<(), OverlayError>
  where
    C: Compositor,
    C::Error: std::error::Error + Send + Sync + 'static,
  {
    overlay.clear()?;

    for candidate in candidates {
      if let Candidate::Detection {
        label_id,
        score,
        bbox,
      } = candidate
      {
        let top_left = geometry.translate(bbox.top_left);
        let bottom_right = geometry.translate(bbox.bottom_right);
        debug!(
          "绘制检测框 {:?} -> {:?} ({}, {:.2})",
          top_left, bottom_right, label_id, score
        );
        overlay.draw_box(top_left, bottom_right, self.box_color)?;
        if let Some(font) = &self.font {
          overlay.draw_text(
            top_left,
            &caption(labels, *label_id, *score),
            font,
            self.text_color,
          )?;
        }
      }
    }

    overlay.commit()
  }
}
