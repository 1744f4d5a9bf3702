// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use chrono::{Datelike, Local};
use image::RgbaImage;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  geometry::Dimension,
  output::{Anchor, Compositor, LayerId},
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordDisplayError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("未知叠加层: {0}")]
  UnknownLayer(LayerId),
}

/// 把每次提交的叠加层保存为 PNG，并在旁边写入状态文字
///
/// 文件位于 `<目录>/YYYY/MM/DD/HH-MM-SS-XXXX.png`，状态文字在同名 `.json` 中。
/// 默认跳过纯色（空白）画面，查询参数 `always` 时全部保存。
/// 跳过画面时仍写入 `.json`，分类模式不画框也能记录结果。
pub struct DirectoryRecordDisplay {
  directory: PathBuf,
  always: bool,
  frame_counter: u16,
  layers: Vec<LayerId>,
  next_layer: u32,
  last_frame: Option<PathBuf>,
  last_record: Option<PathBuf>,
}

impl FromUrlWithScheme for DirectoryRecordDisplay {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordDisplay {
  type Error = DirectoryRecordDisplayError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordDisplayError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordDisplay {
      directory: PathBuf::from(url_path(uri)),
      always,
      frame_counter: 0,
      layers: Vec::new(),
      next_layer: 0,
      last_frame: None,
      last_record: None,
    })
  }
}

impl DirectoryRecordDisplay {
  fn frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self) -> Result<PathBuf, DirectoryRecordDisplayError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  /// 最近一次保存的画面路径
  pub fn last_frame(&self) -> Option<&PathBuf> {
    self.last_frame.as_ref()
  }

  /// 最近一次提交对应的状态文件路径，画面被跳过时也存在
  pub fn last_status(&self) -> Option<PathBuf> {
    self.last_record.as_ref().map(|p| p.with_extension("json"))
  }
}

fn is_blank(surface: &RgbaImage) -> bool {
  match surface.pixels().next() {
    Some(first) => surface.pixels().all(|p| p == first),
    None => true,
  }
}

impl Compositor for DirectoryRecordDisplay {
  type Error = DirectoryRecordDisplayError;

  fn add_layer(&mut self, _anchor: Anchor, size: Dimension) -> Result<LayerId, Self::Error> {
    let id = LayerId(self.next_layer);
    self.next_layer += 1;
    self.layers.push(id);
    debug!("记录叠加层 {} ({}) 到 {}", id, size, self.directory.display());
    Ok(id)
  }

  fn present_layer(&mut self, layer: LayerId, surface: &RgbaImage) -> Result<(), Self::Error> {
    if !self.layers.contains(&layer) {
      return Err(DirectoryRecordDisplayError::UnknownLayer(layer));
    }
    let path = self.frame_path()?;
    self.last_record = Some(path.clone());
    if !self.always && is_blank(surface) {
      self.last_frame = None;
      return Ok(());
    }

    surface.save(&path)?;
    debug!("保存叠加层画面: {}", path.display());
    self.last_frame = Some(path);
    Ok(())
  }

  fn remove_layer(&mut self, layer: LayerId) -> Result<(), Self::Error> {
    let before = self.layers.len();
    self.layers.retain(|l| *l != layer);
    if self.layers.len() == before {
      return Err(DirectoryRecordDisplayError::UnknownLayer(layer));
    }
    Ok(())
  }

  fn set_annotation(&mut self, text: &str) -> Result<(), Self::Error> {
    let Some(status) = self.last_status() else {
      return Ok(());
    };
    let frame = self
      .last_frame
      .as_ref()
      .and_then(|p| p.file_name())
      .map(|name| name.to_string_lossy().into_owned());
    let record = json!({
      "status": text,
      "frame": frame,
      "time": Local::now().to_rfc3339(),
    });
    std::fs::write(&status, serde_json::to_string_pretty(&record)?)?;
    debug!("保存状态文字: {}", status.display());
    Ok(())
  }
}
