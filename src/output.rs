// 该文件是 Liuguang （流光） 项目的一部分。
// src/output.rs - 预览叠加输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{convert::Infallible, fmt};

use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, geometry::Dimension, input::InputWrapper};

/// 合成器中一个叠加层的编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(pub u32);

impl fmt::Display for LayerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "layer#{}", self.0)
  }
}

/// 叠加层左上角在预览画面中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Anchor {
  pub x: i32,
  pub y: i32,
}

/// 位于相机预览之上的合成器
///
/// `present_layer` 一次提交整张画面，合成器不会显示半成品。
pub trait Compositor {
  type Error;

  fn add_layer(&mut self, anchor: Anchor, size: Dimension) -> Result<LayerId, Self::Error>;
  fn present_layer(&mut self, layer: LayerId, surface: &RgbaImage) -> Result<(), Self::Error>;
  fn remove_layer(&mut self, layer: LayerId) -> Result<(), Self::Error>;
  /// 预览画面上的状态文字
  fn set_annotation(&mut self, text: &str) -> Result<(), Self::Error>;
}

pub mod draw;
pub mod overlay;

mod directory_record;
pub use self::directory_record::{DirectoryRecordDisplay, DirectoryRecordDisplayError};

#[cfg(feature = "gstreamer_preview")]
mod gstreamer_display;
#[cfg(feature = "gstreamer_preview")]
pub use self::gstreamer_display::{GStreamerDisplay, GStreamerDisplayError};

/// 没有预览窗口时使用，状态文字写入日志
#[derive(Debug, Default)]
pub struct LogDisplay {
  next_layer: u32,
}

impl Compositor for LogDisplay {
  type Error = Infallible;

  fn add_layer(&mut self, anchor: Anchor, size: Dimension) -> Result<LayerId, Self::Error> {
    let id = LayerId(self.next_layer);
    self.next_layer += 1;
    debug!("添加叠加层 {} 位置 ({}, {}) 尺寸 {}", id, anchor.x, anchor.y, size);
    Ok(id)
  }

  fn present_layer(&mut self, layer: LayerId, surface: &RgbaImage) -> Result<(), Self::Error> {
    debug!("提交叠加层 {} ({}x{})", layer, surface.width(), surface.height());
    Ok(())
  }

  fn remove_layer(&mut self, layer: LayerId) -> Result<(), Self::Error> {
    debug!("移除叠加层 {}", layer);
    Ok(())
  }

  fn set_annotation(&mut self, text: &str) -> Result<(), Self::Error> {
    info!("状态: {}", text.replace('\n', " | "));
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "gstreamer_preview")]
  #[error("GStreamer 预览错误: {0}")]
  GStreamerDisplayError(#[from] GStreamerDisplayError),
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordDisplayError(#[from] DirectoryRecordDisplayError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl From<Infallible> for OutputError {
  fn from(never: Infallible) -> Self {
    match never {}
  }
}

pub enum DisplayWrapper {
  #[cfg(feature = "gstreamer_preview")]
  GStreamer(GStreamerDisplay),
  DirectoryRecord(DirectoryRecordDisplay),
  Log(LogDisplay),
}

impl DisplayWrapper {
  /// 为相机选择叠加输出
  ///
  /// 指定了 `record` 时写入目录；否则 GStreamer 相机挂接到它自己的预览，
  /// 其他来源只输出日志。
  #[cfg_attr(not(feature = "gstreamer_preview"), allow(unused_variables))]
  pub fn attach(
    input: &InputWrapper,
    record: Option<&Url>,
    preview: Dimension,
  ) -> Result<Self, OutputError> {
    if let Some(url) = record {
      return match url.scheme() {
        DirectoryRecordDisplay::SCHEME => Ok(DisplayWrapper::DirectoryRecord(
          DirectoryRecordDisplay::from_url(url)?,
        )),
        other => Err(OutputError::SchemeMismatch(other.to_string())),
      };
    }

    #[cfg(feature = "gstreamer_preview")]
    {
      if let InputWrapper::GStreamerCamera(camera) = input {
        let display = GStreamerDisplay::new(camera.pipeline().clone(), preview)?;
        return Ok(DisplayWrapper::GStreamer(display));
      }
    }

    info!("相机 {} 没有预览窗口，状态输出到日志", preview);
    Ok(DisplayWrapper::Log(LogDisplay::default()))
  }
}

impl Compositor for DisplayWrapper {
  type Error = OutputError;

  fn add_layer(&mut self, anchor: Anchor, size: Dimension) -> Result<LayerId, Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_preview")]
      DisplayWrapper::GStreamer(display) => display.add_layer(anchor, size).map_err(OutputError::from),
      DisplayWrapper::DirectoryRecord(display) => {
        display.add_layer(anchor, size).map_err(OutputError::from)
      }
      DisplayWrapper::Log(display) => display.add_layer(anchor, size).map_err(OutputError::from),
    }
  }

  fn present_layer(&mut self, layer: LayerId, surface: &RgbaImage) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_preview")]
      DisplayWrapper::GStreamer(display) => {
        display.present_layer(layer, surface).map_err(OutputError::from)
      }
      DisplayWrapper::DirectoryRecord(display) => {
        display.present_layer(layer, surface).map_err(OutputError::from)
      }
      DisplayWrapper::Log(display) => display.present_layer(layer, surface).map_err(OutputError::from),
    }
  }

  fn remove_layer(&mut self, layer: LayerId) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_preview")]
      DisplayWrapper::GStreamer(display) => display.remove_layer(layer).map_err(OutputError::from),
      DisplayWrapper::DirectoryRecord(display) => {
        display.remove_layer(layer).map_err(OutputError::from)
      }
      DisplayWrapper::Log(display) => display.remove_layer(layer).map_err(OutputError::from),
    }
  }

  fn set_annotation(&mut self, text: &str) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_preview")]
      DisplayWrapper::GStreamer(display) => display.set_annotation(text).map_err(OutputError::from),
      DisplayWrapper::DirectoryRecord(display) => {
        display.set_annotation(text).map_err(OutputError::from)
      }
      DisplayWrapper::Log(display) => display.set_annotation(text).map_err(OutputError::from),
    }
  }
}
