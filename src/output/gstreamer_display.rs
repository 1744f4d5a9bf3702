// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 预览叠加层
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 预览叠加层
//!
//! 叠加层挂接在相机管道预览分支的 `compositor` 上。每个叠加层是一个
//! 动态加入管道的 bin：
//!
//! ```text
//! appsrc (RGBA, 叠加层尺寸) ! videoconvert ! videoscale ! AYUV 预览尺寸 ! compositor.sink_N
//! ```
//!
//! 叠加层按缩小后的尺寸绘制，由 `videoscale` 放大到预览尺寸。
//! 状态文字通过 `textoverlay` 的 `text` 属性更新。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  geometry::Dimension,
  output::{Anchor, Compositor, LayerId},
};

#[derive(Error, Debug)]
pub enum GStreamerDisplayError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 管道中缺少元素
  #[error("Element '{0}' not found in pipeline")]
  ElementNotFound(&'static str),
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 无法申请合成器输入端口
  #[error("Failed to request compositor pad")]
  PadRequestFailed,
  #[error("Pad link error: {0}")]
  PadLinkError(#[from] gst::PadLinkError),
  #[error("Flow error: {0}")]
  FlowError(#[from] gst::FlowError),
  #[error("Unknown layer: {0}")]
  UnknownLayer(LayerId),
  #[error("Surface size mismatch: layer is {expected}, surface is {actual}")]
  SurfaceSizeMismatch {
    expected: Dimension,
    actual: Dimension,
  },
}

struct Layer {
  bin: gst::Bin,
  appsrc: gst_app::AppSrc,
  src_pad: gst::Pad,
  sink_pad: gst::Pad,
  size: Dimension,
}

/// 相机预览窗口上的叠加层合成器
pub struct GStreamerDisplay {
  pipeline: gst::Pipeline,
  mixer: gst::Element,
  status: gst::Element,
  preview: Dimension,
  layers: HashMap<LayerId, Layer>,
  next_layer: u32,
}

impl GStreamerDisplay {
  pub fn new(pipeline: gst::Pipeline, preview: Dimension) -> Result<Self, GStreamerDisplayError> {
    let mixer = pipeline
      .by_name("mix")
      .ok_or(GStreamerDisplayError::ElementNotFound("mix"))?;
    let status = pipeline
      .by_name("status")
      .ok_or(GStreamerDisplayError::ElementNotFound("status"))?;

    Ok(Self {
      pipeline,
      mixer,
      status,
      preview,
      layers: HashMap::new(),
      next_layer: 0,
    })
  }

  fn layer_description(&self, size: Dimension) -> String {
    format!(
      "appsrc name=overlay format=time is-live=true do-timestamp=true \
       caps=\"video/x-raw,format=RGBA,width={},height={},framerate=0/1\" ! \
       videoconvert ! videoscale ! video/x-raw,format=AYUV,width={},height={}",
      size.width, size.height, self.preview.width, self.preview.height
    )
  }
}

impl Compositor for GStreamerDisplay {
  type Error = GStreamerDisplayError;

  fn add_layer(&mut self, anchor: Anchor, size: Dimension) -> Result<LayerId, Self::Error> {
    let id = LayerId(self.next_layer);

    let bin = gst::parse::bin_from_description(&self.layer_description(size), true)?;
    let appsrc = bin
      .by_name("overlay")
      .ok_or(GStreamerDisplayError::ElementNotFound("overlay"))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayError::AppSrcConversionFailed)?;
    let src_pad = bin
      .static_pad("src")
      .ok_or(GStreamerDisplayError::ElementNotFound("src"))?;

    self.pipeline.add(&bin)?;

    let sink_pad = match self.mixer.request_pad_simple("sink_%u") {
      Some(pad) => pad,
      None => {
        let _ = self.pipeline.remove(&bin);
        return Err(GStreamerDisplayError::PadRequestFailed);
      }
    };
    sink_pad.set_property("xpos", anchor.x);
    sink_pad.set_property("ypos", anchor.y);
    sink_pad.set_property("zorder", id.0 + 1);

    src_pad.link(&sink_pad)?;
    bin.sync_state_with_parent()?;

    info!("叠加层 {} 已挂接到预览: {} -> {}", id, size, self.preview);
    self.next_layer += 1;
    self.layers.insert(
      id,
      Layer {
        bin,
        appsrc,
        src_pad,
        sink_pad,
        size,
      },
    );
    Ok(id)
  }

  fn present_layer(&mut self, layer: LayerId, surface: &RgbaImage) -> Result<(), Self::Error> {
    let entry = self
      .layers
      .get(&layer)
      .ok_or(GStreamerDisplayError::UnknownLayer(layer))?;

    let actual = Dimension::new(surface.width(), surface.height());
    if actual != entry.size {
      return Err(GStreamerDisplayError::SurfaceSizeMismatch {
        expected: entry.size,
        actual,
      });
    }

    let buffer = gst::Buffer::from_slice(surface.as_raw().clone());
    entry.appsrc.push_buffer(buffer)?;
    Ok(())
  }

  fn remove_layer(&mut self, layer: LayerId) -> Result<(), Self::Error> {
    let entry = self
      .layers
      .remove(&layer)
      .ok_or(GStreamerDisplayError::UnknownLayer(layer))?;

    if let Err(e) = entry.appsrc.end_of_stream() {
      debug!("叠加层 {} 结束流失败: {}", layer, e);
    }
    entry.bin.set_state(gst::State::Null)?;
    entry.src_pad.unlink(&entry.sink_pad)?;
    self.mixer.release_request_pad(&entry.sink_pad);
    self.pipeline.remove(&entry.bin)?;
    info!("叠加层 {} 已从预览移除", layer);
    Ok(())
  }

  fn set_annotation(&mut self, text: &str) -> Result<(), Self::Error> {
    self.status.set_property("text", text);
    Ok(())
  }
}

impl Drop for GStreamerDisplay {
  fn drop(&mut self) {
    let remaining: Vec<LayerId> = self.layers.keys().copied().collect();
    for layer in remaining {
      if let Err(e) = self.remove_layer(layer) {
        warn!("移除叠加层 {} 失败: {}", layer, e);
      }
    }
  }
}
