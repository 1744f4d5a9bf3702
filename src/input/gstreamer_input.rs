// 该文件是 Liuguang （流光） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 相机输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 相机输入模块
//!
//! 一条 GStreamer 管道同时承担相机预览与推理采集：
//!
//! ```text
//! v4l2src ! videoflip... ! tee
//!   ├─ queue ! videoscale ! RGB capture_size ! appsink        (推理采集)
//!   └─ queue ! textoverlay ! compositor ! autovideosink       (预览显示)
//! ```
//!
//! 采集分支的 `appsink` 只保留最新一帧，推理慢于相机帧率时旧帧直接丢弃。
//! 预览分支上的 `compositor` 留给叠加层动态挂接，见
//! [`crate::output::GStreamerDisplay`]。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## URL 格式
//!
//! `gst://camera/dev/video0?format=YUY2&io-mode=4`
//!
//! - `format`: 相机原始像素格式，默认 `YUY2`
//! - `io-mode`: `v4l2src` 的 IO 模式，可选

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{CameraConfig, Rotation},
  frame::RgbNhwcFrame,
  geometry::Dimension,
  input::FrameSource,
  url_path,
};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://camera/..."）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 帧尺寸与采集尺寸不一致
  #[error("Frame size mismatch: expected {expected}, got {actual}")]
  FrameSizeMismatch {
    expected: Dimension,
    actual: Dimension,
  },
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

enum PipelineItem {
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  Convert,
  VideoFlip {
    method: &'static str,
  },
  Tee,
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = if let Some(mode) = io_mode {
          format!(" io-mode={}", mode)
        } else {
          "".to_string()
        };
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      PipelineItem::Convert => "videoconvert".to_string(),
      PipelineItem::VideoFlip { method } => format!("videoflip method={}", method),
      PipelineItem::Tee => "tee name=t".to_string(),
    }
  }
}

/// 相机朝向对应的 videoflip 步骤：先旋转，再水平、垂直翻转
fn orientation_items(camera: &CameraConfig) -> Vec<PipelineItem> {
  let mut items = Vec::new();
  let rotate = match camera.rotation {
    Rotation::Deg0 => None,
    Rotation::Deg90 => Some("clockwise"),
    Rotation::Deg180 => Some("rotate-180"),
    Rotation::Deg270 => Some("counterclockwise"),
  };
  if let Some(method) = rotate {
    items.push(PipelineItem::VideoFlip { method });
  }
  if camera.flip_h {
    items.push(PipelineItem::VideoFlip {
      method: "horizontal-flip",
    });
  }
  if camera.flip_v {
    items.push(PipelineItem::VideoFlip {
      method: "vertical-flip",
    });
  }
  items
}

pub struct GStreamerCameraBuilder {
  camera: String,
  io_mode: Option<u32>,
  format: String,
}

impl FromUrlWithScheme for GStreamerCameraBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerCameraBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME || url.host_str() != Some("camera") {
      error!("GStreamer 相机地址必须为 gst://camera/<设备>: {}", url);
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    Ok(GStreamerCameraBuilder {
      camera: url_path(url),
      io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
      format: query
        .get("format")
        .map(String::from)
        .unwrap_or(String::from("YUY2")),
    })
  }
}

impl GStreamerCameraBuilder {
  fn pipeline_description(&self, camera: &CameraConfig, capture: Dimension) -> String {
    let mut items = vec![
      PipelineItem::CameraSource {
        camera: self.camera.clone(),
        io_mode: self.io_mode,
        format: self.format.clone(),
        width: camera.resolution.width,
        height: camera.resolution.height,
        fps: camera.framerate,
      },
      PipelineItem::Convert,
    ];
    items.extend(orientation_items(camera));
    items.push(PipelineItem::Tee);

    let head = items
      .iter()
      .map(PipelineItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");

    // 采集宽度为 32 的倍数，RGB 行跨度恰好没有填充
    let capture_branch = format!(
      "t. ! queue max-size-buffers=1 leaky=downstream ! videoscale ! videoconvert ! \
       video/x-raw,format=RGB,width={},height={} ! \
       appsink name=sink max-buffers=1 drop=true sync=false",
      capture.width, capture.height
    );
    let preview_branch = "t. ! queue ! videoconvert ! \
       textoverlay name=status valignment=top halignment=left shaded-background=true ! \
       compositor name=mix ! videoconvert ! autovideosink sync=false";

    format!("{} {} {}", head, capture_branch, preview_branch)
  }

  pub fn build(
    self,
    camera: &CameraConfig,
    capture: Dimension,
  ) -> Result<GStreamerCamera, GStreamerInputError> {
    gst::init()?;

    let description = self.pipeline_description(camera, capture);
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;
    info!("相机预览已启动: {} -> 采集 {}", camera.resolution, capture);

    Ok(GStreamerCamera {
      pipeline,
      appsink,
      frame: RgbNhwcFrame::with_size(capture),
      closed: false,
    })
  }
}

/// GStreamer 相机
///
/// 持有整条管道；关闭相机即停止预览。
pub struct GStreamerCamera {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  frame: RgbNhwcFrame,
  closed: bool,
}

impl GStreamerCamera {
  /// 供叠加层显示使用的管道句柄
  pub fn pipeline(&self) -> &gst::Pipeline {
    &self.pipeline
  }

  fn stop(&mut self) -> Result<(), GStreamerInputError> {
    self.closed = true;
    self.pipeline.set_state(gst::State::Null)?;
    info!("相机预览已停止");
    Ok(())
  }
}

impl Drop for GStreamerCamera {
  fn drop(&mut self) {
    if !self.closed
      && let Err(e) = self.stop()
    {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl FrameSource for GStreamerCamera {
  type Error = GStreamerInputError;

  fn capture_size(&self) -> Dimension {
    self.frame.size()
  }

  fn next_frame(&mut self) -> Result<Option<&RgbNhwcFrame>, Self::Error> {
    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) if self.appsink.is_eos() => {
        info!("相机数据流结束");
        return Ok(None);
      }
      Err(e) => {
        error!("Failed to pull sample: {}", e);
        return Err(e.into());
      }
    };
    copy_sample_into(&sample, &mut self.frame)?;
    Ok(Some(&self.frame))
  }

  fn close(mut self) -> Result<(), Self::Error> {
    self.stop()
  }
}

/// 按行跨度把 RGB 采样拷贝进复用的帧缓冲区
fn copy_sample_into(sample: &gst::Sample, frame: &mut RgbNhwcFrame) -> Result<(), GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let actual = Dimension::new(video_info.width(), video_info.height());
  if actual != frame.size() {
    return Err(GStreamerInputError::FrameSizeMismatch {
      expected: frame.size(),
      actual,
    });
  }

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row = frame.width() * 3;
  let stride = video_info.stride()[0] as usize;
  let expected = stride * (frame.height() - 1) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  for (y, dst) in frame.as_mut().chunks_exact_mut(row).enumerate() {
    let start = y * stride;
    dst.copy_from_slice(&data[start..start + row]);
  }

  Ok(())
}
