// 该文件是 Liuguang （流光） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  control::{Control, Value},
  io::mmap::Stream,
  io::traits::{CaptureStream, Stream as _},
  video::{Capture, capture::Parameters},
};

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{CameraConfig, Rotation},
  frame::RgbNhwcFrame,
  geometry::Dimension,
  input::FrameSource,
  url_path,
};

const V4L2_CID_HFLIP: u32 = 0x0098_0914;
const V4L2_CID_VFLIP: u32 = 0x0098_0915;
const V4L2_CID_ROTATE: u32 = 0x0098_0922;

const V4L_BUFFER_COUNT: u32 = 4;
const DEFAULT_DEVICE: &str = "/dev/video0";

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("Device delivered {actual}, expected {expected}")]
  SizeMismatch {
    expected: Dimension,
    actual: Dimension,
  },
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

pub struct V4lCameraBuilder {
  device_path: String,
}

impl FromUrlWithScheme for V4lCameraBuilder {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lCameraBuilder {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0
    let device_path = match url_path(url) {
      path if path.is_empty() || path == "/" => DEFAULT_DEVICE.to_string(),
      path => path,
    };

    Ok(V4lCameraBuilder { device_path })
  }
}

impl V4lCameraBuilder {
  /// 打开设备并请求驱动直接输出 `capture` 尺寸的 RGB24 数据
  pub fn build(
    self,
    camera: &CameraConfig,
    capture: Dimension,
  ) -> Result<V4lCamera, V4lInputError> {
    info!("打开 V4L2 设备: {}", self.device_path);
    let device = Device::with_path(&self.device_path)?;

    let rgb3 = FourCC::new(b"RGB3");
    let mut format = device.format()?;
    format.width = capture.width;
    format.height = capture.height;
    format.fourcc = rgb3;
    let format = device.set_format(&format)?;

    if format.fourcc != rgb3 {
      return Err(V4lInputError::UnsupportedPixelFormat(format.fourcc.to_string()));
    }
    let actual = Dimension::new(format.width, format.height);
    if actual != capture {
      return Err(V4lInputError::SizeMismatch {
        expected: capture,
        actual,
      });
    }
    let stride = (format.stride as usize).max(capture.width as usize * 3);
    debug!("V4L2 格式: {} 行跨度 {}", format, stride);

    if let Err(e) = device.set_params(&Parameters::with_fps(camera.framerate)) {
      warn!("无法设置帧率 {}: {}", camera.framerate, e);
    }
    apply_orientation(&device, camera);

    let stream = Stream::with_buffers(&device, Type::VideoCapture, V4L_BUFFER_COUNT)?;
    info!("V4L2 采集已启动: {} @ {} fps", capture, camera.framerate);

    Ok(V4lCamera {
      stream: Some(stream),
      device,
      frame: RgbNhwcFrame::with_size(capture),
      stride,
    })
  }
}

/// 翻转与旋转由驱动控制项完成，不支持时只记录警告
fn apply_orientation(device: &Device, camera: &CameraConfig) {
  let controls = [
    ("HFLIP", V4L2_CID_HFLIP, Value::Boolean(camera.flip_h)),
    ("VFLIP", V4L2_CID_VFLIP, Value::Boolean(camera.flip_v)),
    (
      "ROTATE",
      V4L2_CID_ROTATE,
      Value::Integer(camera.rotation.degrees() as i64),
    ),
  ];
  for (name, id, value) in controls {
    if camera.rotation == Rotation::Deg0 && id == V4L2_CID_ROTATE {
      continue;
    }
    if let Err(e) = device.set_control(Control { id, value }) {
      warn!("设备不支持控制项 {}: {}", name, e);
    }
  }
}

/// V4L2 摄像头
///
/// `stream` 在 `device` 之前声明，保证先于设备释放。
pub struct V4lCamera {
  stream: Option<Stream<'static>>,
  #[allow(dead_code)]
  device: Device,
  frame: RgbNhwcFrame,
  stride: usize,
}

impl FrameSource for V4lCamera {
  type Error = V4lInputError;

  fn capture_size(&self) -> Dimension {
    self.frame.size()
  }

  fn next_frame(&mut self) -> Result<Option<&RgbNhwcFrame>, Self::Error> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(None);
    };

    let (buffer, meta) = stream.next()?;
    let used = (meta.bytesused as usize).min(buffer.len());
    let data = &buffer[..used];

    let row = self.frame.width() * 3;
    let expected = self.stride * (self.frame.height() - 1) + row;
    if data.len() < expected {
      return Err(V4lInputError::BufferSizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    let stride = self.stride;
    for (y, dst) in self.frame.as_mut().chunks_exact_mut(row).enumerate() {
      let start = y * stride;
      dst.copy_from_slice(&data[start..start + row]);
    }

    Ok(Some(&self.frame))
  }

  fn close(mut self) -> Result<(), Self::Error> {
    if let Some(mut stream) = self.stream.take() {
      stream.stop()?;
    }
    info!("V4L2 设备已关闭");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn device_path_defaults_to_video0() {
    let builder = V4lCameraBuilder::from_url(&Url::parse("v4l:///").unwrap()).unwrap();
    assert_eq!(builder.device_path, DEFAULT_DEVICE);
    let builder = V4lCameraBuilder::from_url(&Url::parse("v4l:///dev/video2").unwrap()).unwrap();
    assert_eq!(builder.device_path, "/dev/video2");
    assert!(matches!(
      V4lCameraBuilder::from_url(&Url::parse("gst://camera/dev/video0").unwrap()),
      Err(V4lInputError::SchemaMismatch)
    ));
  }
}
