// 该文件是 Liuguang （流光） 项目的一部分。
// src/input.rs - 相机帧输入
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, config::CameraConfig, frame::RgbNhwcFrame, geometry::Dimension};

/// 阻塞式帧来源
///
/// 每次调用 `next_frame` 都覆盖同一块内部缓冲区，返回的引用只在下一次
/// 调用前有效。相机来源永远不会主动结束；返回 `Ok(None)` 表示来源已耗尽。
pub trait FrameSource {
  type Error;

  /// 每帧的尺寸（即对齐后的采集尺寸）
  fn capture_size(&self) -> Dimension;

  fn next_frame(&mut self) -> Result<Option<&RgbNhwcFrame>, Self::Error>;

  /// 释放设备，每个来源只会被关闭一次
  fn close(self) -> Result<(), Self::Error>
  where
    Self: Sized;
}

mod read_image_file;
pub use self::read_image_file::{StillImageSource, StillImageSourceBuilder, StillImageSourceError};

mod v4l_input;
pub use self::v4l_input::{V4lCamera, V4lCameraBuilder, V4lInputError};

#[cfg(feature = "gstreamer_preview")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_preview")]
pub use self::gstreamer_input::{GStreamerCamera, GStreamerCameraBuilder, GStreamerInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Still image input error: {0}")]
  StillImageSourceError(#[from] StillImageSourceError),
  #[error("V4L input error: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[cfg(feature = "gstreamer_preview")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_preview")]
  GStreamerCamera(GStreamerCamera),
  V4lCamera(V4lCamera),
  StillImage(StillImageSource),
}

impl InputWrapper {
  /// 按 URL 方案打开相机，并要求输出 `capture` 尺寸的帧
  pub fn open(url: &Url, camera: &CameraConfig, capture: Dimension) -> Result<Self, InputError> {
    #[cfg(feature = "gstreamer_preview")]
    {
      if url.scheme() == GStreamerCameraBuilder::SCHEME {
        let input = GStreamerCameraBuilder::from_url(url)?.build(camera, capture)?;
        return Ok(InputWrapper::GStreamerCamera(input));
      }
    }

    match url.scheme() {
      V4lCameraBuilder::SCHEME => {
        let input = V4lCameraBuilder::from_url(url)?.build(camera, capture)?;
        Ok(InputWrapper::V4lCamera(input))
      }
      StillImageSourceBuilder::SCHEME => {
        let input = StillImageSourceBuilder::from_url(url)?.build(camera, capture)?;
        Ok(InputWrapper::StillImage(input))
      }
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl FrameSource for InputWrapper {
  type Error = InputError;

  fn capture_size(&self) -> Dimension {
    match self {
      #[cfg(feature = "gstreamer_preview")]
      InputWrapper::GStreamerCamera(input) => input.capture_size(),
      InputWrapper::V4lCamera(input) => input.capture_size(),
      InputWrapper::StillImage(input) => input.capture_size(),
    }
  }

  fn next_frame(&mut self) -> Result<Option<&RgbNhwcFrame>, Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_preview")]
      InputWrapper::GStreamerCamera(input) => input.next_frame().map_err(InputError::from),
      InputWrapper::V4lCamera(input) => input.next_frame().map_err(InputError::from),
      InputWrapper::StillImage(input) => input.next_frame().map_err(InputError::from),
    }
  }

  fn close(self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_preview")]
      InputWrapper::GStreamerCamera(input) => input.close().map_err(InputError::from),
      InputWrapper::V4lCamera(input) => input.close().map_err(InputError::from),
      InputWrapper::StillImage(input) => input.close().map_err(InputError::from),
    }
  }
}
