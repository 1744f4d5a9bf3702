// 该文件是 Liuguang （流光） 项目的一部分。
// src/input/read_image_file.rs - 静态图像输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{DynamicImage, ImageReader, imageops::FilterType};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{CameraConfig, Rotation},
  frame::RgbNhwcFrame,
  geometry::Dimension,
  input::FrameSource,
  url_path,
};

#[derive(Error, Debug)]
pub enum StillImageSourceError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Frame error: {0}")]
  FrameError(#[from] crate::frame::CropError),
}

pub struct StillImageSourceBuilder {
  path: String,
}

impl FromUrlWithScheme for StillImageSourceBuilder {
  const SCHEME: &'static str = "image";
}

impl FromUrl for StillImageSourceBuilder {
  type Error = StillImageSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(StillImageSourceError::SchemaMismatch);
    }

    Ok(StillImageSourceBuilder {
      path: url_path(url),
    })
  }
}

impl StillImageSourceBuilder {
  /// 读取图像并按相机参数翻转、旋转，再缩放到采集尺寸
  pub fn build(
    self,
    camera: &CameraConfig,
    capture: Dimension,
  ) -> Result<StillImageSource, StillImageSourceError> {
    info!("读取静态图像: {}", self.path);
    let image = ImageReader::open(&self.path)?.decode()?;
    StillImageSource::from_image(image, camera, capture)
  }
}

/// 不断重复同一张图像的帧来源，用于没有相机时的回放与测速
pub struct StillImageSource {
  frame: RgbNhwcFrame,
}

impl StillImageSource {
  pub fn from_image(
    image: DynamicImage,
    camera: &CameraConfig,
    capture: Dimension,
  ) -> Result<Self, StillImageSourceError> {
    let image = match camera.rotation {
      Rotation::Deg0 => image,
      Rotation::Deg90 => image.rotate90(),
      Rotation::Deg180 => image.rotate180(),
      Rotation::Deg270 => image.rotate270(),
    };
    let image = if camera.flip_h { image.fliph() } else { image };
    let image = if camera.flip_v { image.flipv() } else { image };

    let rgb = image::imageops::resize(
      &image.to_rgb8(),
      capture.width,
      capture.height,
      FilterType::Triangle,
    );
    let frame = RgbNhwcFrame::from_vec(capture, rgb.into_raw())?;
    Ok(Self { frame })
  }
}

impl FrameSource for StillImageSource {
  type Error = StillImageSourceError;

  fn capture_size(&self) -> Dimension {
    self.frame.size()
  }

  fn next_frame(&mut self) -> Result<Option<&RgbNhwcFrame>, Self::Error> {
    Ok(Some(&self.frame))
  }

  fn close(self) -> Result<(), Self::Error> {
    Ok(())
  }
}
