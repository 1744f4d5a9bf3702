// 该文件是 Liuguang （流光） 项目的一部分。
// src/geometry.rs - 尺寸对齐与坐标变换
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

//! 三个坐标空间：
//! - 采集空间 `CaptureSize`：相机按对齐粒度输出的帧尺寸
//! - 检测空间 `InputSize`：加速器输入张量尺寸，位于采集帧左上角
//! - 叠加空间：预览尺寸乘以缩小系数后的叠加层像素

use std::{fmt, str::FromStr};

use thiserror::Error;

/// 宽度对齐粒度
pub const WIDTH_GRANULARITY: u32 = 32;
/// 高度对齐粒度
pub const HEIGHT_GRANULARITY: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimension {
  pub width: u32,
  pub height: u32,
}

impl Dimension {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub fn is_positive(&self) -> bool {
    self.width > 0 && self.height > 0
  }

  pub fn area(&self) -> usize {
    self.width as usize * self.height as usize
  }

  /// RGB 三通道字节数
  pub fn rgb_len(&self) -> usize {
    self.area() * 3
  }

  /// `other` 在两个方向上都不超过自身
  pub fn contains(&self, other: &Dimension) -> bool {
    self.width >= other.width && self.height >= other.height
  }
}

impl fmt::Display for Dimension {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

impl FromStr for Dimension {
  type Err = GeometryError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (w, h) = s
      .split_once(['x', 'X'])
      .ok_or_else(|| GeometryError::Parse(s.to_string()))?;
    let width = w
      .trim()
      .parse::<u32>()
      .map_err(|_| GeometryError::Parse(s.to_string()))?;
    let height = h
      .trim()
      .parse::<u32>()
      .map_err(|_| GeometryError::Parse(s.to_string()))?;
    let dim = Dimension::new(width, height);
    if !dim.is_positive() {
      return Err(GeometryError::NonPositive(dim));
    }
    Ok(dim)
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
  #[error("尺寸必须为正数: {0}")]
  NonPositive(Dimension),
  #[error("对齐粒度必须为正数: 宽 {0}, 高 {1}")]
  ZeroGranularity(u32, u32),
  #[error("对齐后尺寸溢出: {0}")]
  Overflow(Dimension),
  #[error("无法解析尺寸 '{0}'，期望格式为 <宽>x<高>")]
  Parse(String),
}

/// 按给定粒度向上取整对齐
pub fn align_with(
  input: Dimension,
  width_granularity: u32,
  height_granularity: u32,
) -> Result<Dimension, GeometryError> {
  if !input.is_positive() {
    return Err(GeometryError::NonPositive(input));
  }
  if width_granularity == 0 || height_granularity == 0 {
    return Err(GeometryError::ZeroGranularity(
      width_granularity,
      height_granularity,
    ));
  }

  let width = input
    .width
    .div_ceil(width_granularity)
    .checked_mul(width_granularity)
    .ok_or(GeometryError::Overflow(input))?;
  let height = input
    .height
    .div_ceil(height_granularity)
    .checked_mul(height_granularity)
    .ok_or(GeometryError::Overflow(input))?;

  Ok(Dimension::new(width, height))
}

/// 宽度对齐到 32，高度对齐到 16
pub fn align(input: Dimension) -> Result<Dimension, GeometryError> {
  align_with(input, WIDTH_GRANULARITY, HEIGHT_GRANULARITY)
}

/// 检测区域在预览画面上的像素尺寸
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectScale {
  pub sx: f32,
  pub sy: f32,
}

pub fn detect_scale(preview: Dimension, input: Dimension, capture: Dimension) -> DetectScale {
  let sx = preview.width as f64 * input.width as f64 / capture.width as f64;
  let sy = preview.height as f64 * input.height as f64 / capture.height as f64;
  DetectScale {
    sx: sx as f32,
    sy: sy as f32,
  }
}

/// 将检测空间中的归一化坐标映射到叠加层像素坐标
pub fn translate(point: (f32, f32), scale: DetectScale, downscale: f32) -> (f32, f32) {
  (
    point.0 * scale.sx * downscale,
    point.1 * scale.sy * downscale,
  )
}

/// 叠加层尺寸，至少 1x1
pub fn overlay_size(preview: Dimension, downscale: f32) -> Dimension {
  Dimension::new(
    ((preview.width as f32 * downscale) as u32).max(1),
    ((preview.height as f32 * downscale) as u32).max(1),
  )
}

/// 一次会话内固定不变的几何参数，启动时计算一次
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineGeometry {
  pub input: Dimension,
  pub capture: Dimension,
  pub preview: Dimension,
  pub scale: DetectScale,
  pub downscale: f32,
  pub overlay: Dimension,
}

impl PipelineGeometry {
  pub fn new(input: Dimension, preview: Dimension, downscale: f32) -> Result<Self, GeometryError> {
    if !preview.is_positive() {
      return Err(GeometryError::NonPositive(preview));
    }
    let capture = align(input)?;
    Ok(Self {
      input,
      capture,
      preview,
      scale: detect_scale(preview, input, capture),
      downscale,
      overlay: overlay_size(preview, downscale),
    })
  }

  /// 采集尺寸已对齐时无需裁剪
  pub fn needs_crop(&self) -> bool {
    self.input != self.capture
  }

  pub fn translate(&self, point: (f32, f32)) -> (f32, f32) {
    translate(point, self.scale, self.downscale)
  }
}
