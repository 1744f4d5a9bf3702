// 该文件是 Liuguang （流光） 项目的一部分。
// src/frame.rs - NHWC 帧定义与裁剪
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

use std::borrow::Cow;

use thiserror::Error;

use crate::geometry::Dimension;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CropError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("输入尺寸 {input} 超出采集尺寸 {capture}")]
  InputExceedsCapture { input: Dimension, capture: Dimension },
}

/// 行优先 (h, w, c) 排列的 RGB 帧，尺寸在运行时确定
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  data: Box<[u8]>,
  size: Dimension,
}

impl RgbNhwcFrame {
  pub fn with_size(size: Dimension) -> Self {
    Self {
      data: vec![0u8; size.rgb_len()].into_boxed_slice(),
      size,
    }
  }

  pub fn from_vec(size: Dimension, data: Vec<u8>) -> Result<Self, CropError> {
    if data.len() != size.rgb_len() {
      return Err(CropError::LengthMismatch {
        expected: size.rgb_len(),
        actual: data.len(),
      });
    }
    Ok(Self {
      data: data.into_boxed_slice(),
      size,
    })
  }

  pub fn size(&self) -> Dimension {
    self.size
  }

  pub fn height(&self) -> usize {
    self.size.height as usize
  }

  pub fn width(&self) -> usize {
    self.size.width as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

fn check_shapes(raw: &[u8], capture: Dimension, input: Dimension) -> Result<(), CropError> {
  if raw.len() != capture.rgb_len() {
    return Err(CropError::LengthMismatch {
      expected: capture.rgb_len(),
      actual: raw.len(),
    });
  }
  if !capture.contains(&input) {
    return Err(CropError::InputExceedsCapture { input, capture });
  }
  Ok(())
}

fn copy_top_left(raw: &[u8], capture: Dimension, input: Dimension, out: &mut Vec<u8>) {
  let src_row = capture.width as usize * RGB_CHANNELS;
  let dst_row = input.width as usize * RGB_CHANNELS;
  out.clear();
  for row in raw.chunks_exact(src_row).take(input.height as usize) {
    out.extend_from_slice(&row[..dst_row]);
  }
}

/// 取采集帧左上角 `input` 大小的区域，不做缩放
///
/// 尺寸一致时原样借用输入，不产生拷贝。
pub fn crop<'a>(
  raw: &'a [u8],
  capture: Dimension,
  input: Dimension,
) -> Result<Cow<'a, [u8]>, CropError> {
  check_shapes(raw, capture, input)?;
  if capture == input {
    return Ok(Cow::Borrowed(raw));
  }
  let mut out = Vec::with_capacity(input.rgb_len());
  copy_top_left(raw, capture, input, &mut out);
  Ok(Cow::Owned(out))
}

/// 复用输出缓冲区的裁剪器，避免逐帧分配
#[derive(Debug)]
pub struct FrameCropper {
  capture: Dimension,
  input: Dimension,
  scratch: Vec<u8>,
}

impl FrameCropper {
  pub fn new(capture: Dimension, input: Dimension) -> Self {
    let scratch = if capture == input {
      Vec::new()
    } else {
      Vec::with_capacity(input.rgb_len())
    };
    Self {
      capture,
      input,
      scratch,
    }
  }

  pub fn crop<'a>(&'a mut self, raw: &'a [u8]) -> Result<&'a [u8], CropError> {
    check_shapes(raw, self.capture, self.input)?;
    if self.capture == self.input {
      return Ok(raw);
    }
    copy_top_left(raw, self.capture, self.input, &mut self.scratch);
    Ok(&self.scratch)
  }
}
