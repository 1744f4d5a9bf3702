// 该文件是 Liuguang （流光） 项目的一部分。
// src/config.rs - 预览管线配置
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

use std::{fmt, path::PathBuf, str::FromStr};

use clap::{Args, ValueEnum};
use thiserror::Error;
use url::Url;

use crate::{geometry::Dimension, output::draw::DEFAULT_FONT_PATH};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("不支持的旋转角度: {0}（仅支持 0/90/180/270）")]
  InvalidRotation(String),
  #[error("分辨率必须为正数: {0}")]
  InvalidResolution(Dimension),
  #[error("帧率必须为正数")]
  InvalidFramerate,
  #[error("叠加层缩小系数必须位于 (0, 1]: {0}")]
  InvalidDownscale(f32),
  #[error("字体大小必须为正数: {0}")]
  InvalidFontSize(f32),
  #[error("top-k 必须至少为 1")]
  InvalidTopK,
  #[error("置信度阈值必须位于 [0, 1]: {0}")]
  InvalidThreshold(f32),
  #[error("分类模式需要标签文件 (--label)")]
  LabelRequired,
}

/// 相机画面旋转角度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
  #[default]
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Rotation {
  pub fn degrees(self) -> u32 {
    match self {
      Rotation::Deg0 => 0,
      Rotation::Deg90 => 90,
      Rotation::Deg180 => 180,
      Rotation::Deg270 => 270,
    }
  }
}

impl TryFrom<u32> for Rotation {
  type Error = ConfigError;

  fn try_from(degrees: u32) -> Result<Self, Self::Error> {
    match degrees {
      0 => Ok(Rotation::Deg0),
      90 => Ok(Rotation::Deg90),
      180 => Ok(Rotation::Deg180),
      270 => Ok(Rotation::Deg270),
      other => Err(ConfigError::InvalidRotation(other.to_string())),
    }
  }
}

impl FromStr for Rotation {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.trim()
      .parse::<u32>()
      .map_err(|_| ConfigError::InvalidRotation(s.to_string()))
      .and_then(Rotation::try_from)
  }
}

impl fmt::Display for Rotation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.degrees())
  }
}

/// 推理任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Classification,
  Detection,
}

/// 相机采集参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConfig {
  pub resolution: Dimension,
  pub framerate: u32,
  pub flip_h: bool,
  pub flip_v: bool,
  pub rotation: Rotation,
}

impl Default for CameraConfig {
  fn default() -> Self {
    Self {
      resolution: Dimension::new(640, 480),
      framerate: 30,
      flip_h: false,
      flip_v: false,
      rotation: Rotation::Deg0,
    }
  }
}

impl CameraConfig {
  /// 旋转之后预览画面的尺寸，旋转 90/270 度时宽高互换
  pub fn preview_size(&self) -> Dimension {
    match self.rotation {
      Rotation::Deg90 | Rotation::Deg270 => {
        Dimension::new(self.resolution.height, self.resolution.width)
      }
      Rotation::Deg0 | Rotation::Deg180 => self.resolution,
    }
  }
}

/// 一次预览会话的全部参数
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  pub mode: Mode,
  pub camera: CameraConfig,
  /// 叠加层相对预览画面的缩小系数
  pub downscale_factor: f32,
  pub font_size: f32,
  pub top_k: usize,
  pub threshold: f32,
  /// 叠加层清空时的填充色 (RGBA)
  pub overlay_background: [u8; 4],
  pub box_color: [u8; 4],
  pub text_color: [u8; 4],
  /// 没有结果时是否仍然更新状态文字
  pub status_on_empty: bool,
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !self.camera.resolution.is_positive() {
      return Err(ConfigError::InvalidResolution(self.camera.resolution));
    }
    if self.camera.framerate == 0 {
      return Err(ConfigError::InvalidFramerate);
    }
    if !(self.downscale_factor > 0.0 && self.downscale_factor <= 1.0) {
      return Err(ConfigError::InvalidDownscale(self.downscale_factor));
    }
    if !(self.font_size > 0.0) {
      return Err(ConfigError::InvalidFontSize(self.font_size));
    }
    if self.top_k == 0 {
      return Err(ConfigError::InvalidTopK);
    }
    if !(0.0..=1.0).contains(&self.threshold) {
      return Err(ConfigError::InvalidThreshold(self.threshold));
    }
    Ok(())
  }
}

/// 常用的相机摆放与显示组合
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
  /// 水平翻转、旋转 90 度，只显示最高分类别
  Classify,
  /// 相机正装，半透明白色叠加层
  Detect,
  /// 水平与垂直翻转、旋转 90 度，透明叠加层
  DetectFlipped,
}

impl Preset {
  pub fn config(self, mode: Mode) -> PipelineConfig {
    let camera = CameraConfig::default();
    let base = PipelineConfig {
      mode,
      camera,
      downscale_factor: 0.5,
      font_size: 12.0,
      top_k: 3,
      threshold: 0.1,
      overlay_background: [255, 255, 255, 64],
      box_color: [255, 255, 255, 255],
      text_color: [255, 255, 255, 255],
      status_on_empty: true,
    };

    match self {
      Preset::Classify => PipelineConfig {
        camera: CameraConfig {
          flip_h: true,
          rotation: Rotation::Deg90,
          ..camera
        },
        top_k: 1,
        overlay_background: [0, 0, 0, 0],
        status_on_empty: false,
        ..base
      },
      Preset::Detect => base,
      Preset::DetectFlipped => PipelineConfig {
        camera: CameraConfig {
          flip_h: true,
          flip_v: true,
          rotation: Rotation::Deg90,
          ..camera
        },
        overlay_background: [0, 0, 0, 0],
        status_on_empty: false,
        ..base
      },
    }
  }
}

/// 两个预览程序共用的命令行参数
#[derive(Args, Debug, Clone)]
pub struct PreviewArgs {
  /// 模型地址，例如 classify:///models/mobilenet.rknn?height=224&width=224
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 标签文件路径（每行 `<编号> <名称>`）
  #[arg(long, value_name = "FILE")]
  pub label: Option<PathBuf>,

  /// 相机地址: gst://camera/dev/video0, v4l:///dev/video0, image:///path/to/still.png
  #[arg(long, value_name = "SOURCE", default_value = "gst://camera/dev/video0")]
  pub camera: Url,

  /// 无界面记录目录，例如 folder:///var/lib/liuguang?always
  #[arg(long, value_name = "FOLDER")]
  pub record: Option<Url>,

  /// 参数预设
  #[arg(long, value_enum)]
  pub preset: Option<Preset>,

  /// 叠加层字体文件
  #[arg(long, value_name = "FILE", default_value = DEFAULT_FONT_PATH)]
  pub font: PathBuf,

  /// 预览分辨率，例如 640x480
  #[arg(long, value_name = "WxH")]
  pub resolution: Option<Dimension>,

  #[arg(long, value_name = "FPS")]
  pub framerate: Option<u32>,

  #[arg(long, value_name = "BOOL")]
  pub hflip: Option<bool>,

  #[arg(long, value_name = "BOOL")]
  pub vflip: Option<bool>,

  /// 旋转角度 (0/90/180/270)
  #[arg(long, value_name = "DEGREES")]
  pub rotation: Option<Rotation>,

  /// 叠加层缩小系数 (0, 1]
  #[arg(long, value_name = "FACTOR")]
  pub downscale: Option<f32>,

  #[arg(long, value_name = "SIZE")]
  pub font_size: Option<f32>,

  #[arg(long, value_name = "K")]
  pub top_k: Option<usize>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,

  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

impl PreviewArgs {
  /// 以预设为基础叠加命令行覆盖项，并做合法性检查
  pub fn pipeline_config(
    &self,
    mode: Mode,
    default_preset: Preset,
  ) -> Result<PipelineConfig, ConfigError> {
    let mut config = self.preset.unwrap_or(default_preset).config(mode);

    if let Some(resolution) = self.resolution {
      config.camera.resolution = resolution;
    }
    if let Some(framerate) = self.framerate {
      config.camera.framerate = framerate;
    }
    if let Some(flip_h) = self.hflip {
      config.camera.flip_h = flip_h;
    }
    if let Some(flip_v) = self.vflip {
      config.camera.flip_v = flip_v;
    }
    if let Some(rotation) = self.rotation {
      config.camera.rotation = rotation;
    }
    if let Some(downscale) = self.downscale {
      config.downscale_factor = downscale;
    }
    if let Some(font_size) = self.font_size {
      config.font_size = font_size;
    }
    if let Some(top_k) = self.top_k {
      config.top_k = top_k;
    }
    if let Some(threshold) = self.threshold {
      config.threshold = threshold;
    }

    if mode == Mode::Classification && self.label.is_none() {
      return Err(ConfigError::LabelRequired);
    }

    config.validate()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use clap::Parser;

  use super::*;

  #[derive(Parser, Debug)]
  struct TestCli {
    #[command(flatten)]
    preview: PreviewArgs,
  }

  fn parse(args: &[&str]) -> PreviewArgs {
    let mut argv = vec!["test", "--model", "classify:///m.rknn?height=224&width=224"];
    argv.extend_from_slice(args);
    TestCli::parse_from(argv).preview
  }

  #[test]
  fn rotation_accepts_right_angles_only() {
    assert_eq!("90".parse::<Rotation>().unwrap(), Rotation::Deg90);
    assert_eq!(Rotation::try_from(270).unwrap().degrees(), 270);
    assert!("45".parse::<Rotation>().is_err());
    assert!("left".parse::<Rotation>().is_err());
  }

  #[test]
  fn presets_match_camera_mounts() {
    let classify = Preset::Classify.config(Mode::Classification);
    assert!(classify.camera.flip_h && !classify.camera.flip_v);
    assert_eq!(classify.camera.rotation, Rotation::Deg90);
    assert_eq!(classify.top_k, 1);
    assert_eq!(classify.camera.preview_size(), Dimension::new(480, 640));

    let detect = Preset::Detect.config(Mode::Detection);
    assert!(!detect.camera.flip_h && !detect.camera.flip_v);
    assert_eq!(detect.overlay_background, [255, 255, 255, 64]);
    assert!(detect.status_on_empty);

    let flipped = Preset::DetectFlipped.config(Mode::Detection);
    assert!(flipped.camera.flip_h && flipped.camera.flip_v);
    assert!(!flipped.status_on_empty);

    for preset in [Preset::Classify, Preset::Detect, Preset::DetectFlipped] {
      assert!(preset.config(Mode::Detection).validate().is_ok());
    }
  }

  #[test]
  fn overrides_apply_on_top_of_preset() {
    let args = parse(&[
      "--preset",
      "detect-flipped",
      "--rotation",
      "180",
      "--hflip",
      "false",
      "--resolution",
      "1280x720",
      "--top-k",
      "5",
    ]);
    let config = args
      .pipeline_config(Mode::Detection, Preset::Detect)
      .unwrap();
    assert_eq!(config.camera.rotation, Rotation::Deg180);
    assert!(!config.camera.flip_h);
    assert!(config.camera.flip_v);
    assert_eq!(config.camera.resolution, Dimension::new(1280, 720));
    assert_eq!(config.top_k, 5);
  }

  #[test]
  fn classification_requires_labels() {
    let args = parse(&[]);
    assert_eq!(
      args.pipeline_config(Mode::Classification, Preset::Classify),
      Err(ConfigError::LabelRequired)
    );
    let args = parse(&["--label", "labels.txt"]);
    assert!(
      args
        .pipeline_config(Mode::Classification, Preset::Classify)
        .is_ok()
    );
    assert!(args.pipeline_config(Mode::Detection, Preset::Detect).is_ok());
  }

  #[test]
  fn rejects_out_of_range_values() {
    let args = parse(&["--downscale", "1.5"]);
    assert_eq!(
      args.pipeline_config(Mode::Detection, Preset::Detect),
      Err(ConfigError::InvalidDownscale(1.5))
    );
    let args = parse(&["--threshold", "2"]);
    assert!(args.pipeline_config(Mode::Detection, Preset::Detect).is_err());
    let args = parse(&["--framerate", "0"]);
    assert_eq!(
      args.pipeline_config(Mode::Detection, Preset::Detect),
      Err(ConfigError::InvalidFramerate)
    );
  }
}
