// 该文件是 Liuguang （流光） 项目的一部分。
// src/bin/classify_camera.rs - 相机实时分类预览
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use tracing::info;

use liuguang::{
  config::{Mode, Preset, PreviewArgs},
  task::run_preview,
};

/// 在相机预览上实时显示分类结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub preview: PreviewArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let report = run_preview(args.preview, Mode::Classification, Preset::Classify)?;
  info!("共处理 {} 帧", report.frames);

  Ok(())
}
