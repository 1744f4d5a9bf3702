// 该文件是 Liuguang （流光） 项目的一部分。
// src/task.rs - 预览主循环
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

use std::{
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use anyhow::{Context, anyhow, bail};
use image::Rgba;
use tracing::{debug, error, info, warn};

use crate::{
  config::{Mode, PipelineConfig, Preset, PreviewArgs},
  frame::FrameCropper,
  geometry::PipelineGeometry,
  input::{FrameSource, InputWrapper},
  label::LabelMap,
  model::{Candidate, Model, ModelWrapper},
  output::{
    Anchor, Compositor, DisplayWrapper,
    draw::{Draw, OverlayFont, classification_status, detection_status},
    overlay::OverlayRenderer,
  },
};

pub trait Task<S, M, C>: Sized {
  type Error;
  fn run_task(self, source: S, model: M, display: C) -> Result<TaskReport, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskReport {
  /// 完成推理的帧数
  pub frames: usize,
  pub mean_inference: Option<Duration>,
}

/// 安装 Ctrl-C 处理，主循环在下一帧边界收到信号后退出
pub fn install_interrupt_handler() -> anyhow::Result<Receiver<()>> {
  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理函数")?;
  Ok(rx)
}

/// 相机与叠加层的唯一持有者
///
/// 无论循环如何结束，`teardown` 都先销毁叠加层再关闭相机，且只执行一次。
struct Session<S, C>
where
  S: FrameSource,
  S::Error: std::error::Error + Send + Sync + 'static,
  C: Compositor,
  C::Error: std::error::Error + Send + Sync + 'static,
{
  source: Option<S>,
  overlay: OverlayRenderer<C>,
}

impl<S, C> Session<S, C>
where
  S: FrameSource,
  S::Error: std::error::Error + Send + Sync + 'static,
  C: Compositor,
  C::Error: std::error::Error + Send + Sync + 'static,
{
  fn new(source: S, display: C) -> Self {
    Self {
      source: Some(source),
      overlay: OverlayRenderer::new(display),
    }
  }

  /// 释放失败只记录警告，不覆盖循环本身的错误
  fn teardown(&mut self) {
    if self.overlay.is_active()
      && let Err(e) = self.overlay.destroy()
    {
      warn!("销毁叠加层失败: {}", e);
    }
    if let Some(source) = self.source.take() {
      match source.close() {
        Ok(()) => debug!("相机已关闭"),
        Err(e) => warn!("关闭相机失败: {}", e),
      }
    }
  }
}

impl<S, C> Drop for Session<S, C>
where
  S: FrameSource,
  S::Error: std::error::Error + Send + Sync + 'static,
  C: Compositor,
  C::Error: std::error::Error + Send + Sync + 'static,
{
  fn drop(&mut self) {
    self.teardown();
  }
}

/// 相机预览推理任务
pub struct PreviewTask {
  config: PipelineConfig,
  labels: Option<LabelMap>,
  font: Option<OverlayFont>,
  frame_number: Option<usize>,
  interrupt: Option<Receiver<()>>,
}

impl PreviewTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      labels: None,
      font: None,
      frame_number: None,
      interrupt: None,
    }
  }

  pub fn with_labels(mut self, labels: Option<LabelMap>) -> Self {
    self.labels = labels;
    self
  }

  pub fn with_font(mut self, font: Option<OverlayFont>) -> Self {
    self.font = font;
    self
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_interrupt(mut self, interrupt: Receiver<()>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  fn interrupted(&self) -> bool {
    self
      .interrupt
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }

  fn status_text(&self, candidates: &[Candidate], elapsed: Duration) -> Option<String> {
    match (self.config.mode, candidates.first()) {
      (Mode::Classification, Some(top)) => Some(classification_status(
        self.labels.as_ref(),
        top.label_id(),
        top.score(),
        elapsed,
      )),
      (Mode::Detection, Some(_)) => Some(detection_status(elapsed)),
      (_, None) if self.config.status_on_empty => Some(detection_status(elapsed)),
      (_, None) => None,
    }
  }

  fn run_loop<S, M, C>(
    &self,
    session: &mut Session<S, C>,
    model: &M,
  ) -> anyhow::Result<TaskReport>
  where
    S: FrameSource,
    S::Error: std::error::Error + Send + Sync + 'static,
    M: Model,
    M::Error: std::error::Error + Send + Sync + 'static,
    C: Compositor,
    C::Error: std::error::Error + Send + Sync + 'static,
  {
    let shape = model.input_shape();
    let geometry = PipelineGeometry::new(
      shape.input_size(),
      self.config.camera.preview_size(),
      self.config.downscale_factor,
    )
    .context("无法计算采集尺寸")?;
    info!(
      "输入 {} 采集 {} 预览 {} 叠加层 {} (裁剪: {})",
      geometry.input,
      geometry.capture,
      geometry.preview,
      geometry.overlay,
      geometry.needs_crop()
    );

    let source = session
      .source
      .as_mut()
      .ok_or_else(|| anyhow!("相机已关闭"))?;
    if source.capture_size() != geometry.capture {
      bail!(
        "相机输出 {} 与对齐后的采集尺寸 {} 不一致",
        source.capture_size(),
        geometry.capture
      );
    }

    session
      .overlay
      .create(
        Anchor::default(),
        geometry.overlay,
        Rgba(self.config.overlay_background),
      )
      .context("无法创建叠加层")?;

    let mut cropper = FrameCropper::new(geometry.capture, geometry.input);
    let draw = Draw::new(&self.config, self.font.clone());
    let labels = self.labels.as_ref();

    let mut frames = 0usize;
    let mut total = Duration::ZERO;
    loop {
      if self.interrupted() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      if self.frame_number.is_some_and(|n| frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frames);
        break;
      }

      let source = session
        .source
        .as_mut()
        .ok_or_else(|| anyhow!("相机已关闭"))?;
      let frame = match source.next_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => {
          info!("相机数据结束，退出任务循环");
          break;
        }
        Err(e) => {
          error!("读取相机帧失败: {}", e);
          return Err(anyhow::Error::new(e).context("读取相机帧失败"));
        }
      };

      let tensor = cropper.crop(frame.as_nhwc()).context("裁剪相机帧失败")?;
      debug!("输入张量大小: {} 字节", tensor.len());

      let now = Instant::now();
      let candidates = model
        .infer(tensor, self.config.top_k)
        .context("模型推理失败")?;
      let elapsed = now.elapsed();

      frames += 1;
      total += elapsed;
      info!(
        "第 {} 帧推理完成，耗时: {:.2?}，{} 个结果",
        frames,
        elapsed,
        candidates.len()
      );
      debug!("推理结果: {:?}", candidates);

      draw
        .render(&mut session.overlay, &geometry, &candidates, labels)
        .context("绘制叠加层失败")?;

      if let Some(text) = self.status_text(&candidates, elapsed) {
        session
          .overlay
          .compositor_mut()
          .set_annotation(&text)
          .context("更新状态文字失败")?;
      }
    }

    Ok(TaskReport {
      frames,
      mean_inference: (frames > 0).then(|| total / frames as u32),
    })
  }
}

impl<S, M, C> Task<S, M, C> for PreviewTask
where
  S: FrameSource,
  S::Error: std::error::Error + Send + Sync + 'static,
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  C: Compositor,
  C::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, source: S, model: M, display: C) -> Result<TaskReport, Self::Error> {
    info!("开始预览任务...");
    let mut session = Session::new(source, display);
    let result = self
      .config
      .validate()
      .context("配置无效")
      .and_then(|()| self.run_loop(&mut session, &model));
    session.teardown();

    match &result {
      Ok(report) => info!(
        "任务完成，共 {} 帧，平均推理时间: {:.2?}",
        report.frames,
        report.mean_inference.unwrap_or_default()
      ),
      Err(e) => error!("任务失败: {:#}", e),
    }
    result
  }
}

/// 两个预览程序共用的启动流程
///
/// 配置、标签与模型都在打开相机之前检查，配置错误不会占用相机。
pub fn run_preview(args: PreviewArgs, mode: Mode, default_preset: Preset) -> anyhow::Result<TaskReport> {
  let config = args
    .pipeline_config(mode, default_preset)
    .context("配置无效")?;
  debug!("预览配置: {:?}", config);

  let labels = match &args.label {
    Some(path) => Some(
      LabelMap::from_path(path)
        .with_context(|| format!("无法读取标签文件 {}", path.display()))?,
    ),
    None => {
      info!("未指定标签文件，只显示分数");
      None
    }
  };

  let font = match OverlayFont::load(&args.font, config.font_size) {
    Ok(font) => Some(font),
    Err(e) => {
      warn!("字体 {} 不可用，跳过文字绘制: {}", args.font.display(), e);
      None
    }
  };

  info!("模型文件路径: {}", args.model);
  ModelWrapper::check_mode(&args.model, mode).context("模型与程序不匹配")?;
  let model = ModelWrapper::load(&args.model, config.threshold).context("无法加载模型")?;
  debug!("模型结果类型: {:?}", model.mode());
  let geometry = PipelineGeometry::new(
    model.input_shape().input_size(),
    config.camera.preview_size(),
    config.downscale_factor,
  )?;

  info!("相机: {}", args.camera);
  let input = InputWrapper::open(&args.camera, &config.camera, geometry.capture)
    .context("无法打开相机")?;
  let display = DisplayWrapper::attach(&input, args.record.as_ref(), geometry.preview)
    .context("无法创建叠加输出")?;

  let interrupt = install_interrupt_handler()?;

  PreviewTask::new(config)
    .with_labels(labels)
    .with_font(font)
    .with_frame_number(args.frame_number)
    .with_interrupt(interrupt)
    .run_task(input, model, display)
}
