// 该文件是 Liuguang （流光） 项目的一部分。
// tests/preview_loop.rs - 预览主循环测试
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

use std::{cell::RefCell, rc::Rc, sync::mpsc};

use image::{Rgba, RgbaImage};
use thiserror::Error;

use liuguang::{
  config::{Mode, PipelineConfig, Preset},
  frame::RgbNhwcFrame,
  geometry::Dimension,
  input::FrameSource,
  label::LabelMap,
  model::{BoundingBox, Candidate, InputShape, Model},
  output::{Anchor, Compositor, LayerId, draw::OverlayFont},
  task::{PreviewTask, Task},
};

#[derive(Error, Debug)]
#[error("mock failure: {0}")]
struct MockError(&'static str);

#[derive(Debug, Clone, PartialEq)]
enum Event {
  AddLayer(Dimension),
  Present,
  RemoveLayer,
  Annotate(String),
  Close,
}

type Log = Rc<RefCell<Vec<Event>>>;

fn pattern(size: Dimension) -> Vec<u8> {
  let mut data = Vec::with_capacity(size.rgb_len());
  for y in 0..size.height {
    for x in 0..size.width {
      data.extend_from_slice(&[(y % 251) as u8, (x % 251) as u8, ((x + y) % 7) as u8]);
    }
  }
  data
}

struct MockSource {
  frame: RgbNhwcFrame,
  remaining: Option<usize>,
  log: Log,
}

impl MockSource {
  fn new(capture: Dimension, remaining: Option<usize>, log: &Log) -> Self {
    Self {
      frame: RgbNhwcFrame::from_vec(capture, pattern(capture)).unwrap(),
      remaining,
      log: log.clone(),
    }
  }
}

impl FrameSource for MockSource {
  type Error = MockError;

  fn capture_size(&self) -> Dimension {
    self.frame.size()
  }

  fn next_frame(&mut self) -> Result<Option<&RgbNhwcFrame>, Self::Error> {
    match &mut self.remaining {
      Some(0) => Ok(None),
      Some(n) => {
        *n -= 1;
        Ok(Some(&self.frame))
      }
      None => Ok(Some(&self.frame)),
    }
  }

  fn close(self) -> Result<(), Self::Error> {
    self.log.borrow_mut().push(Event::Close);
    Ok(())
  }
}

struct MockModel {
  shape: InputShape,
  /// 每次推理依次返回的结果，用完后返回空列表
  script: RefCell<Vec<Result<Vec<Candidate>, MockError>>>,
  tensors: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl MockModel {
  fn new(width: u32, height: u32, script: Vec<Result<Vec<Candidate>, MockError>>) -> Self {
    Self {
      shape: InputShape {
        batch: 1,
        height,
        width,
        channels: 3,
      },
      script: RefCell::new(script.into_iter().rev().collect()),
      tensors: Rc::new(RefCell::new(Vec::new())),
    }
  }
}

impl Model for MockModel {
  type Error = MockError;

  fn input_shape(&self) -> InputShape {
    self.shape
  }

  fn infer(&self, tensor: &[u8], top_k: usize) -> Result<Vec<Candidate>, Self::Error> {
    self.tensors.borrow_mut().push(tensor.to_vec());
    let mut result = self.script.borrow_mut().pop().unwrap_or(Ok(Vec::new()))?;
    result.truncate(top_k);
    Ok(result)
  }
}

struct MockCompositor {
  log: Log,
  presented: Rc<RefCell<Vec<RgbaImage>>>,
}

impl MockCompositor {
  fn new(log: &Log) -> Self {
    Self {
      log: log.clone(),
      presented: Rc::new(RefCell::new(Vec::new())),
    }
  }
}

impl Compositor for MockCompositor {
  type Error = MockError;

  fn add_layer(&mut self, _anchor: Anchor, size: Dimension) -> Result<LayerId, Self::Error> {
    self.log.borrow_mut().push(Event::AddLayer(size));
    Ok(LayerId(0))
  }

  fn present_layer(&mut self, _layer: LayerId, surface: &RgbaImage) -> Result<(), Self::Error> {
    self.log.borrow_mut().push(Event::Present);
    self.presented.borrow_mut().push(surface.clone());
    Ok(())
  }

  fn remove_layer(&mut self, _layer: LayerId) -> Result<(), Self::Error> {
    self.log.borrow_mut().push(Event::RemoveLayer);
    Ok(())
  }

  fn set_annotation(&mut self, text: &str) -> Result<(), Self::Error> {
    self.log.borrow_mut().push(Event::Annotate(text.to_string()));
    Ok(())
  }
}

fn detect_config() -> PipelineConfig {
  Preset::Detect.config(Mode::Detection)
}

fn annotations(log: &Log) -> Vec<String> {
  log
    .borrow()
    .iter()
    .filter_map(|e| match e {
      Event::Annotate(text) => Some(text.clone()),
      _ => None,
    })
    .collect()
}

fn count(log: &Log, event: &Event) -> usize {
  log.borrow().iter().filter(|e| *e == event).count()
}

#[test]
fn unaligned_input_is_cropped_from_aligned_capture() {
  let log = Log::default();
  let capture = Dimension::new(320, 304);
  let source = MockSource::new(capture, None, &log);
  let model = MockModel::new(300, 300, Vec::new());
  let tensors = model.tensors.clone();

  let report = PreviewTask::new(detect_config())
    .with_frame_number(Some(2))
    .run_task(source, model, MockCompositor::new(&log))
    .unwrap();

  assert_eq!(report.frames, 2);
  assert!(report.mean_inference.is_some());
  let tensors = tensors.borrow();
  assert_eq!(tensors.len(), 2);
  let tensor = &tensors[0];
  assert_eq!(tensor.len(), 300 * 300 * 3);
  let expected = pattern(capture);
  for (x, y) in [(0usize, 0usize), (299, 0), (0, 299), (299, 299), (123, 45)] {
    let got = &tensor[(y * 300 + x) * 3..(y * 300 + x) * 3 + 3];
    let want = &expected[(y * 320 + x) * 3..(y * 320 + x) * 3 + 3];
    assert_eq!(got, want, "pixel ({}, {})", x, y);
  }
  assert_eq!(log.borrow()[0], Event::AddLayer(Dimension::new(320, 240)));
}

#[test]
fn zero_detections_commit_a_blank_overlay() {
  let log = Log::default();
  let source = MockSource::new(Dimension::new(320, 304), None, &log);
  let model = MockModel::new(300, 300, vec![Ok(Vec::new())]);
  let compositor = MockCompositor::new(&log);
  let presented = compositor.presented.clone();
  let config = detect_config();
  let background = Rgba(config.overlay_background);

  PreviewTask::new(config)
    .with_frame_number(Some(1))
    .run_task(source, model, compositor)
    .unwrap();

  let presented = presented.borrow();
  assert_eq!(presented.len(), 1);
  assert!(presented[0].pixels().all(|p| *p == background));

  let status = annotations(&log);
  assert_eq!(status.len(), 1);
  assert!(status[0].ends_with("ms"));
  assert!(!status[0].contains('\n'));
}

#[test]
fn overlay_is_cleared_between_frames() {
  let log = Log::default();
  let source = MockSource::new(Dimension::new(320, 304), None, &log);
  let detection = Candidate::Detection {
    label_id: 0,
    score: 0.87,
    bbox: BoundingBox {
      top_left: (0.1, 0.1),
      bottom_right: (0.5, 0.5),
    },
  };
  let model = MockModel::new(300, 300, vec![Ok(vec![detection]), Ok(Vec::new())]);
  let compositor = MockCompositor::new(&log);
  let presented = compositor.presented.clone();
  let config = detect_config();
  let box_color = Rgba(config.box_color);
  let background = Rgba(config.overlay_background);

  PreviewTask::new(config)
    .with_frame_number(Some(2))
    .run_task(source, model, compositor)
    .unwrap();

  let presented = presented.borrow();
  assert_eq!(presented.len(), 2);
  // (0.1, 0.1) * (600, 473.68) * 0.5 = (30, 23)
  assert_eq!(*presented[0].get_pixel(30, 23), box_color);
  assert_eq!(*presented[0].get_pixel(80, 60), background);
  assert!(presented[1].pixels().all(|p| *p == background));
}

#[test]
fn classification_status_shows_label_score_and_latency() {
  let log = Log::default();
  let mut config = Preset::Classify.config(Mode::Classification);
  config.camera.rotation = liuguang::config::Rotation::Deg0;
  let source = MockSource::new(Dimension::new(224, 224), None, &log);
  let model = MockModel::new(
    224,
    224,
    vec![
      Ok(vec![Candidate::Classification {
        label_id: 1,
        score: 0.87,
      }]),
      Ok(Vec::new()),
    ],
  );
  let labels: LabelMap = "0 dog\n1 cat".parse().unwrap();

  let report = PreviewTask::new(config)
    .with_labels(Some(labels))
    .with_frame_number(Some(2))
    .run_task(source, model, MockCompositor::new(&log))
    .unwrap();

  assert_eq!(report.frames, 2);
  let status = annotations(&log);
  // 第二帧没有结果，分类模式不更新状态
  assert_eq!(status.len(), 1);
  assert!(status[0].starts_with("cat 0.87\n"));
  assert!(status[0].ends_with("ms"));
}

#[test]
fn inference_failure_tears_down_overlay_then_camera() {
  let log = Log::default();
  let source = MockSource::new(Dimension::new(320, 304), None, &log);
  let model = MockModel::new(300, 300, vec![Err(MockError("npu timeout"))]);

  let result = PreviewTask::new(detect_config()).run_task(source, model, MockCompositor::new(&log));

  let err = result.unwrap_err();
  assert!(format!("{:#}", err).contains("npu timeout"));
  assert_eq!(count(&log, &Event::RemoveLayer), 1);
  assert_eq!(count(&log, &Event::Close), 1);
  let log = log.borrow();
  let remove = log.iter().position(|e| *e == Event::RemoveLayer).unwrap();
  let close = log.iter().position(|e| *e == Event::Close).unwrap();
  assert!(remove < close);
}

#[test]
fn exhausted_source_ends_the_loop_cleanly() {
  let log = Log::default();
  let source = MockSource::new(Dimension::new(320, 304), Some(3), &log);
  let model = MockModel::new(300, 300, Vec::new());

  let report = PreviewTask::new(detect_config())
    .run_task(source, model, MockCompositor::new(&log))
    .unwrap();

  assert_eq!(report.frames, 3);
  assert_eq!(count(&log, &Event::Present), 3);
  assert_eq!(count(&log, &Event::RemoveLayer), 1);
  assert_eq!(count(&log, &Event::Close), 1);
}

#[test]
fn interrupt_stops_before_the_next_frame() {
  let log = Log::default();
  let source = MockSource::new(Dimension::new(320, 304), None, &log);
  let model = MockModel::new(300, 300, Vec::new());
  let (tx, rx) = mpsc::channel();
  tx.send(()).unwrap();

  let report = PreviewTask::new(detect_config())
    .with_interrupt(rx)
    .run_task(source, model, MockCompositor::new(&log))
    .unwrap();

  assert_eq!(report.frames, 0);
  assert_eq!(report.mean_inference, None);
  assert_eq!(count(&log, &Event::RemoveLayer), 1);
  assert_eq!(count(&log, &Event::Close), 1);
}

#[test]
fn mismatched_capture_still_closes_the_camera() {
  let log = Log::default();
  let source = MockSource::new(Dimension::new(300, 300), None, &log);
  let model = MockModel::new(300, 300, Vec::new());

  let result = PreviewTask::new(detect_config()).run_task(source, model, MockCompositor::new(&log));

  assert!(result.is_err());
  assert_eq!(count(&log, &Event::AddLayer(Dimension::new(320, 240))), 0);
  assert_eq!(count(&log, &Event::RemoveLayer), 0);
  assert_eq!(count(&log, &Event::Close), 1);
}

#[test]
fn invalid_config_still_closes_the_camera() {
  let log = Log::default();
  let source = MockSource::new(Dimension::new(320, 304), None, &log);
  let model = MockModel::new(300, 300, Vec::new());
  let mut config = detect_config();
  config.downscale_factor = 0.0;

  let result = PreviewTask::new(config).run_task(source, model, MockCompositor::new(&log));

  assert!(result.is_err());
  assert_eq!(count(&log, &Event::AddLayer(Dimension::new(320, 240))), 0);
  assert_eq!(count(&log, &Event::Close), 1);
}

#[test]
fn unlabelled_detection_draws_score_caption() {
  let log = Log::default();
  let source = MockSource::new(Dimension::new(320, 304), None, &log);
  let detection = Candidate::Detection {
    label_id: 7,
    score: 0.87,
    bbox: BoundingBox {
      top_left: (0.1, 0.1),
      bottom_right: (0.5, 0.5),
    },
  };
  let model = MockModel::new(300, 300, vec![Ok(vec![detection])]);
  let compositor = MockCompositor::new(&log);
  let presented = compositor.presented.clone();
  let mut config = detect_config();
  config.text_color = [255, 0, 0, 255];
  let background = Rgba(config.overlay_background);
  let font = OverlayFont::from_bytes(
    include_bytes!("fixtures/DejaVuSans.ttf").to_vec(),
    config.font_size,
  )
  .unwrap();

  PreviewTask::new(config)
    .with_font(Some(font))
    .with_frame_number(Some(1))
    .run_task(source, model, compositor)
    .unwrap();

  let presented = presented.borrow();
  assert_eq!(presented.len(), 1);
  // 标题从框的左上角 (30, 23) 开始，框线宽 2 像素
  let caption_area = (33..70u32).flat_map(|x| (26..40u32).map(move |y| (x, y)));
  let inked = caption_area
    .filter(|&(x, y)| *presented[0].get_pixel(x, y) != background)
    .count();
  assert!(inked > 0);
  assert_eq!(*presented[0].get_pixel(100, 80), background);
}
