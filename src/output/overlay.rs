// 该文件是 Liuguang （流光） 项目的一部分。
// src/output/overlay.rs - 叠加层绘制面
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

//! # 叠加层
//!
//! 叠加层的生命周期只有一轮：
//!
//! ```text
//! Uninitialized --create--> Active --destroy--> Released
//! ```
//!
//! 在错误的状态下调用任何操作都会返回 [`OverlayError::InvalidState`]。
//! 所有绘制都在内存画布上完成，只有 `commit` 才会交给合成器。

use image::{Rgba, RgbaImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::debug;

use crate::{
  geometry::Dimension,
  output::{Anchor, Compositor, LayerId, draw::OverlayFont},
};

const BOX_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum OverlayError {
  #[error("叠加层状态错误: {operation} 不能在 {state} 状态下调用")]
  InvalidState {
    operation: &'static str,
    state: &'static str,
  },
  #[error("叠加层尺寸无效: {0}")]
  InvalidSize(Dimension),
  #[error("合成器错误: {0}")]
  Compositor(#[source] Box<dyn std::error::Error + Send + Sync>),
}

fn compositor_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> OverlayError {
  OverlayError::Compositor(Box::new(e))
}

pub struct Surface {
  layer: LayerId,
  canvas: RgbaImage,
  background: Rgba<u8>,
}

impl Surface {
  pub fn layer(&self) -> LayerId {
    self.layer
  }

  pub fn canvas(&self) -> &RgbaImage {
    &self.canvas
  }

  pub fn background(&self) -> Rgba<u8> {
    self.background
  }

  fn clamp(&self, (x, y): (f32, f32)) -> (i32, i32) {
    let max_x = self.canvas.width() as i32 - 1;
    let max_y = self.canvas.height() as i32 - 1;
    ((x as i32).clamp(0, max_x), (y as i32).clamp(0, max_y))
  }
}

enum OverlayState {
  Uninitialized,
  Active(Surface),
  Released,
}

impl OverlayState {
  fn name(&self) -> &'static str {
    match self {
      OverlayState::Uninitialized => "Uninitialized",
      OverlayState::Active(_) => "Active",
      OverlayState::Released => "Released",
    }
  }
}

/// 位于相机预览之上的 RGBA 叠加层
pub struct OverlayRenderer<C> {
  compositor: C,
  state: OverlayState,
}

impl<C> OverlayRenderer<C>
where
  C: Compositor,
  C::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(compositor: C) -> Self {
    Self {
      compositor,
      state: OverlayState::Uninitialized,
    }
  }

  pub fn compositor(&self) -> &C {
    &self.compositor
  }

  pub fn compositor_mut(&mut self) -> &mut C {
    &mut self.compositor
  }

  pub fn is_active(&self) -> bool {
    matches!(self.state, OverlayState::Active(_))
  }

  pub fn surface(&self) -> Option<&Surface> {
    match &self.state {
      OverlayState::Active(surface) => Some(surface),
      _ => None,
    }
  }

  fn active_mut(&mut self, operation: &'static str) -> Result<&mut Surface, OverlayError> {
    match &mut self.state {
      OverlayState::Active(surface) => Ok(surface),
      state => Err(OverlayError::InvalidState {
        operation,
        state: state.name(),
      }),
    }
  }

  /// 在合成器中注册叠加层，画布以 `background` 填充
  pub fn create(
    &mut self,
    anchor: Anchor,
    size: Dimension,
    background: Rgba<u8>,
  ) -> Result<(), OverlayError> {
    if !matches!(self.state, OverlayState::Uninitialized) {
      return Err(OverlayError::InvalidState {
        operation: "create",
        state: self.state.name(),
      });
    }
    if !size.is_positive() {
      return Err(OverlayError::InvalidSize(size));
    }

    let layer = self
      .compositor
      .add_layer(anchor, size)
      .map_err(compositor_error)?;
    debug!("叠加层 {} 已创建: {}", layer, size);
    self.state = OverlayState::Active(Surface {
      layer,
      canvas: RgbaImage::from_pixel(size.width, size.height, background),
      background,
    });
    Ok(())
  }

  pub fn clear(&mut self) -> Result<(), OverlayError> {
    let surface = self.active_mut("clear")?;
    let background = surface.background;
    surface
      .canvas
      .pixels_mut()
      .for_each(|pixel| *pixel = background);
    Ok(())
  }

  /// 画两像素宽的矩形框，坐标截断到画布范围内
  pub fn draw_box(
    &mut self,
    top_left: (f32, f32),
    bottom_right: (f32, f32),
    color: Rgba<u8>,
  ) -> Result<(), OverlayError> {
    let surface = self.active_mut("draw_box")?;
    let (ax, ay) = surface.clamp(top_left);
    let (bx, by) = surface.clamp(bottom_right);
    let (x0, x1) = (ax.min(bx), ax.max(bx));
    let (y0, y1) = (ay.min(by), ay.max(by));

    let width = (x1 - x0 + 1) as u32;
    let height = (y1 - y0 + 1) as u32;
    for t in 0..BOX_THICKNESS {
      if width <= 2 * t || height <= 2 * t {
        break;
      }
      let rect = Rect::at(x0 + t as i32, y0 + t as i32).of_size(width - 2 * t, height - 2 * t);
      draw_hollow_rect_mut(&mut surface.canvas, rect, color);
    }
    Ok(())
  }

  pub fn draw_text(
    &mut self,
    position: (f32, f32),
    text: &str,
    font: &OverlayFont,
    color: Rgba<u8>,
  ) -> Result<(), OverlayError> {
    let surface = self.active_mut("draw_text")?;
    let (x, y) = surface.clamp(position);
    draw_text_mut(
      &mut surface.canvas,
      color,
      x,
      y,
      font.scale(),
      font.font(),
      text,
    );
    Ok(())
  }

  /// 把整张画布交给合成器
  pub fn commit(&mut self) -> Result<(), OverlayError> {
    let surface = match &self.state {
      OverlayState::Active(surface) => surface,
      state => {
        return Err(OverlayError::InvalidState {
          operation: "commit",
          state: state.name(),
        });
      }
    };
    self
      .compositor
      .present_layer(surface.layer, &surface.canvas)
      .map_err(compositor_error)
  }

  /// 从合成器注销叠加层
  ///
  /// 无论注销是否成功，叠加层都进入 `Released` 状态。
  pub fn destroy(&mut self) -> Result<(), OverlayError> {
    match std::mem::replace(&mut self.state, OverlayState::Released) {
      OverlayState::Active(surface) => {
        debug!("销毁叠加层 {}", surface.layer);
        self
          .compositor
          .remove_layer(surface.layer)
          .map_err(compositor_error)
      }
      state => {
        let name = state.name();
        self.state = state;
        Err(OverlayError::InvalidState {
          operation: "destroy",
          state: name,
        })
      }
    }
  }

  pub fn into_compositor(self) -> C {
    self.compositor
  }
}

#[cfg(test)]
mod tests {
  use std::convert::Infallible;

  use super::*;

  #[derive(Default)]
  struct Recorder {
    added: usize,
    presented: Vec<RgbaImage>,
    removed: Vec<LayerId>,
  }

  impl Compositor for Recorder {
    type Error = Infallible;

    fn add_layer(&mut self, _anchor: Anchor, _size: Dimension) -> Result<LayerId, Self::Error> {
      self.added += 1;
      Ok(LayerId(7))
    }

    fn present_layer(&mut self, _layer: LayerId, surface: &RgbaImage) -> Result<(), Self::Error> {
      self.presented.push(surface.clone());
      Ok(())
    }

    fn remove_layer(&mut self, layer: LayerId) -> Result<(), Self::Error> {
      self.removed.push(layer);
      Ok(())
    }

    fn set_annotation(&mut self, _text: &str) -> Result<(), Self::Error> {
      Ok(())
    }
  }

  const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
  const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

  fn active() -> OverlayRenderer<Recorder> {
    let mut overlay = OverlayRenderer::new(Recorder::default());
    overlay
      .create(Anchor::default(), Dimension::new(20, 10), CLEAR)
      .unwrap();
    overlay
  }

  #[test]
  fn lifecycle_is_a_single_cycle() {
    let mut overlay = OverlayRenderer::new(Recorder::default());
    assert!(matches!(
      overlay.clear(),
      Err(OverlayError::InvalidState { .. })
    ));
    assert!(matches!(
      overlay.destroy(),
      Err(OverlayError::InvalidState { .. })
    ));
    overlay
      .create(Anchor::default(), Dimension::new(4, 4), CLEAR)
      .unwrap();
    assert!(overlay.is_active());
    assert!(
      overlay
        .create(Anchor::default(), Dimension::new(4, 4), CLEAR)
        .is_err()
    );
    overlay.destroy().unwrap();
    assert!(overlay.destroy().is_err());
    assert!(overlay.commit().is_err());
    let recorder = overlay.into_compositor();
    assert_eq!(recorder.added, 1);
    assert_eq!(recorder.removed, vec![LayerId(7)]);
  }

  #[test]
  fn box_is_clamped_to_surface() {
    let mut overlay = active();
    overlay.draw_box((-5.0, -5.0), (100.0, 100.0), RED).unwrap();
    let canvas = overlay.surface().unwrap().canvas();
    assert_eq!(*canvas.get_pixel(0, 0), RED);
    assert_eq!(*canvas.get_pixel(19, 9), RED);
    assert_eq!(*canvas.get_pixel(1, 1), RED);
    assert_eq!(*canvas.get_pixel(10, 5), CLEAR);
  }

  #[test]
  fn clear_resets_every_pixel() {
    let mut overlay = active();
    overlay.draw_box((2.0, 2.0), (8.0, 8.0), RED).unwrap();
    overlay.clear().unwrap();
    assert!(
      overlay
        .surface()
        .unwrap()
        .canvas()
        .pixels()
        .all(|p| *p == CLEAR)
    );
  }

  #[test]
  fn commit_presents_the_whole_canvas() {
    let mut overlay = active();
    overlay.draw_box((0.0, 0.0), (3.0, 3.0), RED).unwrap();
    overlay.commit().unwrap();
    let recorder = overlay.compositor();
    assert_eq!(recorder.presented.len(), 1);
    assert_eq!(recorder.presented[0].dimensions(), (20, 10));
    assert_eq!(*recorder.presented[0].get_pixel(0, 0), RED);
  }

  fn test_font() -> OverlayFont {
    let data = include_bytes!("../../tests/fixtures/DejaVuSans.ttf");
    OverlayFont::from_bytes(data.to_vec(), 8.0).unwrap()
  }

  #[test]
  fn text_is_drawn_onto_the_canvas() {
    let font = test_font();
    let mut overlay = active();
    overlay.draw_text((1.0, 1.0), "0.87", &font, RED).unwrap();
    let canvas = overlay.surface().unwrap().canvas();
    assert!(canvas.pixels().any(|p| *p != CLEAR));
    // 文字从锚点向右下方延伸
    assert!((0..10).all(|y| *canvas.get_pixel(0, y) == CLEAR));

    overlay.commit().unwrap();
    assert_eq!(&overlay.compositor().presented[0], overlay.surface().unwrap().canvas());

    overlay.clear().unwrap();
    overlay
      .draw_text((500.0, 500.0), "0.87", &font, RED)
      .unwrap();
  }

  #[test]
  fn text_needs_an_active_overlay() {
    let font = test_font();
    let mut overlay = OverlayRenderer::new(Recorder::default());
    assert!(matches!(
      overlay.draw_text((0.0, 0.0), "x", &font, RED),
      Err(OverlayError::InvalidState { .. })
    ));
  }

  #[test]
  fn zero_sized_overlay_is_rejected() {
    let mut overlay = OverlayRenderer::new(Recorder::default());
    assert!(matches!(
      overlay.create(Anchor::default(), Dimension::new(0, 10), CLEAR),
      Err(OverlayError::InvalidSize(_))
    ));
    assert!(!overlay.is_active());
  }
}
