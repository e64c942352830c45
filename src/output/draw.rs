// 该文件是 Renying （人影） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::info;

use crate::{frame::RgbFrame, model::Detection};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 13.0;
const LABEL_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
// 标签基线在框顶上方的距离
const LABEL_OFFSET: i32 = 10;
// 基线小于该值时标签改放到框内
const LABEL_MIN_BASELINE: i32 = 15;
const LABEL_BELOW_MARGIN: i32 = 5;

#[derive(Error, Debug)]
pub enum FontError {
  #[error("字体文件读取失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效")]
  InvalidFont,
}

/// 在帧上绘制检测框与 `Person <置信度>` 标签
#[derive(Clone)]
pub struct Annotator {
  font: FontArc,
  scale: PxScale,
}

impl Default for Annotator {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/font.ttf"); // default font
    let font = FontArc::try_from_slice(font_data).expect("无法加载嵌入的字体文件");
    Self::with_font(font)
  }
}

impl Annotator {
  fn with_font(font: FontArc) -> Self {
    Self {
      font,
      scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  /// 使用外部字体文件替换内置字体
  pub fn with_font_file(path: &Path) -> Result<Self, FontError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|_| FontError::InvalidFont)?;
    info!("标签字体: {}", path.display());
    Ok(Self::with_font(font))
  }

  /// 当前字体下文本的像素尺寸
  pub fn text_size(&self, text: &str) -> (u32, u32) {
    text_size(self.scale, &self.font, text)
  }

  /// 按检测结果顺序绘制，后画的覆盖先画的
  pub fn annotate(&self, frame: &mut RgbFrame, detections: &[Detection]) {
    if detections.is_empty() {
      return;
    }
    frame.with_image(|image| {
      for detection in detections {
        self.draw_detection(image, detection);
      }
    });
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
    let x1 = detection.bbox.x1() as i32;
    let y1 = detection.bbox.y1() as i32;
    let x2 = detection.bbox.x2() as i32;
    let y2 = detection.bbox.y2() as i32;

    // 两个角点都包含在框内
    let rect = Rect::at(x1, y1).of_size((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32);
    draw_hollow_rect_mut(image, rect, Rgb(LABEL_COLOR));

    let label = label_text(detection.confidence);
    let (_, text_height) = self.text_size(&label);
    let baseline = label_baseline(y1, text_height as i32);
    draw_text_mut(
      image,
      Rgb(LABEL_COLOR),
      x1,
      baseline - text_height as i32,
      self.scale,
      &self.font,
      &label,
    );
  }
}

/// `Person` 加保留两位小数的置信度，末尾的 0 按最短形式省略（如 `0.9`、`1.0`）
pub fn label_text(confidence: f32) -> String {
  // 恰好落在中点时取偶数
  let rounded = (confidence as f64 * 100.0).round_ties_even() / 100.0;
  format!("Person {:?}", rounded)
}

/// 标签基线的 y 坐标
///
/// 默认放在框顶上方 10 像素；若会越出画面顶部，则放到框顶下方、
/// 距离为文本高度加 5 像素。
pub fn label_baseline(y1: i32, text_height: i32) -> i32 {
  let baseline = y1 - LABEL_OFFSET;
  if baseline < LABEL_MIN_BASELINE {
    y1 + text_height + LABEL_BELOW_MARGIN
  } else {
    baseline
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  const GREEN: [u8; 3] = [0, 255, 0];

  fn detection(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
    Detection {
      bbox: BBox::new(x1, y1, x2, y2),
      confidence,
    }
  }

  fn is_black(frame: &RgbFrame, x: u32, y: u32) -> bool {
    frame.pixel(x, y) == Some([0, 0, 0])
  }

  #[test]
  fn label_uses_shortest_two_decimal_form() {
    assert_eq!(label_text(0.9), "Person 0.9");
    assert_eq!(label_text(0.254), "Person 0.25");
    assert_eq!(label_text(0.876), "Person 0.88");
    assert_eq!(label_text(1.0), "Person 1.0");
  }

  #[test]
  fn label_rounds_halves_to_even() {
    // 0.625 与 0.375 在 f32 中可精确表示
    assert_eq!(label_text(0.625), "Person 0.62");
    assert_eq!(label_text(0.375), "Person 0.38");
    assert_eq!(label_text(0.125), "Person 0.12");
  }

  #[test]
  fn label_sits_above_box_when_room() {
    assert_eq!(label_baseline(100, 7), 90);
    assert_eq!(label_baseline(25, 7), 15);
  }

  #[test]
  fn label_moves_inside_near_top_edge() {
    assert_eq!(label_baseline(24, 7), 36);
    assert_eq!(label_baseline(10, 7), 22);
    assert_eq!(label_baseline(0, 9), 14);
  }

  #[test]
  fn embedded_font_measures_label_text() {
    let annotator = Annotator::default();
    let (w, h) = annotator.text_size("Person 0.9");
    let (wider, same_h) = annotator.text_size("Person 0.99");
    assert!(w > 0 && h > 0);
    assert!(wider > w);
    assert_eq!(h, same_h);
  }

  #[test]
  fn draws_inclusive_rectangle_edges() {
    let mut frame = RgbFrame::new(64, 64);
    Annotator::default().annotate(&mut frame, &[detection(10.0, 10.0, 50.0, 50.0, 0.9)]);

    for (x, y) in [(10, 10), (50, 10), (10, 50), (50, 50), (30, 10), (10, 45)] {
      assert_eq!(frame.pixel(x, y), Some(GREEN), "({}, {})", x, y);
    }
    assert!(is_black(&frame, 30, 45));
    assert!(is_black(&frame, 51, 51));
  }

  #[test]
  fn label_is_drawn_inside_box_near_top() {
    let mut frame = RgbFrame::new(96, 96);
    let annotator = Annotator::default();
    annotator.annotate(&mut frame, &[detection(10.0, 10.0, 90.0, 90.0, 0.9)]);

    // 标签移到框内，顶部在框顶下方 5 像素
    let (w, h) = annotator.text_size("Person 0.9");
    let top = 15;
    let inked = (top..top + h)
      .flat_map(|y| (11..(11 + w).min(90)).map(move |x| (x, y)))
      .filter(|&(x, y)| !is_black(&frame, x, y))
      .count();
    assert!(inked > 0);
    // 框上方没有任何绘制
    assert!((0..10).all(|y| (0..96).all(|x| is_black(&frame, x, y))));
    // 框内标签以下保持原样
    assert!((top + h + 1..90).all(|y| (11..90).all(|x| is_black(&frame, x, y))));
  }

  #[test]
  fn label_is_drawn_above_box_with_room() {
    let mut frame = RgbFrame::new(96, 96);
    let annotator = Annotator::default();
    annotator.annotate(&mut frame, &[detection(10.0, 60.0, 90.0, 90.0, 0.5)]);

    let (_, h) = annotator.text_size("Person 0.5");
    let top = 50 - h;
    let inked = (top..50)
      .flat_map(|y| (10..90).map(move |x| (x, y)))
      .filter(|&(x, y)| !is_black(&frame, x, y))
      .count();
    assert!(inked > 0);
    // 框内部不被标签覆盖
    assert!((61..90).all(|y| (11..90).all(|x| is_black(&frame, x, y))));
  }

  #[test]
  fn boxes_touching_the_border_do_not_panic() {
    let mut frame = RgbFrame::new(32, 32);
    Annotator::default().annotate(
      &mut frame,
      &[
        detection(0.0, 0.0, 32.0, 32.0, 0.5),
        detection(31.0, 31.0, 31.0, 31.0, 0.3),
      ],
    );
    assert_eq!(frame.pixel(0, 0), Some(GREEN));
    assert_eq!(frame.pixel(31, 31), Some(GREEN));
  }

  #[test]
  fn annotate_leaves_frame_untouched_without_detections() {
    let mut frame = RgbFrame::new(8, 8);
    Annotator::default().annotate(&mut frame, &[]);
    assert_eq!(frame, RgbFrame::new(8, 8));
  }

  #[test]
  fn missing_font_file_is_reported() {
    let err = Annotator::with_font_file(Path::new("/nonexistent/font.ttf"))
      .err()
      .unwrap();
    assert!(matches!(err, FontError::IoError(_)));
  }
}
