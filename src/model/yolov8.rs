// 该文件是 Renying （人影） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;
use std::sync::Mutex;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::RgbFrame,
  model::{DetectItem, DetectResult, LoadModel, Model, ModelLoadError},
};

const YOLOV8_CLASS_NUM: usize = 80;
const YOLOV8_INPUT_W: u32 = 640;
const YOLOV8_INPUT_H: u32 = 640;
// 4 个回归值 + 80 个类别分数
const YOLOV8_ROW_SIZE: usize = 4 + YOLOV8_CLASS_NUM;
// 与检测阈值一致，更低的候选框不会被保留
const YOLOV8_SCORE_FLOOR: f32 = 0.2;
// 填充区域的灰度
const LETTERBOX_FILL: u8 = 114;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("输出形状不符合预期: {0:?}")]
  UnexpectedShape(Vec<i64>),
  #[error("推理会话已损坏")]
  SessionPoisoned,
  #[error("帧尺寸无效: {0}x{1}")]
  InvalidFrame(u32, u32),
}

/// YOLOv8 检测模型（ONNX 导出，输出形状 `[1, 84, N]`）
pub struct Yolov8 {
  // ort 的 run 需要可变借用
  session: Mutex<Session>,
}

impl LoadModel for Yolov8 {
  fn load(path: &Path) -> Result<Self, ModelLoadError> {
    let invalid = |e: ort::Error| ModelLoadError::Invalid {
      path: path.to_path_buf(),
      reason: e.to_string(),
    };

    info!("加载模型文件: {}", path.display());
    let model_data = std::fs::read(path).map_err(|source| ModelLoadError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()
      .map_err(invalid)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(invalid)?
      .commit_from_memory(&model_data)
      .map_err(|e| {
        error!("模型无法解析: {}", e);
        invalid(e)
      })?;

    let num_inputs = session.inputs.len();
    let num_outputs = session.outputs.len();
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    if num_inputs != 1 || num_outputs == 0 {
      let reason = format!(
        "预期模型输入数量为 1、输出数量至少为 1, 实际为 {} / {}",
        num_inputs, num_outputs
      );
      error!("{}", reason);
      return Err(ModelLoadError::Invalid {
        path: path.to_path_buf(),
        reason,
      });
    }

    info!("模型加载完成");
    Ok(Yolov8 {
      session: Mutex::new(session),
    })
  }
}

impl Model for Yolov8 {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = Yolov8Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (width, height) = input.dimensions();
    if width == 0 || height == 0 {
      return Err(Yolov8Error::InvalidFrame(width, height));
    }

    debug!("设置模型输入");
    let letterbox = Letterbox::fit(width, height);
    let tensor = preprocess(input, &letterbox)?;

    debug!("执行模型推理");
    let mut session = self
      .session
      .lock()
      .map_err(|_| Yolov8Error::SessionPoisoned)?;
    let outputs = session.run(ort::inputs![tensor])?;

    debug!("获取模型输出");
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    let dims: Vec<i64> = shape.iter().copied().collect();

    let num_proposals = match dims.as_slice() {
      [1, rows, n] if *rows as usize == YOLOV8_ROW_SIZE => *n as usize,
      _ => return Err(Yolov8Error::UnexpectedShape(dims)),
    };

    Ok(postprocess(data, num_proposals, YOLOV8_SCORE_FLOOR, &letterbox))
  }
}

/// 等比缩放后居中放入模型输入，其余部分用灰色填充
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  width: u32,
  height: u32,
  pad_x: u32,
  pad_y: u32,
}

impl Letterbox {
  fn fit(frame_width: u32, frame_height: u32) -> Self {
    let scale = (YOLOV8_INPUT_W as f32 / frame_width as f32)
      .min(YOLOV8_INPUT_H as f32 / frame_height as f32);
    let width = ((frame_width as f32 * scale).round() as u32).clamp(1, YOLOV8_INPUT_W);
    let height = ((frame_height as f32 * scale).round() as u32).clamp(1, YOLOV8_INPUT_H);
    Self {
      scale,
      width,
      height,
      pad_x: (YOLOV8_INPUT_W - width) / 2,
      pad_y: (YOLOV8_INPUT_H - height) / 2,
    }
  }

  /// 模型坐标映射回帧坐标
  fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_x as f32) / self.scale,
      (y - self.pad_y as f32) / self.scale,
    )
  }

  fn apply(&self, frame: &RgbFrame) -> Result<RgbImage, Yolov8Error> {
    let image = RgbImage::from_raw(frame.width(), frame.height(), frame.as_bytes().to_vec())
      .ok_or(Yolov8Error::InvalidFrame(frame.width(), frame.height()))?;
    let resized = imageops::resize(&image, self.width, self.height, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(
      YOLOV8_INPUT_W,
      YOLOV8_INPUT_H,
      Rgb([LETTERBOX_FILL; 3]),
    );
    imageops::overlay(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
    Ok(canvas)
  }
}

/// 转为归一化到 [0, 1] 的 NCHW 张量
fn preprocess(frame: &RgbFrame, letterbox: &Letterbox) -> Result<Tensor<f32>, Yolov8Error> {
  let canvas = letterbox.apply(frame)?;
  let raw = canvas.as_raw();

  let plane = (YOLOV8_INPUT_W * YOLOV8_INPUT_H) as usize;
  let mut data = vec![0f32; 3 * plane];
  for idx in 0..plane {
    data[idx] = raw[idx * 3] as f32 / 255.0;
    data[plane + idx] = raw[idx * 3 + 1] as f32 / 255.0;
    data[2 * plane + idx] = raw[idx * 3 + 2] as f32 / 255.0;
  }

  let shape = [1usize, 3, YOLOV8_INPUT_H as usize, YOLOV8_INPUT_W as usize];
  Ok(Tensor::from_array((shape, data.into_boxed_slice()))?)
}

/// 解码 `[84, N]` 输出：每列 `cx, cy, w, h` 后跟 80 个类别分数
fn postprocess(
  data: &[f32],
  num_proposals: usize,
  score_floor: f32,
  letterbox: &Letterbox,
) -> DetectResult {
  debug!("后处理模型输出");
  let mut items = Vec::new();

  for i in 0..num_proposals {
    let mut best_score = f32::MIN;
    let mut best_class = 0usize;
    for c in 0..YOLOV8_CLASS_NUM {
      let score = data[(4 + c) * num_proposals + i];
      if score > best_score {
        best_score = score;
        best_class = c;
      }
    }

    if best_score < score_floor {
      continue;
    }

    let cx = data[i];
    let cy = data[num_proposals + i];
    let w = data[2 * num_proposals + i];
    let h = data[3 * num_proposals + i];

    let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
    let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);
    items.push(DetectItem {
      class_id: best_class as u32,
      score: best_score,
      bbox: [x1, y1, x2, y2],
    });
  }

  debug!("检测到 {} 个候选框", items.len());
  DetectResult::from(items)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn synthetic_output(proposals: &[([f32; 4], usize, f32)]) -> Vec<f32> {
    let n = proposals.len();
    let mut data = vec![0f32; YOLOV8_ROW_SIZE * n];
    for (i, (bbox, class, score)) in proposals.iter().enumerate() {
      for (row, value) in bbox.iter().enumerate() {
        data[row * n + i] = *value;
      }
      data[(4 + class) * n + i] = *score;
    }
    data
  }

  #[test]
  fn letterbox_keeps_aspect_ratio() {
    let lb = Letterbox::fit(1280, 720);
    assert_eq!(lb.scale, 0.5);
    assert_eq!((lb.width, lb.height), (640, 360));
    assert_eq!((lb.pad_x, lb.pad_y), (0, 140));

    let square = Letterbox::fit(640, 640);
    assert_eq!(square.scale, 1.0);
    assert_eq!((square.pad_x, square.pad_y), (0, 0));
  }

  #[test]
  fn letterbox_pads_with_grey_around_the_frame() {
    let mut frame = RgbFrame::new(4, 2);
    for y in 0..2 {
      for x in 0..4 {
        frame.set_pixel(x, y, [255, 255, 255]);
      }
    }
    let lb = Letterbox::fit(4, 2);
    assert_eq!((lb.width, lb.height, lb.pad_y), (640, 320, 160));

    let canvas = lb.apply(&frame).unwrap();
    assert_eq!(canvas.dimensions(), (YOLOV8_INPUT_W, YOLOV8_INPUT_H));
    assert_eq!(canvas.get_pixel(0, 0).0, [LETTERBOX_FILL; 3]);
    assert_eq!(canvas.get_pixel(320, 639).0, [LETTERBOX_FILL; 3]);
    assert_eq!(canvas.get_pixel(320, 320).0, [255, 255, 255]);
  }

  #[test]
  fn postprocess_maps_boxes_back_through_letterbox() {
    let data = synthetic_output(&[([320.0, 320.0, 64.0, 128.0], 0, 0.9)]);
    let result = postprocess(&data, 1, 0.2, &Letterbox::fit(1280, 720));

    assert_eq!(result.len(), 1);
    let item = &result.items[0];
    assert_eq!(item.class_id, 0);
    assert_eq!(item.score, 0.9);
    assert_eq!(item.bbox, [576.0, 232.0, 704.0, 488.0]);
  }

  #[test]
  fn postprocess_applies_score_floor_and_best_class() {
    let data = synthetic_output(&[
      ([10.0, 10.0, 4.0, 4.0], 0, 0.1),
      ([50.0, 50.0, 4.0, 4.0], 17, 0.8),
    ]);
    let result = postprocess(&data, 2, 0.2, &Letterbox::fit(640, 640));

    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].class_id, 17);
  }

  #[test]
  fn missing_weights_file_is_an_io_error() {
    let err = Yolov8::load(Path::new("/nonexistent/yolov8n.onnx"))
      .err()
      .unwrap();
    assert!(matches!(err, ModelLoadError::Io { .. }));
  }
}
