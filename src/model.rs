// 该文件是 Renying （人影） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use thiserror::Error;

/// COCO 中 "person" 的类别编号
pub const PERSON_CLASS_ID: u32 = 0;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 可从权重文件加载的模型
pub trait LoadModel: Model + Sized {
  fn load(path: &Path) -> Result<Self, ModelLoadError>;
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型文件不存在: {}", .0.display())]
  NotFound(PathBuf),
  #[error("模型文件读取失败: {}, 错误: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("模型无效: {}, 错误: {reason}", .path.display())]
  Invalid { path: PathBuf, reason: String },
}

/// 模型输出的原始候选框（像素坐标）
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 像素坐标边界框，保证 `x1 <= x2`、`y1 <= y2`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
  x1: f32,
  y1: f32,
  x2: f32,
  y2: f32,
}

impl BBox {
  /// 角点顺序任意，构造时归一化
  pub fn new(xa: f32, ya: f32, xb: f32, yb: f32) -> Self {
    Self {
      x1: xa.min(xb),
      y1: ya.min(yb),
      x2: xa.max(xb),
      y2: ya.max(yb),
    }
  }

  pub fn x1(&self) -> f32 {
    self.x1
  }

  pub fn y1(&self) -> f32 {
    self.y1
  }

  pub fn x2(&self) -> f32 {
    self.x2
  }

  pub fn y2(&self) -> f32 {
    self.y2
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn clamp_to(&self, width: f32, height: f32) -> Self {
    Self {
      x1: self.x1.clamp(0.0, width),
      y1: self.y1.clamp(0.0, height),
      x2: self.x2.clamp(0.0, width),
      y2: self.y2.clamp(0.0, height),
    }
  }

  /// 计算两个边界框的 IoU
  pub fn iou(&self, other: &BBox) -> f32 {
    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2.min(other.x2);
    let y2 = self.y2.min(other.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

/// 单个人物检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: BBox,
  pub confidence: f32,
}

/// 检测参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
  /// 置信度阈值
  pub confidence: f32,
  /// NMS IoU 阈值
  pub iou: f32,
  /// 保留的类别
  pub classes: &'static [u32],
}

impl DetectParams {
  /// 视频处理固定使用的参数
  pub const PERSON: DetectParams = DetectParams {
    confidence: 0.2,
    iou: 0.7,
    classes: &[PERSON_CLASS_ID],
  };
}

impl Default for DetectParams {
  fn default() -> Self {
    Self::PERSON
  }
}

mod detector;
pub use self::detector::PersonDetector;

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{Yolov8, Yolov8Error};
