// 该文件是 Renying （人影） 项目的一部分。
// src/model/detector.rs - 人物检测器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use tracing::{debug, info};

use crate::{
  frame::RgbFrame,
  model::{BBox, DetectParams, DetectResult, Detection, LoadModel, Model, ModelLoadError},
};

/// 在任意检测模型外包装类别过滤、置信度过滤与 NMS
///
/// 检测器本身不保存帧间状态，同一权重下可跨帧、跨运行复用。
pub struct PersonDetector<M> {
  model: M,
}

impl<M> PersonDetector<M>
where
  M: Model<Input = RgbFrame, Output = DetectResult>,
{
  pub fn new(model: M) -> Self {
    Self { model }
  }

  /// 运行推理并返回经过过滤的检测结果，按置信度降序排列
  pub fn detect(
    &self,
    frame: &RgbFrame,
    params: &DetectParams,
  ) -> Result<Vec<Detection>, M::Error> {
    let raw = self.model.infer(frame)?;
    if raw.is_empty() {
      return Ok(Vec::new());
    }
    debug!("模型输出 {} 个候选框", raw.len());
    Ok(postprocess(
      &raw,
      params,
      frame.width() as f32,
      frame.height() as f32,
    ))
  }
}

impl<M> PersonDetector<M>
where
  M: LoadModel + Model<Input = RgbFrame, Output = DetectResult>,
{
  pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
    info!("加载模型权重: {}", path.display());
    if !path.exists() {
      return Err(ModelLoadError::NotFound(path.to_path_buf()));
    }
    let model = M::load(path)?;
    info!("模型加载完成");
    Ok(Self::new(model))
  }
}

/// 类别过滤、置信度过滤、坐标归一化与裁剪，最后做 NMS
pub fn postprocess(
  raw: &DetectResult,
  params: &DetectParams,
  frame_width: f32,
  frame_height: f32,
) -> Vec<Detection> {
  let candidates = raw
    .items
    .iter()
    .filter(|item| params.classes.contains(&item.class_id))
    .filter(|item| item.score.is_finite() && item.score >= params.confidence)
    .map(|item| {
      let [xa, ya, xb, yb] = item.bbox;
      Detection {
        bbox: BBox::new(xa, ya, xb, yb).clamp_to(frame_width, frame_height),
        confidence: item.score.min(1.0),
      }
    })
    .collect();

  nms(candidates, params.iou)
}

/// 非极大值抑制
///
/// 与已保留框的 IoU 大于阈值的候选框被抑制。排序是稳定的，
/// 同分候选按模型输出顺序处理。
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  // 按置信度降序排序
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut result: Vec<Detection> = Vec::with_capacity(detections.len());
  for det in detections {
    if result
      .iter()
      .all(|kept| kept.bbox.iou(&det.bbox) <= iou_threshold)
    {
      result.push(det);
    }
  }

  result
}
