// 该文件是 Renying （人影） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::frame::RgbFrame;

mod image_file;
pub use self::image_file::{is_image_path, read_image_file};

#[cfg(feature = "gstreamer_video")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_video")]
pub use self::gstreamer_input::{GStreamerInputError, GStreamerVideoSource};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "gstreamer_video")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("无法打开输入源 {}: {reason}", .path.display())]
  OpenFailed { path: PathBuf, reason: String },
  #[error("解码失败: {0}")]
  DecodeFailed(String),
}

/// 精确的有理数帧率
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
  pub numerator: i32,
  pub denominator: i32,
}

impl FrameRate {
  pub const fn new(numerator: i32, denominator: i32) -> Self {
    Self {
      numerator,
      denominator,
    }
  }
}

impl fmt::Display for FrameRate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.numerator, self.denominator)
  }
}

/// 打开输入时从容器读取的属性，运行期间不可变
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
  pub path: PathBuf,
  pub frame_count: u64,
  pub frame_rate: FrameRate,
  pub width: u32,
  pub height: u32,
}

/// 视频输入源
pub trait VideoSource {
  fn descriptor(&self) -> &SourceDescriptor;

  /// 读取下一帧；`Ok(None)` 表示流已结束
  fn read_frame(&mut self) -> Result<Option<RgbFrame>, InputError>;
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
  fn descriptor(&self) -> &SourceDescriptor {
    (**self).descriptor()
  }

  fn read_frame(&mut self) -> Result<Option<RgbFrame>, InputError> {
    (**self).read_frame()
  }
}

/// 由帧时长推算帧数，四舍五入
pub fn estimate_frame_count(duration_ns: u64, frame_rate: FrameRate) -> u64 {
  if frame_rate.numerator <= 0 || frame_rate.denominator <= 0 {
    return 0;
  }
  let num = duration_ns as u128 * frame_rate.numerator as u128;
  let den = 1_000_000_000u128 * frame_rate.denominator as u128;
  ((num + den / 2) / den) as u64
}

/// 确定视频流的帧数
///
/// 优先使用视频分支直接报告的帧数，其次用视频流时长按帧率推算。
/// 两者都不可用时返回 `None`，调用方应视为无法打开。
pub fn resolve_frame_count(
  stream_frames: Option<u64>,
  stream_duration_ns: Option<u64>,
  frame_rate: FrameRate,
) -> Option<u64> {
  if let Some(frames) = stream_frames.filter(|&n| n > 0) {
    return Some(frames);
  }
  if frame_rate.numerator <= 0 || frame_rate.denominator <= 0 {
    return None;
  }
  stream_duration_ns.map(|duration| estimate_frame_count(duration, frame_rate))
}

pub(crate) fn open_failed(path: &Path, reason: impl Into<String>) -> InputError {
  InputError::OpenFailed {
    path: path.to_path_buf(),
    reason: reason.into(),
  }
}
