// 该文件是 Renying （人影） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::{
  frame::RgbFrame,
  input::{FrameRate, SourceDescriptor},
};

pub mod draw;

mod save_image_file;
pub use self::save_image_file::save_image_file;

#[cfg(feature = "gstreamer_video")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_video")]
pub use self::gstreamer_video_output::{GStreamerVideoOutputError, GStreamerVideoSink};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "gstreamer_video")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("不支持的编码格式: {0}")]
  UnsupportedCodec(FourCc),
  #[error("编码错误: {0}")]
  EncodingError(String),
}

/// 四字符编码标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
  /// MPEG-4 Part 2
  pub const MP4V: FourCc = FourCc(*b"mp4v");
}

impl fmt::Display for FourCc {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in self.0 {
      write!(f, "{}", b as char)?;
    }
    Ok(())
  }
}

/// 输出视频属性，帧率与尺寸来自输入源
#[derive(Debug, Clone, PartialEq)]
pub struct SinkDescriptor {
  pub path: PathBuf,
  pub frame_rate: FrameRate,
  pub width: u32,
  pub height: u32,
  pub codec: FourCc,
}

impl SinkDescriptor {
  pub fn matching(source: &SourceDescriptor, path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      frame_rate: source.frame_rate,
      width: source.width,
      height: source.height,
      codec: FourCc::MP4V,
    }
  }

  pub fn check_frame(&self, frame: &RgbFrame) -> Result<(), OutputError> {
    if frame.dimensions() != (self.width, self.height) {
      return Err(OutputError::FrameSizeMismatch {
        expected: (self.width, self.height),
        actual: frame.dimensions(),
      });
    }
    Ok(())
  }
}

/// 视频输出
pub trait VideoSink {
  fn descriptor(&self) -> &SinkDescriptor;

  fn write_frame(&mut self, frame: &RgbFrame) -> Result<(), OutputError>;

  /// 完成编码并关闭文件，返回写入的帧数
  ///
  /// 未调用 `finish` 而直接丢弃的输出内容视为不完整。
  fn finish(self) -> Result<u64, OutputError>
  where
    Self: Sized;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sink_copies_source_geometry_and_rate() {
    let source = SourceDescriptor {
      path: "in.mp4".into(),
      frame_count: 42,
      frame_rate: FrameRate::new(30000, 1001),
      width: 1280,
      height: 720,
    };
    let sink = SinkDescriptor::matching(&source, "out.mp4");
    assert_eq!(sink.frame_rate, source.frame_rate);
    assert_eq!((sink.width, sink.height), (1280, 720));
    assert_eq!(sink.codec, FourCc::MP4V);
    assert_eq!(sink.path, PathBuf::from("out.mp4"));
  }

  #[test]
  fn fourcc_displays_as_tag() {
    assert_eq!(FourCc::MP4V.to_string(), "mp4v");
  }

  #[test]
  fn check_frame_rejects_other_sizes() {
    let sink = SinkDescriptor {
      path: "out.mp4".into(),
      frame_rate: FrameRate::new(25, 1),
      width: 4,
      height: 4,
      codec: FourCc::MP4V,
    };
    assert!(sink.check_frame(&RgbFrame::new(4, 4)).is_ok());
    assert!(matches!(
      sink.check_frame(&RgbFrame::new(4, 5)),
      Err(OutputError::FrameSizeMismatch { .. })
    ));
  }
}
