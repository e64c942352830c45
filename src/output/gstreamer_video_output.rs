// 该文件是 Renying （人影） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频文件输出
//!
//! 将标注后的帧编码为 MP4 文件。编码格式由 [`FourCc`] 决定，
//! 当前支持 `mp4v`（MPEG-4 Part 2，经 `avenc_mpeg4`）。
//!
//! 帧率与尺寸取自 [`SinkDescriptor`]，与输入视频一致。
//! 只有调用 [`VideoSink::finish`] 后文件才会写入 moov 信息，
//! 直接丢弃的输出文件不可播放。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{RGB_CHANNELS, RgbFrame},
  output::{FourCc, OutputError, SinkDescriptor, VideoSink},
};

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
  /// 推送缓冲区失败
  #[error("Failed to push buffer: {0}")]
  FlowError(#[from] gst::FlowError),
}

fn encoder_chain(codec: FourCc) -> Option<&'static str> {
  match &codec.0 {
    b"mp4v" => Some("avenc_mpeg4 ! mp4mux"),
    _ => None,
  }
}

/// 基于 GStreamer appsrc 的视频文件输出
pub struct GStreamerVideoSink {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  info: gst_video::VideoInfo,
  descriptor: SinkDescriptor,
  frame_count: u64,
  finished: bool,
}

impl GStreamerVideoSink {
  pub fn open(descriptor: SinkDescriptor) -> Result<Self, OutputError> {
    let chain =
      encoder_chain(descriptor.codec).ok_or(OutputError::UnsupportedCodec(descriptor.codec))?;

    gst::init().map_err(GStreamerVideoOutputError::from)?;

    if let Some(parent) = descriptor.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let rate = descriptor.frame_rate;
    let info = gst_video::VideoInfo::builder(
      gst_video::VideoFormat::Rgb,
      descriptor.width,
      descriptor.height,
    )
    .fps(gst::Fraction::new(rate.numerator, rate.denominator))
    .build()
    .map_err(GStreamerVideoOutputError::from)?;

    let pipeline_desc = format!(
      "appsrc name=src ! videoconvert ! {} ! filesink location=\"{}\"",
      chain,
      escape_location(&descriptor.path)
    );
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)
      .map_err(GStreamerVideoOutputError::from)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcNotFound)?;

    let caps = info.to_caps().map_err(GStreamerVideoOutputError::from)?;
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_block(true);

    let sink = GStreamerVideoSink {
      pipeline,
      appsrc,
      info,
      descriptor,
      frame_count: 0,
      finished: false,
    };

    sink
      .pipeline
      .set_state(gst::State::Playing)
      .map_err(GStreamerVideoOutputError::from)?;

    info!(
      "Video output initialized: {}x{} @ {} fps ({}) -> {}",
      sink.descriptor.width,
      sink.descriptor.height,
      sink.descriptor.frame_rate,
      sink.descriptor.codec,
      sink.descriptor.path.display()
    );

    Ok(sink)
  }

  fn frame_timing(&self, index: u64) -> (gst::ClockTime, gst::ClockTime) {
    let rate = self.descriptor.frame_rate;
    let num = rate.numerator.max(1) as u64;
    let den = rate.denominator.max(1) as u64;
    let pts = index * den * 1_000_000_000 / num;
    let next = (index + 1) * den * 1_000_000_000 / num;
    (
      gst::ClockTime::from_nseconds(pts),
      gst::ClockTime::from_nseconds(next - pts),
    )
  }

  fn push_frame(&mut self, frame: &RgbFrame) -> Result<(), GStreamerVideoOutputError> {
    let stride = self.info.stride()[0] as usize;
    let row = self.descriptor.width as usize * RGB_CHANNELS;
    let mut buffer = gst::Buffer::with_size(self.info.size())
      .map_err(|_| GStreamerVideoOutputError::BufferCreationError)?;

    let (pts, duration) = self.frame_timing(self.frame_count);
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(pts);
      buffer_ref.set_duration(duration);

      let mut map = buffer_ref.map_writable().map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to map buffer".to_string())
      })?;
      // appsrc 的 RGB 行按 4 字节对齐
      for (y, src) in frame.as_bytes().chunks_exact(row).enumerate() {
        let start = y * stride;
        map[start..start + row].copy_from_slice(src);
      }
    }

    self.appsrc.push_buffer(buffer)?;
    self.frame_count += 1;
    Ok(())
  }

  fn wait_for_eos(&self) -> Result<(), GStreamerVideoOutputError> {
    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("Pipeline has no bus".to_string()))?;
    let msg = bus.timed_pop_filtered(
      gst::ClockTime::NONE,
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );
    match msg.as_ref().map(|m| m.view()) {
      Some(gst::MessageView::Eos(..)) => Ok(()),
      Some(gst::MessageView::Error(err)) => {
        error!("编码管道错误: {}", err.error());
        Err(GStreamerVideoOutputError::PipelineError(
          err.error().to_string(),
        ))
      }
      _ => Err(GStreamerVideoOutputError::PipelineError(
        "Bus closed before EOS".to_string(),
      )),
    }
  }
}

impl VideoSink for GStreamerVideoSink {
  fn descriptor(&self) -> &SinkDescriptor {
    &self.descriptor
  }

  fn write_frame(&mut self, frame: &RgbFrame) -> Result<(), OutputError> {
    self.descriptor.check_frame(frame)?;
    self.push_frame(frame)?;
    debug!("已写入第 {} 帧", self.frame_count);
    Ok(())
  }

  fn finish(mut self) -> Result<u64, OutputError> {
    self.finished = true;
    self
      .appsrc
      .end_of_stream()
      .map_err(GStreamerVideoOutputError::from)?;
    self.wait_for_eos()?;
    info!(
      "视频已保存到文件: {}, 共 {} 帧",
      self.descriptor.path.display(),
      self.frame_count
    );
    Ok(self.frame_count)
  }
}

impl Drop for GStreamerVideoSink {
  fn drop(&mut self) {
    if !self.finished {
      warn!(
        "视频输出未完成即被释放, 文件内容不完整: {}",
        self.descriptor.path.display()
      );
    }
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }
  }
}

fn escape_location(path: &Path) -> String {
  path
    .to_string_lossy()
    .replace('\\', "\\\\")
    .replace('"', "\\\"")
}
