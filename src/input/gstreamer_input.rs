// 该文件是 Renying （人影） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频文件输入
//!
//! 通过 `decodebin` 解码任意 GStreamer 支持的容器，统一转换为紧密排列的 RGB 帧。
//!
//! 打开时管道先进入 `PAUSED` 完成预滚，以便在读取第一帧之前拿到
//! 宽高、帧率和视频流长度。帧数取自视频分支，缺失时由视频流时长与帧率推算。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{RGB_CHANNELS, RgbFrame},
  input::{FrameRate, InputError, SourceDescriptor, VideoSource, open_failed, resolve_frame_count},
};

// 预滚最长等待时间
const PREROLL_TIMEOUT_SECS: u64 = 10;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

/// 基于 GStreamer 的视频文件输入源
pub struct GStreamerVideoSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  descriptor: SourceDescriptor,
  frames_read: u64,
}

impl GStreamerVideoSource {
  pub fn open(path: &Path) -> Result<Self, InputError> {
    if !path.is_file() {
      return Err(open_failed(path, "文件不存在"));
    }

    gst::init().map_err(GStreamerInputError::from)?;

    let pipeline_desc = format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4 drop=false",
      escape_location(path)
    );
    info!("GStreamer pipeline description: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)
      .map_err(GStreamerInputError::from)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkNotFound)?;

    // 从此处起 pipeline 由 source 持有，出错时 Drop 负责回到 NULL
    let mut source = Self {
      pipeline,
      appsink,
      descriptor: SourceDescriptor {
        path: path.to_path_buf(),
        frame_count: 0,
        frame_rate: FrameRate::new(0, 1),
        width: 0,
        height: 0,
      },
      frames_read: 0,
    };

    source.preroll(path)?;
    Ok(source)
  }

  fn preroll(&mut self, path: &Path) -> Result<(), InputError> {
    self
      .pipeline
      .set_state(gst::State::Paused)
      .map_err(|e| open_failed(path, format!("无法进入 PAUSED 状态: {}", e)))?;

    let (result, _, _) = self
      .pipeline
      .state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
    if let Err(e) = result {
      let reason = self
        .bus_error()
        .unwrap_or_else(|| format!("预滚失败: {}", e));
      error!("无法打开视频 {}: {}", path.display(), reason);
      return Err(open_failed(path, reason));
    }

    let sample = self
      .appsink
      .pull_preroll()
      .map_err(|e| open_failed(path, format!("无法获取预滚帧: {}", e)))?;
    let caps = sample
      .caps()
      .ok_or_else(|| open_failed(path, "预滚帧缺少 caps"))?;
    let info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    let fps = info.fps();
    let frame_rate = FrameRate::new(fps.numer(), fps.denom());

    // 只看视频分支，容器时长可能包含更长的音轨
    let pad = self
      .appsink
      .static_pad("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?;
    let stream_frames = pad
      .peer_query_duration::<gst::format::Default>()
      .map(|frames| *frames);
    let stream_duration = pad
      .peer_query_duration::<gst::ClockTime>()
      .map(|d| d.nseconds());
    debug!(
      "视频流长度: {:?} 帧, {:?} ns",
      stream_frames, stream_duration
    );
    let frame_count = resolve_frame_count(stream_frames, stream_duration, frame_rate)
      .ok_or_else(|| open_failed(path, "无法确定视频流长度"))?;

    self.descriptor.width = info.width();
    self.descriptor.height = info.height();
    self.descriptor.frame_rate = frame_rate;
    self.descriptor.frame_count = frame_count;

    info!(
      "输入源已打开: {}x{} @ {} fps, 共 {} 帧",
      self.descriptor.width,
      self.descriptor.height,
      frame_rate,
      self.descriptor.frame_count
    );

    self
      .pipeline
      .set_state(gst::State::Playing)
      .map_err(GStreamerInputError::from)?;
    Ok(())
  }

  fn bus_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
      gst::MessageView::Error(err) => Some(err.error().to_string()),
      _ => None,
    }
  }
}

impl Drop for GStreamerVideoSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
    debug!("输入源已释放, 共读取 {} 帧", self.frames_read);
  }
}

impl VideoSource for GStreamerVideoSource {
  fn descriptor(&self) -> &SourceDescriptor {
    &self.descriptor
  }

  fn read_frame(&mut self) -> Result<Option<RgbFrame>, InputError> {
    match self.appsink.pull_sample() {
      Ok(sample) => {
        let frame = convert_sample(&sample)?;
        self.frames_read += 1;
        Ok(Some(frame))
      }
      Err(_) if self.appsink.is_eos() => Ok(None),
      Err(e) => {
        let reason = self.bus_error().unwrap_or_else(|| e.to_string());
        Err(InputError::DecodeFailed(reason))
      }
    }
  }
}

/// 去掉 appsink 缓冲区的行填充
fn convert_sample(sample: &gst::Sample) -> Result<RgbFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
  let info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = info.width() as usize;
  let height = info.height() as usize;
  let stride = info.stride()[0] as usize;
  let row = width * RGB_CHANNELS;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected = stride * (height.saturating_sub(1)) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut packed = Vec::with_capacity(row * height);
  for y in 0..height {
    let start = y * stride;
    packed.extend_from_slice(&data[start..start + row]);
  }

  RgbFrame::from_raw(width as u32, height as u32, packed).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row * height,
      actual: data.len(),
    },
  )
}

fn escape_location(path: &Path) -> String {
  path
    .to_string_lossy()
    .replace('\\', "\\\\")
    .replace('"', "\\\"")
}
