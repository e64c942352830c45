// 该文件是 Renying （人影） 项目的一部分。
// src/pipeline.rs - 视频处理流水线
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # 视频处理流水线
//!
//! 逐帧执行 解码 -> 检测 -> 标注 -> 编码，并按帧序号报告进度。
//!
//! 打开顺序固定：先打开输入，再加载权重，两者都成功后才创建输出文件。
//! 因此权重或输入出错时不会留下任何输出文件。
//!
//! 进度在读取第 `i` 帧之前报告 `floor(i * 100 / n)`，最后一帧写出后报告 `100`。

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::RunConfig,
  frame::RgbFrame,
  input::{InputError, VideoSource, read_image_file},
  model::{DetectParams, DetectResult, LoadModel, Model, ModelLoadError, PersonDetector},
  output::{OutputError, SinkDescriptor, VideoSink, draw::Annotator, save_image_file},
};

/// 打开输入与输出的后端
pub trait MediaBackend {
  type Source: VideoSource;
  type Sink: VideoSink;

  fn open_source(&self, path: &Path) -> Result<Self::Source, InputError>;

  fn open_sink(&self, descriptor: SinkDescriptor) -> Result<Self::Sink, OutputError>;
}

/// GStreamer 文件输入与 MP4 输出
#[cfg(feature = "gstreamer_video")]
#[derive(Debug, Default, Clone, Copy)]
pub struct GStreamerBackend;

#[cfg(feature = "gstreamer_video")]
impl MediaBackend for GStreamerBackend {
  type Source = crate::input::GStreamerVideoSource;
  type Sink = crate::output::GStreamerVideoSink;

  fn open_source(&self, path: &Path) -> Result<Self::Source, InputError> {
    crate::input::GStreamerVideoSource::open(path)
  }

  fn open_sink(&self, descriptor: SinkDescriptor) -> Result<Self::Sink, OutputError> {
    crate::output::GStreamerVideoSink::open(descriptor)
  }
}

#[cfg(all(feature = "gstreamer_video", feature = "model_yolov8"))]
pub type DefaultPipeline = VideoPipeline<crate::model::Yolov8, GStreamerBackend>;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("模型权重加载失败: {0}")]
  WeightsLoadFailed(#[source] ModelLoadError),
  #[error("无法打开输入: {0}")]
  SourceOpenFailed(#[source] InputError),
  #[error("无法创建输出: {0}")]
  SinkOpenFailed(#[source] OutputError),
  #[error("读取第 {index} 帧失败: 输入提前结束 (共应有 {expected} 帧)")]
  FrameReadFailed { index: u64, expected: u64 },
  #[error("读取第 {index} 帧失败: {source}")]
  FrameDecodeFailed { index: u64, source: InputError },
  #[error("第 {index} 帧检测失败: {source}")]
  DetectFailed {
    index: u64,
    source: Box<dyn std::error::Error + Send + Sync>,
  },
  #[error("写入第 {index} 帧失败: {source}")]
  WriteFailed { index: u64, source: OutputError },
  #[error("输出文件收尾失败: {0}")]
  FinalizeFailed(#[source] OutputError),
  #[error("处理在第 {index} 帧前被取消")]
  Cancelled { index: u64 },
}

/// 错误分类，供调用方按类别处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
  WeightsLoadFailed,
  SourceOpenFailed,
  SinkOpenFailed,
  FrameReadFailed,
  DetectFailed,
  WriteFailed,
  Cancelled,
}

impl PipelineError {
  pub fn kind(&self) -> PipelineErrorKind {
    match self {
      PipelineError::WeightsLoadFailed(_) => PipelineErrorKind::WeightsLoadFailed,
      PipelineError::SourceOpenFailed(_) => PipelineErrorKind::SourceOpenFailed,
      PipelineError::SinkOpenFailed(_) => PipelineErrorKind::SinkOpenFailed,
      PipelineError::FrameReadFailed { .. } | PipelineError::FrameDecodeFailed { .. } => {
        PipelineErrorKind::FrameReadFailed
      }
      PipelineError::DetectFailed { .. } => PipelineErrorKind::DetectFailed,
      PipelineError::WriteFailed { .. } | PipelineError::FinalizeFailed(_) => {
        PipelineErrorKind::WriteFailed
      }
      PipelineError::Cancelled { .. } => PipelineErrorKind::Cancelled,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
  Opening,
  Detecting(u64),
  Writing(u64),
  Closed,
  Completed,
  Failed,
}

fn transition(state: PipelineState) {
  debug!("流水线状态: {:?}", state);
}

/// 成功运行的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
  pub output: PathBuf,
  pub frames_written: u64,
  pub detections: u64,
}

/// 协作式取消标志，只在每帧开始前检查
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// 读取第 `index` 帧之前报告的进度
pub fn progress_before(index: u64, total: u64) -> u8 {
  if total == 0 {
    return 0;
  }
  (index.saturating_mul(100) / total).min(100) as u8
}

/// 人物检测视频流水线
///
/// `M` 为检测模型，每次运行从权重文件重新加载；`B` 负责打开输入与输出。
pub struct VideoPipeline<M, B> {
  backend: B,
  annotator: Annotator,
  params: DetectParams,
  cancel: CancelFlag,
  _model: PhantomData<fn() -> M>,
}

impl<M, B> VideoPipeline<M, B> {
  pub fn new(backend: B) -> Self {
    Self {
      backend,
      annotator: Annotator::default(),
      params: DetectParams::PERSON,
      cancel: CancelFlag::new(),
      _model: PhantomData,
    }
  }

  pub fn with_annotator(mut self, annotator: Annotator) -> Self {
    self.annotator = annotator;
    self
  }

  pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
    self.cancel = cancel;
    self
  }
}

impl<M, B> VideoPipeline<M, B>
where
  M: LoadModel + Model<Input = RgbFrame, Output = DetectResult>,
  M::Error: std::error::Error + Send + Sync + 'static,
  B: MediaBackend,
{
  /// 处理整段视频，成功时输出文件已完整写出
  pub fn process(
    &self,
    config: &RunConfig,
    mut on_progress: impl FnMut(u8),
  ) -> Result<RunSummary, PipelineError> {
    info!(
      "开始处理: {} -> {} (权重: {})",
      config.input().display(),
      config.output().display(),
      config.weights().display()
    );
    let result = self.run_video(config, &mut on_progress);
    finish_state(&result);
    result
  }

  fn run_video(
    &self,
    config: &RunConfig,
    on_progress: &mut impl FnMut(u8),
  ) -> Result<RunSummary, PipelineError> {
    transition(PipelineState::Opening);
    let source = self.backend.open_source(config.input());
    let detector =
      PersonDetector::<M>::load(config.weights()).map_err(PipelineError::WeightsLoadFailed)?;
    let mut source = source.map_err(PipelineError::SourceOpenFailed)?;

    let descriptor = SinkDescriptor::matching(source.descriptor(), config.output());
    let mut sink = self
      .backend
      .open_sink(descriptor)
      .map_err(PipelineError::SinkOpenFailed)?;

    let expected = source.descriptor().frame_count;
    info!("共 {} 帧待处理", expected);

    let mut detections = 0u64;
    for index in 0..expected {
      if self.cancel.is_cancelled() {
        warn!("收到取消请求, 停止于第 {} 帧", index);
        return Err(PipelineError::Cancelled { index });
      }
      on_progress(progress_before(index, expected));

      transition(PipelineState::Detecting(index));
      let mut frame = match source.read_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(PipelineError::FrameReadFailed { index, expected }),
        Err(e) => return Err(PipelineError::FrameDecodeFailed { index, source: e }),
      };
      let found = detector
        .detect(&frame, &self.params)
        .map_err(|e| PipelineError::DetectFailed {
          index,
          source: Box::new(e),
        })?;
      debug!("第 {} 帧检测到 {} 人", index, found.len());
      detections += found.len() as u64;
      self.annotator.annotate(&mut frame, &found);

      transition(PipelineState::Writing(index));
      sink
        .write_frame(&frame)
        .map_err(|source| PipelineError::WriteFailed { index, source })?;
      if index + 1 == expected {
        on_progress(100);
      }
    }

    let frames_written = sink.finish().map_err(PipelineError::FinalizeFailed)?;
    drop(source);
    transition(PipelineState::Closed);
    if expected == 0 {
      on_progress(100);
    }

    Ok(RunSummary {
      output: config.output().to_path_buf(),
      frames_written,
      detections,
    })
  }

  /// 处理单张图片，进度只有 `0` 与 `100`
  pub fn annotate_image(
    &self,
    config: &RunConfig,
    mut on_progress: impl FnMut(u8),
  ) -> Result<RunSummary, PipelineError> {
    info!(
      "开始处理图片: {} -> {}",
      config.input().display(),
      config.output().display()
    );
    let result = self.run_image(config, &mut on_progress);
    finish_state(&result);
    result
  }

  fn run_image(
    &self,
    config: &RunConfig,
    on_progress: &mut impl FnMut(u8),
  ) -> Result<RunSummary, PipelineError> {
    transition(PipelineState::Opening);
    let image = read_image_file(config.input());
    let detector =
      PersonDetector::<M>::load(config.weights()).map_err(PipelineError::WeightsLoadFailed)?;
    let mut frame = image.map_err(PipelineError::SourceOpenFailed)?;

    if self.cancel.is_cancelled() {
      return Err(PipelineError::Cancelled { index: 0 });
    }
    on_progress(0);

    transition(PipelineState::Detecting(0));
    let found = detector
      .detect(&frame, &self.params)
      .map_err(|e| PipelineError::DetectFailed {
        index: 0,
        source: Box::new(e),
      })?;
    self.annotator.annotate(&mut frame, &found);

    transition(PipelineState::Writing(0));
    save_image_file(config.output(), &frame).map_err(PipelineError::FinalizeFailed)?;
    transition(PipelineState::Closed);
    on_progress(100);

    Ok(RunSummary {
      output: config.output().to_path_buf(),
      frames_written: 1,
      detections: found.len() as u64,
    })
  }
}

fn finish_state(result: &Result<RunSummary, PipelineError>) {
  match result {
    Ok(summary) => {
      transition(PipelineState::Completed);
      info!(
        "处理完成: {} 帧, {} 个检测, 输出 {}",
        summary.frames_written,
        summary.detections,
        summary.output.display()
      );
    }
    Err(e) => {
      transition(PipelineState::Failed);
      error!("处理失败: {}", e);
    }
  }
}
