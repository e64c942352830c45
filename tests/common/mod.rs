// 该文件是 Renying （人影） 项目的一部分。
// tests/common/mod.rs - 集成测试用的内存输入输出与桩模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use renying::{
  config::RunConfig,
  frame::RgbFrame,
  input::{FrameRate, InputError, SourceDescriptor, VideoSource},
  model::{DetectItem, DetectResult, LoadModel, Model, ModelLoadError},
  output::{OutputError, SinkDescriptor, VideoSink},
  pipeline::MediaBackend,
};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 64;
pub const STUB_WEIGHTS: &[u8] = b"stub-yolov8-weights";

/// 每帧右下角像素记录帧序号，不会被标注覆盖
pub const MARKER: (u32, u32) = (WIDTH - 1, HEIGHT - 1);

pub fn marker_of(index: u64) -> [u8; 3] {
  [index as u8, 7, 9]
}

pub fn source_frame(index: u64) -> RgbFrame {
  let mut frame = RgbFrame::new(WIDTH, HEIGHT);
  frame.set_pixel(MARKER.0, MARKER.1, marker_of(index));
  frame
}

/// 输出端观察到的内容
#[derive(Debug, Default)]
pub struct SinkLog {
  pub opened: Option<SinkDescriptor>,
  pub frames: Vec<RgbFrame>,
  pub finished: bool,
}

#[derive(Clone)]
pub struct MemoryBackend {
  /// 容器声明的帧数
  pub declared: u64,
  /// 实际能读出的帧数
  pub available: u64,
  pub decode_error_at: Option<u64>,
  pub frame_rate: FrameRate,
  pub log: Arc<Mutex<SinkLog>>,
}

impl MemoryBackend {
  pub fn with_frames(count: u64) -> Self {
    Self {
      declared: count,
      available: count,
      decode_error_at: None,
      frame_rate: FrameRate::new(30000, 1001),
      log: Arc::default(),
    }
  }

  pub fn truncated(declared: u64, available: u64) -> Self {
    Self {
      available,
      ..Self::with_frames(declared)
    }
  }

  pub fn written(&self) -> Vec<RgbFrame> {
    self.log.lock().unwrap().frames.clone()
  }

  pub fn sink_opened(&self) -> bool {
    self.log.lock().unwrap().opened.is_some()
  }

  pub fn finished(&self) -> bool {
    self.log.lock().unwrap().finished
  }
}

pub struct MemorySource {
  descriptor: SourceDescriptor,
  available: u64,
  decode_error_at: Option<u64>,
  next: u64,
}

impl VideoSource for MemorySource {
  fn descriptor(&self) -> &SourceDescriptor {
    &self.descriptor
  }

  fn read_frame(&mut self) -> Result<Option<RgbFrame>, InputError> {
    if self.decode_error_at == Some(self.next) {
      return Err(InputError::DecodeFailed(format!("corrupt frame {}", self.next)));
    }
    if self.next >= self.available {
      return Ok(None);
    }
    let frame = source_frame(self.next);
    self.next += 1;
    Ok(Some(frame))
  }
}

pub struct MemorySink {
  descriptor: SinkDescriptor,
  log: Arc<Mutex<SinkLog>>,
}

impl VideoSink for MemorySink {
  fn descriptor(&self) -> &SinkDescriptor {
    &self.descriptor
  }

  fn write_frame(&mut self, frame: &RgbFrame) -> Result<(), OutputError> {
    self.descriptor.check_frame(frame)?;
    self.log.lock().unwrap().frames.push(frame.clone());
    Ok(())
  }

  fn finish(self) -> Result<u64, OutputError> {
    let mut log = self.log.lock().unwrap();
    log.finished = true;
    Ok(log.frames.len() as u64)
  }
}

impl MediaBackend for MemoryBackend {
  type Source = MemorySource;
  type Sink = MemorySink;

  fn open_source(&self, path: &Path) -> Result<Self::Source, InputError> {
    if !path.is_file() {
      return Err(InputError::OpenFailed {
        path: path.to_path_buf(),
        reason: "文件不存在".to_string(),
      });
    }
    Ok(MemorySource {
      descriptor: SourceDescriptor {
        path: path.to_path_buf(),
        frame_count: self.declared,
        frame_rate: self.frame_rate,
        width: WIDTH,
        height: HEIGHT,
      },
      available: self.available,
      decode_error_at: self.decode_error_at,
      next: 0,
    })
  }

  fn open_sink(&self, descriptor: SinkDescriptor) -> Result<Self::Sink, OutputError> {
    std::fs::write(&descriptor.path, b"")?;
    self.log.lock().unwrap().opened = Some(descriptor.clone());
    Ok(MemorySink {
      descriptor,
      log: self.log.clone(),
    })
  }
}

#[derive(Debug, thiserror::Error)]
#[error("stub inference failed")]
pub struct StubError;

/// 只接受内容为 [`STUB_WEIGHTS`] 的权重文件，每帧返回固定候选框
pub struct StubModel;

impl StubModel {
  /// 过滤后唯一保留的检测
  pub const PERSON_BOX: [f32; 4] = [10.0, 10.0, 50.0, 50.0];
  pub const PERSON_SCORE: f32 = 0.9;
}

impl Model for StubModel {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = StubError;

  fn infer(&self, _input: &RgbFrame) -> Result<DetectResult, StubError> {
    Ok(DetectResult::from(vec![
      // 非人物类别
      DetectItem {
        class_id: 2,
        score: 0.95,
        bbox: [0.0, 0.0, 20.0, 20.0],
      },
      DetectItem {
        class_id: 0,
        score: Self::PERSON_SCORE,
        bbox: Self::PERSON_BOX,
      },
      // 与上一个框高度重叠，被 NMS 抑制
      DetectItem {
        class_id: 0,
        score: 0.85,
        bbox: [12.0, 12.0, 50.0, 50.0],
      },
      // 低于置信度阈值
      DetectItem {
        class_id: 0,
        score: 0.1,
        bbox: [40.0, 2.0, 44.0, 6.0],
      },
    ]))
  }
}

impl LoadModel for StubModel {
  fn load(path: &Path) -> Result<Self, ModelLoadError> {
    let data = std::fs::read(path).map_err(|source| ModelLoadError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    if data != STUB_WEIGHTS {
      return Err(ModelLoadError::Invalid {
        path: path.to_path_buf(),
        reason: "不是 YOLOv8 权重".to_string(),
      });
    }
    Ok(StubModel)
  }
}

/// 临时目录中的一组运行文件
pub struct Workspace {
  pub dir: tempfile::TempDir,
}

impl Workspace {
  pub fn new() -> Self {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("weights.onnx"), STUB_WEIGHTS).unwrap();
    std::fs::write(dir.path().join("in.mp4"), b"video").unwrap();
    Self { dir }
  }

  pub fn path(&self, name: &str) -> PathBuf {
    self.dir.path().join(name)
  }

  pub fn config(&self) -> RunConfig {
    RunConfig::new(
      self.path("weights.onnx"),
      self.path("in.mp4"),
      self.path("out.mp4"),
    )
  }
}
