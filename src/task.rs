// 该文件是 Renying （人影） 项目的一部分。
// src/task.rs - 后台任务
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

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  config::RunConfig,
  frame::RgbFrame,
  model::{DetectResult, LoadModel, Model},
  pipeline::{MediaBackend, PipelineError, RunSummary, VideoPipeline},
};

/// 后台任务发往调用方的消息
#[derive(Debug)]
pub enum RunEvent {
  Progress(u8),
  /// 每次运行恰好一条，且总是最后一条
  Done(Result<RunSummary, RunError>),
}

#[derive(Error, Debug)]
pub enum RunError {
  #[error("{0}")]
  Pipeline(#[from] PipelineError),
  #[error("后台任务异常终止: {0}")]
  Panicked(String),
  #[error("后台任务未返回结果即退出")]
  Disconnected,
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("已有任务正在运行")]
  Busy,
  #[error("无法创建后台线程: {0}")]
  SpawnFailed(#[from] std::io::Error),
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// 在后台线程运行处理任务，同一时间最多一个
#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
  busy: Arc<AtomicBool>,
}

impl TaskRunner {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::SeqCst)
  }

  /// 在后台处理视频
  pub fn start<M, B>(
    &self,
    pipeline: VideoPipeline<M, B>,
    config: RunConfig,
  ) -> Result<RunHandle, TaskError>
  where
    M: LoadModel + Model<Input = RgbFrame, Output = DetectResult> + 'static,
    M::Error: std::error::Error + Send + Sync + 'static,
    B: MediaBackend + Send + 'static,
  {
    self.start_job(move |progress| pipeline.process(&config, progress))
  }

  /// 在后台运行任意任务，事件协议与 [`TaskRunner::start`] 相同
  pub fn start_job<F>(&self, job: F) -> Result<RunHandle, TaskError>
  where
    F: FnOnce(&mut dyn FnMut(u8)) -> Result<RunSummary, PipelineError> + Send + 'static,
  {
    if self
      .busy
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      warn!("已有任务正在运行, 拒绝新的任务");
      return Err(TaskError::Busy);
    }
    let guard = BusyGuard(self.busy.clone());

    let (tx, rx) = mpsc::channel();
    let thread = thread::Builder::new()
      .name("renying-worker".to_string())
      .spawn(move || {
        let progress_tx = tx.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
          let mut report = |value: u8| {
            // 接收端已关闭时丢弃进度
            let _ = progress_tx.send(RunEvent::Progress(value));
          };
          job(&mut report)
        }));

        let outcome = match outcome {
          Ok(result) => result.map_err(RunError::from),
          Err(payload) => Err(RunError::Panicked(panic_message(payload.as_ref()))),
        };
        // 先释放忙标志，调用方收到 Done 后即可开始下一次运行
        drop(guard);
        if tx.send(RunEvent::Done(outcome)).is_err() {
          warn!("任务结果无人接收");
        }
      })?;

    info!("后台任务已启动");
    Ok(RunHandle {
      events: rx,
      thread: Some(thread),
    })
  }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "未知错误".to_string()
  }
}

/// 一次后台运行的事件接收端
pub struct RunHandle {
  events: Receiver<RunEvent>,
  thread: Option<JoinHandle<()>>,
}

impl RunHandle {
  /// 非阻塞地取出下一条事件
  pub fn try_event(&mut self) -> Result<Option<RunEvent>, RunError> {
    match self.events.try_recv() {
      Ok(event) => Ok(Some(event)),
      Err(TryRecvError::Empty) => Ok(None),
      Err(TryRecvError::Disconnected) => Err(RunError::Disconnected),
    }
  }

  /// 阻塞直到运行结束，期间把进度交给 `on_progress`
  pub fn wait(mut self, mut on_progress: impl FnMut(u8)) -> Result<RunSummary, RunError> {
    let outcome = loop {
      match self.events.recv() {
        Ok(RunEvent::Progress(value)) => on_progress(value),
        Ok(RunEvent::Done(outcome)) => break outcome,
        Err(_) => break Err(RunError::Disconnected),
      }
    };
    self.join();
    outcome
  }

  fn join(&mut self) {
    if let Some(thread) = self.thread.take()
      && thread.join().is_err()
    {
      warn!("后台线程异常退出");
    }
  }
}
