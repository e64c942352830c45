// 该文件是 Renying （人影） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use renying::{
  config::RunConfig,
  input::is_image_path,
  output::draw::Annotator,
  pipeline::{CancelFlag, DefaultPipeline, GStreamerBackend},
  task::{RunHandle, TaskRunner},
};

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();

  match run() {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(e) => {
      error!("{:#}", e);
      ExitCode::FAILURE
    }
  }
}

fn run() -> Result<bool> {
  let args = args::Args::parse();

  let config = match RunConfig::from_parts(args.weights, args.input, args.output) {
    Ok(config) => config,
    Err(errors) => {
      for e in errors {
        error!("{}", e);
      }
      return Ok(false);
    }
  };

  info!("模型文件路径: {}", config.weights().display());
  info!("输入来源: {}", config.input().display());
  info!("输出路径: {}", config.output().display());

  let annotator = match &args.font {
    Some(path) => Annotator::with_font_file(path)?,
    None => Annotator::default(),
  };

  let cancel = CancelFlag::new();
  let handler_flag = cancel.clone();
  ctrlc::set_handler(move || {
    warn!("收到中断信号，将在当前帧结束后停止...");
    handler_flag.cancel();
  })?;

  let pipeline = DefaultPipeline::new(GStreamerBackend)
    .with_annotator(annotator)
    .with_cancel_flag(cancel);

  let runner = TaskRunner::new();
  let handle = if is_image_path(config.input()) {
    runner.start_job(move |progress| pipeline.annotate_image(&config, progress))?
  } else {
    runner.start(pipeline, config)?
  };

  Ok(report(handle))
}

/// 进度只在数值变化时输出
fn report(handle: RunHandle) -> bool {
  let mut last = None;
  let outcome = handle.wait(|value| {
    if last != Some(value) {
      info!("进度: {}%", value);
      last = Some(value);
    }
  });

  match outcome {
    Ok(summary) => {
      info!(
        "处理完成! 共 {} 帧, 检测到 {} 人次, 已保存至 {}",
        summary.frames_written,
        summary.detections,
        summary.output.display()
      );
      true
    }
    Err(e) => {
      error!("{}", e);
      false
    }
  }
}
