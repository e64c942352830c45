// 该文件是 Renying （人影） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;

/// Renying 人物检测
///
/// 三个路径缺一不可，缺失的路径会逐一报告。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// YOLOv8 ONNX 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub weights: Option<PathBuf>,

  /// 输入文件
  /// 支持格式:
  /// - 视频: *.mp4, *.avi, *.mkv 等 GStreamer 可解码的格式
  /// - 图片: *.jpg, *.jpeg, *.png, *.bmp, *.webp
  #[arg(long, value_name = "SOURCE")]
  pub input: Option<PathBuf>,

  /// 输出文件路径（视频输出为 MP4）
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<PathBuf>,

  /// 标签使用的 TrueType 字体，缺省时使用内置的 DejaVu Sans Mono
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
}
