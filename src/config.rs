// 该文件是 Renying （人影） 项目的一部分。
// src/config.rs - 运行配置
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

/// 一次运行所需的三个路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRole {
  Weights,
  Input,
  Output,
}

impl fmt::Display for PathRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PathRole::Weights => write!(f, "模型权重"),
      PathRole::Input => write!(f, "输入视频"),
      PathRole::Output => write!(f, "输出视频"),
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  #[error("缺少{0}路径")]
  MissingPath(PathRole),
}

/// 单次运行的配置值对象，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
  weights: PathBuf,
  input: PathBuf,
  output: PathBuf,
}

impl RunConfig {
  pub fn new(
    weights: impl Into<PathBuf>,
    input: impl Into<PathBuf>,
    output: impl Into<PathBuf>,
  ) -> Self {
    Self {
      weights: weights.into(),
      input: input.into(),
      output: output.into(),
    }
  }

  /// 从可能缺失的路径构造配置，每个缺失（或为空）的路径各报告一个错误
  pub fn from_parts(
    weights: Option<PathBuf>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
  ) -> Result<Self, Vec<ConfigError>> {
    fn present(path: Option<PathBuf>) -> Option<PathBuf> {
      path.filter(|p| !p.as_os_str().is_empty())
    }

    let weights = present(weights);
    let input = present(input);
    let output = present(output);

    let mut errors = Vec::new();
    if weights.is_none() {
      errors.push(ConfigError::MissingPath(PathRole::Weights));
    }
    if input.is_none() {
      errors.push(ConfigError::MissingPath(PathRole::Input));
    }
    if output.is_none() {
      errors.push(ConfigError::MissingPath(PathRole::Output));
    }

    match (weights, input, output) {
      (Some(weights), Some(input), Some(output)) => Ok(Self {
        weights,
        input,
        output,
      }),
      _ => Err(errors),
    }
  }

  pub fn weights(&self) -> &Path {
    &self.weights
  }

  pub fn input(&self) -> &Path {
    &self.input
  }

  pub fn output(&self) -> &Path {
    &self.output
  }
}
