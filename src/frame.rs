// 该文件是 Renying （人影） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

/// 紧密排列的 RGB8 帧（HWC 布局，无行填充）
///
/// 帧只存在于一次循环迭代内：解码 -> 检测 -> 标注 -> 写出。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  /// 全黑帧
  pub fn new(width: u32, height: u32) -> Self {
    let size = RGB_CHANNELS * width as usize * height as usize;
    Self {
      width,
      height,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  /// 从原始数据构造，长度必须等于 `width * height * 3`
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    if data.len() != RGB_CHANNELS * width as usize * height as usize {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
    Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
  }

  pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
    if x >= self.width || y >= self.height {
      return;
    }
    let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
    self.data[idx..idx + RGB_CHANNELS].copy_from_slice(&color);
  }

  /// 以 `RgbImage` 的形式原地编辑帧
  pub fn with_image<R>(&mut self, f: impl FnOnce(&mut RgbImage) -> R) -> R {
    let data = std::mem::take(&mut self.data).into_vec();
    let mut image = RgbImage::from_raw(self.width, self.height, data)
      .unwrap_or_else(|| RgbImage::new(self.width, self.height));
    let result = f(&mut image);
    self.data = image.into_raw().into_boxed_slice();
    result
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

impl From<RgbFrame> for RgbImage {
  fn from(frame: RgbFrame) -> Self {
    let (width, height) = frame.dimensions();
    RgbImage::from_raw(width, height, frame.data.into_vec())
      .unwrap_or_else(|| RgbImage::new(width, height))
  }
}
