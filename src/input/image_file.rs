// 该文件是 Renying （人影） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use image::ImageReader;
use tracing::{debug, error};

use crate::{frame::RgbFrame, input::InputError};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// 按扩展名判断是否为图片文件
pub fn is_image_path(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_lowercase();
      IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

/// 读取单张图片为 RGB 帧
pub fn read_image_file(path: &Path) -> Result<RgbFrame, InputError> {
  let image = ImageReader::open(path)
    .map_err(|e| {
      error!("无法打开图片 {}: {}", path.display(), e);
      e
    })?
    .with_guessed_format()?
    .decode()?;
  debug!("图片尺寸: {}x{}", image.width(), image.height());
  Ok(RgbFrame::from(image.into_rgb8()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn image_extensions_are_case_insensitive() {
    assert!(is_image_path(Path::new("a/b/photo.JPG")));
    assert!(is_image_path(Path::new("frame.png")));
    assert!(!is_image_path(Path::new("clip.mp4")));
    assert!(!is_image_path(Path::new("noext")));
  }

  #[test]
  fn reads_back_a_saved_png() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("in.png");
    let mut image = image::RgbImage::new(4, 3);
    image.put_pixel(1, 1, image::Rgb([9, 8, 7]));
    image.save(&path).unwrap();

    let frame = read_image_file(&path).unwrap();
    assert_eq!(frame.dimensions(), (4, 3));
    assert_eq!(frame.pixel(1, 1), Some([9, 8, 7]));
  }

  #[test]
  fn missing_image_is_io_error() {
    let err = read_image_file(Path::new("/nonexistent/in.png")).unwrap_err();
    assert!(matches!(err, InputError::IoError(_)));
  }
}
