//! 影像验证
//!
//! 只解析文件头获取格式与尺寸，不做完整解码。

use image::io::Reader as ImageReader;
use image::ImageFormat;
use retina_core::{Result, RetinaError};
use std::io::{BufRead, Cursor, Seek};
use std::path::Path;

/// 最小边长（像素）
pub const MIN_DIMENSION: u32 = 512;
/// 最大边长（像素）
pub const MAX_DIMENSION: u32 = 4096;

/// 验证磁盘上的影像文件，通过时返回 (宽, 高)
pub fn validate_image_file(path: &Path) -> Result<(u32, u32)> {
    let reader = ImageReader::open(path).map_err(|e| {
        RetinaError::ValidationFailed(format!("failed to open image {}: {}", path.display(), e))
    })?;
    validate_reader(reader)
}

/// 验证内存中的影像数据
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(u32, u32)> {
    validate_reader(ImageReader::new(Cursor::new(bytes)))
}

fn validate_reader<R: BufRead + Seek>(reader: ImageReader<R>) -> Result<(u32, u32)> {
    let reader = reader
        .with_guessed_format()
        .map_err(|e| RetinaError::ValidationFailed(format!("failed to read image header: {}", e)))?;

    match reader.format() {
        Some(ImageFormat::Jpeg) | Some(ImageFormat::Png) => {}
        Some(other) => {
            return Err(RetinaError::ValidationFailed(format!(
                "unsupported image format: {:?}. Only JPEG and PNG are supported",
                other
            )))
        }
        None => {
            return Err(RetinaError::ValidationFailed(
                "unrecognized image format. Only JPEG and PNG are supported".to_string(),
            ))
        }
    }

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| RetinaError::ValidationFailed(format!("failed to decode image: {}", e)))?;

    check_dimensions(width, height)?;
    Ok((width, height))
}

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(RetinaError::ValidationFailed(format!(
            "image resolution too low: {}x{}. Minimum required: {}x{}",
            width, height, MIN_DIMENSION, MIN_DIMENSION
        )));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(RetinaError::ValidationFailed(format!(
            "image resolution too high: {}x{}. Maximum allowed: {}x{}",
            width, height, MAX_DIMENSION, MAX_DIMENSION
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_small_png_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.png");
        RgbImage::new(256, 256).save(&path).unwrap();

        match validate_image_file(&path) {
            Err(RetinaError::ValidationFailed(msg)) => assert!(msg.contains("too low")),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_jpeg_within_bounds_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fundus.jpg");
        RgbImage::new(1024, 1024).save(&path).unwrap();

        assert_eq!(validate_image_file(&path).unwrap(), (1024, 1024));
    }

    #[test]
    fn test_oversized_png_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wide.png");
        GrayImage::new(5000, 600).save(&path).unwrap();

        match validate_image_file(&path) {
            Err(RetinaError::ValidationFailed(msg)) => assert!(msg.contains("too high")),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_boundary_dimensions_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("edge.png");
        GrayImage::new(512, 4096).save(&path).unwrap();

        assert_eq!(validate_image_file(&path).unwrap(), (512, 4096));
    }

    #[test]
    fn test_gif_rejected_by_format() {
        // GIF89a 文件头，宽高 1024x1024
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&1024u16.to_le_bytes());
        bytes.extend_from_slice(&1024u16.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0]);

        match validate_image_bytes(&bytes) {
            Err(RetinaError::ValidationFailed(msg)) => assert!(msg.contains("unsupported")),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_and_missing_file_rejected() {
        assert!(matches!(
            validate_image_bytes(b"definitely not an image"),
            Err(RetinaError::ValidationFailed(_))
        ));
        assert!(matches!(
            validate_image_file(Path::new("/nonexistent/fundus.png")),
            Err(RetinaError::ValidationFailed(_))
        ));
    }
}
