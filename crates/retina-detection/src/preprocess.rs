//! 影像预处理
//!
//! 将原图重新编码后写入上传目录下的 `preprocessed/`，原文件保持不变。
//! 每次调用生成独立的副本，由调用方在上传后删除。

use image::io::Reader as ImageReader;
use image::{ImageFormat, ImageOutputFormat};
use retina_core::{Result, RetinaError};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// 预处理输出子目录
pub const PREPROCESSED_DIR: &str = "preprocessed";

/// JPEG 重新编码质量
const JPEG_QUALITY: u8 = 95;

/// 重新编码影像，返回副本路径
pub fn preprocess_image(source: &Path, upload_dir: &Path) -> Result<PathBuf> {
    let file_name = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| RetinaError::Invalid(format!("invalid image path: {}", source.display())))?;

    let output_dir = upload_dir.join(PREPROCESSED_DIR);
    fs::create_dir_all(&output_dir)?;
    let output_path = output_dir.join(format!("preprocessed_{}_{}", Uuid::new_v4().simple(), file_name));

    let reader = ImageReader::open(source)?.with_guessed_format()?;
    let output_format = match reader.format() {
        Some(ImageFormat::Jpeg) => ImageOutputFormat::Jpeg(JPEG_QUALITY),
        Some(ImageFormat::Png) => ImageOutputFormat::Png,
        other => {
            return Err(RetinaError::ValidationFailed(format!(
                "unsupported image format for preprocessing: {:?}",
                other
            )))
        }
    };

    let image = reader
        .decode()
        .map_err(|e| RetinaError::ValidationFailed(format!("failed to decode image: {}", e)))?;

    let mut writer = BufWriter::new(File::create(&output_path)?);
    image
        .write_to(&mut writer, output_format)
        .map_err(|e| RetinaError::Internal(format!("failed to encode preprocessed image: {}", e)))?;

    debug!("Preprocessed {} -> {}", source.display(), output_path.display());
    Ok(output_path)
}
