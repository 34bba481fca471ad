use std::path::Path;

use image::DynamicImage;
use indicatif::ProgressStyle;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;

use crate::errors::{Error, Result};

/// 读取图片并统一解码为 RGB
pub fn imread(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let path = path.as_ref();
    let img = image::open(path)
        .map_err(|e| Error::Detection(format!("无法解码图片 {}: {e}", path.display())))?;
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// 从内存字节解码图片并统一为 RGB
pub fn imdecode(bytes: &[u8]) -> Result<DynamicImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::Detection(format!("无法解码图片: {e}")))?;
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// 构建 ONNX 推理会话
///
/// `threads` 为 0 时按 CPU 核数自动选择
pub fn build_session(path: &Path, threads: usize) -> anyhow::Result<Session> {
    let threads = match threads {
        0 => num_cpus::get().min(8),
        n => n,
    };
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads)?
        .commit_from_file(path)?;
    Ok(session)
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{wide_bar} {pos}/{len} {msg} [{elapsed_precise}<{eta_precise}]")
        .unwrap()
}
