use crate::{CameraError, Result};
use image::ImageFormat;

/// 解码 JPEG 并计算平均亮度（0-255）
pub fn measure_brightness(jpeg: &[u8]) -> Result<f32> {
    let img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .map_err(|e| CameraError::Decode(e.to_string()))?;

    let luma = img.to_luma8();
    let pixels = luma.as_raw();
    if pixels.is_empty() {
        return Err(CameraError::Decode("empty image".to_string()));
    }

    let sum: u64 = pixels.iter().map(|&p| u64::from(p)).sum();
    Ok(sum as f32 / pixels.len() as f32)
}
