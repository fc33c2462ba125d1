use crate::error::{PipelineError, Result};
use bytes::Bytes;
use icapture_types::BoundingBox;
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;

/// 按检测框外扩 `margin` 裁剪骑手区域并重新编码为 JPEG
pub fn crop_rider(jpeg: &[u8], region: &BoundingBox, margin: f32, quality: u8) -> Result<Bytes> {
    let img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?;

    let (x, y, w, h) = region
        .expand_clamped(margin, img.width(), img.height())
        .ok_or(PipelineError::EmptyRegion)?;
    let cropped = img.crop_imm(x, y, w, h);

    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    cropped.write_with_encoder(encoder)?;

    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};

    fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, 90)
            .encode_image(&img)
            .unwrap();
        buf
    }

    #[test]
    fn test_crop_expands_region() {
        let jpeg = test_jpeg(200, 100);
        let region = BoundingBox::new(50.0, 20.0, 40.0, 50.0);

        let cropped = crop_rider(&jpeg, &region, 0.1, 85).unwrap();
        let decoded = image::load_from_memory(&cropped).unwrap();
        assert_eq!(decoded.dimensions(), (48, 60));
    }

    #[test]
    fn test_crop_clamped_to_frame() {
        let jpeg = test_jpeg(100, 100);
        let region = BoundingBox::new(80.0, 80.0, 40.0, 40.0);

        let cropped = crop_rider(&jpeg, &region, 0.1, 85).unwrap();
        let decoded = image::load_from_memory(&cropped).unwrap();
        assert_eq!(decoded.dimensions(), (24, 24));
    }

    #[test]
    fn test_region_outside_frame() {
        let jpeg = test_jpeg(100, 100);
        let region = BoundingBox::new(300.0, 300.0, 10.0, 10.0);
        assert!(matches!(
            crop_rider(&jpeg, &region, 0.1, 85),
            Err(PipelineError::EmptyRegion)
        ));
    }

    #[test]
    fn test_invalid_jpeg() {
        let region = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(matches!(
            crop_rider(b"not an image", &region, 0.1, 85),
            Err(PipelineError::Image(_))
        ));
    }
}
