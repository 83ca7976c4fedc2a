//! 位图格式编解码（PNG / JPEG / 多页 TIFF）

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::ColorType;

use crate::error::RenderError;
use crate::format::DocumentFormat;

fn image_format(format: DocumentFormat) -> Result<ImageFormat, RenderError> {
    match format {
        DocumentFormat::Png => Ok(ImageFormat::Png),
        DocumentFormat::Jpeg => Ok(ImageFormat::Jpeg),
        other => Err(RenderError::Unsupported(format!("{} is not a single-image format", other))),
    }
}

/// 解码单张图片
pub fn decode_single(bytes: &[u8], format: DocumentFormat) -> Result<Vec<RgbaImage>, RenderError> {
    let img = image::load_from_memory_with_format(bytes, image_format(format)?)?;
    Ok(vec![img.to_rgba8()])
}

/// 编码单张图片，JPEG 会丢弃 alpha 通道
pub fn encode_single(page: &RgbaImage, format: DocumentFormat) -> Result<Vec<u8>, RenderError> {
    let mut output = Vec::new();
    let mut cursor = Cursor::new(&mut output);

    match format {
        DocumentFormat::Jpeg => {
            let rgb_img = DynamicImage::ImageRgba8(page.clone()).to_rgb8();
            rgb_img.write_to(&mut cursor, ImageFormat::Jpeg)?;
        }
        other => {
            page.write_to(&mut cursor, image_format(other)?)?;
        }
    }

    Ok(output)
}

/// 逐帧解码 TIFF，保持帧顺序
pub fn decode_tiff(bytes: &[u8]) -> Result<Vec<RgbaImage>, RenderError> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?;
    let mut pages = Vec::new();

    loop {
        let (width, height) = decoder.dimensions()?;
        let color = decoder.colortype()?;
        let buffer = match decoder.read_image()? {
            DecodingResult::U8(buf) => buf,
            _ => {
                return Err(RenderError::Unsupported(format!(
                    "tiff frame {} uses a non 8-bit sample format",
                    pages.len() + 1
                )))
            }
        };
        pages.push(frame_to_rgba(color, width, height, buffer)?);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    log::debug!("[Render] TIFF 解码完成，共 {} 帧", pages.len());
    Ok(pages)
}

fn frame_to_rgba(color: ColorType, width: u32, height: u32, buffer: Vec<u8>) -> Result<RgbaImage, RenderError> {
    let size_mismatch = || RenderError::Unsupported(format!("tiff frame buffer does not match {}x{}", width, height));

    let image = match color {
        ColorType::RGBA(8) => {
            return RgbaImage::from_raw(width, height, buffer).ok_or_else(size_mismatch);
        }
        ColorType::RGB(8) => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, buffer).ok_or_else(size_mismatch)?),
        ColorType::Gray(8) => {
            DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, buffer).ok_or_else(size_mismatch)?)
        }
        other => return Err(RenderError::Unsupported(format!("tiff color type {:?}", other))),
    };

    Ok(image.to_rgba8())
}

/// 将所有页写入一个多页 TIFF
pub fn encode_tiff(pages: &[RgbaImage]) -> Result<Vec<u8>, RenderError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        for page in pages {
            encoder.write_image::<colortype::RGBA8>(page.width(), page.height(), page.as_raw())?;
        }
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, shade: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([shade, shade, shade, 255]))
    }

    #[test]
    fn test_tiff_keeps_frame_order() {
        let pages = vec![solid(8, 8, 10), solid(8, 8, 20), solid(8, 8, 30)];
        let bytes = encode_tiff(&pages).unwrap();
        assert_eq!(DocumentFormat::detect(&bytes), Some(DocumentFormat::Tiff));

        let decoded = decode_tiff(&bytes).unwrap();
        assert_eq!(decoded.len(), 3);
        let shades: Vec<u8> = decoded.iter().map(|p| p.get_pixel(0, 0)[0]).collect();
        assert_eq!(shades, vec![10, 20, 30]);
    }

    #[test]
    fn test_png_single_page() {
        let bytes = encode_single(&solid(4, 3, 200), DocumentFormat::Png).unwrap();
        let decoded = decode_single(&bytes, DocumentFormat::Png).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].dimensions(), (4, 3));
    }

    #[test]
    fn test_jpeg_drops_alpha() {
        let bytes = encode_single(&solid(16, 16, 255), DocumentFormat::Jpeg).unwrap();
        assert_eq!(DocumentFormat::detect(&bytes), Some(DocumentFormat::Jpeg));
    }

    #[test]
    fn test_single_rejects_container() {
        assert!(matches!(
            encode_single(&solid(2, 2, 0), DocumentFormat::Tiff),
            Err(RenderError::Unsupported(_))
        ));
    }
}
