//! 文档光栅化与遮盖
//!
//! 把 PDF、PNG、JPEG、TIFF 文档解码为逐页 RGBA 位图，在位图上绘制
//! 实心黑色矩形，再按原格式族重新编码。
//!
//! PDF 输出为纯图片页，不再包含可选中的文字层；TIFF 输出保持帧数与顺序。

mod error;
mod format;
mod pdf;
mod raster;

pub use error::RenderError;
pub use format::DocumentFormat;
pub use pdf::pdfium_available;

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

/// PDF 渲染默认 DPI
pub const DEFAULT_DPI: u32 = 150;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOptions {
    pub dpi: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { dpi: DEFAULT_DPI }
    }
}

/// 解码后的文档：格式族与按顺序排列的页面
#[derive(Debug, Clone)]
pub struct PageSet {
    pub format: DocumentFormat,
    /// 仅对 PDF 有意义，重新编码时用于还原页面尺寸
    pub dpi: u32,
    pub pages: Vec<RgbaImage>,
}

impl PageSet {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// 页面像素坐标系中的矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// 解码文档字节，格式由文件头识别
pub fn decode(bytes: &[u8], options: &RenderOptions) -> Result<PageSet, RenderError> {
    let format = DocumentFormat::detect(bytes).ok_or(RenderError::UnknownFormat)?;

    let pages = match format {
        DocumentFormat::Pdf => pdf::decode_pdf(bytes, options.dpi)?,
        DocumentFormat::Tiff => raster::decode_tiff(bytes)?,
        DocumentFormat::Png | DocumentFormat::Jpeg => raster::decode_single(bytes, format)?,
    };

    if pages.is_empty() {
        return Err(RenderError::NoPages);
    }

    log::debug!("[Render] 解码 {}，共 {} 页", format, pages.len());
    Ok(PageSet {
        format,
        dpi: options.dpi,
        pages,
    })
}

/// 按原格式族重新编码
pub fn encode(set: &PageSet) -> Result<Vec<u8>, RenderError> {
    if set.pages.is_empty() {
        return Err(RenderError::NoPages);
    }

    match set.format {
        DocumentFormat::Pdf => pdf::encode_pdf(&set.pages, set.dpi),
        DocumentFormat::Tiff => raster::encode_tiff(&set.pages),
        DocumentFormat::Png | DocumentFormat::Jpeg => {
            if set.pages.len() > 1 {
                return Err(RenderError::Unsupported(format!(
                    "{} cannot hold {} pages",
                    set.format,
                    set.pages.len()
                )));
            }
            raster::encode_single(&set.pages[0], set.format)
        }
    }
}

/// 在页面上绘制实心黑色矩形
///
/// 超出页面的部分被裁掉，宽或高为零的矩形被忽略。
pub fn fill_rects(page: &mut RgbaImage, rects: &[PixelRect]) {
    let (page_w, page_h) = page.dimensions();
    let black = Rgba([0, 0, 0, 255]);

    for rect in rects {
        if rect.x >= page_w || rect.y >= page_h {
            continue;
        }
        let width = rect.width.min(page_w - rect.x);
        let height = rect.height.min(page_h - rect.y);
        if width == 0 || height == 0 {
            continue;
        }
        draw_filled_rect_mut(
            page,
            Rect::at(rect.x as i32, rect.y as i32).of_size(width, height),
            black,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]))
    }

    #[test]
    fn test_fill_rects_paints_black() {
        let mut page = white(20, 10);
        fill_rects(&mut page, &[PixelRect { x: 2, y: 3, width: 4, height: 2 }]);

        assert_eq!(page.get_pixel(2, 3), &Rgba([0, 0, 0, 255]));
        assert_eq!(page.get_pixel(5, 4), &Rgba([0, 0, 0, 255]));
        assert_eq!(page.get_pixel(6, 4), &Rgba([255, 255, 255, 255]));
        assert_eq!(page.get_pixel(2, 5), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_fill_rects_clips_to_page() {
        let mut page = white(10, 10);
        fill_rects(
            &mut page,
            &[
                PixelRect { x: 8, y: 8, width: 100, height: 100 },
                PixelRect { x: 50, y: 0, width: 5, height: 5 },
                PixelRect { x: 0, y: 0, width: 0, height: 5 },
            ],
        );

        assert_eq!(page.get_pixel(9, 9), &Rgba([0, 0, 0, 255]));
        assert_eq!(page.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_tiff_roundtrip_through_pageset() {
        let set = PageSet {
            format: DocumentFormat::Tiff,
            dpi: DEFAULT_DPI,
            pages: vec![white(6, 6), white(6, 6)],
        };
        let bytes = encode(&set).unwrap();
        let decoded = decode(&bytes, &RenderOptions::default()).unwrap();
        assert_eq!(decoded.format, DocumentFormat::Tiff);
        assert_eq!(decoded.page_count(), 2);
    }

    #[test]
    fn test_png_keeps_format() {
        let mut set = PageSet {
            format: DocumentFormat::Png,
            dpi: DEFAULT_DPI,
            pages: vec![white(8, 8)],
        };
        fill_rects(&mut set.pages[0], &[PixelRect { x: 0, y: 0, width: 4, height: 4 }]);
        let bytes = encode(&set).unwrap();
        let decoded = decode(&bytes, &RenderOptions::default()).unwrap();
        assert_eq!(decoded.format, DocumentFormat::Png);
        assert_eq!(decoded.pages[0].get_pixel(1, 1), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_pdf_roundtrip_keeps_pages() {
        if !pdfium_available() {
            eprintln!("pdfium 不可用，跳过");
            return;
        }
        let mut set = PageSet {
            format: DocumentFormat::Pdf,
            dpi: DEFAULT_DPI,
            pages: vec![white(150, 300), white(300, 150)],
        };
        fill_rects(&mut set.pages[0], &[PixelRect { x: 0, y: 0, width: 60, height: 60 }]);

        let bytes = encode(&set).unwrap();
        assert_eq!(DocumentFormat::detect(&bytes), Some(DocumentFormat::Pdf));

        let decoded = decode(&bytes, &RenderOptions::default()).unwrap();
        assert_eq!(decoded.format, DocumentFormat::Pdf);
        assert_eq!(decoded.page_count(), 2);
        assert_eq!(decoded.pages[0].dimensions(), (150, 300));
        assert_eq!(decoded.pages[1].dimensions(), (300, 150));
        // JPEG 有损，只要求遮盖区域仍为深色
        assert!(decoded.pages[0].get_pixel(30, 30)[0] < 40);
        assert!(decoded.pages[0].get_pixel(120, 250)[0] > 200);
    }

    #[test]
    fn test_unknown_and_empty() {
        assert!(matches!(
            decode(b"not a document", &RenderOptions::default()),
            Err(RenderError::UnknownFormat)
        ));
        let empty = PageSet {
            format: DocumentFormat::Png,
            dpi: DEFAULT_DPI,
            pages: Vec::new(),
        };
        assert!(matches!(encode(&empty), Err(RenderError::NoPages)));
    }

    #[test]
    fn test_single_image_rejects_many_pages() {
        let set = PageSet {
            format: DocumentFormat::Jpeg,
            dpi: DEFAULT_DPI,
            pages: vec![white(4, 4), white(4, 4)],
        };
        assert!(matches!(encode(&set), Err(RenderError::Unsupported(_))));
    }
}
