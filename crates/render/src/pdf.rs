//! PDF 光栅化
//!
//! 使用 pdfium-render 将每页渲染为位图；脱敏后把位图逐页写回新 PDF，
//! 原有文字层因此被完全销毁。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use image::{DynamicImage, RgbaImage};
use pdfium_render::prelude::*;

use crate::error::RenderError;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// 获取 pdfium 库的搜索路径
fn get_pdfium_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(dir) = std::env::var("PDFIUM_LIB_DIR") {
        paths.push(PathBuf::from(dir));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            paths.push(exe_dir.join("libs"));
            paths.push(exe_dir.to_path_buf());
        }
    }

    paths.push(PathBuf::from("libs"));
    paths.push(PathBuf::from("./"));

    paths
}

/// 当前环境能否加载 pdfium
pub fn pdfium_available() -> bool {
    bind_pdfium().is_ok()
}

/// 尝试绑定 pdfium 库
fn bind_pdfium() -> Result<Pdfium, RenderError> {
    for path in &get_pdfium_search_paths() {
        let lib_path = Pdfium::pdfium_platform_library_name_at_path(path);
        log::debug!("[Render] 尝试加载 pdfium: {:?}", lib_path);

        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            log::info!("[Render] 成功从 {:?} 加载 pdfium", path);
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| RenderError::Pdf(format!("pdfium library unavailable: {}", e)))
}

/// 按 DPI 渲染所有页面
pub fn decode_pdf(bytes: &[u8], dpi: u32) -> Result<Vec<RgbaImage>, RenderError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| RenderError::Pdf(format!("failed to load pdf: {}", e)))?;

    // PDF 默认 72 DPI
    let scale = dpi as f32 / 72.0;
    let page_count = document.pages().len();
    let mut pages = Vec::with_capacity(page_count as usize);

    for page_idx in 0..page_count {
        let page = document
            .pages()
            .get(page_idx)
            .map_err(|e| RenderError::Pdf(format!("failed to get page {}: {}", page_idx, e)))?;

        let target_width = (page.width().value * scale).round() as i32;
        let target_height = (page.height().value * scale).round() as i32;

        let render_config = PdfRenderConfig::new()
            .set_target_width(target_width)
            .set_target_height(target_height);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Pdf(format!("failed to render page {}: {}", page_idx, e)))?;

        pages.push(bitmap.as_image().to_rgba8());
    }

    log::info!("[Render] PDF 渲染完成，共 {} 页 (DPI: {})", pages.len(), dpi);
    Ok(pages)
}

/// 每页位图铺满一页，按原顺序写入新 PDF
pub fn encode_pdf(pages: &[RgbaImage], dpi: u32) -> Result<Vec<u8>, RenderError> {
    let pdfium = bind_pdfium()?;
    let mut new_doc = pdfium
        .create_new_pdf()
        .map_err(|e| RenderError::Pdf(format!("failed to create pdf: {}", e)))?;

    let points_per_pixel = 72.0 / dpi as f32;

    for (page_idx, image) in pages.iter().enumerate() {
        let page_width = PdfPoints::new(image.width() as f32 * points_per_pixel);
        let page_height = PdfPoints::new(image.height() as f32 * points_per_pixel);

        let mut new_page = new_doc
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(page_width, page_height))
            .map_err(|e| RenderError::Pdf(format!("failed to create page {}: {}", page_idx, e)))?;

        let temp_path = std::env::temp_dir().join(format!(
            "idp_redact_{}_{}.jpg",
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .save_with_format(&temp_path, image::ImageFormat::Jpeg)?;

        let added = add_page_image(&new_doc, &mut new_page, &temp_path, page_width, page_height);
        let _ = std::fs::remove_file(&temp_path);
        added.map_err(|e| RenderError::Pdf(format!("failed to place image on page {}: {}", page_idx, e)))?;
    }

    new_doc
        .save_to_bytes()
        .map_err(|e| RenderError::Pdf(format!("failed to save pdf: {}", e)))
}

fn add_page_image<'a>(
    doc: &PdfDocument<'a>,
    page: &mut PdfPage<'a>,
    jpeg_path: &Path,
    width: PdfPoints,
    height: PdfPoints,
) -> Result<(), PdfiumError> {
    let mut image_obj = PdfPageImageObject::new_from_jpeg_file(doc, jpeg_path)?;
    image_obj.scale(width.value, height.value)?;
    page.objects_mut().add_image_object(image_obj)?;
    Ok(())
}
