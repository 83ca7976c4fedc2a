//! 脱敏产物校验
//!
//! 上传前重新读取编码后的产物，确认页数、页面尺寸与脱敏后的页面集合一致，
//! PDF 产物不得残留文字层。同时计算产物的 SHA-256 摘要用于审计。

use idp_render::{DocumentFormat, PageSet, RenderOptions};
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// PDF 页面尺寸允许的误差（点）
const PAGE_SIZE_TOLERANCE: f32 = 1.0;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("artifact is not a readable pdf: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("artifact could not be decoded: {0}")]
    Render(#[from] idp_render::RenderError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// 检查 PDF 页面内容流中是否仍有文字绘制指令
    pub text_layer: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self { text_layer: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub ok: bool,
    pub pages: usize,
    pub warnings: Vec<String>,
    /// 产物的 SHA-256（十六进制）
    pub digest: String,
}

/// 计算 SHA-256 摘要
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// 校验编码后的产物与脱敏页面集合是否一致
pub fn verify_artifact(expected: &PageSet, artifact: &[u8], options: &VerifyOptions) -> Result<VerifyResult, VerifyError> {
    let mut warnings = Vec::new();

    match DocumentFormat::detect(artifact) {
        Some(format) if format == expected.format => {}
        other => warnings.push(format!(
            "format mismatch: expected {}, found {}",
            expected.format,
            other.map(|f| f.to_string()).unwrap_or_else(|| "unknown".to_string())
        )),
    }

    let pages = match expected.format {
        DocumentFormat::Pdf => verify_pdf(expected, artifact, options, &mut warnings)?,
        _ => verify_raster(expected, artifact, &mut warnings)?,
    };

    let result = VerifyResult {
        ok: warnings.is_empty(),
        pages,
        warnings,
        digest: sha256_hex(artifact),
    };

    if result.ok {
        log::debug!("[Verify] 校验通过，{} 页，sha256={}", result.pages, result.digest);
    } else {
        log::warn!("[Verify] 校验失败: {:?}", result.warnings);
    }
    Ok(result)
}

fn verify_pdf(
    expected: &PageSet,
    artifact: &[u8],
    options: &VerifyOptions,
    warnings: &mut Vec<String>,
) -> Result<usize, VerifyError> {
    let doc = Document::load_mem(artifact)?;
    let pages = doc.get_pages();

    if pages.len() != expected.page_count() {
        warnings.push(format!(
            "page count mismatch: expected {}, found {}",
            expected.page_count(),
            pages.len()
        ));
    }

    let points_per_pixel = 72.0 / expected.dpi as f32;

    // get_pages 按页码升序返回
    for ((page_num, page_id), image) in pages.iter().zip(expected.pages.iter()) {
        if let Some((llx, lly, urx, ury)) = media_box(&doc, *page_id) {
            let want_w = image.width() as f32 * points_per_pixel;
            let want_h = image.height() as f32 * points_per_pixel;
            if ((urx - llx) - want_w).abs() > PAGE_SIZE_TOLERANCE || ((ury - lly) - want_h).abs() > PAGE_SIZE_TOLERANCE {
                warnings.push(format!(
                    "page {} size mismatch: expected {:.1}x{:.1}pt, found {:.1}x{:.1}pt",
                    page_num,
                    want_w,
                    want_h,
                    urx - llx,
                    ury - lly
                ));
            }
        }

        if options.text_layer && has_text_operators(&doc, *page_id) {
            warnings.push(format!("page {} still carries a text layer", page_num));
        }
    }

    Ok(pages.len())
}

fn verify_raster(expected: &PageSet, artifact: &[u8], warnings: &mut Vec<String>) -> Result<usize, VerifyError> {
    let decoded = idp_render::decode(
        artifact,
        &RenderOptions {
            dpi: expected.dpi,
        },
    )?;

    if decoded.page_count() != expected.page_count() {
        warnings.push(format!(
            "page count mismatch: expected {}, found {}",
            expected.page_count(),
            decoded.page_count()
        ));
    }

    for (idx, (found, want)) in decoded.pages.iter().zip(expected.pages.iter()).enumerate() {
        if found.dimensions() != want.dimensions() {
            warnings.push(format!(
                "page {} size mismatch: expected {:?}, found {:?}",
                idx + 1,
                want.dimensions(),
                found.dimensions()
            ));
        }
    }

    Ok(decoded.page_count())
}

/// 从数组对象中提取边界框坐标
fn extract_box_values(arr: &[Object]) -> Option<(f32, f32, f32, f32)> {
    let values: Vec<f32> = arr
        .iter()
        .filter_map(|o| match o {
            Object::Integer(i) => Some(*i as f32),
            Object::Real(r) => Some(*r),
            _ => None,
        })
        .collect();
    if values.len() == 4 {
        Some((values[0], values[1], values[2], values[3]))
    } else {
        None
    }
}

/// 页面 MediaBox，页面自身没有时从父节点继承
fn media_box(doc: &Document, page_id: ObjectId) -> Option<(f32, f32, f32, f32)> {
    let Ok(Object::Dictionary(dict)) = doc.get_object(page_id) else {
        return None;
    };

    if let Ok(Object::Array(arr)) = dict.get(b"MediaBox") {
        return extract_box_values(arr);
    }

    if let Ok(Object::Reference(parent_ref)) = dict.get(b"Parent") {
        if let Ok(Object::Dictionary(parent_dict)) = doc.get_object(*parent_ref) {
            if let Ok(Object::Array(arr)) = parent_dict.get(b"MediaBox") {
                return extract_box_values(arr);
            }
        }
    }

    None
}

fn has_text_operators(doc: &Document, page_id: ObjectId) -> bool {
    let Ok(data) = doc.get_page_content(page_id) else {
        return false;
    };
    match Content::decode(&data) {
        Ok(content) => content
            .operations
            .iter()
            .any(|op| matches!(op.operator.as_str(), "Tj" | "TJ" | "'" | "\"")),
        Err(e) => {
            log::debug!("[Verify] 内容流解析失败: {}", e);
            false
        }
    }
}
