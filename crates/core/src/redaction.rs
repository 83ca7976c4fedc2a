//! 脱敏引擎
//!
//! 把实体文本对齐到 OCR 行，在渲染后的页面上用黑色矩形覆盖命中行，
//! 再按原格式族重新编码。产物写到并列的 `redacted-doc/` 目录，
//! 除非要求保留，否则删除 `orig-doc/` 中的原件。
//!
//! 单个文档失败只记录到报告中，不影响同批其他文档。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use idp_ocr::{BBox, OcrDocument};
use idp_render::{fill_rects, DocumentFormat, PixelRect, RenderOptions};
use idp_rules::{match_lines, Entity, EntityReport};
use idp_verify::{verify_artifact, VerifyOptions};

use crate::distribute::{ItemFailure, RedactionTask};
use crate::error::{CoreError, Result};
use crate::paths::redacted_key;
use crate::store::ObjectStore;

#[derive(Debug, Clone, Default)]
pub struct RedactOptions {
    pub render: RenderOptions,
    pub verify: VerifyOptions,
}

/// 编码后的脱敏产物
#[derive(Debug, Clone)]
pub struct RedactedArtifact {
    pub bytes: Vec<u8>,
    pub format: DocumentFormat,
    pub pages: usize,
    /// 实际绘制的矩形数
    pub regions: usize,
    pub digest: String,
}

/// 页面相对坐标 → 像素矩形，裁剪到页面内
pub fn to_pixel_rect(bbox: &BBox, width: u32, height: u32) -> Option<PixelRect> {
    let left = (bbox.x.max(0.0) * width as f32).floor();
    let top = (bbox.y.max(0.0) * height as f32).floor();
    let right = ((bbox.x + bbox.w).min(1.0) * width as f32).ceil();
    let bottom = ((bbox.y + bbox.h).min(1.0) * height as f32).ceil();

    if right <= left || bottom <= top {
        return None;
    }

    Some(PixelRect {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

/// 脱敏单个文档
///
/// 源文档解码出零页时返回错误。
pub fn redact(document: &[u8], ocr: &OcrDocument, entities: &[Entity], options: &RedactOptions) -> Result<RedactedArtifact> {
    let mut set = idp_render::decode(document, &options.render)?;
    let lines = ocr.lines();
    let hits = match_lines(entities, &lines);

    let page_count = set.pages.len();
    let mut regions = 0;
    for hit in &hits {
        let Some(page) = (hit.page as usize).checked_sub(1).and_then(|idx| set.pages.get_mut(idx)) else {
            log::warn!("[Redact] 命中行位于第 {} 页，文档只有 {} 页", hit.page, page_count);
            continue;
        };
        if let Some(rect) = to_pixel_rect(&hit.bbox, page.width(), page.height()) {
            fill_rects(page, &[rect]);
            regions += 1;
        }
    }
    log::info!(
        "[Redact] {} 个实体命中 {} 行，绘制 {} 个矩形，共 {} 页",
        entities.len(),
        hits.len(),
        regions,
        page_count
    );

    let bytes = idp_render::encode(&set)?;
    let check = verify_artifact(&set, &bytes, &options.verify)?;
    if !check.ok {
        return Err(CoreError::Verification(check.warnings.join("; ")));
    }

    Ok(RedactedArtifact {
        bytes,
        format: set.format,
        pages: set.pages.len(),
        regions,
        digest: check.digest,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionOutcome {
    pub document_key: String,
    pub redacted_key: String,
    pub content_type: String,
    pub pages: usize,
    pub regions: usize,
    /// 产物的 SHA-256
    pub digest: String,
    pub original_deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionReport {
    pub outcomes: Vec<RedactionOutcome>,
    pub failures: Vec<ItemFailure>,
}

pub struct RedactionEngine {
    store: Arc<dyn ObjectStore>,
    options: RedactOptions,
}

impl RedactionEngine {
    pub fn new(store: Arc<dyn ObjectStore>, options: RedactOptions) -> Self {
        Self { store, options }
    }

    pub async fn redact_batch(&self, tasks: &[RedactionTask], retain_orig_docs: bool) -> RedactionReport {
        let mut report = RedactionReport::default();

        for task in tasks {
            match self.redact_one(task, retain_orig_docs).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    log::warn!("[Redact] {} 脱敏失败: {}", task.document_key, e);
                    report.failures.push(ItemFailure {
                        key: task.document_key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "[Redact] 本批完成 {} 个，失败 {} 个",
            report.outcomes.len(),
            report.failures.len()
        );
        report
    }

    async fn redact_one(&self, task: &RedactionTask, retain_orig_docs: bool) -> Result<RedactionOutcome> {
        let ocr = OcrDocument::from_slice(&self.store.get(&task.ocr_key).await?)?;
        let entities = EntityReport::from_slice(&self.store.get(&task.entities_key).await?)?.entities;
        let document = self.store.get(&task.document_key).await?;

        // 光栅化是 CPU 密集的同步操作
        let options = self.options.clone();
        let artifact = tokio::task::spawn_blocking(move || redact(&document, &ocr, &entities, &options))
            .await
            .map_err(|e| CoreError::Aborted(e.to_string()))??;

        let target = redacted_key(&task.document_key);
        let content_type = artifact.format.mime();
        self.store
            .put(&target, artifact.bytes, Some(content_type))
            .await?;
        log::info!("[Redact] 已上传 {} ({})", target, content_type);

        if !retain_orig_docs {
            self.store.delete(std::slice::from_ref(&task.document_key)).await?;
            log::info!("[Redact] 已删除原件 {}", task.document_key);
        }

        Ok(RedactionOutcome {
            document_key: task.document_key.clone(),
            redacted_key: target,
            content_type: content_type.to_string(),
            pages: artifact.pages,
            regions: artifact.regions,
            digest: artifact.digest,
            original_deleted: !retain_orig_docs,
        })
    }
}
