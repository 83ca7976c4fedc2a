//! Entity schema and line matching.
//!
//! 实体检测服务对每个文档输出一组实体文本片段。匹配器把这些片段
//! 对齐到 OCR 行上，得到需要遮盖的页面区域。

use std::collections::HashSet;

use idp_ocr::{BBox, OcrLine};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("invalid entity output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 检测到的实体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entity {
    pub text: String,
    #[serde(default, rename = "Type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub begin_offset: Option<usize>,
    #[serde(default)]
    pub end_offset: Option<usize>,
}

/// 单个文档的实体检测输出
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntityReport {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl EntityReport {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RulesError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// 匹配命中：一条 OCR 行需要被遮盖
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchHit {
    /// 页码，从 1 开始
    pub page: u32,
    pub bbox: BBox,
    /// 触发命中的实体文本
    pub entity: String,
    pub kind: Option<String>,
    /// 被命中的行文本
    pub line: String,
    pub confidence: Option<f32>,
}

/// 将实体对齐到 OCR 行
///
/// 双向、大小写不敏感的包含匹配：实体包含行文本，或行文本包含实体，
/// 都视为命中。宁可多遮，不可漏遮。同一行只输出一次，空白实体被忽略。
pub fn match_lines(entities: &[Entity], lines: &[OcrLine]) -> Vec<MatchHit> {
    let lowered: Vec<String> = lines.iter().map(|l| l.text.to_lowercase()).collect();
    let mut seen: HashSet<usize> = HashSet::new();
    let mut hits = Vec::new();

    for entity in entities {
        let needle = entity.text.trim().to_lowercase();
        if needle.is_empty() {
            continue;
        }

        for (idx, line) in lines.iter().enumerate() {
            let haystack = &lowered[idx];
            if haystack.is_empty() {
                continue;
            }
            if !(haystack.contains(&needle) || needle.contains(haystack.as_str())) {
                continue;
            }
            if !seen.insert(idx) {
                continue;
            }
            hits.push(MatchHit {
                page: line.page,
                bbox: line.bbox,
                entity: entity.text.clone(),
                kind: entity.kind.clone(),
                line: line.text.clone(),
                confidence: entity.score,
            });
        }
    }

    log::debug!("[Rules] {} 个实体命中 {} 行", entities.len(), hits.len());
    hits
}
