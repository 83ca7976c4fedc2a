//! OCR 块级输出模型
//!
//! 外部 OCR 服务以分页 JSON 输出结果，每个分片包含一组 `Blocks`。
//! 这里只建模本系统读取的字段：块类型、页码、文本、置信度和几何信息。

use serde::{Deserialize, Serialize};

use crate::error::OcrError;
use crate::{BBox, OcrLine};

/// 块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    Page,
    Line,
    Word,
    /// 表格、表单等本系统不关心的块
    #[serde(other)]
    Other,
}

/// 服务返回的轴对齐边界框（页面相对坐标 0-1）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoundingBox {
    pub width: f32,
    pub height: f32,
    pub left: f32,
    pub top: f32,
}

/// 多边形顶点（页面相对坐标 0-1）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Geometry {
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub polygon: Vec<Point>,
}

impl Geometry {
    /// 优先使用边界框，缺失时由多边形顶点计算外接矩形
    pub fn bbox(&self) -> Option<BBox> {
        if let Some(b) = self.bounding_box {
            return Some(BBox {
                x: b.left,
                y: b.top,
                w: b.width,
                h: b.height,
            });
        }
        points_to_bbox(&self.polygon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Block {
    pub block_type: BlockType,
    #[serde(default)]
    pub id: Option<String>,
    /// 页码，从 1 开始；单页同步输出可能缺省
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub geometry: Geometry,
}

impl Block {
    pub fn page_number(&self) -> u32 {
        self.page.unwrap_or(1)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentMetadata {
    #[serde(default)]
    pub pages: u32,
}

/// 一个 OCR 任务的完整输出（可能由多个分片合并而成）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OcrDocument {
    #[serde(default)]
    pub document_metadata: DocumentMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<String>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl OcrDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, OcrError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, OcrError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 按分片顺序合并输出
    ///
    /// 元数据取第一个分片；各分片声明的页数不一致时报错。
    pub fn merge(parts: Vec<OcrDocument>) -> Result<Self, OcrError> {
        let mut iter = parts.into_iter();
        let mut merged = iter
            .next()
            .ok_or_else(|| OcrError::EmptyOutput("没有可合并的分片".to_string()))?;

        for (idx, part) in iter.enumerate() {
            let pages = part.document_metadata.pages;
            if pages != 0 && merged.document_metadata.pages != 0 && pages != merged.document_metadata.pages {
                return Err(OcrError::InconsistentParts(format!(
                    "分片 {} 声明 {} 页，首个分片声明 {} 页",
                    idx + 2,
                    pages,
                    merged.document_metadata.pages
                )));
            }
            merged.blocks.extend(part.blocks);
        }

        log::debug!("[OCR] 合并完成，共 {} 个块", merged.blocks.len());
        Ok(merged)
    }

    /// 页数：优先取元数据，缺省时取块中最大页码
    pub fn page_count(&self) -> u32 {
        if self.document_metadata.pages > 0 {
            return self.document_metadata.pages;
        }
        self.blocks.iter().map(Block::page_number).max().unwrap_or(0)
    }

    /// 提取行级结果，保持输出中的原始顺序
    ///
    /// 没有文本或几何信息的行会被跳过。
    pub fn lines(&self) -> Vec<OcrLine> {
        self.blocks
            .iter()
            .filter(|b| b.block_type == BlockType::Line)
            .filter_map(|b| {
                let text = b.text.as_deref()?.trim();
                if text.is_empty() {
                    return None;
                }
                let bbox = b.geometry.bbox()?;
                Some(OcrLine {
                    page: b.page_number(),
                    text: text.to_string(),
                    confidence: b.confidence.unwrap_or(0.0),
                    bbox,
                })
            })
            .collect()
    }
}

/// 将多边形顶点转换为外接边界框
fn points_to_bbox(points: &[Point]) -> Option<BBox> {
    if points.is_empty() {
        return None;
    }
    let min_x = points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let max_x = points.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let min_y = points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max_y = points.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);

    Some(BBox {
        x: min_x,
        y: min_y,
        w: max_x - min_x,
        h: max_y - min_y,
    })
}
