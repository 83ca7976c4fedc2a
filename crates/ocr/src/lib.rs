//! OCR 输出解析
//!
//! 外部异步 OCR 服务的结果以块级 JSON 分片给出。本库负责合并分片、
//! 提取行级文本与边界框，并生成实体检测所用的纯文本。

mod document;
mod error;

pub use document::{Block, BlockType, BoundingBox, DocumentMetadata, Geometry, OcrDocument, Point};
pub use error::OcrError;

use serde::{Deserialize, Serialize};

/// OCR 行识别结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrLine {
    /// 页码，从 1 开始
    pub page: u32,
    /// 识别的文字
    pub text: String,
    /// 置信度 (0-100)
    pub confidence: f32,
    /// 边界框 (相对坐标 0-1)
    pub bbox: BBox,
}

/// 边界框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// 生成按页排列的纯文本
///
/// 每行一条 LINE 块文本，页与页之间以空行分隔。这是实体检测服务的输入。
pub fn plain_text(doc: &OcrDocument) -> String {
    let lines = doc.lines();
    let mut text = String::new();
    let mut current_page: Option<u32> = None;

    for line in &lines {
        match current_page {
            Some(page) if page == line.page => text.push('\n'),
            Some(_) => text.push_str("\n\n"),
            None => {}
        }
        current_page = Some(line.page);
        text.push_str(&line.text);
    }

    text
}
