//! OCR 输出错误类型

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR 输出解析失败: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("OCR 输出为空: {0}")]
    EmptyOutput(String),

    #[error("OCR 输出分片不一致: {0}")]
    InconsistentParts(String),
}
