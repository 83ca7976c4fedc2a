//! 光栅化错误类型

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("unrecognized document format")]
    UnknownFormat,

    #[error("unsupported content: {0}")]
    Unsupported(String),

    #[error("document has no pages")]
    NoPages,

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("tiff codec error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("pdf error: {0}")]
    Pdf(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
