use crate::admission::DrainReport;
use crate::ledger::LedgerError;
use crate::queue::QueueError;
use crate::services::ServiceError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("workflow {0} has no callback token")]
    MissingToken(String),
    /// 提交被限流；`report` 为本批中已成功提交的部分
    #[error("ocr submission throttled: {code}")]
    Throttled { code: String, report: Box<DrainReport> },
    #[error("blocking task aborted: {0}")]
    Aborted(String),
    #[error("artifact verification failed: {0}")]
    Verification(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("ocr output error: {0}")]
    Ocr(#[from] idp_ocr::OcrError),
    #[error("entity output error: {0}")]
    Rules(#[from] idp_rules::RulesError),
    #[error("render error: {0}")]
    Render(#[from] idp_render::RenderError),
    #[error("verification error: {0}")]
    Verify(#[from] idp_verify::VerifyError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
