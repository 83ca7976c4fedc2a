//! 外部服务接口：异步 OCR、实体检测、工作流协调器、后处理交接

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::postprocess::PostProcessRequest;

/// OCR 提交 API 的限流错误码
pub const THROTTLE_CODES: [&str; 3] = [
    "LimitExceededException",
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
];

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("{code}: {message}")]
    Api { code: String, message: String },
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ServiceError::Api { code, .. } => Some(code),
            ServiceError::Unavailable(_) => None,
        }
    }

    pub fn is_throttle(&self) -> bool {
        self.code().is_some_and(|code| THROTTLE_CODES.contains(&code))
    }
}

/// 完成通知的投递通道
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannel {
    pub topic: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrJobRequest {
    pub bucket: String,
    pub source_key: String,
    pub output_prefix: String,
    /// 关联标签，即 workflow_id
    pub job_tag: String,
    pub notification: NotificationChannel,
}

#[async_trait]
pub trait OcrService: Send + Sync {
    /// 提交异步分析任务，返回任务 ID
    async fn start_job(&self, request: &OcrJobRequest) -> Result<String, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityJobRequest {
    pub job_name: String,
    pub bucket: String,
    pub input_prefix: String,
    pub output_prefix: String,
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityJobStatus {
    Submitted,
    InProgress,
    Completed,
    PartialSuccess,
    Failed,
    StopRequested,
    Stopped,
}

impl EntityJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

#[async_trait]
pub trait EntityDetectionService: Send + Sync {
    async fn start_job(&self, request: &EntityJobRequest) -> Result<String, ServiceError>;

    async fn describe_job(&self, job_id: &str) -> Result<EntityJobStatus, ServiceError>;
}

#[async_trait]
pub trait WorkflowCoordinator: Send + Sync {
    /// 启动一次执行，返回执行 ID
    async fn start_execution(&self, name: &str, input: serde_json::Value) -> Result<String, ServiceError>;

    async fn signal_task_success(&self, token: &str, output: serde_json::Value) -> Result<(), ServiceError>;
}

/// OCR 输出后处理的异步交接，调用方不等待处理结果
#[async_trait]
pub trait PostProcessInvoker: Send + Sync {
    async fn invoke(&self, request: PostProcessRequest) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_classification() {
        assert!(ServiceError::api("ThrottlingException", "slow down").is_throttle());
        assert!(ServiceError::api("ProvisionedThroughputExceededException", "").is_throttle());
        assert!(!ServiceError::api("InvalidS3ObjectException", "bad key").is_throttle());
        assert!(!ServiceError::Unavailable("timeout".into()).is_throttle());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(EntityJobStatus::Completed.is_terminal());
        assert!(EntityJobStatus::Stopped.is_failure());
        assert!(!EntityJobStatus::InProgress.is_terminal());
        assert!(!EntityJobStatus::StopRequested.is_terminal());
        let parsed: EntityJobStatus = serde_json::from_str("\"IN_PROGRESS\"").unwrap();
        assert_eq!(parsed, EntityJobStatus::InProgress);
    }
}
