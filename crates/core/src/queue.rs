//! 文档任务队列接口
//!
//! 至少一次投递；未确认删除的消息在可见性超时后重新投递。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("unknown receipt handle: {0}")]
    UnknownReceipt(String),
    #[error("queue backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ReceiveOptions {
    pub max_messages: usize,
    pub visibility_timeout: Duration,
    pub wait_time: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt_handle: String,
    pub body: String,
}

/// 单个文档的提交请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedDocJob {
    pub workflow_id: String,
    /// 相对根前缀的输入目录，如 `input/<workflow_id>/`
    pub input_path: String,
    pub document_name: String,
}

impl QueuedDocJob {
    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<QueueMessage>, QueueError>;

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;

    async fn send(&self, body: String) -> Result<(), QueueError>;
}
