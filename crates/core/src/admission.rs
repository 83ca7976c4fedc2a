//! 提交准入控制
//!
//! 按批从任务队列取消息，为每个文档提交一个异步 OCR 任务。遇到限流时
//! 不确认当前消息并立即放弃本批剩余消息，依靠队列的可见性超时实现退避；
//! 其他错误视为该文档不可重试，确认删除（丢弃）后继续。
//!
//! 控制器本身不保存跨调用的状态，可以安全地重复、并发调用。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ledger::{LedgerError, LedgerStore, LedgerUpdate};
use crate::paths::Namespace;
use crate::queue::{JobQueue, QueuedDocJob, ReceiveOptions};
use crate::services::{NotificationChannel, OcrJobRequest, OcrService};

/// 队列单次接收的上限
pub const MAX_RECEIVE: usize = 10;

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub wait_time: Duration,
    pub notification: NotificationChannel,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_RECEIVE,
            visibility_timeout: Duration::from_secs(10),
            wait_time: Duration::from_secs(5),
            notification: NotificationChannel::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub workflow_id: String,
    pub document_name: String,
    pub job_id: String,
}

/// 被丢弃的消息：已确认删除，不会再提交
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedJob {
    pub workflow_id: Option<String>,
    pub document_name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub received: usize,
    pub submitted: Vec<SubmittedJob>,
    pub dropped: Vec<DroppedJob>,
    /// 本批因限流中止时的错误码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttled: Option<String>,
}

pub struct AdmissionController {
    queue: Arc<dyn JobQueue>,
    ocr: Arc<dyn OcrService>,
    ledger: Arc<dyn LedgerStore>,
    namespace: Namespace,
    bucket: String,
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        ocr: Arc<dyn OcrService>,
        ledger: Arc<dyn LedgerStore>,
        namespace: Namespace,
        bucket: impl Into<String>,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            queue,
            ocr,
            ledger,
            namespace,
            bucket: bucket.into(),
            config,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// 取一批消息并提交
    ///
    /// 限流时返回 [`CoreError::Throttled`]，其中带有本批已成功提交的部分。
    pub async fn drain(&self, max_messages: usize) -> Result<DrainReport> {
        let options = ReceiveOptions {
            max_messages: max_messages.clamp(1, MAX_RECEIVE),
            visibility_timeout: self.config.visibility_timeout,
            wait_time: self.config.wait_time,
        };
        let messages = self.queue.receive(&options).await?;
        let mut report = DrainReport {
            received: messages.len(),
            ..Default::default()
        };
        log::info!("[Admission] 收到 {} 条提交请求", messages.len());

        for message in messages {
            let job = match QueuedDocJob::from_body(&message.body) {
                Ok(job) => job,
                Err(e) => {
                    log::warn!("[Admission] 丢弃无法解析的消息: {}", e);
                    self.queue.delete(&message.receipt_handle).await?;
                    report.dropped.push(DroppedJob {
                        workflow_id: None,
                        document_name: None,
                        reason: format!("malformed message: {}", e),
                    });
                    continue;
                }
            };

            let request = OcrJobRequest {
                bucket: self.bucket.clone(),
                source_key: self.namespace.input_document(&job.input_path, &job.document_name),
                output_prefix: self.namespace.ocr_output(&job.workflow_id),
                job_tag: job.workflow_id.clone(),
                notification: self.config.notification.clone(),
            };
            log::debug!("[Admission] 提交 {:?}", request);

            match self.ocr.start_job(&request).await {
                Ok(job_id) => {
                    self.queue.delete(&message.receipt_handle).await?;
                    log::info!(
                        "[Admission] {}/{} 已提交，任务 {}",
                        job.workflow_id,
                        job.document_name,
                        job_id
                    );
                    report.submitted.push(SubmittedJob {
                        workflow_id: job.workflow_id,
                        document_name: job.document_name,
                        job_id,
                    });
                }
                Err(e) if e.is_throttle() => {
                    let code = e.code().unwrap_or_default().to_string();
                    log::warn!(
                        "[Admission] 提交 {}/{} 被限流 ({})，放弃本批剩余 {} 条",
                        job.workflow_id,
                        job.document_name,
                        code,
                        report.received - report.submitted.len() - report.dropped.len()
                    );
                    report.throttled = Some(code.clone());
                    return Err(CoreError::Throttled {
                        code,
                        report: Box::new(report),
                    });
                }
                Err(e) => {
                    log::warn!(
                        "[Admission] 提交 {}/{} 失败，丢弃: {}",
                        job.workflow_id,
                        job.document_name,
                        e
                    );
                    self.queue.delete(&message.receipt_handle).await?;
                    report.dropped.push(DroppedJob {
                        workflow_id: Some(job.workflow_id),
                        document_name: Some(job.document_name),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !report.dropped.is_empty() {
            log::warn!("[Admission] 本批丢弃 {} 个文档", report.dropped.len());
        }
        Ok(report)
    }

    /// 协调器第一步：保存回调令牌（只写一次），然后开始提交
    ///
    /// 限流不视为失败：返回的报告带有 `throttled`，后续完成通知会继续提交。
    pub async fn begin(&self, workflow_id: &str, token: &str) -> Result<DrainReport> {
        match self
            .ledger
            .update(workflow_id, LedgerUpdate::SetTokenIfAbsent(token.to_string()))
            .await
        {
            Ok(_) => log::info!("[Admission] 工作流 {} 已保存回调令牌", workflow_id),
            Err(LedgerError::ConditionFailed { .. }) => {
                log::info!("[Admission] 工作流 {} 的回调令牌已存在，保留原值", workflow_id)
            }
            Err(e) => {
                log::error!("[Admission] 工作流 {} 保存回调令牌失败: {}", workflow_id, e);
                return Err(e.into());
            }
        }

        match self.drain(self.config.batch_size).await {
            Err(CoreError::Throttled { report, .. }) => Ok(*report),
            other => other,
        }
    }
}
