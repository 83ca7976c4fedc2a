//! 实体检测任务的提交与轮询
//!
//! 轮询是唯一会阻塞调用方的组件：每 2 秒查询一次任务状态，直到终态或
//! 10 分钟期限。超时以状态值返回，不作为错误抛出。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Result;
use crate::ledger::{LedgerStore, LedgerUpdate};
use crate::paths::Namespace;
use crate::record::DeIdentificationStatus;
use crate::services::{EntityDetectionService, EntityJobRequest, EntityJobStatus};

#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub poll_interval: Duration,
    pub deadline: Duration,
    pub language: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            deadline: Duration::from_secs(10 * 60),
            language: "en".to_string(),
        }
    }
}

/// 提交步骤的输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionJob {
    pub workflow_id: String,
    pub bucket: String,
    pub job_id: Option<String>,
    pub output_dir: String,
}

pub struct EntityDetectionPoller {
    service: Arc<dyn EntityDetectionService>,
    ledger: Arc<dyn LedgerStore>,
    namespace: Namespace,
    bucket: String,
    config: DetectionConfig,
}

impl EntityDetectionPoller {
    pub fn new(
        service: Arc<dyn EntityDetectionService>,
        ledger: Arc<dyn LedgerStore>,
        namespace: Namespace,
        bucket: impl Into<String>,
        config: DetectionConfig,
    ) -> Self {
        Self {
            service,
            ledger,
            namespace,
            bucket: bucket.into(),
            config,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.config.deadline
    }

    /// 提交批量实体检测任务
    ///
    /// 提交失败时把 `de_identification_status` 置为 failed，返回的 `job_id` 为空。
    pub async fn start(&self, workflow_id: &str, input_path: &str, output_path: Option<&str>) -> Result<DetectionJob> {
        let output_dir = output_path
            .map(str::to_string)
            .unwrap_or_else(|| self.namespace.phi_output_dir(workflow_id));
        let request = EntityJobRequest {
            job_name: format!("phi-job-{}", workflow_id),
            bucket: self.bucket.clone(),
            input_prefix: input_path.to_string(),
            output_prefix: output_dir.clone(),
            language: self.config.language.clone(),
        };

        let job_id = match self.service.start_job(&request).await {
            Ok(job_id) => {
                log::info!("[Detection] 工作流 {} 实体检测任务已提交: {}", workflow_id, job_id);
                Some(job_id)
            }
            Err(e) => {
                log::error!("[Detection] 工作流 {} 提交实体检测失败: {}", workflow_id, e);
                self.mark_failed(workflow_id).await?;
                None
            }
        };

        Ok(DetectionJob {
            workflow_id: workflow_id.to_string(),
            bucket: self.bucket.clone(),
            job_id,
            output_dir,
        })
    }

    /// 轮询到终态或期限，返回最后观察到的状态
    pub async fn poll(&self, workflow_id: &str, job_id: &str, deadline: Duration) -> Result<EntityJobStatus> {
        let started = Instant::now();
        let mut last = EntityJobStatus::Submitted;

        loop {
            match self.service.describe_job(job_id).await {
                Ok(status) => {
                    last = status;
                    log::debug!("[Detection] 任务 {} 状态 {:?}", job_id, status);
                    if status.is_terminal() {
                        if status.is_failure() {
                            log::warn!("[Detection] 任务 {} 结束于 {:?}", job_id, status);
                            self.mark_failed(workflow_id).await?;
                        } else {
                            log::info!("[Detection] 任务 {} 完成", job_id);
                        }
                        return Ok(status);
                    }
                }
                Err(e) => {
                    log::error!("[Detection] 查询任务 {} 失败: {}", job_id, e);
                    self.mark_failed(workflow_id).await?;
                    return Ok(EntityJobStatus::Failed);
                }
            }

            if started.elapsed() + self.config.poll_interval > deadline {
                log::warn!(
                    "[Detection] 任务 {} 在 {:?} 内未结束，最后状态 {:?}",
                    job_id,
                    deadline,
                    last
                );
                return Ok(last);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn mark_failed(&self, workflow_id: &str) -> Result<()> {
        self.ledger
            .update(
                workflow_id,
                LedgerUpdate::SetDeIdentificationStatus(DeIdentificationStatus::Failed),
            )
            .await?;
        Ok(())
    }
}
