//! 工作流受理
//!
//! 提交清单 `<root>/workflows/<wf>.json` 写入后触发：登记台账、
//! 为每个文档入队一条提交请求，并启动协调器执行。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ledger::LedgerStore;
use crate::paths::Namespace;
use crate::queue::{JobQueue, QueuedDocJob};
use crate::record::WorkflowRecord;
use crate::services::WorkflowCoordinator;
use crate::store::ObjectStore;

/// 提交清单
///
/// 输入目录固定为 `<root>/input/<wf>/`，完成跟踪和原件暂存都依赖这一布局。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionManifest {
    pub workflow_id: String,
    pub documents: Vec<String>,
    /// 毫秒时间戳，缺省取受理时间
    #[serde(default)]
    pub submit_ts: Option<i64>,
    #[serde(default)]
    pub de_identify: bool,
    #[serde(default)]
    pub retain_orig_docs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeReport {
    pub workflow_id: String,
    pub execution: String,
    pub queued: usize,
}

pub struct Intake {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn LedgerStore>,
    queue: Arc<dyn JobQueue>,
    coordinator: Arc<dyn WorkflowCoordinator>,
}

impl Intake {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn LedgerStore>,
        queue: Arc<dyn JobQueue>,
        coordinator: Arc<dyn WorkflowCoordinator>,
    ) -> Self {
        Self {
            store,
            ledger,
            queue,
            coordinator,
        }
    }

    pub async fn submit(&self, bucket: &str, manifest_key: &str) -> Result<IntakeReport> {
        let manifest: SubmissionManifest = serde_json::from_slice(&self.store.get(manifest_key).await?)?;
        self.accept(bucket, &Namespace::from_key(manifest_key), manifest).await
    }

    /// 受理已解析的清单
    pub async fn accept(&self, bucket: &str, namespace: &Namespace, manifest: SubmissionManifest) -> Result<IntakeReport> {
        let workflow_id = manifest.workflow_id.trim().to_string();
        if workflow_id.is_empty() {
            return Err(CoreError::InvalidEvent("manifest has no workflow_id".into()));
        }
        if manifest.documents.is_empty() {
            return Err(CoreError::InvalidEvent(format!("workflow {} lists no documents", workflow_id)));
        }

        let submit_ts = manifest
            .submit_ts
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let record = WorkflowRecord::new(
            &workflow_id,
            manifest.documents.iter().map(String::as_str),
            submit_ts,
            manifest.de_identify,
            manifest.retain_orig_docs,
        );
        if record.total_files != manifest.documents.len() {
            log::warn!(
                "[Intake] 工作流 {} 清单含重复文档名，登记 {} 个",
                workflow_id,
                record.total_files
            );
        }
        let documents: Vec<String> = record.docs.keys().cloned().collect();
        self.ledger.insert(record).await?;

        let input_path = Namespace::default_input_path(&workflow_id);
        for document in &documents {
            let job = QueuedDocJob {
                workflow_id: workflow_id.clone(),
                input_path: input_path.clone(),
                document_name: document.clone(),
            };
            log::debug!("[Intake] 入队 {}", namespace.input_document(&input_path, document));
            self.queue.send(job.to_body()?).await?;
        }

        let name = format!("idp-workflow-{}", workflow_id);
        let execution = self
            .coordinator
            .start_execution(&name, serde_json::json!({ "workflow_id": workflow_id, "bucket": bucket }))
            .await?;
        log::info!(
            "[Intake] 工作流 {} 已受理 {} 个文档，执行 {}",
            workflow_id,
            documents.len(),
            execution
        );

        Ok(IntakeReport {
            workflow_id,
            execution,
            queued: documents.len(),
        })
    }
}
