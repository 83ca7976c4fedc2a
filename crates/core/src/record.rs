//! 工作流台账记录
//!
//! 每次批量提交对应一条记录，以 `(workflow_id, "input/<workflow_id>/")` 为键。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 提交时 `docs` 中每个文档的占位值
pub const DOC_PLACEHOLDER: &str = "ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Submitted,
    Processing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeIdentificationStatus {
    #[serde(alias = "not_requested", alias = "not-requested")]
    NotStarted,
    Processing,
    Processed,
    Failed,
}

/// 单个文档的异步任务状态，编码为 `"<status>:<job_id>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocJobState {
    pub status: String,
    pub job_id: String,
}

impl DocJobState {
    pub fn new(status: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            job_id: job_id.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.status, self.job_id)
    }

    /// 解析紧凑编码；占位值或格式不符时返回 `None`
    pub fn parse(value: &str) -> Option<Self> {
        let (status, job_id) = value.split_once(':')?;
        if status.is_empty() || job_id.is_empty() {
            return None;
        }
        Some(Self::new(status, job_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub sort_key: String,
    pub status: WorkflowStatus,
    /// 文档名 → `"<status>:<job_id>"`，键在提交时固定
    pub docs: BTreeMap<String, String>,
    pub total_files: usize,
    /// 提交时间（毫秒时间戳）
    pub submit_ts: i64,
    pub de_identify: bool,
    pub retain_orig_docs: bool,
    pub de_identification_status: DeIdentificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phi_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    /// 新提交的工作流，所有文档以占位值登记
    pub fn new<I, S>(workflow_id: &str, documents: I, submit_ts: i64, de_identify: bool, retain_orig_docs: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let docs: BTreeMap<String, String> = documents
            .into_iter()
            .map(|d| (d.into(), DOC_PLACEHOLDER.to_string()))
            .collect();

        Self {
            workflow_id: workflow_id.to_string(),
            sort_key: Self::sort_key_for(workflow_id),
            status: WorkflowStatus::Processing,
            total_files: docs.len(),
            docs,
            submit_ts,
            de_identify,
            retain_orig_docs,
            de_identification_status: if de_identify {
                DeIdentificationStatus::Processing
            } else {
                DeIdentificationStatus::NotStarted
            },
            workflow_token: None,
            phi_input: None,
            dispatched_at: None,
        }
    }

    pub fn sort_key_for(workflow_id: &str) -> String {
        format!("input/{}/", workflow_id)
    }

    /// 已记录任务结果的文档数
    pub fn recorded_docs(&self) -> usize {
        self.docs.values().filter(|v| DocJobState::parse(v).is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.recorded_docs() == self.total_files
    }
}
