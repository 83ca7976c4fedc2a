//! 工作流台账接口
//!
//! 所有写入都是按工作流主键的字段级条件更新。条件判断集中在
//! [`LedgerUpdate::apply`]，各后端在持有该记录的写锁（或事务）时调用它。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::record::{DeIdentificationStatus, WorkflowRecord, WorkflowStatus};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("workflow not found: {0}")]
    NotFound(String),
    #[error("workflow already exists: {0}")]
    AlreadyExists(String),
    #[error("condition failed for workflow {workflow_id}: {reason}")]
    ConditionFailed { workflow_id: String, reason: String },
    #[error("ledger backend error: {0}")]
    Backend(String),
}

/// 字段级更新
#[derive(Debug, Clone)]
pub enum LedgerUpdate {
    /// 仅在尚无令牌时写入
    SetTokenIfAbsent(String),
    SetStatus(WorkflowStatus),
    /// OCR 阶段结束：写入各文档结果、状态置为 complete、记录实体检测输入目录
    CompleteOcr {
        docs: BTreeMap<String, String>,
        phi_input: String,
    },
    SetDeIdentificationStatus(DeIdentificationStatus),
    /// 仅在尚未派发时占位
    ClaimDispatch(DateTime<Utc>),
}

impl LedgerUpdate {
    pub fn apply(self, record: &mut WorkflowRecord) -> Result<(), LedgerError> {
        let workflow_id = record.workflow_id.clone();
        let condition_failed = |reason: &str| LedgerError::ConditionFailed {
            workflow_id: workflow_id.clone(),
            reason: reason.to_string(),
        };

        match self {
            LedgerUpdate::SetTokenIfAbsent(token) => {
                if record.workflow_token.is_some() {
                    return Err(condition_failed("workflow_token already set"));
                }
                record.workflow_token = Some(token);
            }
            LedgerUpdate::SetStatus(status) => record.status = status,
            LedgerUpdate::CompleteOcr { docs, phi_input } => {
                for (name, value) in docs {
                    match record.docs.get_mut(&name) {
                        Some(slot) => *slot = value,
                        None => log::warn!(
                            "[Ledger] 工作流 {} 不包含文档 {}，忽略其结果",
                            record.workflow_id,
                            name
                        ),
                    }
                }
                record.status = WorkflowStatus::Complete;
                record.phi_input = Some(phi_input);
            }
            LedgerUpdate::SetDeIdentificationStatus(status) => record.de_identification_status = status,
            LedgerUpdate::ClaimDispatch(at) => {
                if record.dispatched_at.is_some() {
                    return Err(condition_failed("batch already dispatched"));
                }
                record.dispatched_at = Some(at);
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// 插入新记录，主键已存在时返回 `AlreadyExists`
    async fn insert(&self, record: WorkflowRecord) -> Result<(), LedgerError>;

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>, LedgerError>;

    /// 原子地应用一次更新并返回更新后的记录
    async fn update(&self, workflow_id: &str, update: LedgerUpdate) -> Result<WorkflowRecord, LedgerError>;

    /// 按提交时间（毫秒，闭区间）查询
    async fn query_by_submit_range(&self, start: i64, end: i64) -> Result<Vec<WorkflowRecord>, LedgerError>;
}
