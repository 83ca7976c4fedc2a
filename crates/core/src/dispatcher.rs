//! 批次完成派发
//!
//! 取出台账中保存的回调令牌并通知协调器继续执行。派发前先在台账上
//! 条件写入 `dispatched_at`，同一工作流只有一次调用能拿到该占位，
//! 其余重复调用返回 [`DispatchOutcome::AlreadyDispatched`] 而不会再发信号。
//!
//! 发信号失败时占位保留，工作流停在当前状态，需要外部监控介入。

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ledger::{LedgerError, LedgerStore, LedgerUpdate};
use crate::paths::Namespace;
use crate::services::WorkflowCoordinator;

/// 派发给协调器的输出，同时是 OCR 阶段收尾步骤的输入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub workflow_id: String,
    pub bucket: String,
    pub tmp_process_dir: String,
    pub phi_input_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Signalled { workflow_id: String },
    AlreadyDispatched { workflow_id: String },
}

pub struct BatchDispatcher {
    ledger: Arc<dyn LedgerStore>,
    coordinator: Arc<dyn WorkflowCoordinator>,
}

impl BatchDispatcher {
    pub fn new(ledger: Arc<dyn LedgerStore>, coordinator: Arc<dyn WorkflowCoordinator>) -> Self {
        Self { ledger, coordinator }
    }

    pub async fn dispatch(&self, workflow_id: &str, bucket: &str, namespace: &Namespace) -> Result<DispatchOutcome> {
        let record = self
            .ledger
            .get(workflow_id)
            .await
            .map_err(|e| {
                log::error!("[Dispatch] 读取工作流 {} 失败: {}", workflow_id, e);
                e
            })?
            .ok_or_else(|| CoreError::WorkflowNotFound(workflow_id.to_string()))?;

        if record.dispatched_at.is_some() {
            log::info!("[Dispatch] 工作流 {} 已派发，忽略重复调用", workflow_id);
            return Ok(DispatchOutcome::AlreadyDispatched {
                workflow_id: workflow_id.to_string(),
            });
        }

        let Some(token) = record.workflow_token else {
            log::error!("[Dispatch] 工作流 {} 没有回调令牌", workflow_id);
            return Err(CoreError::MissingToken(workflow_id.to_string()));
        };

        match self
            .ledger
            .update(workflow_id, LedgerUpdate::ClaimDispatch(Utc::now()))
            .await
        {
            Ok(_) => {}
            Err(LedgerError::ConditionFailed { .. }) => {
                log::info!("[Dispatch] 工作流 {} 已被并发调用派发", workflow_id);
                return Ok(DispatchOutcome::AlreadyDispatched {
                    workflow_id: workflow_id.to_string(),
                });
            }
            Err(e) => {
                log::error!("[Dispatch] 工作流 {} 派发占位失败: {}", workflow_id, e);
                return Err(e.into());
            }
        }

        let payload = DispatchPayload {
            workflow_id: workflow_id.to_string(),
            bucket: bucket.to_string(),
            tmp_process_dir: namespace.temp_dir(workflow_id),
            phi_input_dir: namespace.phi_input_dir(workflow_id),
        };
        let output = serde_json::json!({ "Payload": payload });

        if let Err(e) = self.coordinator.signal_task_success(&token, output).await {
            log::error!("[Dispatch] 工作流 {} 通知协调器失败: {}", workflow_id, e);
            return Err(e.into());
        }

        log::info!("[Dispatch] 工作流 {} 全部文档完成，已通知协调器", workflow_id);
        Ok(DispatchOutcome::Signalled {
            workflow_id: workflow_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryLedger, RecordingCoordinator};
    use crate::record::WorkflowRecord;

    async fn setup(token: Option<&str>) -> (Arc<InMemoryLedger>, Arc<RecordingCoordinator>, BatchDispatcher) {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger
            .insert(WorkflowRecord::new("wf1", ["a.pdf"], 0, true, false))
            .await
            .unwrap();
        if let Some(token) = token {
            ledger
                .update("wf1", LedgerUpdate::SetTokenIfAbsent(token.into()))
                .await
                .unwrap();
        }
        let coordinator = Arc::new(RecordingCoordinator::new());
        let dispatcher = BatchDispatcher::new(ledger.clone(), coordinator.clone());
        (ledger, coordinator, dispatcher)
    }

    #[tokio::test]
    async fn test_signals_payload_once() {
        let (_, coordinator, dispatcher) = setup(Some("tok")).await;
        let ns = Namespace::new("public");

        let first = dispatcher.dispatch("wf1", "bucket", &ns).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Signalled { .. }));
        let second = dispatcher.dispatch("wf1", "bucket", &ns).await.unwrap();
        assert!(matches!(second, DispatchOutcome::AlreadyDispatched { .. }));

        let signals = coordinator.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].0, "tok");
        assert_eq!(
            signals[0].1,
            serde_json::json!({"Payload": {
                "workflow_id": "wf1",
                "bucket": "bucket",
                "tmp_process_dir": "public/temp/wf1",
                "phi_input_dir": "public/phi-input/wf1"
            }})
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_reported() {
        let (_, coordinator, dispatcher) = setup(None).await;
        let result = dispatcher.dispatch("wf1", "bucket", &Namespace::new("public")).await;
        assert!(matches!(result, Err(CoreError::MissingToken(_))));
        assert!(coordinator.signals().is_empty());
    }

    #[tokio::test]
    async fn test_failed_signal_keeps_claim() {
        let (ledger, coordinator, dispatcher) = setup(Some("tok")).await;
        coordinator.set_fail_signals(true);
        let ns = Namespace::new("public");

        assert!(dispatcher.dispatch("wf1", "bucket", &ns).await.is_err());
        let record = ledger.get("wf1").await.unwrap().unwrap();
        assert!(record.dispatched_at.is_some());

        coordinator.set_fail_signals(false);
        let retry = dispatcher.dispatch("wf1", "bucket", &ns).await.unwrap();
        assert!(matches!(retry, DispatchOutcome::AlreadyDispatched { .. }));
        assert!(coordinator.signals().is_empty());
    }
}
