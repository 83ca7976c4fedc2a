//! 工作流查询
//!
//! 只读视图。回调令牌和派发占位属于内部状态，不出现在任何查询结果中。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ledger::LedgerStore;
use crate::paths::{dir_prefix, Namespace, REDACTED_DOC_DIR};
use crate::record::{DeIdentificationStatus, DocJobState, WorkflowRecord, WorkflowStatus};
use crate::store::{ListFilter, ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub total_files: usize,
    pub completed_files: usize,
    pub submit_ts: i64,
    pub de_identify: bool,
    pub de_identification_status: DeIdentificationStatus,
}

impl From<&WorkflowRecord> for WorkflowSummary {
    fn from(record: &WorkflowRecord) -> Self {
        Self {
            workflow_id: record.workflow_id.clone(),
            status: record.status,
            total_files: record.total_files,
            completed_files: record.recorded_docs(),
            submit_ts: record.submit_ts,
            de_identify: record.de_identify,
            de_identification_status: record.de_identification_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentView {
    pub document: String,
    pub status: String,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDetail {
    #[serde(flatten)]
    pub summary: WorkflowSummary,
    pub documents: Vec<DocumentView>,
    /// 脱敏完成后才填充
    pub redacted_documents: Vec<String>,
}

pub struct WorkflowQuery {
    ledger: Arc<dyn LedgerStore>,
    store: Arc<dyn ObjectStore>,
    namespace: Namespace,
}

impl WorkflowQuery {
    pub fn new(ledger: Arc<dyn LedgerStore>, store: Arc<dyn ObjectStore>, namespace: Namespace) -> Self {
        Self {
            ledger,
            store,
            namespace,
        }
    }

    /// 按提交时间（毫秒，闭区间）列出工作流
    pub async fn list(&self, start: i64, end: i64) -> Result<Vec<WorkflowSummary>> {
        let records = self.ledger.query_by_submit_range(start, end).await?;
        Ok(records.iter().map(WorkflowSummary::from).collect())
    }

    pub async fn describe(&self, workflow_id: &str) -> Result<WorkflowDetail> {
        let record = self
            .ledger
            .get(workflow_id)
            .await?
            .ok_or_else(|| CoreError::WorkflowNotFound(workflow_id.to_string()))?;

        let documents = record
            .docs
            .iter()
            .map(|(document, value)| match DocJobState::parse(value) {
                Some(state) => DocumentView {
                    document: document.clone(),
                    status: state.status,
                    job_id: Some(state.job_id),
                },
                None => DocumentView {
                    document: document.clone(),
                    status: value.clone(),
                    job_id: None,
                },
            })
            .collect();

        let redacted_documents = if record.de_identification_status == DeIdentificationStatus::Processed {
            let filter = ListFilter::search(format!("/{}/", REDACTED_DOC_DIR));
            self.store
                .list(&dir_prefix(&self.namespace.ocr_output(workflow_id)), &filter)
                .await?
        } else {
            Vec::new()
        };

        Ok(WorkflowDetail {
            summary: WorkflowSummary::from(&record),
            documents,
            redacted_documents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerUpdate;
    use crate::memory::{InMemoryLedger, InMemoryObjectStore};
    use std::collections::BTreeMap;

    async fn setup() -> (Arc<InMemoryLedger>, Arc<InMemoryObjectStore>, WorkflowQuery) {
        let ledger = Arc::new(InMemoryLedger::new());
        let store = Arc::new(InMemoryObjectStore::new());
        ledger
            .insert(WorkflowRecord::new("wf1", ["a.pdf", "b.png"], 1_000, true, false))
            .await
            .unwrap();
        ledger
            .insert(WorkflowRecord::new("wf2", ["c.pdf"], 5_000, false, false))
            .await
            .unwrap();
        ledger
            .update("wf1", LedgerUpdate::SetTokenIfAbsent("secret-token".into()))
            .await
            .unwrap();
        let query = WorkflowQuery::new(ledger.clone(), store.clone(), Namespace::new("public"));
        (ledger, store, query)
    }

    #[tokio::test]
    async fn test_list_by_range() {
        let (_, _, query) = setup().await;
        let found = query.list(0, 2_000).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].workflow_id, "wf1");
        assert_eq!(query.list(0, 10_000).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_describe_hides_token() {
        let (ledger, store, query) = setup().await;
        ledger
            .update(
                "wf1",
                LedgerUpdate::CompleteOcr {
                    docs: BTreeMap::from([("a.pdf".to_string(), "succeeded:j1".to_string())]),
                    phi_input: "public/phi-input/wf1".into(),
                },
            )
            .await
            .unwrap();
        store
            .put("public/output/wf1/j1/redacted-doc/a.pdf", b"pdf".to_vec(), None)
            .await
            .unwrap();

        let detail = query.describe("wf1").await.unwrap();
        assert_eq!(
            detail.documents,
            vec![
                DocumentView {
                    document: "a.pdf".into(),
                    status: "succeeded".into(),
                    job_id: Some("j1".into()),
                },
                DocumentView {
                    document: "b.png".into(),
                    status: "ready".into(),
                    job_id: None,
                },
            ]
        );
        // 脱敏未完成时不列出产物
        assert!(detail.redacted_documents.is_empty());
        let rendered = serde_json::to_string(&detail).unwrap();
        assert!(!rendered.contains("secret-token"));

        ledger
            .update(
                "wf1",
                LedgerUpdate::SetDeIdentificationStatus(DeIdentificationStatus::Processed),
            )
            .await
            .unwrap();
        let detail = query.describe("wf1").await.unwrap();
        assert_eq!(detail.redacted_documents, vec!["public/output/wf1/j1/redacted-doc/a.pdf".to_string()]);
    }

    #[tokio::test]
    async fn test_describe_unknown_workflow() {
        let (_, _, query) = setup().await;
        assert!(matches!(query.describe("nope").await, Err(CoreError::WorkflowNotFound(_))));
    }
}
