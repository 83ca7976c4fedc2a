//! 阶段收尾
//!
//! OCR 阶段：把所有完成标记合并进台账的 `docs`，状态置为 complete，
//! 删除标记。脱敏阶段：脱敏批次结束后把 `de_identification_status` 置为 processed。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dispatcher::DispatchPayload;
use crate::error::Result;
use crate::ledger::{LedgerStore, LedgerUpdate};
use crate::paths::dir_prefix;
use crate::record::{DeIdentificationStatus, WorkflowRecord};
use crate::store::{ListFilter, ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOutput {
    pub workflow_id: String,
    pub bucket: String,
    pub phi_input_dir: String,
    pub de_identify: bool,
}

pub struct OcrFinalizer {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn LedgerStore>,
}

impl OcrFinalizer {
    pub fn new(store: Arc<dyn ObjectStore>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { store, ledger }
    }

    pub async fn finalize(&self, input: &DispatchPayload) -> Result<FinalizeOutput> {
        let markers = self
            .store
            .list(&dir_prefix(&input.tmp_process_dir), &ListFilter::default())
            .await?;

        let mut docs = BTreeMap::new();
        for key in &markers {
            let body = self.store.get(key).await?;
            let entry: BTreeMap<String, String> = serde_json::from_slice(&body)?;
            docs.extend(entry);
        }
        log::info!(
            "[Finalize] 工作流 {} 合并 {} 个完成标记",
            input.workflow_id,
            markers.len()
        );

        let record = self
            .ledger
            .update(
                &input.workflow_id,
                LedgerUpdate::CompleteOcr {
                    docs,
                    phi_input: input.phi_input_dir.clone(),
                },
            )
            .await?;

        if record.recorded_docs() != record.total_files {
            log::warn!(
                "[Finalize] 工作流 {} 仅记录 {}/{} 个文档",
                input.workflow_id,
                record.recorded_docs(),
                record.total_files
            );
        }

        self.store.delete(&markers).await?;

        Ok(FinalizeOutput {
            workflow_id: input.workflow_id.clone(),
            bucket: input.bucket.clone(),
            phi_input_dir: input.phi_input_dir.clone(),
            de_identify: record.de_identify,
        })
    }
}

/// 脱敏批次结束
pub async fn finish_de_identification(ledger: &dyn LedgerStore, workflow_id: &str) -> Result<WorkflowRecord> {
    let record = ledger
        .update(
            workflow_id,
            LedgerUpdate::SetDeIdentificationStatus(DeIdentificationStatus::Processed),
        )
        .await?;
    log::info!("[Finalize] 工作流 {} 脱敏完成", workflow_id);
    Ok(record)
}
