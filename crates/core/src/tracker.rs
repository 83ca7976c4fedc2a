//! 完成跟踪
//!
//! 每个 OCR 任务完成通知调用一次。写入完成标记后重新列举标记与输入文档，
//! 由两者数量判断批次是否完成，不维护计数器。标记写入是幂等的，
//! 重复或乱序的通知不会重复计数。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::admission::{AdmissionController, DrainReport};
use crate::dispatcher::{BatchDispatcher, DispatchOutcome};
use crate::error::{CoreError, Result};
use crate::events::OcrNotification;
use crate::paths::dir_prefix;
use crate::postprocess::PostProcessRequest;
use crate::record::DocJobState;
use crate::services::PostProcessInvoker;
use crate::store::{ListFilter, ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrackerOutcome {
    /// 仍有文档未完成，已继续提交
    Redrained { markers: usize, inputs: usize, report: DrainReport },
    /// 继续提交时被限流，等待队列重新投递
    BackedOff {
        markers: usize,
        inputs: usize,
        code: String,
        report: DrainReport,
    },
    Completed { dispatch: DispatchOutcome },
}

pub struct CompletionTracker {
    store: Arc<dyn ObjectStore>,
    admission: Arc<AdmissionController>,
    dispatcher: Arc<BatchDispatcher>,
    post_process: Arc<dyn PostProcessInvoker>,
}

impl CompletionTracker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        admission: Arc<AdmissionController>,
        dispatcher: Arc<BatchDispatcher>,
        post_process: Arc<dyn PostProcessInvoker>,
    ) -> Self {
        Self {
            store,
            admission,
            dispatcher,
            post_process,
        }
    }

    pub async fn on_job_complete(&self, notification: OcrNotification) -> Result<TrackerOutcome> {
        let done = notification.validate()?;
        let ns = &done.namespace;
        log::info!(
            "[Tracker] 任务 {} 完成 ({})，工作流 {} 文档 {}",
            done.job_id,
            done.status,
            done.workflow_id,
            done.document
        );

        let handoff = PostProcessRequest {
            workflow_id: done.workflow_id.clone(),
            output_path: ns.job_output(&done.workflow_id, &done.job_id),
            doc_name: done.document.clone(),
        };
        if let Err(e) = self.post_process.invoke(handoff).await {
            log::warn!("[Tracker] {} 后处理交接失败: {}", done.document, e);
        }

        let state = DocJobState::new(&done.status, &done.job_id);
        let marker = BTreeMap::from([(done.document.clone(), state.encode())]);
        self.store
            .put(
                &ns.marker(&done.workflow_id, &done.document),
                serde_json::to_vec(&marker)?,
                Some("application/json"),
            )
            .await?;

        let filter = ListFilter::default();
        let markers = self
            .store
            .list(&dir_prefix(&ns.temp_dir(&done.workflow_id)), &filter)
            .await?
            .len();
        let inputs = self.store.list(&ns.input_dir(&done.workflow_id), &filter).await?.len();
        log::debug!("[Tracker] 工作流 {}: {}/{} 个文档已完成", done.workflow_id, markers, inputs);

        if markers < inputs {
            return match self.admission.drain(self.admission.batch_size()).await {
                Ok(report) => Ok(TrackerOutcome::Redrained { markers, inputs, report }),
                Err(CoreError::Throttled { code, report }) => {
                    log::warn!("[Tracker] 工作流 {} 继续提交被限流 ({})", done.workflow_id, code);
                    Ok(TrackerOutcome::BackedOff {
                        markers,
                        inputs,
                        code,
                        report: *report,
                    })
                }
                Err(e) => Err(e),
            };
        }

        let dispatch = self.dispatcher.dispatch(&done.workflow_id, &done.bucket, ns).await?;
        Ok(TrackerOutcome::Completed { dispatch })
    }
}
