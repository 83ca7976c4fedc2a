//! 事件入口
//!
//! 每个外部触发（对象上传、协调器步骤、OCR 完成通知、查询）对应一个
//! [`PipelineEvent`] 变体。事件在边界处校验后路由到对应组件，
//! 返回值是该步骤的 JSON 输出。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use idp_core::{
    finish_de_identification, AdmissionController, BatchDispatcher, BeginOcrInput, CompletionTracker, CoreError,
    DispatchPayload, EntityDetectionPoller, EntityDetectionService, EntityDistributor, Intake, JobQueue, LedgerStore,
    ObjectCreated, ObjectStore, OcrFinalizer, OcrNotification, OcrService, PostProcessRequest, PostProcessor,
    RedactionEngine, RedactionTask, Result, SpawningPostProcess, WorkflowCoordinator, WorkflowQuery,
};

use crate::config::PipelineConfig;

/// 外部服务句柄
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn ObjectStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub queue: Arc<dyn JobQueue>,
    pub ocr: Arc<dyn OcrService>,
    pub entities: Arc<dyn EntityDetectionService>,
    pub coordinator: Arc<dyn WorkflowCoordinator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// 提交清单上传
    Submission(ObjectCreated),
    BeginOcr(BeginOcrInput),
    OcrNotification(OcrNotification),
    OcrPostProcess(PostProcessRequest),
    FinalizeOcr(DispatchPayload),
    StartEntityDetection {
        workflow_id: String,
        input_path: String,
        #[serde(default)]
        output_path: Option<String>,
    },
    PollEntityDetection {
        workflow_id: String,
        job_id: String,
    },
    DistributeEntities {
        workflow_id: String,
        #[serde(default)]
        output_dir: Option<String>,
    },
    PrepareRedaction {
        doc_prefixes: Vec<String>,
    },
    Redact {
        workflow_id: String,
        tasks: Vec<RedactionTask>,
    },
    FinishDeIdentification {
        workflow_id: String,
    },
    ListWorkflows {
        start: i64,
        end: i64,
    },
    DescribeWorkflow {
        workflow_id: String,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Submission(_) => "submission",
            PipelineEvent::BeginOcr(_) => "begin_ocr",
            PipelineEvent::OcrNotification(_) => "ocr_notification",
            PipelineEvent::OcrPostProcess(_) => "ocr_post_process",
            PipelineEvent::FinalizeOcr(_) => "finalize_ocr",
            PipelineEvent::StartEntityDetection { .. } => "start_entity_detection",
            PipelineEvent::PollEntityDetection { .. } => "poll_entity_detection",
            PipelineEvent::DistributeEntities { .. } => "distribute_entities",
            PipelineEvent::PrepareRedaction { .. } => "prepare_redaction",
            PipelineEvent::Redact { .. } => "redact",
            PipelineEvent::FinishDeIdentification { .. } => "finish_de_identification",
            PipelineEvent::ListWorkflows { .. } => "list_workflows",
            PipelineEvent::DescribeWorkflow { .. } => "describe_workflow",
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    ledger: Arc<dyn LedgerStore>,
    intake: Intake,
    admission: Arc<AdmissionController>,
    tracker: CompletionTracker,
    processor: Arc<PostProcessor>,
    finalizer: OcrFinalizer,
    poller: EntityDetectionPoller,
    distributor: EntityDistributor,
    redaction: RedactionEngine,
    query: WorkflowQuery,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, ports: Ports) -> Self {
        let namespace = config.namespace();
        let processor = Arc::new(PostProcessor::new(ports.store.clone()));
        let admission = Arc::new(AdmissionController::new(
            ports.queue.clone(),
            ports.ocr.clone(),
            ports.ledger.clone(),
            namespace.clone(),
            config.bucket.clone(),
            config.admission(),
        ));
        let dispatcher = Arc::new(BatchDispatcher::new(ports.ledger.clone(), ports.coordinator.clone()));
        let tracker = CompletionTracker::new(
            ports.store.clone(),
            admission.clone(),
            dispatcher,
            Arc::new(SpawningPostProcess::new(processor.clone())),
        );

        Self {
            intake: Intake::new(
                ports.store.clone(),
                ports.ledger.clone(),
                ports.queue.clone(),
                ports.coordinator.clone(),
            ),
            admission,
            tracker,
            processor,
            finalizer: OcrFinalizer::new(ports.store.clone(), ports.ledger.clone()),
            poller: EntityDetectionPoller::new(
                ports.entities.clone(),
                ports.ledger.clone(),
                namespace.clone(),
                config.bucket.clone(),
                config.detection(),
            ),
            distributor: EntityDistributor::new(ports.store.clone(), namespace.clone()),
            redaction: RedactionEngine::new(ports.store.clone(), config.redact_options()),
            query: WorkflowQuery::new(ports.ledger.clone(), ports.store, namespace),
            ledger: ports.ledger,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn handle_json(&self, event: Value) -> Result<Value> {
        let event: PipelineEvent =
            serde_json::from_value(event).map_err(|e| CoreError::InvalidEvent(e.to_string()))?;
        self.handle(event).await
    }

    pub async fn handle(&self, event: PipelineEvent) -> Result<Value> {
        let name = event.name();
        log::info!("[Pipeline] 处理事件 {}", name);

        let output = match event {
            PipelineEvent::Submission(created) => {
                created.validate()?;
                serde_json::to_value(self.intake.submit(&created.bucket, &created.key).await?)?
            }
            PipelineEvent::BeginOcr(input) => {
                input.validate()?;
                serde_json::to_value(self.admission.begin(&input.workflow_id, &input.token).await?)?
            }
            PipelineEvent::OcrNotification(notification) => {
                serde_json::to_value(self.tracker.on_job_complete(notification).await?)?
            }
            PipelineEvent::OcrPostProcess(request) => serde_json::to_value(self.processor.process(&request).await?)?,
            PipelineEvent::FinalizeOcr(payload) => serde_json::to_value(self.finalizer.finalize(&payload).await?)?,
            PipelineEvent::StartEntityDetection {
                workflow_id,
                input_path,
                output_path,
            } => serde_json::to_value(
                self.poller
                    .start(&workflow_id, &input_path, output_path.as_deref())
                    .await?,
            )?,
            PipelineEvent::PollEntityDetection { workflow_id, job_id } => {
                let status = self.poller.poll(&workflow_id, &job_id, self.poller.deadline()).await?;
                serde_json::json!({ "workflow_id": workflow_id, "job_id": job_id, "status": status })
            }
            PipelineEvent::DistributeEntities {
                workflow_id,
                output_dir,
            } => serde_json::to_value(
                self.distributor
                    .distribute(&workflow_id, output_dir.as_deref())
                    .await?,
            )?,
            PipelineEvent::PrepareRedaction { doc_prefixes } => {
                serde_json::to_value(self.distributor.prepare(&doc_prefixes).await?)?
            }
            PipelineEvent::Redact { workflow_id, tasks } => {
                let record = self
                    .ledger
                    .get(&workflow_id)
                    .await?
                    .ok_or_else(|| CoreError::WorkflowNotFound(workflow_id.clone()))?;
                serde_json::to_value(self.redaction.redact_batch(&tasks, record.retain_orig_docs).await)?
            }
            PipelineEvent::FinishDeIdentification { workflow_id } => {
                let record = finish_de_identification(self.ledger.as_ref(), &workflow_id).await?;
                serde_json::json!({
                    "workflow_id": record.workflow_id,
                    "de_identification_status": record.de_identification_status,
                })
            }
            PipelineEvent::ListWorkflows { start, end } => serde_json::to_value(self.query.list(start, end).await?)?,
            PipelineEvent::DescribeWorkflow { workflow_id } => {
                serde_json::to_value(self.query.describe(&workflow_id).await?)?
            }
        };

        log::debug!("[Pipeline] 事件 {} 输出: {}", name, output);
        Ok(output)
    }
}
