//! Core orchestration for the document workflow.
//!
//! 一次批量提交（工作流）经过以下阶段：受理 → 限流提交 OCR 任务 →
//! 完成跟踪与一次性派发 → OCR 阶段收尾 → 实体检测 → 分发与准备 → 脱敏。
//! 外部服务（对象存储、任务队列、台账、OCR、实体检测、协调器）都通过
//! trait 注入，[`memory`] 提供进程内实现。

pub mod admission;
pub mod detection;
pub mod dispatcher;
pub mod distribute;
pub mod error;
pub mod events;
pub mod finalize;
pub mod intake;
pub mod ledger;
pub mod memory;
pub mod paths;
pub mod postprocess;
pub mod query;
pub mod queue;
pub mod record;
pub mod redaction;
pub mod services;
pub mod store;
pub mod tracker;

pub use admission::{AdmissionConfig, AdmissionController, DrainReport, DroppedJob, SubmittedJob};
pub use detection::{DetectionConfig, DetectionJob, EntityDetectionPoller};
pub use dispatcher::{BatchDispatcher, DispatchOutcome, DispatchPayload};
pub use distribute::{DistributionReport, EntityDistributor, ItemFailure, PreparationReport, RedactionTask};
pub use error::{CoreError, Result};
pub use events::{BeginOcrInput, JobCompletion, ObjectCreated, OcrNotification};
pub use finalize::{finish_de_identification, FinalizeOutput, OcrFinalizer};
pub use intake::{Intake, IntakeReport, SubmissionManifest};
pub use ledger::{LedgerError, LedgerStore, LedgerUpdate};
pub use paths::Namespace;
pub use postprocess::{PostProcessReport, PostProcessRequest, PostProcessor, SpawningPostProcess};
pub use query::{DocumentView, WorkflowDetail, WorkflowQuery, WorkflowSummary};
pub use queue::{JobQueue, QueueError, QueuedDocJob};
pub use record::{DeIdentificationStatus, DocJobState, WorkflowRecord, WorkflowStatus};
pub use redaction::{redact, RedactOptions, RedactedArtifact, RedactionEngine, RedactionOutcome, RedactionReport};
pub use services::{
    EntityDetectionService, EntityJobStatus, NotificationChannel, OcrService, PostProcessInvoker, ServiceError,
    WorkflowCoordinator,
};
pub use store::{ListFilter, ObjectStore, StoreError};
pub use tracker::{CompletionTracker, TrackerOutcome};
