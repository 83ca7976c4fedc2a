//! 各外部接口的内存实现，用于测试和本地运行。
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no persistence, no distribution
//! - **Single-process only**: state is not visible across process boundaries
//! - **No long polling**: `wait_time` is accepted but receive returns immediately
//! - **Scripted services**: OCR, entity detection and coordinator responses are
//!   queued up front by the test

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::ledger::{LedgerError, LedgerStore, LedgerUpdate};
use crate::postprocess::PostProcessRequest;
use crate::queue::{JobQueue, QueueError, QueueMessage, ReceiveOptions};
use crate::record::WorkflowRecord;
use crate::services::{
    EntityDetectionService, EntityJobRequest, EntityJobStatus, OcrJobRequest, OcrService, PostProcessInvoker,
    ServiceError, WorkflowCoordinator,
};
use crate::store::{ListFilter, ObjectStore, StoreError};

fn store_poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend("object store lock poisoned".into())
}

fn ledger_poisoned<T>(_: PoisonError<T>) -> LedgerError {
    LedgerError::Backend("ledger lock poisoned".into())
}

fn queue_poisoned<T>(_: PoisonError<T>) -> QueueError {
    QueueError::Backend("queue lock poisoned".into())
}

fn service_poisoned<T>(_: PoisonError<T>) -> ServiceError {
    ServiceError::Unavailable("service lock poisoned".into())
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(key).and_then(|o| o.content_type.clone()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().map(|o| o.contains_key(key)).unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(&self, prefix: &str, filter: &ListFilter) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.read().map_err(store_poisoned)?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| filter.matches(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.read().map_err(store_poisoned)?;
        objects
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<(), StoreError> {
        let mut objects = self.objects.write().map_err(store_poisoned)?;
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.write().map_err(store_poisoned)?;
        let object = objects
            .get(source)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(source.to_string()))?;
        objects.insert(destination.to_string(), object);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut objects = self.objects.write().map_err(store_poisoned)?;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<String, WorkflowRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert(&self, record: WorkflowRecord) -> Result<(), LedgerError> {
        let mut records = self.records.write().map_err(ledger_poisoned)?;
        if records.contains_key(&record.workflow_id) {
            return Err(LedgerError::AlreadyExists(record.workflow_id));
        }
        records.insert(record.workflow_id.clone(), record);
        Ok(())
    }

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>, LedgerError> {
        let records = self.records.read().map_err(ledger_poisoned)?;
        Ok(records.get(workflow_id).cloned())
    }

    async fn update(&self, workflow_id: &str, update: LedgerUpdate) -> Result<WorkflowRecord, LedgerError> {
        let mut records = self.records.write().map_err(ledger_poisoned)?;
        let current = records
            .get_mut(workflow_id)
            .ok_or_else(|| LedgerError::NotFound(workflow_id.to_string()))?;

        // 条件不满足时记录保持原样
        let mut next = current.clone();
        update.apply(&mut next)?;
        *current = next.clone();
        Ok(next)
    }

    async fn query_by_submit_range(&self, start: i64, end: i64) -> Result<Vec<WorkflowRecord>, LedgerError> {
        let records = self.records.read().map_err(ledger_poisoned)?;
        let mut found: Vec<_> = records
            .values()
            .filter(|r| r.submit_ts >= start && r.submit_ts <= end)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.submit_ts);
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Job queue
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct QueueEntry {
    message_id: u64,
    body: String,
    receipt_handle: Option<String>,
    invisible_until: Option<Instant>,
    receive_count: u32,
}

/// 带可见性超时的内存队列
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    next_id: AtomicU64,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 队列中（含不可见）的消息数
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前可被接收的消息数
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|e| e.iter().filter(|m| m.invisible_until.map_or(true, |t| t <= now)).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().map_err(queue_poisoned)?;
        let mut received = Vec::new();

        for entry in entries.iter_mut() {
            if received.len() >= options.max_messages {
                break;
            }
            if entry.invisible_until.is_some_and(|t| t > now) {
                continue;
            }
            entry.receive_count += 1;
            let receipt = format!("{}-{}", entry.message_id, entry.receive_count);
            entry.receipt_handle = Some(receipt.clone());
            entry.invisible_until = Some(now + options.visibility_timeout);
            received.push(QueueMessage {
                receipt_handle: receipt,
                body: entry.body.clone(),
            });
        }

        Ok(received)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().map_err(queue_poisoned)?;
        let position = entries
            .iter()
            .position(|e| e.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| QueueError::UnknownReceipt(receipt_handle.to_string()))?;
        entries.remove(position);
        Ok(())
    }

    async fn send(&self, body: String) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().map_err(queue_poisoned)?;
        entries.push_back(QueueEntry {
            message_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            body,
            receipt_handle: None,
            invisible_until: None,
            receive_count: 0,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OCR service
// ---------------------------------------------------------------------------

/// 按脚本返回结果的 OCR 服务；脚本用完后自动生成任务 ID
#[derive(Debug, Default)]
pub struct ScriptedOcrService {
    script: Mutex<VecDeque<Result<String, ServiceError>>>,
    requests: Mutex<Vec<OcrJobRequest>>,
    next_job: AtomicU64,
}

impl ScriptedOcrService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<String, ServiceError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    /// 收到的全部请求（含失败的）
    pub fn requests(&self) -> Vec<OcrJobRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OcrService for ScriptedOcrService {
    async fn start_job(&self, request: &OcrJobRequest) -> Result<String, ServiceError> {
        self.requests.lock().map_err(service_poisoned)?.push(request.clone());
        let scripted = self.script.lock().map_err(service_poisoned)?.pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(format!("job-{}", self.next_job.fetch_add(1, Ordering::Relaxed) + 1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity detection service
// ---------------------------------------------------------------------------

/// 状态脚本的最后一项会被重复返回
#[derive(Debug, Default)]
pub struct ScriptedEntityDetection {
    start_failure: Mutex<Option<ServiceError>>,
    statuses: Mutex<VecDeque<Result<EntityJobStatus, ServiceError>>>,
    started: Mutex<Vec<EntityJobRequest>>,
    describe_calls: AtomicU64,
}

impl ScriptedEntityDetection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start(&self, error: ServiceError) {
        if let Ok(mut slot) = self.start_failure.lock() {
            *slot = Some(error);
        }
    }

    pub fn push_status(&self, status: Result<EntityJobStatus, ServiceError>) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.push_back(status);
        }
    }

    pub fn started(&self) -> Vec<EntityJobRequest> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn describe_calls(&self) -> u64 {
        self.describe_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EntityDetectionService for ScriptedEntityDetection {
    async fn start_job(&self, request: &EntityJobRequest) -> Result<String, ServiceError> {
        if let Some(error) = self.start_failure.lock().map_err(service_poisoned)?.take() {
            return Err(error);
        }
        let mut started = self.started.lock().map_err(service_poisoned)?;
        started.push(request.clone());
        Ok(format!("entity-job-{}", started.len()))
    }

    async fn describe_job(&self, _job_id: &str) -> Result<EntityJobStatus, ServiceError> {
        self.describe_calls.fetch_add(1, Ordering::Relaxed);
        let mut statuses = self.statuses.lock().map_err(service_poisoned)?;
        if statuses.len() > 1 {
            statuses
                .pop_front()
                .unwrap_or(Ok(EntityJobStatus::Submitted))
        } else {
            statuses.front().cloned().unwrap_or(Ok(EntityJobStatus::Submitted))
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow coordinator
// ---------------------------------------------------------------------------

/// 记录所有调用的协调器；同一令牌的第二次信号会被拒绝
#[derive(Debug, Default)]
pub struct RecordingCoordinator {
    executions: Mutex<Vec<(String, serde_json::Value)>>,
    signals: Mutex<Vec<(String, serde_json::Value)>>,
    fail_signals: AtomicBool,
}

impl RecordingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_signals(&self, fail: bool) {
        self.fail_signals.store(fail, Ordering::Relaxed);
    }

    pub fn executions(&self) -> Vec<(String, serde_json::Value)> {
        self.executions.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn signals(&self) -> Vec<(String, serde_json::Value)> {
        self.signals.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl WorkflowCoordinator for RecordingCoordinator {
    async fn start_execution(&self, name: &str, input: serde_json::Value) -> Result<String, ServiceError> {
        let mut executions = self.executions.lock().map_err(service_poisoned)?;
        if executions.iter().any(|(existing, _)| existing == name) {
            return Err(ServiceError::api("ExecutionAlreadyExists", name));
        }
        executions.push((name.to_string(), input));
        Ok(format!("execution:{}", name))
    }

    async fn signal_task_success(&self, token: &str, output: serde_json::Value) -> Result<(), ServiceError> {
        if self.fail_signals.load(Ordering::Relaxed) {
            return Err(ServiceError::Unavailable("coordinator unreachable".into()));
        }
        let mut signals = self.signals.lock().map_err(service_poisoned)?;
        if signals.iter().any(|(used, _)| used == token) {
            return Err(ServiceError::api("TaskTimedOut", "token already used"));
        }
        signals.push((token.to_string(), output));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Post-process handoff
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingPostProcess {
    requests: Mutex<Vec<PostProcessRequest>>,
    fail: AtomicBool,
}

impl RecordingPostProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn requests(&self) -> Vec<PostProcessRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PostProcessInvoker for RecordingPostProcess {
    async fn invoke(&self, request: PostProcessRequest) -> Result<(), ServiceError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(ServiceError::Unavailable("post-process target unavailable".into()));
        }
        self.requests.lock().map_err(service_poisoned)?.push(request);
        Ok(())
    }
}
