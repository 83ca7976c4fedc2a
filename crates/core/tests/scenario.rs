//! 端到端场景：受理 → 限流提交 → 完成跟踪 → 派发 → 收尾 → 实体检测 → 脱敏

use std::sync::Arc;
use std::time::Duration;

use idp_core::memory::{
    InMemoryJobQueue, InMemoryLedger, InMemoryObjectStore, RecordingCoordinator, RecordingPostProcess,
    ScriptedEntityDetection, ScriptedOcrService,
};
use idp_core::{
    AdmissionConfig, AdmissionController, BatchDispatcher, CompletionTracker, CoreError, DeIdentificationStatus,
    DetectionConfig, DispatchOutcome, DispatchPayload, EntityDetectionPoller, EntityDistributor, EntityJobStatus,
    Intake, LedgerStore, Namespace, ObjectStore, OcrFinalizer, OcrNotification, PostProcessRequest, PostProcessor,
    RedactOptions, RedactionEngine, ServiceError, TrackerOutcome, WorkflowQuery, WorkflowStatus,
};
use idp_render::{DocumentFormat, PageSet, RenderOptions};
use image::{Rgba, RgbaImage};
use serde_json::json;

const DOCS: [&str; 3] = ["a.png", "b.tiff", "c.png"];

struct World {
    store: Arc<InMemoryObjectStore>,
    ledger: Arc<InMemoryLedger>,
    queue: Arc<InMemoryJobQueue>,
    ocr: Arc<ScriptedOcrService>,
    coordinator: Arc<RecordingCoordinator>,
    admission: Arc<AdmissionController>,
    tracker: CompletionTracker,
    intake: Intake,
}

fn world(batch_size: usize) -> World {
    let store = Arc::new(InMemoryObjectStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let ocr = Arc::new(ScriptedOcrService::new());
    let coordinator = Arc::new(RecordingCoordinator::new());
    let post = Arc::new(RecordingPostProcess::new());

    let admission = Arc::new(AdmissionController::new(
        queue.clone(),
        ocr.clone(),
        ledger.clone(),
        Namespace::new("public"),
        "bucket",
        AdmissionConfig {
            batch_size,
            ..Default::default()
        },
    ));
    let dispatcher = Arc::new(BatchDispatcher::new(ledger.clone(), coordinator.clone()));
    let tracker = CompletionTracker::new(store.clone(), admission.clone(), dispatcher, post);
    let intake = Intake::new(store.clone(), ledger.clone(), queue.clone(), coordinator.clone());

    World {
        store,
        ledger,
        queue,
        ocr,
        coordinator,
        admission,
        tracker,
        intake,
    }
}

fn page(shade: u8) -> RgbaImage {
    RgbaImage::from_pixel(120, 60, Rgba([shade, shade, shade, 255]))
}

fn encoded(format: DocumentFormat, pages: usize) -> Vec<u8> {
    idp_render::encode(&PageSet {
        format,
        dpi: 150,
        pages: (0..pages).map(|i| page(100 + i as u8 * 40)).collect(),
    })
    .unwrap()
}

async fn submit(w: &World, de_identify: bool) {
    for doc in DOCS {
        let body = if doc.ends_with(".tiff") {
            encoded(DocumentFormat::Tiff, 2)
        } else {
            encoded(DocumentFormat::Png, 1)
        };
        w.store.put(&format!("public/input/wf1/{}", doc), body, None).await.unwrap();
    }
    let manifest = json!({
        "workflow_id": "wf1",
        "documents": DOCS,
        "submit_ts": 1_700_000_000_000i64,
        "de_identify": de_identify
    });
    w.store
        .put("public/workflows/wf1.json", serde_json::to_vec(&manifest).unwrap(), None)
        .await
        .unwrap();
    w.intake.submit("bucket", "public/workflows/wf1.json").await.unwrap();
}

fn notification(job: &str, doc: &str) -> OcrNotification {
    serde_json::from_value(json!({
        "JobId": job,
        "JobTag": "wf1",
        "Status": "SUCCEEDED",
        "DocumentLocation": {"S3Bucket": "bucket", "S3ObjectName": format!("public/input/wf1/{}", doc)}
    }))
    .unwrap()
}

fn signalled_payload(w: &World) -> DispatchPayload {
    let signals = w.coordinator.signals();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].0, "token-1");
    serde_json::from_value(signals[0].1["Payload"].clone()).unwrap()
}

#[tokio::test]
async fn test_out_of_order_completions_signal_once() {
    let w = world(2);
    submit(&w, false).await;

    let report = w.admission.begin("wf1", "token-1").await.unwrap();
    assert_eq!(report.submitted.len(), 2);
    assert_eq!(w.queue.len(), 1);

    // b 先于 a 完成，并且重复投递
    let outcome = w.tracker.on_job_complete(notification("job-2", "b.tiff")).await.unwrap();
    match outcome {
        TrackerOutcome::Redrained { markers, inputs, report } => {
            assert_eq!((markers, inputs), (1, 3));
            assert_eq!(report.submitted[0].document_name, "c.png");
            assert_eq!(report.submitted[0].job_id, "job-3");
        }
        other => panic!("expected redrain, got {:?}", other),
    }
    w.tracker.on_job_complete(notification("job-2", "b.tiff")).await.unwrap();
    w.tracker.on_job_complete(notification("job-3", "c.png")).await.unwrap();
    assert!(w.coordinator.signals().is_empty());

    let done = w.tracker.on_job_complete(notification("job-1", "a.png")).await.unwrap();
    assert!(matches!(
        done,
        TrackerOutcome::Completed {
            dispatch: DispatchOutcome::Signalled { .. }
        }
    ));
    let late = w.tracker.on_job_complete(notification("job-3", "c.png")).await.unwrap();
    assert!(matches!(
        late,
        TrackerOutcome::Completed {
            dispatch: DispatchOutcome::AlreadyDispatched { .. }
        }
    ));

    let payload = signalled_payload(&w);
    assert_eq!(payload.tmp_process_dir, "public/temp/wf1");
    assert_eq!(payload.phi_input_dir, "public/phi-input/wf1");

    let finalized = OcrFinalizer::new(w.store.clone(), w.ledger.clone())
        .finalize(&payload)
        .await
        .unwrap();
    assert!(!finalized.de_identify);

    let record = w.ledger.get("wf1").await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Complete);
    assert_eq!(record.recorded_docs(), record.total_files);
    assert_eq!(record.docs["a.png"], "succeeded:job-1");
    assert_eq!(record.phi_input.as_deref(), Some("public/phi-input/wf1"));
    assert!(w.store.keys().iter().all(|k| !k.starts_with("public/temp/")));
}

#[tokio::test]
async fn test_concurrent_final_notifications_signal_once() {
    let w = world(10);
    submit(&w, false).await;
    w.admission.begin("wf1", "token-1").await.unwrap();

    w.tracker.on_job_complete(notification("job-1", "a.png")).await.unwrap();
    let (left, right) = tokio::join!(
        w.tracker.on_job_complete(notification("job-2", "b.tiff")),
        w.tracker.on_job_complete(notification("job-3", "c.png")),
    );
    let (left, right) = (left.unwrap(), right.unwrap());
    // 至多一个调用看到完整批次并拿到派发占位
    let signalled = [&left, &right]
        .iter()
        .filter(|o| {
            matches!(
                o,
                TrackerOutcome::Completed {
                    dispatch: DispatchOutcome::Signalled { .. }
                }
            )
        })
        .count();
    assert_eq!(signalled, 1);
    signalled_payload(&w);
}

#[tokio::test]
async fn test_manifest_input_path_does_not_shrink_batch() {
    let w = world(1);
    for doc in DOCS {
        w.store
            .put(&format!("public/input/wf1/{}", doc), encoded(DocumentFormat::Png, 1), None)
            .await
            .unwrap();
    }
    let manifest = json!({
        "workflow_id": "wf1",
        "input_path": "uploads/wf1/",
        "documents": DOCS,
        "submit_ts": 1_700_000_000_000i64
    });
    w.store
        .put("public/workflows/wf1.json", serde_json::to_vec(&manifest).unwrap(), None)
        .await
        .unwrap();
    w.intake.submit("bucket", "public/workflows/wf1.json").await.unwrap();

    w.admission.begin("wf1", "token-1").await.unwrap();
    assert_eq!(w.ocr.requests()[0].source_key, "public/input/wf1/a.png");

    let outcome = w.tracker.on_job_complete(notification("job-1", "a.png")).await.unwrap();
    match outcome {
        TrackerOutcome::Redrained { markers, inputs, .. } => assert_eq!((markers, inputs), (1, 3)),
        other => panic!("expected redrain, got {:?}", other),
    }
    assert!(w.coordinator.signals().is_empty());
}

#[tokio::test]
async fn test_begin_keeps_first_token() {
    let w = world(10);
    submit(&w, false).await;
    w.admission.begin("wf1", "token-1").await.unwrap();
    let again = w.admission.begin("wf1", "token-2").await.unwrap();
    assert_eq!(again.received, 0);

    let record = w.ledger.get("wf1").await.unwrap().unwrap();
    assert_eq!(record.workflow_token.as_deref(), Some("token-1"));
}

#[tokio::test(start_paused = true)]
async fn test_throttled_submission_waits_for_redelivery() {
    let w = world(10);
    submit(&w, false).await;
    w.ocr.push_response(Ok("job-a".into()));
    w.ocr
        .push_response(Err(ServiceError::api("ThrottlingException", "rate exceeded")));

    let (code, report) = match w.admission.drain(10).await {
        Err(CoreError::Throttled { code, report }) => (code, report),
        other => panic!("expected throttling, got {:?}", other),
    };
    assert_eq!(code, "ThrottlingException");
    assert_eq!(report.received, 3);
    assert_eq!(report.submitted.len(), 1);
    assert!(report.dropped.is_empty());
    // 被限流的消息与其后的消息都未被删除，也没有被提交
    assert_eq!(w.queue.len(), 2);
    assert_eq!(w.ocr.requests().len(), 2);
    assert_eq!(w.queue.visible_len(), 0);

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(w.queue.visible_len(), 2);
    let retry = w.admission.drain(10).await.unwrap();
    let names: Vec<&str> = retry.submitted.iter().map(|s| s.document_name.as_str()).collect();
    assert_eq!(names, vec!["b.tiff", "c.png"]);
    assert!(w.queue.is_empty());
}

#[tokio::test]
async fn test_begin_swallows_throttling() {
    let w = world(10);
    submit(&w, false).await;
    w.ocr
        .push_response(Err(ServiceError::api("LimitExceededException", "too many jobs")));

    let report = w.admission.begin("wf1", "token-1").await.unwrap();
    assert_eq!(report.throttled.as_deref(), Some("LimitExceededException"));
    assert!(report.submitted.is_empty());
    assert_eq!(w.queue.len(), 3);
}

#[tokio::test]
async fn test_non_retryable_failure_is_dropped() {
    let w = world(10);
    submit(&w, false).await;
    w.ocr
        .push_response(Err(ServiceError::api("InvalidS3ObjectException", "unreadable")));

    let report = w.admission.begin("wf1", "token-1").await.unwrap();
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].document_name.as_deref(), Some("a.png"));
    assert_eq!(report.submitted.len(), 2);
    assert!(w.queue.is_empty());
}

fn ocr_part(text: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "DocumentMetadata": {"Pages": 1},
        "JobStatus": "SUCCEEDED",
        "Blocks": [
            {"BlockType": "PAGE", "Page": 1},
            {
                "BlockType": "LINE",
                "Page": 1,
                "Text": text,
                "Confidence": 99.1,
                "Geometry": {"BoundingBox": {"Width": 0.5, "Height": 0.5, "Left": 0.0, "Top": 0.0}}
            }
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_full_de_identification_run() {
    let w = world(10);
    submit(&w, true).await;
    w.admission.begin("wf1", "token-1").await.unwrap();

    let processor = PostProcessor::new(w.store.clone());
    let lines = [("job-1", "a.png", "Patient Jane Doe"), ("job-2", "b.tiff", "Visit summary"), ("job-3", "c.png", "Jane Doe MRN 1234")];
    for (job, doc, text) in lines {
        w.store
            .put(&format!("public/output/wf1/{}/1", job), ocr_part(text), None)
            .await
            .unwrap();
        processor
            .process(&PostProcessRequest {
                workflow_id: "wf1".into(),
                output_path: format!("public/output/wf1/{}", job),
                doc_name: doc.into(),
            })
            .await
            .unwrap();
        w.tracker.on_job_complete(notification(job, doc)).await.unwrap();
    }
    let text = w.store.get("public/phi-input/wf1/job-1/a.png.txt").await.unwrap();
    assert!(String::from_utf8(text).unwrap().contains("Patient Jane Doe"));

    let finalized = OcrFinalizer::new(w.store.clone(), w.ledger.clone())
        .finalize(&signalled_payload(&w))
        .await
        .unwrap();
    assert!(finalized.de_identify);

    let service = Arc::new(ScriptedEntityDetection::new());
    service.push_status(Ok(EntityJobStatus::InProgress));
    service.push_status(Ok(EntityJobStatus::Completed));
    let poller = EntityDetectionPoller::new(
        service.clone(),
        w.ledger.clone(),
        Namespace::new("public"),
        "bucket",
        DetectionConfig {
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        },
    );
    let job = poller.start("wf1", &finalized.phi_input_dir, None).await.unwrap();
    let job_id = job.job_id.unwrap();
    assert_eq!(poller.poll("wf1", &job_id, poller.deadline()).await.unwrap(), EntityJobStatus::Completed);

    for (job, doc, _) in lines {
        let entities = if doc.ends_with(".png") {
            json!({"Entities": [{"Text": "Jane Doe", "Type": "NAME", "Score": 0.98}]})
        } else {
            json!({"Entities": []})
        };
        w.store
            .put(
                &format!("public/phi-output/wf1/{}/{}.txt.out", job, doc),
                serde_json::to_vec(&entities).unwrap(),
                None,
            )
            .await
            .unwrap();
    }

    let distributor = EntityDistributor::new(w.store.clone(), Namespace::new("public"));
    let distributed = distributor.distribute("wf1", Some(&job.output_dir)).await.unwrap();
    assert_eq!(distributed.doc_prefixes.len(), 3);
    let prepared = distributor.prepare(&distributed.doc_prefixes).await.unwrap();
    assert!(prepared.failures.is_empty(), "{:?}", prepared.failures);

    let retain = w.ledger.get("wf1").await.unwrap().unwrap().retain_orig_docs;
    let engine = RedactionEngine::new(w.store.clone(), RedactOptions::default());
    let report = engine.redact_batch(&prepared.tasks, retain).await;
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.outcomes.len(), 3);
    idp_core::finish_de_identification(w.ledger.as_ref(), "wf1").await.unwrap();

    let redacted = w
        .store
        .get("public/output/wf1/job-1/redacted-doc/a.png")
        .await
        .unwrap();
    let pages = idp_render::decode(&redacted, &RenderOptions::default()).unwrap().pages;
    assert_eq!(pages[0].get_pixel(5, 5), &Rgba([0, 0, 0, 255]));
    assert_eq!(pages[0].get_pixel(110, 50), &Rgba([100, 100, 100, 255]));

    let tiff = w
        .store
        .get("public/output/wf1/job-2/redacted-doc/b.tiff")
        .await
        .unwrap();
    assert_eq!(idp_render::decode(&tiff, &RenderOptions::default()).unwrap().page_count(), 2);
    assert!(!w.store.contains("public/output/wf1/job-2/orig-doc/b.tiff"));

    let detail = WorkflowQuery::new(w.ledger.clone(), w.store.clone(), Namespace::new("public"))
        .describe("wf1")
        .await
        .unwrap();
    assert_eq!(detail.summary.de_identification_status, DeIdentificationStatus::Processed);
    assert_eq!(detail.redacted_documents.len(), 3);
    assert!(!serde_json::to_string(&detail).unwrap().contains("token-1"));
}
