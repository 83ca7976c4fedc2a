//! 实体检测输出分发与脱敏准备
//!
//! 实体检测服务按输入的相对路径输出 `<job>/<doc>.txt.out`。分发步骤把它
//! 复制到对应 OCR 任务目录下的 `<doc>.comp-med`，并把原件暂存到
//! `orig-doc/`；准备步骤在每个任务目录中找齐三个文件，组成脱敏任务。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths::{dir_prefix, Namespace, ENTITY_OUTPUT_SUFFIX, ENTITY_SUFFIX, ORIG_DOC_DIR, REDACTED_DOC_DIR};
use crate::store::{ListFilter, ObjectStore};

/// 处理失败的单个条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReport {
    /// 每个文档的任务目录 `<root>/output/<wf>/<job>/`
    pub doc_prefixes: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

/// 一个待脱敏文档
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionTask {
    /// 暂存的原件
    pub document_key: String,
    /// 合并后的 OCR 输出
    pub ocr_key: String,
    /// 实体检测结果
    pub entities_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationReport {
    pub tasks: Vec<RedactionTask>,
    pub failures: Vec<ItemFailure>,
}

pub struct EntityDistributor {
    store: Arc<dyn ObjectStore>,
    namespace: Namespace,
}

impl EntityDistributor {
    pub fn new(store: Arc<dyn ObjectStore>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }

    pub async fn distribute(&self, workflow_id: &str, output_dir: Option<&str>) -> Result<DistributionReport> {
        let output_dir = dir_prefix(
            &output_dir
                .map(str::to_string)
                .unwrap_or_else(|| self.namespace.phi_output_dir(workflow_id)),
        );
        let results = self
            .store
            .list(&output_dir, &ListFilter::search(ENTITY_OUTPUT_SUFFIX))
            .await?;

        let mut report = DistributionReport::default();
        for key in results {
            match self.distribute_one(workflow_id, &output_dir, &key).await {
                Ok(prefix) => {
                    if !report.doc_prefixes.contains(&prefix) {
                        report.doc_prefixes.push(prefix);
                    }
                }
                Err(reason) => {
                    log::warn!("[Distribute] {} 分发失败: {}", key, reason);
                    report.failures.push(ItemFailure { key, reason });
                }
            }
        }

        log::info!(
            "[Distribute] 工作流 {} 分发 {} 个文档，失败 {} 个",
            workflow_id,
            report.doc_prefixes.len(),
            report.failures.len()
        );
        Ok(report)
    }

    async fn distribute_one(&self, workflow_id: &str, output_dir: &str, key: &str) -> std::result::Result<String, String> {
        let relative = key.strip_prefix(output_dir).unwrap_or(key);
        let Some((job_id, file)) = relative.split_once('/') else {
            return Err(format!("{} is not under a job directory", relative));
        };
        let Some(document) = file.strip_suffix(ENTITY_OUTPUT_SUFFIX) else {
            return Err(format!("{} is not an entity output", file));
        };
        // 文档位于任务目录的更深层时只取文件名
        let document = document.rsplit('/').next().unwrap_or(document);

        self.store
            .copy(key, &self.namespace.entity_result(workflow_id, job_id, document))
            .await
            .map_err(|e| e.to_string())?;

        let original = self
            .namespace
            .input_document(&Namespace::default_input_path(workflow_id), document);
        self.store
            .copy(&original, &self.namespace.staged_original(workflow_id, job_id, document))
            .await
            .map_err(|e| e.to_string())?;

        Ok(dir_prefix(&self.namespace.job_output(workflow_id, job_id)))
    }

    /// 为每个任务目录找齐实体结果、OCR 输出和原件
    pub async fn prepare(&self, doc_prefixes: &[String]) -> Result<PreparationReport> {
        let filter = ListFilter::any_of([ENTITY_SUFFIX, ".json", "/orig-doc/"]).excluding(format!("/{}/", REDACTED_DOC_DIR));
        let mut report = PreparationReport::default();

        for prefix in doc_prefixes {
            let files = self.store.list(&dir_prefix(prefix), &filter).await?;
            let orig_marker = format!("/{}/", ORIG_DOC_DIR);
            let entities = find_key(&files, |k| k.ends_with(ENTITY_SUFFIX));
            let ocr = find_key(&files, |k| k.ends_with(".json") && !k.contains(orig_marker.as_str()));
            let document = find_key(&files, |k| k.contains(orig_marker.as_str()));

            match (document, ocr, entities) {
                (Some(document_key), Some(ocr_key), Some(entities_key)) => report.tasks.push(RedactionTask {
                    document_key,
                    ocr_key,
                    entities_key,
                }),
                (document, ocr, entities) => {
                    let missing: Vec<&str> = [
                        (document.is_none(), "original"),
                        (ocr.is_none(), "ocr output"),
                        (entities.is_none(), "entity result"),
                    ]
                    .iter()
                    .filter(|(absent, _)| *absent)
                    .map(|(_, name)| *name)
                    .collect();
                    log::warn!("[Prepare] {} 缺少 {:?}", prefix, missing);
                    report.failures.push(ItemFailure {
                        key: prefix.clone(),
                        reason: format!("missing {}", missing.join(", ")),
                    });
                }
            }
        }

        Ok(report)
    }
}

fn find_key(files: &[String], pred: impl Fn(&str) -> bool) -> Option<String> {
    files.iter().find(|k| pred(k.as_str())).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryObjectStore;

    async fn seeded() -> (Arc<InMemoryObjectStore>, EntityDistributor) {
        let store = Arc::new(InMemoryObjectStore::new());
        for (key, body) in [
            ("public/input/wf1/a.pdf", "pdf"),
            ("public/input/wf1/b.png", "png"),
            ("public/output/wf1/j1/a.pdf.json", "{}"),
            ("public/output/wf1/j2/b.png.json", "{}"),
            ("public/phi-output/wf1/j1/a.pdf.txt.out", "{\"Entities\":[]}"),
            ("public/phi-output/wf1/j2/b.png.txt.out", "{\"Entities\":[]}"),
            ("public/phi-output/wf1/Manifest", "{}"),
        ] {
            store.put(key, body.as_bytes().to_vec(), None).await.unwrap();
        }
        let distributor = EntityDistributor::new(store.clone(), Namespace::new("public"));
        (store, distributor)
    }

    #[tokio::test]
    async fn test_distribute_then_prepare() {
        let (store, distributor) = seeded().await;
        let report = distributor.distribute("wf1", None).await.unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(
            report.doc_prefixes,
            vec!["public/output/wf1/j1/".to_string(), "public/output/wf1/j2/".to_string()]
        );
        assert!(store.contains("public/output/wf1/j1/a.pdf.comp-med"));
        assert!(store.contains("public/output/wf1/j1/orig-doc/a.pdf"));

        let prepared = distributor.prepare(&report.doc_prefixes).await.unwrap();
        assert!(prepared.failures.is_empty());
        assert_eq!(
            prepared.tasks[0],
            RedactionTask {
                document_key: "public/output/wf1/j1/orig-doc/a.pdf".into(),
                ocr_key: "public/output/wf1/j1/a.pdf.json".into(),
                entities_key: "public/output/wf1/j1/a.pdf.comp-med".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_original_is_a_failure() {
        let (store, distributor) = seeded().await;
        store.delete(&["public/input/wf1/b.png".to_string()]).await.unwrap();

        let report = distributor.distribute("wf1", None).await.unwrap();
        assert_eq!(report.doc_prefixes.len(), 1);
        assert_eq!(report.failures.len(), 1);

        let prepared = distributor
            .prepare(&["public/output/wf1/j1/".to_string(), "public/output/wf1/j2/".to_string()])
            .await
            .unwrap();
        assert_eq!(prepared.tasks.len(), 1);
        assert_eq!(prepared.failures[0].key, "public/output/wf1/j2/");
        assert!(prepared.failures[0].reason.contains("original"));
    }
}
