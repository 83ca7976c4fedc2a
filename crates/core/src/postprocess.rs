//! OCR 输出后处理
//!
//! OCR 服务把一个任务的结果写成编号分片（`<output_path>/1`、`/2`…）。
//! 后处理按编号合并为 `<doc>.json`，并生成实体检测所用的纯文本。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use idp_ocr::{plain_text, OcrDocument};

use crate::error::Result;
use crate::paths::{basename, dir_prefix, Namespace};
use crate::services::{PostProcessInvoker, ServiceError};
use crate::store::{ListFilter, ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcessRequest {
    pub workflow_id: String,
    /// `<root>/output/<workflow_id>/<job_id>`
    pub output_path: String,
    pub doc_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessReport {
    pub parts: usize,
    pub pages: u32,
    pub lines: usize,
    pub merged_key: String,
    pub text_key: String,
}

pub struct PostProcessor {
    store: Arc<dyn ObjectStore>,
}

impl PostProcessor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn process(&self, request: &PostProcessRequest) -> Result<PostProcessReport> {
        let prefix = dir_prefix(&request.output_path);
        let mut parts: Vec<(u32, String)> = self
            .store
            .list(&prefix, &ListFilter::default())
            .await?
            .into_iter()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                let number = rest.parse::<u32>().ok()?;
                Some((number, key))
            })
            .collect();
        // 按数值排序，"10" 排在 "9" 之后
        parts.sort_by_key(|(number, _)| *number);

        let mut documents = Vec::with_capacity(parts.len());
        for (_, key) in &parts {
            let body = self.store.get(key).await?;
            documents.push(OcrDocument::from_slice(&body)?);
        }
        let merged = OcrDocument::merge(documents)?;

        let merged_key = format!("{}{}.json", prefix, request.doc_name);
        self.store
            .put(&merged_key, merged.to_vec()?, Some("application/json"))
            .await?;

        let job_id = basename(request.output_path.trim_end_matches('/'));
        let namespace = Namespace::from_key(&request.output_path);
        let text_key = namespace.phi_text(&request.workflow_id, job_id, &request.doc_name);
        let text = plain_text(&merged);
        self.store
            .put(&text_key, text.into_bytes(), Some("text/plain"))
            .await?;

        let report = PostProcessReport {
            parts: parts.len(),
            pages: merged.page_count(),
            lines: merged.lines().len(),
            merged_key,
            text_key,
        };
        log::info!(
            "[PostProcess] {} 合并 {} 个分片，{} 页 {} 行",
            request.doc_name,
            report.parts,
            report.pages,
            report.lines
        );
        Ok(report)
    }
}

/// 进程内交接：在后台任务中运行后处理，调用方立即返回
pub struct SpawningPostProcess {
    processor: Arc<PostProcessor>,
}

impl SpawningPostProcess {
    pub fn new(processor: Arc<PostProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl PostProcessInvoker for SpawningPostProcess {
    async fn invoke(&self, request: PostProcessRequest) -> std::result::Result<(), ServiceError> {
        let processor = Arc::clone(&self.processor);
        tokio::spawn(async move {
            if let Err(e) = processor.process(&request).await {
                log::error!("[PostProcess] {} 后处理失败: {}", request.doc_name, e);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryObjectStore;
    use serde_json::json;

    fn part(pages: u32, page: u32, text: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "DocumentMetadata": {"Pages": pages},
            "JobStatus": "SUCCEEDED",
            "Blocks": [
                {"BlockType": "PAGE", "Page": page},
                {"BlockType": "LINE", "Page": page, "Text": text,
                 "Geometry": {"BoundingBox": {"Width": 0.5, "Height": 0.05, "Left": 0.1, "Top": 0.1}}}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_merges_parts_in_numeric_order() {
        let store = Arc::new(InMemoryObjectStore::new());
        let out = "public/output/wf1/job-1";
        store.put(&format!("{}/2", out), part(3, 2, "second"), None).await.unwrap();
        store.put(&format!("{}/10", out), part(3, 3, "third"), None).await.unwrap();
        store.put(&format!("{}/1", out), part(3, 1, "first"), None).await.unwrap();
        store.put(&format!("{}/.s3_access_check", out), Vec::new(), None).await.unwrap();

        let processor = PostProcessor::new(store.clone());
        let report = processor
            .process(&PostProcessRequest {
                workflow_id: "wf1".into(),
                output_path: out.into(),
                doc_name: "a.pdf".into(),
            })
            .await
            .unwrap();

        assert_eq!(report.parts, 3);
        assert_eq!(report.pages, 3);
        assert_eq!(report.merged_key, "public/output/wf1/job-1/a.pdf.json");
        assert_eq!(report.text_key, "public/phi-input/wf1/job-1/a.pdf.txt");

        let text = String::from_utf8(store.get(&report.text_key).await.unwrap()).unwrap();
        assert_eq!(text, "first\n\nsecond\n\nthird");
        assert_eq!(store.content_type(&report.merged_key).as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_no_parts_is_an_error() {
        let store = Arc::new(InMemoryObjectStore::new());
        let processor = PostProcessor::new(store);
        let result = processor
            .process(&PostProcessRequest {
                workflow_id: "wf1".into(),
                output_path: "public/output/wf1/job-9".into(),
                doc_name: "a.pdf".into(),
            })
            .await;
        assert!(result.is_err());
    }
}
