//! 事件载荷
//!
//! 每类事件源（对象上传、OCR 完成通知、协调器步骤）对应一个显式结构，
//! 进入组件前在边界处校验。

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::paths::{basename, Namespace};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentLocation {
    #[serde(rename = "S3Bucket")]
    pub bucket: String,
    #[serde(rename = "S3ObjectName")]
    pub object_name: String,
}

/// OCR 服务的任务完成通知
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OcrNotification {
    pub job_id: String,
    pub job_tag: String,
    pub status: String,
    pub document_location: DocumentLocation,
}

/// 校验后的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCompletion {
    pub job_id: String,
    pub workflow_id: String,
    /// 小写状态
    pub status: String,
    pub bucket: String,
    pub object_key: String,
    pub document: String,
    pub namespace: Namespace,
}

impl OcrNotification {
    pub fn validate(self) -> Result<JobCompletion> {
        let required = [
            ("JobId", &self.job_id),
            ("JobTag", &self.job_tag),
            ("Status", &self.status),
            ("S3Bucket", &self.document_location.bucket),
            ("S3ObjectName", &self.document_location.object_name),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(CoreError::InvalidEvent(format!("notification field {} is empty", field)));
        }

        let key = self.document_location.object_name;
        let document = basename(&key).to_string();
        if document.is_empty() || !key.contains('/') {
            return Err(CoreError::InvalidEvent(format!("object key {} has no document", key)));
        }

        Ok(JobCompletion {
            job_id: self.job_id,
            workflow_id: self.job_tag,
            status: self.status.to_lowercase(),
            bucket: self.document_location.bucket,
            namespace: Namespace::from_key(&key),
            object_key: key,
            document,
        })
    }
}

/// 对象上传通知：提交清单写入后触发受理
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectCreated {
    pub bucket: String,
    pub key: String,
}

impl ObjectCreated {
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() || self.key.trim().is_empty() {
            return Err(CoreError::InvalidEvent("object event requires bucket and key".into()));
        }
        if self.key.ends_with('/') {
            return Err(CoreError::InvalidEvent(format!("{} is a folder marker", self.key)));
        }
        Ok(())
    }
}

/// 协调器第一步的输入：保存回调令牌并开始提交
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginOcrInput {
    pub workflow_id: String,
    pub bucket: String,
    pub token: String,
}

impl BeginOcrInput {
    pub fn validate(&self) -> Result<()> {
        if self.workflow_id.trim().is_empty() || self.token.trim().is_empty() {
            return Err(CoreError::InvalidEvent("begin step requires workflow_id and token".into()));
        }
        Ok(())
    }
}
