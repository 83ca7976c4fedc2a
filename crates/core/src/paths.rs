//! 存储命名空间布局
//!
//! 所有对象键都位于一个根前缀（默认 `public`）之下。

/// 暂存原件的目录段
pub const ORIG_DOC_DIR: &str = "orig-doc";
/// 脱敏产物的目录段
pub const REDACTED_DOC_DIR: &str = "redacted-doc";
/// 单文档实体结果的后缀
pub const ENTITY_SUFFIX: &str = ".comp-med";
/// 实体检测服务输出文件的后缀
pub const ENTITY_OUTPUT_SUFFIX: &str = ".txt.out";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    root: String,
}

impl Namespace {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_matches('/').to_string(),
        }
    }

    /// 由对象键的第一段推出根前缀
    pub fn from_key(key: &str) -> Self {
        Self::new(key.split('/').next().unwrap_or_default())
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn manifest(&self, workflow_id: &str) -> String {
        format!("{}/workflows/{}.json", self.root, workflow_id)
    }

    /// 队列消息中 `input_path` 的默认值，相对根前缀
    pub fn default_input_path(workflow_id: &str) -> String {
        format!("input/{}/", workflow_id)
    }

    pub fn input_dir(&self, workflow_id: &str) -> String {
        format!("{}/input/{}/", self.root, workflow_id)
    }

    /// OCR 源文档：`<root>/<input_path><document>`
    pub fn input_document(&self, input_path: &str, document: &str) -> String {
        format!("{}/{}{}", self.root, input_path, document)
    }

    pub fn ocr_output(&self, workflow_id: &str) -> String {
        format!("{}/output/{}", self.root, workflow_id)
    }

    pub fn job_output(&self, workflow_id: &str, job_id: &str) -> String {
        format!("{}/output/{}/{}", self.root, workflow_id, job_id)
    }

    pub fn temp_dir(&self, workflow_id: &str) -> String {
        format!("{}/temp/{}", self.root, workflow_id)
    }

    pub fn marker(&self, workflow_id: &str, document: &str) -> String {
        format!("{}/temp/{}/{}.json", self.root, workflow_id, document)
    }

    pub fn phi_input_dir(&self, workflow_id: &str) -> String {
        format!("{}/phi-input/{}", self.root, workflow_id)
    }

    pub fn phi_text(&self, workflow_id: &str, job_id: &str, document: &str) -> String {
        format!("{}/phi-input/{}/{}/{}.txt", self.root, workflow_id, job_id, document)
    }

    pub fn phi_output_dir(&self, workflow_id: &str) -> String {
        format!("{}/phi-output/{}", self.root, workflow_id)
    }

    pub fn entity_result(&self, workflow_id: &str, job_id: &str, document: &str) -> String {
        format!("{}/output/{}/{}/{}{}", self.root, workflow_id, job_id, document, ENTITY_SUFFIX)
    }

    pub fn staged_original(&self, workflow_id: &str, job_id: &str, document: &str) -> String {
        format!("{}/output/{}/{}/{}/{}", self.root, workflow_id, job_id, ORIG_DOC_DIR, document)
    }
}

/// 以 `/` 结尾的目录前缀
pub fn dir_prefix(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// 对象键的最后一段
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// 对象键的目录部分（不含结尾 `/`）
pub fn dirname(key: &str) -> &str {
    key.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// 原件键 → 脱敏产物键：目录中的 `/orig-doc` 替换为 `/redacted-doc`，文件名不变
pub fn redacted_key(original_key: &str) -> String {
    let dir = dirname(original_key).replace(&format!("/{}", ORIG_DOC_DIR), &format!("/{}", REDACTED_DOC_DIR));
    format!("{}/{}", dir, basename(original_key))
}
