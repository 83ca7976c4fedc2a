//! 对象存储接口
//!
//! 键为 `/` 分隔的层级路径，以 `/` 结尾的键是目录占位，列举时被排除。

use std::path::Path;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store backend error: {0}")]
    Backend(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 列举过滤条件：`search` 为必须包含的子串，`exclude` 为必须不包含的子串
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub search: Vec<String>,
    pub exclude: Vec<String>,
}

impl ListFilter {
    pub fn search(pattern: impl Into<String>) -> Self {
        Self {
            search: vec![pattern.into()],
            exclude: Vec::new(),
        }
    }

    pub fn any_of<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            search: patterns.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// 目录占位永不匹配；`search` 中任一子串命中即可
    pub fn matches(&self, key: &str) -> bool {
        if key.ends_with('/') {
            return false;
        }
        if !self.search.is_empty() && !self.search.iter().any(|s| key.contains(s.as_str())) {
            return false;
        }
        !self.exclude.iter().any(|s| key.contains(s.as_str()))
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 列举前缀下的键，按字典序返回
    async fn list(&self, prefix: &str, filter: &ListFilter) -> Result<Vec<String>, StoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn put(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<(), StoreError>;

    async fn copy(&self, source: &str, destination: &str) -> Result<(), StoreError>;

    /// 批量删除；不存在的键被忽略
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    async fn upload(&self, local_path: &Path, key: &str, content_type: Option<&str>) -> Result<(), StoreError> {
        let body = tokio::fs::read(local_path).await?;
        self.put(key, body, content_type).await
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        let body = self.get(key).await?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_excludes_folder_markers() {
        let filter = ListFilter::default();
        assert!(filter.matches("public/input/wf1/a.pdf"));
        assert!(!filter.matches("public/input/wf1/"));
    }

    #[test]
    fn test_filter_search_and_exclude() {
        let filter = ListFilter::any_of([".comp-med", ".json", "/orig-doc/"]).excluding("/redacted-doc/");
        assert!(filter.matches("p/output/wf/j/a.pdf.comp-med"));
        assert!(filter.matches("p/output/wf/j/orig-doc/a.pdf"));
        assert!(!filter.matches("p/output/wf/j/1"));
        assert!(!filter.matches("p/output/wf/j/redacted-doc/a.json"));
    }
}
