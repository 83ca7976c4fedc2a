//! 本地目录作为对象存储
//!
//! 对象键 `a/b/c.pdf` 对应 `<base>/a/b/c.pdf`。内容类型不落盘。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use idp_core::{ListFilter, ObjectStore, StoreError};

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(StoreError::Backend(format!("invalid object key: {}", key)));
        }
        Ok(self.base.join(relative))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }
}

fn not_found(key: &str, err: std::io::Error) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, prefix: &str, filter: &ListFilter) -> Result<Vec<String>, StoreError> {
        // 从前缀中最后一个完整目录开始遍历
        let dir = match prefix.rfind('/') {
            Some(idx) => self.path_for(&prefix[..idx])?,
            None => self.base.clone(),
        };
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![dir];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) && filter.matches(&key) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| not_found(key, e))
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        log::debug!("[Store] 写入 {} ({})", key, content_type.unwrap_or("-"));
        Ok(())
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<(), StoreError> {
        let from = self.path_for(source)?;
        let to = self.path_for(destination)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&from, &to).await.map_err(|e| not_found(source, e))?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            match tokio::fs::remove_file(self.path_for(key)?).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
