use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use idp_core::{AdmissionConfig, DetectionConfig, Namespace, NotificationChannel, RedactOptions};
use idp_core::admission::MAX_RECEIVE;
use idp_render::RenderOptions;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    // ============ 存储 ============
    /// 对象键的根前缀
    pub root: String,
    /// 对象存储桶
    pub bucket: String,

    // ============ 提交准入 ============
    /// 单次从队列取出的消息数（1-10）
    pub batch_size: usize,
    pub visibility_timeout_secs: u64,
    pub wait_time_secs: u64,
    /// 完成通知的投递主题与角色
    pub notification_topic: Option<String>,
    pub notification_role: Option<String>,

    // ============ 实体检测 ============
    pub poll_interval_secs: u64,
    pub poll_deadline_secs: u64,
    pub language: String,

    // ============ 脱敏 ============
    /// PDF 光栅化 DPI
    pub render_dpi: u32,

    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: "public".to_string(),
            bucket: String::new(),
            batch_size: MAX_RECEIVE,
            visibility_timeout_secs: 10,
            wait_time_secs: 5,
            notification_topic: None,
            notification_role: None,
            poll_interval_secs: 2,
            poll_deadline_secs: 600,
            language: "en".to_string(),
            render_dpi: idp_render::DEFAULT_DPI,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl PipelineConfig {
    /// 读取配置文件（可选），再用 `IDP_*` 环境变量覆盖
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            Some(path) => {
                log::warn!("[Config] 配置文件 {} 不存在，使用默认值", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(root) = env_string("IDP_ROOT") {
            self.root = root;
        }
        if let Some(bucket) = env_string("IDP_BUCKET") {
            self.bucket = bucket;
        }
        self.batch_size = env_usize("IDP_BATCH_SIZE", self.batch_size);
        self.visibility_timeout_secs = env_u64("IDP_VISIBILITY_TIMEOUT_SECS", self.visibility_timeout_secs);
        self.wait_time_secs = env_u64("IDP_WAIT_TIME_SECS", self.wait_time_secs);
        if let Some(topic) = env_string("IDP_NOTIFICATION_TOPIC") {
            self.notification_topic = Some(topic);
        }
        if let Some(role) = env_string("IDP_NOTIFICATION_ROLE") {
            self.notification_role = Some(role);
        }
        self.poll_interval_secs = env_u64("IDP_POLL_INTERVAL_SECS", self.poll_interval_secs);
        self.poll_deadline_secs = env_u64("IDP_POLL_DEADLINE_SECS", self.poll_deadline_secs);
        if let Some(language) = env_string("IDP_LANGUAGE") {
            self.language = language;
        }
        self.render_dpi = env_u32("IDP_RENDER_DPI", self.render_dpi);
        if let Some(level) = env_string("IDP_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("root prefix must not be empty".into()));
        }
        if !(1..=MAX_RECEIVE).contains(&self.batch_size) {
            return Err(ConfigError::Invalid(format!(
                "batchSize must be between 1 and {}, got {}",
                MAX_RECEIVE, self.batch_size
            )));
        }
        if self.render_dpi == 0 {
            return Err(ConfigError::Invalid("renderDpi must be positive".into()));
        }
        if self.poll_interval_secs == 0 || self.poll_deadline_secs < self.poll_interval_secs {
            return Err(ConfigError::Invalid(
                "pollDeadlineSecs must be at least one pollIntervalSecs".into(),
            ));
        }
        Ok(())
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.root.as_str())
    }

    pub fn admission(&self) -> AdmissionConfig {
        AdmissionConfig {
            batch_size: self.batch_size,
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            wait_time: Duration::from_secs(self.wait_time_secs),
            notification: NotificationChannel {
                topic: self.notification_topic.clone().unwrap_or_default(),
                role: self.notification_role.clone().unwrap_or_default(),
            },
        }
    }

    pub fn detection(&self) -> DetectionConfig {
        DetectionConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            deadline: Duration::from_secs(self.poll_deadline_secs),
            language: self.language.clone(),
        }
    }

    pub fn redact_options(&self) -> RedactOptions {
        RedactOptions {
            render: RenderOptions { dpi: self.render_dpi },
            ..Default::default()
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_usize(key: &str, default: usize) -> usize {
    env_string(key)
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_string(key)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_string(key)
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
