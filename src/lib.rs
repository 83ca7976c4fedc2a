//! 文档工作流引擎
//!
//! 在 [`idp_core`] 组件之上提供配置加载、本地目录存储和统一的事件入口。

pub mod config;
pub mod local_store;
pub mod pipeline;

pub use config::{ConfigError, PipelineConfig};
pub use local_store::LocalObjectStore;
pub use pipeline::{Pipeline, PipelineEvent, Ports};
