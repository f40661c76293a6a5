//! # RTQA管理模块
//!
//! 提供配置管理和多目录运行汇总

pub mod config;
pub mod summary;

pub use config::{ConfigManager, ConfigValidator, LoggingConfig, PipelineConfig, QaConfig};
pub use summary::{DirectorySummary, RunSummary};
