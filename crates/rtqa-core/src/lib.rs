//! # RTQA Core
//!
//! 协议一致性检查的核心模块，提供序列数据模型、模板定义、错误定义、运行日志和通用工具。

pub mod error;
pub mod logging;
pub mod models;
pub mod template;
pub mod utils;

pub use error::{QaError, Result};
pub use logging::{LogEntry, LogLevel, MemoryReporter, RunReporter, TracingReporter};
pub use models::*;
pub use template::{CheckDefinition, ExpectedSeries, SeriesSelector, Template};
