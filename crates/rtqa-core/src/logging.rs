//! 运行日志
//!
//! 每次流水线运行创建一个报告器，并显式传给匹配器和检查引擎，
//! 不依赖进程级的全局日志配置。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// 日志条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// 所属运行
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// 产生日志的组件（matcher、checks 等）
    pub module: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(run_id: Uuid, level: LogLevel, module: &str, message: impl Into<String>) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            level,
            module: module.to_string(),
            message: message.into(),
        }
    }
}

/// 运行报告器
///
/// 生命周期限定在一次流水线运行内。
pub trait RunReporter: Send + Sync {
    /// 本次运行的标识
    fn run_id(&self) -> Uuid;

    /// 记录一条日志
    fn record(&self, entry: LogEntry);

    fn log(&self, level: LogLevel, module: &str, message: String) {
        self.record(LogEntry::new(self.run_id(), level, module, message));
    }

    fn debug(&self, module: &str, message: String) {
        self.log(LogLevel::Debug, module, message);
    }

    fn info(&self, module: &str, message: String) {
        self.log(LogLevel::Info, module, message);
    }

    fn warn(&self, module: &str, message: String) {
        self.log(LogLevel::Warning, module, message);
    }
}

/// 转发到 `tracing` 的报告器
#[derive(Debug, Clone)]
pub struct TracingReporter {
    run_id: Uuid,
}

impl TracingReporter {
    /// 为新的运行创建报告器
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
        }
    }
}

impl Default for TracingReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReporter for TracingReporter {
    fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn record(&self, entry: LogEntry) {
        let run_id = entry.run_id;
        let module = entry.module.as_str();
        match entry.level {
            LogLevel::Trace => trace!(%run_id, module, "{}", entry.message),
            LogLevel::Debug => debug!(%run_id, module, "{}", entry.message),
            LogLevel::Info => info!(%run_id, module, "{}", entry.message),
            LogLevel::Warning => warn!(%run_id, module, "{}", entry.message),
            LogLevel::Error => error!(%run_id, module, "{}", entry.message),
        }
    }
}

/// 在内存中保留日志的报告器，用于测试和运行汇总
#[derive(Debug)]
pub struct MemoryReporter {
    run_id: Uuid,
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// 所有已记录的日志
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 某个组件的日志消息
    pub fn messages(&self, module: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.module == module)
            .map(|e| e.message)
            .collect()
    }

    /// 按级别统计
    pub fn count_by_level(&self) -> HashMap<LogLevel, usize> {
        let mut counts = HashMap::new();
        for entry in self.entries() {
            *counts.entry(entry.level).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for MemoryReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReporter for MemoryReporter {
    fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn record(&self, entry: LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}
