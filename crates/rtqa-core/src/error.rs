//! 错误定义模块

use thiserror::Error;

/// 协议检查系统统一错误类型
#[derive(Error, Debug)]
pub enum QaError {
    #[error("模板错误: {0}")]
    Template(String),

    #[error("索引表错误: {0}")]
    Index(String),

    #[error("序列 {series_uid} 的 {field} 不一致")]
    InconsistentSeries { series_uid: String, field: String },

    #[error("检查配置错误: {0}")]
    Check(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("资源未找到: {0}")]
    NotFound(String),
}

/// 协议检查系统统一结果类型
pub type Result<T> = std::result::Result<T, QaError>;
