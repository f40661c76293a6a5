//! # RTQA存储模块
//!
//! 负责索引表、结果文档和模板文件的读写。

pub mod storage;

pub use storage::*;
