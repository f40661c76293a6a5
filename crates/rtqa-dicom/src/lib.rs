//! # DICOM索引模块
//!
//! 消费外部索引器产生的逐文件元数据表（`indexed.json`），
//! 提供索引校验以及结果文档（序列集合）的构建。

pub mod index;
pub mod series;
pub mod validator;

pub use index::{IndexRow, IndexTable};
pub use series::SeriesCollectionBuilder;
pub use validator::{IndexValidator, ValidationResult};
