//! 结果文档存储
//!
//! 每个患者目录包含索引表和结果文档，各处理阶段依次读取、修改并写回。

use async_trait::async_trait;
use rtqa_core::{QaError, Result, SeriesCollection, Template};
use rtqa_dicom::IndexTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 目录内的文件布局
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLayout {
    /// 逐文件索引表
    pub index_file: String,
    /// 结果文档
    pub document_file: String,
}

impl Default for DocumentLayout {
    fn default() -> Self {
        Self {
            index_file: "indexed.json".to_string(),
            document_file: "series.json".to_string(),
        }
    }
}

/// 单个患者目录的文档存储
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 存储位置的描述，用于日志
    fn location(&self) -> String;

    /// 读取索引表
    async fn load_index(&self) -> Result<IndexTable>;

    /// 读取结果文档
    async fn load_collection(&self) -> Result<SeriesCollection>;

    /// 写回结果文档
    async fn save_collection(&self, collection: &SeriesCollection) -> Result<()>;
}

/// 文件系统存储
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    directory: PathBuf,
    layout: DocumentLayout,
}

impl FsDocumentStore {
    pub fn new(directory: impl Into<PathBuf>, layout: DocumentLayout) -> Self {
        Self {
            directory: directory.into(),
            layout,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn index_path(&self) -> PathBuf {
        self.directory.join(&self.layout.index_file)
    }

    pub fn document_path(&self) -> PathBuf {
        self.directory.join(&self.layout.document_file)
    }

    /// 结果文档是否已存在
    pub async fn has_collection(&self) -> bool {
        tokio::fs::try_exists(self.document_path())
            .await
            .unwrap_or(false)
    }

    async fn read(path: &Path) -> Result<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(QaError::NotFound(
                format!("文件不存在: {}", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    fn location(&self) -> String {
        self.directory.display().to_string()
    }

    async fn load_index(&self) -> Result<IndexTable> {
        let path = self.index_path();
        let text = Self::read(&path).await?;
        let table = IndexTable::from_json_str(&text)?;
        debug!("读取索引表 {}: {} 行", path.display(), table.len());
        Ok(table)
    }

    async fn load_collection(&self) -> Result<SeriesCollection> {
        let path = self.document_path();
        let text = Self::read(&path).await?;
        serde_json::from_str(&text).map_err(|e| {
            QaError::Storage(format!("结果文档无法解析 {}: {}", path.display(), e))
        })
    }

    async fn save_collection(&self, collection: &SeriesCollection) -> Result<()> {
        let path = self.document_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let text = serde_json::to_string_pretty(collection)?;
        tokio::fs::write(&path, text).await?;
        debug!("写入结果文档 {}", path.display());
        Ok(())
    }
}

/// 内存存储，按目录名保存文档
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    name: String,
    index: RwLock<Option<IndexTable>>,
    documents: RwLock<HashMap<String, SeriesCollection>>,
}

impl MemoryDocumentStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_index(name: impl Into<String>, table: IndexTable) -> Self {
        Self {
            name: name.into(),
            index: RwLock::new(Some(table)),
            documents: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn location(&self) -> String {
        format!("memory://{}", self.name)
    }

    async fn load_index(&self) -> Result<IndexTable> {
        self.index
            .read()
            .await
            .clone()
            .ok_or_else(|| QaError::NotFound(format!("{} 没有索引表", self.location())))
    }

    async fn load_collection(&self) -> Result<SeriesCollection> {
        self.documents
            .read()
            .await
            .get(&self.name)
            .cloned()
            .ok_or_else(|| QaError::NotFound(format!("{} 没有结果文档", self.location())))
    }

    async fn save_collection(&self, collection: &SeriesCollection) -> Result<()> {
        self.documents
            .write()
            .await
            .insert(self.name.clone(), collection.clone());
        Ok(())
    }
}

/// 读取模板文件
pub async fn load_template(path: &Path) -> Result<Template> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        QaError::Template(format!("模板文件无法读取 {}: {}", path.display(), e))
    })?;
    let template = Template::from_json_str(&text)?;
    info!(
        "加载模板 {}: {} 个期望序列, {} 项检查",
        path.display(),
        template.expected_series.len(),
        template.checks.len()
    );
    Ok(template)
}

/// 查找根目录下包含索引表的子目录，按路径排序
pub async fn discover_directories(root: &Path, layout: &DocumentLayout) -> Result<Vec<PathBuf>> {
    let mut directories = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let directory = entry.path();
        if tokio::fs::try_exists(directory.join(&layout.index_file))
            .await
            .unwrap_or(false)
        {
            directories.push(directory);
        }
    }

    directories.sort();
    debug!("在 {} 下找到 {} 个患者目录", root.display(), directories.len());
    Ok(directories)
}
