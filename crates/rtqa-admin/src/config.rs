//! 配置管理
//!
//! 默认值 → 配置文件（可选）→ `RTQA_` 环境变量，后者覆盖前者。
//! 环境变量用双下划线分隔层级，例如 `RTQA_PIPELINE__MAX_CONCURRENT_DIRECTORIES=8`。

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use rtqa_storage::DocumentLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "RTQA";

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<QaConfig>>,
    /// 配置文件路径
    config_path: Option<PathBuf>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QaConfig {
    /// 流水线配置
    pub pipeline: PipelineConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 流水线配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 逐文件索引表文件名
    pub index_file: String,
    /// 结果文档文件名
    pub document_file: String,
    /// 多目录运行的汇总文件名
    pub summary_file: String,
    /// 默认模板路径
    pub template: Option<String>,
    /// 同时处理的目录数上限
    pub max_concurrent_directories: usize,
    /// 构建结果文档前是否校验索引表
    pub validate_index: bool,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（EnvFilter 语法）
    pub level: String,
    /// 日志格式：full 或 compact
    pub format: String,
    /// 是否输出颜色
    pub ansi: bool,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&QaConfig) -> Result<()>,
}

impl ConfigManager {
    /// 创建新的配置管理器；未给出文件时只使用默认值和环境变量
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__");
        Self::with_environment(config_path, environment)
    }

    /// 使用给定的环境变量来源创建
    pub fn with_environment(config_path: Option<&Path>, environment: Environment) -> Result<Self> {
        let config = Self::load_config(config_path, environment)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.map(Path::to_path_buf),
            validator,
        })
    }

    /// 加载配置
    fn load_config(config_path: Option<&Path>, environment: Environment) -> Result<QaConfig> {
        let defaults = Config::try_from(&QaConfig::default())
            .context("Failed to build default configuration")?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(environment)
            .build()
            .context("Failed to load configuration")?;

        let config: QaConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path.display()),
            None => debug!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub async fn get_config(&self) -> QaConfig {
        self.config.read().await.clone()
    }

    /// 更新配置
    pub async fn update_config(&self, new_config: QaConfig) -> Result<()> {
        self.validator.validate(&new_config)?;
        *self.config.write().await = new_config;
        info!("Configuration updated");
        Ok(())
    }

    /// 获取配置值，路径以点分隔，例如 `pipeline.index_file`
    pub async fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let config = self.config.read().await;
        let config_json =
            serde_json::to_value(&*config).context("Failed to serialize config to JSON")?;

        let mut current = &config_json;
        for part in path.split('.') {
            current = current
                .get(part)
                .ok_or_else(|| anyhow::anyhow!("Configuration path not found: {}", path))?;
        }

        serde_json::from_value(current.clone())
            .with_context(|| format!("Failed to deserialize configuration value: {}", path))
    }

    /// 当前配置对应的目录文件布局
    pub async fn layout(&self) -> DocumentLayout {
        self.config.read().await.pipeline.layout()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

impl PipelineConfig {
    pub fn layout(&self) -> DocumentLayout {
        DocumentLayout {
            index_file: self.index_file.clone(),
            document_file: self.document_file.clone(),
        }
    }
}

impl QaConfig {
    /// 以 TOML 写出配置文件
    pub async fn save(&self, path: &Path) -> Result<()> {
        let config_str =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create configuration directory")?;
        }
        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "pipeline.index_file",
                validator: |config| {
                    if config.pipeline.index_file.trim().is_empty() {
                        Err(anyhow::anyhow!("Index file name cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "pipeline.document_file",
                validator: |config| {
                    let pipeline = &config.pipeline;
                    if pipeline.document_file.trim().is_empty() {
                        Err(anyhow::anyhow!("Document file name cannot be empty"))
                    } else if pipeline.document_file == pipeline.index_file {
                        Err(anyhow::anyhow!("Document file must differ from index file"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "pipeline.summary_file",
                validator: |config| {
                    if config.pipeline.summary_file.trim().is_empty() {
                        Err(anyhow::anyhow!("Summary file name cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "pipeline.max_concurrent_directories",
                validator: |config| {
                    if config.pipeline.max_concurrent_directories == 0 {
                        Err(anyhow::anyhow!("Concurrent directory limit cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "logging.format",
                validator: |config| match config.logging.format.as_str() {
                    "full" | "compact" => Ok(()),
                    other => Err(anyhow::anyhow!("Unknown log format: {}", other)),
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &QaConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("Invalid {}: {}", rule.field_path, e));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index_file: "indexed.json".to_string(),
            document_file: "series.json".to_string(),
            summary_file: "check_results.json".to_string(),
            template: None,
            max_concurrent_directories: 4,
            validate_index: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
            ansi: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .source(Some(config::Map::new()))
    }

    #[tokio::test]
    async fn test_defaults_without_file() {
        let manager = ConfigManager::with_environment(None, no_environment()).unwrap();
        let config = manager.get_config().await;

        assert_eq!(config, QaConfig::default());
        assert_eq!(manager.layout().await, DocumentLayout::default());
        let summary: String = manager.get_value("pipeline.summary_file").await.unwrap();
        assert_eq!(summary, "check_results.json");
        assert!(manager.get_value::<String>("pipeline.missing").await.is_err());
    }

    #[tokio::test]
    async fn test_file_and_environment_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtqa.toml");
        tokio::fs::write(
            &path,
            "[pipeline]\nindex_file = \"index.json\"\ntemplate = \"hn.json\"\n",
        )
        .await
        .unwrap();

        let mut vars = config::Map::new();
        vars.insert(
            "RTQA_PIPELINE__MAX_CONCURRENT_DIRECTORIES".to_string(),
            "8".to_string(),
        );
        let environment = no_environment().source(Some(vars));

        let manager = ConfigManager::with_environment(Some(&path), environment).unwrap();
        let config = manager.get_config().await;
        assert_eq!(config.pipeline.index_file, "index.json");
        assert_eq!(config.pipeline.template.as_deref(), Some("hn.json"));
        assert_eq!(config.pipeline.max_concurrent_directories, 8);
        assert_eq!(config.pipeline.document_file, "series.json");
    }

    #[tokio::test]
    async fn test_saved_default_can_be_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("rtqa.toml");

        let mut original = QaConfig::default();
        original.pipeline.template = Some("templates/hn.json".to_string());
        original.save(&path).await.unwrap();

        let manager = ConfigManager::with_environment(Some(&path), no_environment()).unwrap();
        assert_eq!(manager.get_config().await, original);
        assert_eq!(manager.config_path(), Some(path.as_path()));
    }

    #[test]
    fn test_validator_rejects_bad_values() {
        let validator = ConfigValidator::new();
        assert!(validator.validate(&QaConfig::default()).is_ok());

        let mut config = QaConfig::default();
        config.pipeline.max_concurrent_directories = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = QaConfig::default();
        config.pipeline.document_file = config.pipeline.index_file.clone();
        assert!(validator.validate(&config).is_err());

        let mut config = QaConfig::default();
        config.logging.format = "xml".to_string();
        assert!(validator.validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_update_config_validates() {
        let manager = ConfigManager::with_environment(None, no_environment()).unwrap();
        let mut config = manager.get_config().await;
        config.pipeline.summary_file = String::new();
        assert!(manager.update_config(config).await.is_err());

        let mut config = manager.get_config().await;
        config.logging.level = "debug".to_string();
        manager.update_config(config).await.unwrap();
        assert_eq!(manager.get_config().await.logging.level, "debug");
    }
}
