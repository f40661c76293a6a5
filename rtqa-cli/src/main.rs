//! RTQA命令行主程序

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rtqa_admin::{ConfigManager, DirectorySummary, QaConfig, RunSummary};
use rtqa_core::{QaError, RunReporter, TracingReporter};
use rtqa_storage::{discover_directories, load_template, DocumentStore, FsDocumentStore};
use rtqa_workflow::{ObservedGraph, ProtocolEngine};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{error, info, warn};

/// 放疗影像序列协议一致性检查
#[derive(Parser, Debug)]
#[command(name = "rtqa")]
#[command(about = "放疗影像序列协议一致性检查工具")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 由索引表构建结果文档
    Series {
        /// 患者目录
        directory: PathBuf,
        /// 模板JSON
        #[arg(short, long)]
        template: Option<PathBuf>,
    },
    /// 将序列匹配到模板节点
    Match {
        directory: PathBuf,
        #[arg(short, long)]
        template: Option<PathBuf>,
    },
    /// 执行模板中的检查
    Check {
        directory: PathBuf,
        #[arg(short, long)]
        template: Option<PathBuf>,
    },
    /// 对所有子目录依次执行构建、匹配和检查
    Run {
        /// 包含患者子目录的根目录
        directory: PathBuf,
        #[arg(short, long)]
        template: Option<PathBuf>,
    },
    /// 写出默认配置文件
    InitConfig {
        /// 输出路径
        #[arg(default_value = "rtqa.toml")]
        path: PathBuf,
        /// 覆盖已有文件
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let manager = ConfigManager::new(args.config.as_deref())?;
    let config = manager.get_config().await;
    init_logging(&config, args.log_level.as_deref());

    match args.command {
        Command::Series {
            directory,
            template,
        } => {
            let engine = build_engine(&config, template.as_deref()).await?;
            let store = FsDocumentStore::new(&directory, config.pipeline.layout());
            let reporter = TracingReporter::new();

            let table = store.load_index().await?;
            let collection = engine.build_collection(&table, &reporter)?;
            store.save_collection(&collection).await?;
            info!(
                "已写入 {}: {} 个序列",
                store.document_path().display(),
                collection.series.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Match {
            directory,
            template,
        } => {
            let engine = build_engine(&config, template.as_deref()).await?;
            let store = FsDocumentStore::new(&directory, config.pipeline.layout());
            let reporter = TracingReporter::new();

            let mut collection = store.load_collection().await?;
            let observed = match store.load_index().await {
                Ok(table) => ObservedGraph::from_index(&table),
                Err(QaError::NotFound(_)) => {
                    warn!("{} 没有索引表，使用结果文档建图", store.location());
                    ObservedGraph::from_collection(&collection)
                }
                Err(e) => return Err(e.into()),
            };

            engine.match_series(&mut collection, &observed, &reporter);
            store.save_collection(&collection).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check {
            directory,
            template,
        } => {
            let engine = build_engine(&config, template.as_deref()).await?;
            let store = FsDocumentStore::new(&directory, config.pipeline.layout());
            let reporter = TracingReporter::new();

            let mut collection = store.load_collection().await?;
            engine.run_checks(&mut collection, &reporter);
            store.save_collection(&collection).await?;

            let critical = collection.critical_failures();
            if critical > 0 {
                error!("{} 项关键检查失败", critical);
                return Ok(ExitCode::from(1));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            directory,
            template,
        } => {
            let engine = build_engine(&config, template.as_deref()).await?;
            let summary = run_all(Arc::new(engine), &config, &directory).await?;
            let code = u8::try_from(summary.exit_code()).unwrap_or(2);
            Ok(ExitCode::from(code))
        }
        Command::InitConfig { path, force } => {
            if path.exists() && !force {
                bail!("{} 已存在，使用 --force 覆盖", path.display());
            }
            QaConfig::default().save(&path).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// 初始化日志
fn init_logging(config: &QaConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&config.logging.level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_ansi(config.logging.ansi);

    if config.logging.format == "compact" {
        builder.compact().init();
    } else {
        builder.init();
    }
}

/// 加载模板并编译引擎；命令行参数优先于配置
async fn build_engine(config: &QaConfig, template: Option<&Path>) -> Result<ProtocolEngine> {
    let path = match (template, config.pipeline.template.as_deref()) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(path)) => PathBuf::from(path),
        (None, None) => bail!("未指定模板：使用 --template 或在配置中设置 pipeline.template"),
    };

    let template = load_template(&path).await?;
    let engine = ProtocolEngine::new(template)
        .with_context(|| format!("模板 {} 无法编译", path.display()))?
        .with_index_validation(config.pipeline.validate_index);
    Ok(engine)
}

/// 并发处理根目录下的所有患者目录并写出汇总
async fn run_all(engine: Arc<ProtocolEngine>, config: &QaConfig, root: &Path) -> Result<RunSummary> {
    let layout = config.pipeline.layout();
    let directories = discover_directories(root, &layout)
        .await
        .with_context(|| format!("无法读取目录 {}", root.display()))?;
    info!("开始处理 {} 个患者目录", directories.len());

    let reporter = Arc::new(TracingReporter::new());
    let mut summary = RunSummary::new(reporter.run_id());
    let permits = Arc::new(Semaphore::new(config.pipeline.max_concurrent_directories));
    let mut tasks = JoinSet::new();
    let mut pending = HashMap::new();

    for directory in directories {
        let path = directory.clone();
        let engine = Arc::clone(&engine);
        let reporter = Arc::clone(&reporter);
        let permits = Arc::clone(&permits);
        let store = FsDocumentStore::new(&directory, layout.clone());

        let handle = tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            match process_directory(&engine, &store, reporter.as_ref()).await {
                Ok(entry) => entry,
                Err(e) => {
                    error!("处理 {} 失败: {}", directory.display(), e);
                    DirectorySummary::failed(directory, e)
                }
            }
        });
        pending.insert(handle.id(), path);
    }

    collect_summaries(&mut tasks, &mut pending, &mut summary).await;
    summary.finish();
    summary
        .write(&root.join(&config.pipeline.summary_file))
        .await?;

    Ok(summary)
}

/// 收集所有目录任务的结果；任务异常退出时记为该目录处理失败
async fn collect_summaries(
    tasks: &mut JoinSet<DirectorySummary>,
    pending: &mut HashMap<Id, PathBuf>,
    summary: &mut RunSummary,
) {
    while let Some(joined) = tasks.join_next_with_id().await {
        let entry = match joined {
            Ok((_, entry)) => entry,
            Err(e) => {
                let directory = pending.remove(&e.id()).unwrap_or_default();
                error!("处理 {} 的任务异常退出: {}", directory.display(), e);
                DirectorySummary::failed(directory, format!("任务异常退出: {}", e))
            }
        };
        summary.push(entry);
    }
}

async fn process_directory(
    engine: &ProtocolEngine,
    store: &FsDocumentStore,
    reporter: &dyn RunReporter,
) -> rtqa_core::Result<DirectorySummary> {
    let table = store.load_index().await?;
    let (collection, report) = engine.process(&table, reporter)?;
    store.save_collection(&collection).await?;

    if !report.is_conformant() {
        warn!(
            "{}: 患者 {} 有 {} 项关键检查失败",
            store.location(),
            report.patient_id,
            report.critical_failures
        );
    }
    Ok(DirectorySummary::from_collection(store.directory(), &collection))
}
