//! Nexus - 智能体任务编排引擎
//!
//! 入口：加载配置、初始化日志与存储，按子命令启动 / 查询 / 控制任务。
//! 执行体运行在本进程内；Ctrl+C 会暂停活跃任务，之后可用 `resume` 或 `recover` 续跑。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use nexus::config::{load_config, AppConfig};
use nexus::core::shutdown::run_with_graceful_shutdown;
use nexus::core::{
    SchedulerDrain, SchedulerSettings, ShutdownCoordinator, ShutdownManager, StartRequest,
    TaskMode, TaskScheduler, TaskStatus,
};
use nexus::llm::create_gateway_from_config;
use nexus::retrieval::{ContextRetriever, KeywordRetriever, NoopRetriever};
use nexus::store::{FileArtifactStore, SqliteTaskStore};

/// Nexus 命令行
#[derive(Parser, Debug)]
#[command(name = "nexus", version, about = "Agent task orchestration engine")]
struct Cli {
    /// 额外的配置文件（TOML）
    #[arg(long = "config-file", global = true)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a task and run it in the foreground
    Run {
        /// Execution mode (plan, explore, write, research, debate)
        #[arg(long, short)]
        mode: TaskMode,

        /// Free-text goal
        goal: String,

        /// Client-chosen task id
        #[arg(long)]
        id: Option<String>,

        /// Per-task mode overrides as a JSON object
        #[arg(long)]
        config: Option<String>,
    },

    /// Resume a paused or interrupted task in the foreground
    Resume { task_id: String },

    /// Show a task's status
    Status { task_id: String },

    /// Show a task's step log
    Steps { task_id: String },

    /// List tasks
    List {
        /// Filter by status (pending, running, paused, completed, failed, cancelled)
        #[arg(long, short)]
        status: Option<TaskStatus>,
    },

    /// Pause a task
    Pause { task_id: String },

    /// Cancel a task
    Cancel { task_id: String },

    /// Resume every task left Running or Pending by a previous process
    Recover,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nexus::observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config_file.clone()).context("Failed to load config")?;
    let scheduler = build_scheduler(&cfg).context("Failed to initialize scheduler")?;

    match cli.command {
        Command::Run {
            mode,
            goal,
            id,
            config,
        } => {
            let mut request = StartRequest::new(goal, mode);
            if let Some(raw) = config {
                let value: serde_json::Value =
                    serde_json::from_str(&raw).context("--config must be a JSON object")?;
                request = request.with_config(value);
            }
            if let Some(id) = id {
                request = request.with_id(id);
            }
            let task_id = scheduler.start(request).await?;
            println!("{task_id}");
            run_foreground(&scheduler, &cfg).await;
            print_json(&scheduler.status(&task_id).await?)?;
        }
        Command::Resume { task_id } => {
            scheduler.resume(&task_id).await?;
            run_foreground(&scheduler, &cfg).await;
            print_json(&scheduler.status(&task_id).await?)?;
        }
        Command::Status { task_id } => print_json(&scheduler.status(&task_id).await?)?,
        Command::Steps { task_id } => print_json(&scheduler.steps(&task_id).await?)?,
        Command::List { status } => print_json(&scheduler.list(status).await?)?,
        Command::Pause { task_id } => print_json(&scheduler.pause(&task_id).await?)?,
        Command::Cancel { task_id } => print_json(&scheduler.cancel(&task_id).await?)?,
        Command::Recover => {
            let recovered = scheduler.recover_interrupted().await?;
            if recovered.is_empty() {
                println!("no interrupted tasks");
                return Ok(());
            }
            run_foreground(&scheduler, &cfg).await;
            for task_id in &recovered {
                print_json(&scheduler.status(task_id).await?)?;
            }
        }
    }
    Ok(())
}

fn build_scheduler(cfg: &AppConfig) -> anyhow::Result<Arc<TaskScheduler>> {
    let data_dir = &cfg.app.data_dir;
    let store = SqliteTaskStore::open(&data_dir.join("nexus.db"))
        .with_context(|| format!("Failed to open task store in {}", data_dir.display()))?;
    let artifacts = FileArtifactStore::new(data_dir.join("files"));

    let retriever: Arc<dyn ContextRetriever> = match &cfg.app.notes_dir {
        Some(dir) => {
            let retriever = KeywordRetriever::from_dir(dir)
                .with_context(|| format!("Failed to load notes from {}", dir.display()))?;
            tracing::info!(passages = retriever.len(), dir = %dir.display(), "notes loaded");
            Arc::new(retriever)
        }
        None => Arc::new(NoopRetriever),
    };

    Ok(Arc::new(TaskScheduler::new(
        Arc::new(store),
        Arc::new(artifacts),
        create_gateway_from_config(&cfg.gateway),
        retriever,
        SchedulerSettings::from_config(cfg),
    )))
}

/// 等待本进程的执行体全部结束；收到关闭信号时暂停它们
async fn run_foreground(scheduler: &Arc<TaskScheduler>, cfg: &AppConfig) {
    let manager = Arc::new(ShutdownManager::new());
    let drain_timeout = Duration::from_secs(cfg.scheduler.drain_timeout_secs);
    let mut coordinator =
        ShutdownCoordinator::new().with_timeout(cfg.scheduler.drain_timeout_secs + 1);
    coordinator.register(SchedulerDrain::new(Arc::clone(scheduler), drain_timeout));

    let watched = Arc::clone(scheduler);
    run_with_graceful_shutdown(
        manager,
        async move {
            while watched.active_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        },
        || coordinator.run_cleanup(),
    )
    .await;
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
