//! 持久化层：任务、检查点、步骤记录、产物引用
//!
//! 调度器是唯一的写入方；执行体只能经由调度器的 commit 间接写入。
//! 所有检查点写入都带栅栏校验：代数不符、任务不再 Running 或步骤乱序时返回 Fenced。

pub mod artifacts;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::checkpoint::{Checkpoint, StepRecord};
use crate::core::task::{Task, TaskFailure, TaskId, TaskStatus};

pub use artifacts::{ArtifactStore, FileArtifactStore, MemoryArtifactStore};
pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// 持久化错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 写入被栅栏拒绝（旧代数 / 非 Running / 步骤乱序）
    #[error("Write fenced for task {task_id} at generation {generation}: {reason}")]
    Fenced {
        task_id: TaskId,
        generation: u64,
        reason: String,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    /// 库中数据无法解析为领域类型
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Blocking task failed: {0}")]
    Join(String),
}

/// 一个步骤的事务性提交：检查点 + 步骤记录 + 产物引用（+ 完成状态）
#[derive(Debug, Clone)]
pub struct StepCommit {
    pub checkpoint: Checkpoint,
    pub steps: Vec<StepRecord>,
    /// 追加到 result_refs，已存在的引用会被忽略
    pub result_refs: Vec<String>,
    /// 为 true 时在同一事务内把任务置为 Completed
    pub finish: bool,
}

/// 任务存储 trait
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 新建任务；id 已存在时返回 DuplicateTask
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn load_task(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    /// 按创建时间升序
    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError>;

    /// 写入状态；fence 为 Some 时要求任务当前代数与之相同
    async fn set_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<TaskFailure>,
        fence: Option<u64>,
    ) -> Result<Task, StoreError>;

    /// 代数加一并置为 Running，返回新代数
    async fn begin_generation(&self, task_id: &str) -> Result<u64, StoreError>;

    /// 原子提交一个步骤
    async fn commit_step(&self, commit: &StepCommit) -> Result<Task, StoreError>;

    async fn latest_checkpoint(&self, task_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// 按 step_index 升序
    async fn list_checkpoints(&self, task_id: &str) -> Result<Vec<Checkpoint>, StoreError>;

    /// 按 (step_index, seq) 升序
    async fn list_steps(&self, task_id: &str) -> Result<Vec<StepRecord>, StoreError>;

    /// 追加不随检查点提交的步骤记录（例如失败的那次往返），同样受代数栅栏约束
    async fn append_steps(
        &self,
        task_id: &str,
        generation: u64,
        steps: &[StepRecord],
    ) -> Result<(), StoreError>;
}

/// 提交前的栅栏校验，两种存储实现共用
pub(crate) fn check_commit(
    task: &Task,
    latest: Option<u64>,
    checkpoint: &Checkpoint,
) -> Result<(), StoreError> {
    let fenced = |reason: String| StoreError::Fenced {
        task_id: task.id.clone(),
        generation: checkpoint.generation,
        reason,
    };
    if task.generation != checkpoint.generation {
        return Err(fenced(format!(
            "current generation is {}",
            task.generation
        )));
    }
    if task.status != TaskStatus::Running {
        return Err(fenced(format!("task is {}", task.status)));
    }
    let expected = latest.map_or(0, |n| n + 1);
    if checkpoint.step_index != expected {
        return Err(fenced(format!(
            "out-of-order step {} (expected {})",
            checkpoint.step_index, expected
        )));
    }
    Ok(())
}

/// 代数校验（set_status / append_steps）
pub(crate) fn check_generation(task: &Task, fence: Option<u64>) -> Result<(), StoreError> {
    match fence {
        Some(generation) if generation != task.generation => Err(StoreError::Fenced {
            task_id: task.id.clone(),
            generation,
            reason: format!("current generation is {}", task.generation),
        }),
        _ => Ok(()),
    }
}

/// 只有 Failed 保留 error
pub(crate) fn normalize_error(
    status: TaskStatus,
    error: Option<TaskFailure>,
) -> Option<TaskFailure> {
    if status == TaskStatus::Failed {
        error
    } else {
        None
    }
}
