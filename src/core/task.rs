//! 任务模型：Task、模式、状态机与只读投影
//!
//! 状态只由调度器修改；`TaskStatus::can_transition_to` 给出合法迁移，
//! 轮询方只拿到 `TaskSnapshot`。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务 ID
pub type TaskId = String;

/// 生成新的任务 ID（`task_<uuid>`）
pub fn new_task_id() -> TaskId {
    format!("task_{}", uuid::Uuid::new_v4())
}

/// 智能体模式（封闭集合，启动时选定后不再改变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    Plan,
    Explore,
    Write,
    Research,
    Debate,
}

impl TaskMode {
    pub const ALL: [TaskMode; 5] = [
        TaskMode::Plan,
        TaskMode::Explore,
        TaskMode::Write,
        TaskMode::Research,
        TaskMode::Debate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Plan => "plan",
            TaskMode::Explore => "explore",
            TaskMode::Write => "write",
            TaskMode::Research => "research",
            TaskMode::Debate => "debate",
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown mode: {s}"))
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// 已创建，尚未派发
    Pending,
    /// 有执行体在跑（或进程崩溃后遗留，等待恢复）
    Running,
    /// 已暂停，可 Resume
    Paused,
    /// 全部步骤完成
    Completed,
    /// 不可重试的步骤失败
    Failed,
    /// 已取消
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
            TaskStatus::Paused => "Paused",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 状态机：Pending 与终态都不会被重新进入；Running -> Running 表示崩溃恢复换代
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Cancelled)
                | (Paused, Cancelled)
                | (Running, Failed)
                | (Running, Completed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// 失败原因：机器可读的 reason + 人类可读的 detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub reason: String,
    pub detail: String,
}

impl TaskFailure {
    pub fn new(reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// 编排单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub goal: String,
    pub mode: TaskMode,
    pub status: TaskStatus,
    /// 客户端传入的不透明配置（部分键可覆盖模式参数）
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 仅在 Failed 时存在
    pub error: Option<TaskFailure>,
    /// 产物引用，只追加
    pub result_refs: Vec<String>,
    /// 栅栏代数：每次 start / resume 递增
    pub generation: u64,
}

impl Task {
    pub fn new(id: TaskId, goal: String, mode: TaskMode, config: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            goal,
            mode,
            status: TaskStatus::Pending,
            config,
            created_at: now,
            updated_at: now,
            error: None,
            result_refs: Vec::new(),
            generation: 0,
        }
    }
}

/// 轮询用的只读投影
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub goal: String,
    pub mode: TaskMode,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<TaskFailure>,
    pub result_refs: Vec<String>,
    /// 最近一次已提交检查点的步骤序号
    pub last_step: Option<u64>,
}

impl TaskSnapshot {
    pub fn project(task: &Task, last_step: Option<u64>) -> Self {
        Self {
            task_id: task.id.clone(),
            goal: task.goal.clone(),
            mode: task.mode,
            status: task.status,
            created_at: task.created_at,
            updated_at: task.updated_at,
            error: task.error.clone(),
            result_refs: task.result_refs.clone(),
            last_step,
        }
    }
}
