//! 检查点与步骤记录
//!
//! Checkpoint N 表示步骤 0..=N 的副作用均已持久化；恢复时从 N+1 继续。
//! StepRecord 是一次「检索 + 补全」往返，随所属检查点一起提交。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::task::TaskId;
use crate::retrieval::Passage;

/// 单个任务的可恢复执行状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: TaskId,
    /// 最后一个成功完成的步骤
    pub step_index: u64,
    /// 写入时执行体持有的栅栏代数
    pub generation: u64,
    /// 执行器自定义的序列化进度
    pub state_blob: serde_json::Value,
    /// 该步骤是否为最后一步
    pub done: bool,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// 下一个要执行的步骤序号
    pub fn next_step(checkpoint: Option<&Checkpoint>) -> u64 {
        checkpoint.map_or(0, |c| c.step_index + 1)
    }
}

/// 步骤结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcomeKind {
    Succeeded,
    Failed,
}

impl StepOutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcomeKind::Succeeded => "succeeded",
            StepOutcomeKind::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "failed" {
            StepOutcomeKind::Failed
        } else {
            StepOutcomeKind::Succeeded
        }
    }
}

/// 一次检索 + 补全往返
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: u64,
    /// 步骤内的标签，如 "outline"、"section 2"
    pub label: String,
    pub prompt: String,
    pub context: Vec<Passage>,
    pub output: String,
    /// 实际调用补全的次数（含重试）
    pub attempts: u32,
    pub outcome: StepOutcomeKind,
}

impl StepRecord {
    pub fn succeeded(
        step_index: u64,
        label: impl Into<String>,
        prompt: String,
        context: Vec<Passage>,
        output: String,
        attempts: u32,
    ) -> Self {
        Self {
            step_index,
            label: label.into(),
            prompt,
            context,
            output,
            attempts,
            outcome: StepOutcomeKind::Succeeded,
        }
    }
}

/// 执行器产出的产物（最终报告）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// 文件名片段，同一任务内确定且稳定
    pub name: String,
    pub content: String,
}

impl Artifact {
    pub fn report(content: String) -> Self {
        Self {
            name: "report".to_string(),
            content,
        }
    }
}
