//! 调度层错误与步骤错误
//!
//! TaskError 同步返回给调用方，不改变任务状态；StepError 由执行循环转换为 Failed。

use thiserror::Error;

use crate::core::checkpoint::StepRecord;
use crate::core::task::{TaskFailure, TaskId};
use crate::llm::GatewayError;
use crate::store::StoreError;

/// 调度器操作的错误
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// 重复的活跃执行，或非法状态迁移
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 更新的 Resume 已接管，旧执行体必须立即退出且不写入
    #[error("Checkpoint fenced: task {task_id} generation {generation} was superseded")]
    CheckpointFenced { task_id: TaskId, generation: u64 },

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Fenced {
                task_id,
                generation,
                ..
            } => TaskError::CheckpointFenced {
                task_id,
                generation,
            },
            StoreError::TaskNotFound(id) => TaskError::NotFound(id),
            other => TaskError::Storage(other),
        }
    }
}

/// 单个步骤的失败（可重试错误已在步骤内部耗尽）
#[derive(Error, Debug)]
pub enum StepError {
    /// 不可重试的网关错误，或重试次数耗尽
    #[error("{label}: gateway failed after {attempts} attempt(s): {error}")]
    Gateway {
        label: String,
        error: GatewayError,
        attempts: u32,
        /// 失败的那次往返，写入步骤日志
        record: Box<StepRecord>,
    },

    /// 检查点里的 state_blob 无法解析
    #[error("Invalid executor state: {0}")]
    State(String),

    /// 收到 Cancel / Superseded，进行中的步骤被放弃
    #[error("Step interrupted")]
    Interrupted,
}

impl StepError {
    /// 转换为写入任务的失败原因
    pub fn failure(&self) -> TaskFailure {
        match self {
            StepError::Gateway {
                error, attempts, ..
            } => {
                let reason = if error.is_retryable() {
                    "retries_exhausted".to_string()
                } else {
                    format!("gateway_{}", error.reason())
                };
                TaskFailure::new(reason, format!("{} (attempts: {})", error, attempts))
            }
            StepError::State(detail) => TaskFailure::new("invalid_state", detail.clone()),
            StepError::Interrupted => TaskFailure::new("interrupted", "step abandoned"),
        }
    }

    pub fn failed_record(&self) -> Option<&StepRecord> {
        match self {
            StepError::Gateway { record, .. } => Some(record),
            StepError::State(_) | StepError::Interrupted => None,
        }
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        StepError::State(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checkpoint::StepOutcomeKind;

    fn failed(error: GatewayError, attempts: u32) -> StepError {
        StepError::Gateway {
            label: "outline".into(),
            error,
            attempts,
            record: Box::new(StepRecord {
                step_index: 0,
                label: "outline".into(),
                prompt: "p".into(),
                context: vec![],
                output: String::new(),
                attempts,
                outcome: StepOutcomeKind::Failed,
            }),
        }
    }

    #[test]
    fn test_fatal_gateway_failure_reason() {
        let err = failed(GatewayError::Unauthorized("bad key".into()), 1);
        let failure = err.failure();
        assert_eq!(failure.reason, "gateway_unauthorized");
        assert!(failure.detail.contains("bad key"));
    }

    #[test]
    fn test_exhausted_retry_reason() {
        let err = failed(GatewayError::RateLimited { retry_after_ms: None }, 3);
        assert_eq!(err.failure().reason, "retries_exhausted");
        assert!(err.failure().detail.contains("attempts: 3"));
    }

    #[test]
    fn test_fenced_store_error_maps_to_checkpoint_fenced() {
        let err: TaskError = StoreError::Fenced {
            task_id: "t".into(),
            generation: 1,
            reason: "generation 1 != 2".into(),
        }
        .into();
        assert!(matches!(err, TaskError::CheckpointFenced { generation: 1, .. }));
    }
}
