//! 执行循环：每个执行体一个 tokio 任务
//!
//! 步骤边界检查信号 → 步骤上限 → 运行一步 → 经调度器提交。执行体自身从不直接写存储。

use crate::core::checkpoint::Checkpoint;
use crate::core::error::TaskError;
use crate::core::scheduler::{CommitResult, ExecutionEnd, TaskScheduler};
use crate::core::supervisor::ExecutionControl;
use crate::core::task::{Task, TaskFailure};
use crate::modes::ModeExecutor;

/// 运行一个执行体直到结束
pub(crate) async fn run(
    scheduler: &TaskScheduler,
    task: Task,
    generation: u64,
    checkpoint: Option<Checkpoint>,
    control: &ExecutionControl,
) -> ExecutionEnd {
    let task_id = task.id.clone();
    match drive(scheduler, &task, generation, checkpoint, control).await {
        Ok(end) => end,
        Err(TaskError::CheckpointFenced { .. }) => {
            tracing::warn!("execution superseded by a newer generation, exiting without writes");
            ExecutionEnd::Superseded
        }
        Err(e) => {
            tracing::error!(error = %e, "execution aborted by storage error");
            let failure = TaskFailure::new("storage", e.to_string());
            match scheduler.fail_with(&task_id, generation, failure).await {
                Ok(end) => end,
                Err(TaskError::CheckpointFenced { .. }) => ExecutionEnd::Superseded,
                Err(e) => {
                    tracing::error!(error = %e, "failed to record task failure");
                    ExecutionEnd::Failed
                }
            }
        }
    }
}

async fn drive(
    scheduler: &TaskScheduler,
    task: &Task,
    generation: u64,
    mut checkpoint: Option<Checkpoint>,
    control: &ExecutionControl,
) -> Result<ExecutionEnd, TaskError> {
    let settings = match scheduler.mode_settings(&task.config) {
        Ok(settings) => settings,
        Err(e) => {
            let failure = TaskFailure::new("invalid_config", e.to_string());
            return scheduler.fail_with(&task.id, generation, failure).await;
        }
    };
    let executor = ModeExecutor::for_mode(task.mode);
    let max_steps = scheduler.settings().max_steps_per_task;

    loop {
        if control.is_stopped() {
            return scheduler.interrupt(&task.id, generation, control).await;
        }

        let next = Checkpoint::next_step(checkpoint.as_ref());
        if next >= max_steps {
            let failure = TaskFailure::new(
                "step_limit_exceeded",
                format!("task did not finish within {max_steps} steps"),
            );
            return scheduler.fail_with(&task.id, generation, failure).await;
        }

        tracing::debug!(step = next, "running step");
        let ctx = scheduler.step_context(&settings, control);
        let outcome = match executor.run_step(&ctx, task, checkpoint.as_ref()).await {
            Ok(outcome) => outcome,
            Err(e) if control.is_discarded() => {
                tracing::debug!(error = %e, "step abandoned");
                return scheduler.interrupt(&task.id, generation, control).await;
            }
            Err(e) => return scheduler.fail(&task.id, generation, control, &e).await,
        };

        match scheduler.commit(&task.id, generation, control, outcome).await? {
            CommitResult::Continue(committed) => checkpoint = Some(committed),
            CommitResult::Finished => return Ok(ExecutionEnd::Completed),
            CommitResult::Discarded => {
                return scheduler.interrupt(&task.id, generation, control).await
            }
        }
    }
}
