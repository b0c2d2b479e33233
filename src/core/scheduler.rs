//! 任务调度：生命周期状态机、单任务单执行、启动 / 取消 / 暂停 / 恢复
//!
//! 每个任务 id 一把异步互斥锁，串行化 Start / Cancel / Pause / Resume 与执行体的
//! 「检查点 → 状态」写入；状态查询不进入该区域。活跃注册表是内存缓存，重启后由
//! `recover_interrupted` 从存储重建。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::Instrument;

use crate::config::AppConfig;
use crate::core::checkpoint::{Checkpoint, StepRecord};
use crate::core::error::{StepError, TaskError};
use crate::core::execution;
use crate::core::recovery::{RecoveryEngine, RetryPolicy};
use crate::core::supervisor::{ExecutionControl, ExecutionHandle, Signal};
use crate::core::task::{
    new_task_id, Task, TaskFailure, TaskId, TaskMode, TaskSnapshot, TaskStatus,
};
use crate::llm::CompletionGateway;
use crate::modes::{ModeSettings, StepContext, StepOutcome};
use crate::retrieval::ContextRetriever;
use crate::store::{ArtifactStore, StepCommit, StoreError, TaskStore};

/// 调度器参数
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// 单任务步骤上限
    pub max_steps_per_task: u64,
    pub retry: RetryPolicy,
    pub completion_timeout: Duration,
    pub retrieval_timeout: Duration,
    /// 全局模式参数，任务 config 在其上覆盖
    pub modes: ModeSettings,
}

impl SchedulerSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_steps_per_task: cfg.scheduler.max_steps_per_task,
            retry: cfg.scheduler.retry.clone(),
            completion_timeout: Duration::from_secs(cfg.gateway.timeout_secs),
            retrieval_timeout: Duration::from_secs(cfg.retrieval.timeout_secs),
            modes: ModeSettings::from_config(cfg),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Start 请求
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub goal: String,
    pub mode: TaskMode,
    pub config: serde_json::Value,
    /// 客户端指定 id；None 时生成 `task_<uuid>`
    pub task_id: Option<TaskId>,
}

impl StartRequest {
    pub fn new(goal: impl Into<String>, mode: TaskMode) -> Self {
        Self {
            goal: goal.into(),
            mode,
            config: serde_json::json!({}),
            task_id: None,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_id(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// 提交结果
#[derive(Debug)]
pub(crate) enum CommitResult {
    /// 已提交，继续下一步
    Continue(Checkpoint),
    /// 已提交最后一步，任务 Completed
    Finished,
    /// 收到 Cancel / Superseded，步骤被丢弃
    Discarded,
}

/// 执行体的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionEnd {
    Completed,
    Paused,
    Cancelled,
    Failed,
    /// 被更新的代数接管，未写入任何内容
    Superseded,
}

/// 任务调度器
pub struct TaskScheduler {
    store: Arc<dyn TaskStore>,
    artifacts: Arc<dyn ArtifactStore>,
    gateway: Arc<dyn CompletionGateway>,
    retriever: Arc<dyn ContextRetriever>,
    recovery: RecoveryEngine,
    settings: SchedulerSettings,
    /// 每个任务一把锁
    locks: Mutex<HashMap<TaskId, Arc<Mutex<()>>>>,
    /// 活跃执行体
    active: Mutex<HashMap<TaskId, ExecutionHandle>>,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        artifacts: Arc<dyn ArtifactStore>,
        gateway: Arc<dyn CompletionGateway>,
        retriever: Arc<dyn ContextRetriever>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            artifacts,
            gateway,
            retriever,
            recovery: RecoveryEngine::new(settings.retry.clone()),
            settings,
            locks: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    async fn task_lock(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(task_id.to_string()).or_default())
    }

    async fn require_task(&self, task_id: &str) -> Result<Task, TaskError> {
        self.store
            .load_task(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    async fn snapshot_of(&self, task: &Task) -> Result<TaskSnapshot, TaskError> {
        let last_step = self
            .store
            .latest_checkpoint(&task.id)
            .await?
            .map(|c| c.step_index);
        Ok(TaskSnapshot::project(task, last_step))
    }

    /// 解析任务的模式参数（全局 + 任务覆盖）
    pub(crate) fn mode_settings(&self, task_config: &serde_json::Value) -> Result<ModeSettings, TaskError> {
        self.settings
            .modes
            .with_overrides(task_config)
            .map_err(TaskError::InvalidRequest)
    }

    /// 创建任务并立即派发执行，不等待任何步骤
    pub async fn start(self: &Arc<Self>, request: StartRequest) -> Result<TaskId, TaskError> {
        let goal = request.goal.trim().to_string();
        if goal.is_empty() {
            return Err(TaskError::InvalidRequest("goal must not be empty".to_string()));
        }
        self.mode_settings(&request.config)?
            .check_step_limit(request.mode, self.settings.max_steps_per_task)
            .map_err(TaskError::InvalidRequest)?;

        let task_id = match request.task_id {
            Some(id) if id.trim().is_empty() => {
                return Err(TaskError::InvalidRequest("task id must not be empty".to_string()))
            }
            Some(id) => id,
            None => new_task_id(),
        };

        let lock = self.task_lock(&task_id).await;
        let _guard = lock.lock().await;

        if self.active.lock().await.contains_key(&task_id) {
            return Err(TaskError::Conflict(format!(
                "task {task_id} already has an active execution"
            )));
        }

        let task = Task::new(task_id.clone(), goal, request.mode, request.config);
        match self.store.insert_task(&task).await {
            Ok(()) => {}
            Err(StoreError::DuplicateTask(id)) => {
                return Err(TaskError::Conflict(format!("task {id} already exists")))
            }
            Err(e) => return Err(e.into()),
        }

        let generation = self.store.begin_generation(&task_id).await?;
        let task = self.require_task(&task_id).await?;
        tracing::info!(task_id = %task_id, mode = %task.mode, "task started");
        self.spawn_execution(task, generation, None).await;
        Ok(task_id)
    }

    /// 协作式取消：活跃执行在下一个步骤边界停下；Paused 或孤儿 Running 直接置为 Cancelled
    pub async fn cancel(&self, task_id: &str) -> Result<TaskSnapshot, TaskError> {
        let lock = self.task_lock(task_id).await;
        let _guard = lock.lock().await;

        let task = self.require_task(task_id).await?;
        if !task.status.can_transition_to(TaskStatus::Cancelled) {
            return Err(TaskError::Conflict(format!(
                "cannot cancel task {task_id} in status {}",
                task.status
            )));
        }

        let handle = self.active.lock().await.get(task_id).cloned();
        match (task.status, handle) {
            (TaskStatus::Running, Some(handle)) => {
                handle.control.request(Signal::Cancel);
                tracing::info!(task_id, generation = handle.generation, "cancel requested");
                self.snapshot_of(&task).await
            }
            _ => {
                let task = self
                    .store
                    .set_status(task_id, TaskStatus::Cancelled, None, None)
                    .await?;
                tracing::info!(task_id, "task cancelled");
                self.snapshot_of(&task).await
            }
        }
    }

    /// 暂停：进行中的步骤提交后转为 Paused；孤儿 Running 直接置为 Paused
    pub async fn pause(&self, task_id: &str) -> Result<TaskSnapshot, TaskError> {
        let lock = self.task_lock(task_id).await;
        let _guard = lock.lock().await;

        let task = self.require_task(task_id).await?;
        if task.status != TaskStatus::Running {
            return Err(TaskError::Conflict(format!(
                "cannot pause task {task_id} in status {}",
                task.status
            )));
        }

        let handle = self.active.lock().await.get(task_id).cloned();
        match handle {
            Some(handle) => {
                handle.control.request(Signal::Pause);
                tracing::info!(task_id, generation = handle.generation, "pause requested");
                self.snapshot_of(&task).await
            }
            None => {
                let task = self
                    .store
                    .set_status(task_id, TaskStatus::Paused, None, None)
                    .await?;
                tracing::info!(task_id, "orphaned task paused");
                self.snapshot_of(&task).await
            }
        }
    }

    /// 恢复：从 Paused，或从 Running 接管（崩溃恢复）
    pub async fn resume(self: &Arc<Self>, task_id: &str) -> Result<TaskSnapshot, TaskError> {
        self.resume_inner(task_id, false).await
    }

    async fn resume_inner(
        self: &Arc<Self>,
        task_id: &str,
        allow_pending: bool,
    ) -> Result<TaskSnapshot, TaskError> {
        let lock = self.task_lock(task_id).await;
        let _guard = lock.lock().await;

        let task = self.require_task(task_id).await?;
        let resumable = matches!(task.status, TaskStatus::Paused | TaskStatus::Running)
            || (allow_pending && task.status == TaskStatus::Pending);
        if !resumable {
            return Err(TaskError::Conflict(format!(
                "cannot resume task {task_id} in status {}",
                task.status
            )));
        }

        if let Some(previous) = self.active.lock().await.remove(task_id) {
            previous.control.request(Signal::Superseded);
            tracing::info!(
                task_id,
                generation = previous.generation,
                "previous execution superseded"
            );
        }

        let generation = self.store.begin_generation(task_id).await?;
        let checkpoint = self.store.latest_checkpoint(task_id).await?;
        let task = self.require_task(task_id).await?;
        tracing::info!(
            task_id,
            generation,
            next_step = Checkpoint::next_step(checkpoint.as_ref()),
            "task resumed"
        );
        let snapshot = TaskSnapshot::project(&task, checkpoint.as_ref().map(|c| c.step_index));
        self.spawn_execution(task, generation, checkpoint).await;
        Ok(snapshot)
    }

    /// 只读状态投影，不进入任务锁
    pub async fn status(&self, task_id: &str) -> Result<TaskSnapshot, TaskError> {
        let task = self.require_task(task_id).await?;
        self.snapshot_of(&task).await
    }

    /// 按创建时间列出任务
    pub async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<TaskSnapshot>, TaskError> {
        let tasks = self.store.list_tasks(status).await?;
        let mut snapshots = Vec::with_capacity(tasks.len());
        for task in &tasks {
            snapshots.push(self.snapshot_of(task).await?);
        }
        Ok(snapshots)
    }

    /// 步骤日志
    pub async fn steps(&self, task_id: &str) -> Result<Vec<StepRecord>, TaskError> {
        self.require_task(task_id).await?;
        Ok(self.store.list_steps(task_id).await?)
    }

    /// 活跃执行体数量
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// 重启后恢复上一个进程遗留的 Running / Pending 任务
    pub async fn recover_interrupted(self: &Arc<Self>) -> Result<Vec<TaskId>, TaskError> {
        let mut candidates = self.store.list_tasks(Some(TaskStatus::Running)).await?;
        candidates.extend(self.store.list_tasks(Some(TaskStatus::Pending)).await?);

        let mut recovered = Vec::new();
        for task in candidates {
            if self.active.lock().await.contains_key(&task.id) {
                continue;
            }
            match self.resume_inner(&task.id, true).await {
                Ok(_) => recovered.push(task.id),
                // 并发操作可能已改变状态
                Err(TaskError::Conflict(msg)) => {
                    tracing::warn!(task_id = %task.id, "skip recovery: {}", msg)
                }
                Err(e) => return Err(e),
            }
        }
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "interrupted tasks recovered");
        }
        Ok(recovered)
    }

    /// 暂停所有活跃执行并等待注册表清空；返回超时后仍未退出的数量
    pub async fn drain(&self, timeout: Duration) -> usize {
        let controls: Vec<ExecutionControl> = self
            .active
            .lock()
            .await
            .values()
            .map(|h| h.control.clone())
            .collect();
        if controls.is_empty() {
            return 0;
        }
        tracing::info!(count = controls.len(), "draining active executions");
        for control in &controls {
            control.request(Signal::Pause);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = self.active_count().await;
            if remaining == 0 {
                return 0;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(remaining, "drain timed out");
                return remaining;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// 注册并派发执行体；调用方持有任务锁
    async fn spawn_execution(
        self: &Arc<Self>,
        task: Task,
        generation: u64,
        checkpoint: Option<Checkpoint>,
    ) {
        let control = ExecutionControl::new();
        self.active.lock().await.insert(
            task.id.clone(),
            ExecutionHandle {
                generation,
                control: control.clone(),
            },
        );

        let span = tracing::info_span!(
            "execution",
            task_id = %task.id,
            generation,
            mode = %task.mode
        );
        let scheduler = Arc::clone(self);
        tokio::spawn(
            async move {
                let task_id = task.id.clone();
                let end = execution::run(&scheduler, task, generation, checkpoint, &control).await;
                scheduler.release(&task_id, generation).await;
                tracing::info!(?end, "execution finished");
            }
            .instrument(span),
        );
    }

    /// 执行体退出时移出注册表（仅当仍是同一代数），并回收无人持有的任务锁
    async fn release(&self, task_id: &str, generation: u64) {
        {
            let mut active = self.active.lock().await;
            if active.get(task_id).map(|h| h.generation) != Some(generation) {
                return;
            }
            active.remove(task_id);
        }

        let mut locks = self.locks.lock().await;
        if locks.get(task_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(task_id);
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub(crate) fn step_context<'a>(
        &'a self,
        settings: &'a ModeSettings,
        control: &'a ExecutionControl,
    ) -> StepContext<'a> {
        StepContext::new(
            self.gateway.as_ref(),
            self.retriever.as_ref(),
            &self.recovery,
            control,
            settings,
            self.settings.completion_timeout,
            self.settings.retrieval_timeout,
        )
    }

    /// 事务性提交一个步骤：产物、检查点、步骤记录、产物引用，最后一步同时置 Completed
    pub(crate) async fn commit(
        &self,
        task_id: &str,
        generation: u64,
        control: &ExecutionControl,
        outcome: StepOutcome,
    ) -> Result<CommitResult, TaskError> {
        let lock = self.task_lock(task_id).await;
        let _guard = lock.lock().await;

        if control.is_discarded() {
            tracing::debug!(step = outcome.step_index, "step discarded");
            return Ok(CommitResult::Discarded);
        }

        let mut result_refs = Vec::new();
        if let Some(artifact) = &outcome.artifact {
            // 先确认仍持有当前代数，旧执行体不得覆盖产物
            self.ensure_generation(task_id, generation).await?;
            result_refs.push(self.artifacts.put(task_id, artifact).await?);
        }

        let checkpoint = Checkpoint {
            task_id: task_id.to_string(),
            step_index: outcome.step_index,
            generation,
            state_blob: outcome.state_blob,
            done: outcome.done,
            created_at: chrono::Utc::now(),
        };
        let commit = StepCommit {
            checkpoint: checkpoint.clone(),
            steps: outcome.records,
            result_refs,
            finish: outcome.done,
        };
        self.store.commit_step(&commit).await?;
        tracing::debug!(step = checkpoint.step_index, done = checkpoint.done, "checkpoint committed");

        if checkpoint.done {
            tracing::info!(task_id, "task completed");
            Ok(CommitResult::Finished)
        } else {
            Ok(CommitResult::Continue(checkpoint))
        }
    }

    async fn ensure_generation(&self, task_id: &str, generation: u64) -> Result<(), TaskError> {
        let task = self.require_task(task_id).await?;
        if task.generation != generation || task.status != TaskStatus::Running {
            return Err(TaskError::CheckpointFenced {
                task_id: task_id.to_string(),
                generation,
            });
        }
        Ok(())
    }

    /// 在步骤边界响应 Pause / Cancel；Superseded 直接退出
    pub(crate) async fn interrupt(
        &self,
        task_id: &str,
        generation: u64,
        control: &ExecutionControl,
    ) -> Result<ExecutionEnd, TaskError> {
        let lock = self.task_lock(task_id).await;
        let _guard = lock.lock().await;

        let (status, end) = match control.signal() {
            Some(Signal::Pause) => (TaskStatus::Paused, ExecutionEnd::Paused),
            Some(Signal::Cancel) => (TaskStatus::Cancelled, ExecutionEnd::Cancelled),
            Some(Signal::Superseded) | None => return Ok(ExecutionEnd::Superseded),
        };
        self.store
            .set_status(task_id, status, None, Some(generation))
            .await?;
        tracing::info!(task_id, status = %status, "execution stopped at step boundary");
        Ok(end)
    }

    /// 步骤失败：记录失败的往返并置为 Failed
    pub(crate) async fn fail(
        &self,
        task_id: &str,
        generation: u64,
        control: &ExecutionControl,
        error: &StepError,
    ) -> Result<ExecutionEnd, TaskError> {
        let failure = error.failure();
        {
            let lock = self.task_lock(task_id).await;
            let _guard = lock.lock().await;

            if !control.is_discarded() {
                if let Some(record) = error.failed_record() {
                    self.store
                        .append_steps(task_id, generation, std::slice::from_ref(record))
                        .await?;
                }
                self.store
                    .set_status(task_id, TaskStatus::Failed, Some(failure.clone()), Some(generation))
                    .await?;
                tracing::warn!(task_id, reason = %failure.reason, detail = %failure.detail, "task failed");
                return Ok(ExecutionEnd::Failed);
            }
        }
        // 失败与取消同时发生时按取消处理
        self.interrupt(task_id, generation, control).await
    }

    /// 非步骤原因的失败（步骤上限、配置错误、存储错误）
    pub(crate) async fn fail_with(
        &self,
        task_id: &str,
        generation: u64,
        failure: TaskFailure,
    ) -> Result<ExecutionEnd, TaskError> {
        let lock = self.task_lock(task_id).await;
        let _guard = lock.lock().await;
        self.store
            .set_status(task_id, TaskStatus::Failed, Some(failure.clone()), Some(generation))
            .await?;
        tracing::warn!(task_id, reason = %failure.reason, detail = %failure.detail, "task failed");
        Ok(ExecutionEnd::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockGateway;
    use crate::retrieval::NoopRetriever;
    use crate::store::{MemoryArtifactStore, MemoryTaskStore};

    fn scheduler(store: Arc<MemoryTaskStore>) -> Arc<TaskScheduler> {
        Arc::new(TaskScheduler::new(
            store,
            Arc::new(MemoryArtifactStore::new()),
            Arc::new(MockGateway::new()),
            Arc::new(NoopRetriever),
            SchedulerSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let scheduler = scheduler(Arc::new(MemoryTaskStore::new()));
        assert!(matches!(scheduler.status("nope").await, Err(TaskError::NotFound(_))));
        assert!(matches!(scheduler.cancel("nope").await, Err(TaskError::NotFound(_))));
        assert!(matches!(scheduler.pause("nope").await, Err(TaskError::NotFound(_))));
        assert!(matches!(scheduler.resume("nope").await, Err(TaskError::NotFound(_))));
        assert!(matches!(scheduler.steps("nope").await, Err(TaskError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_start_requests() {
        let scheduler = scheduler(Arc::new(MemoryTaskStore::new()));
        let empty = StartRequest::new("   ", TaskMode::Plan);
        assert!(matches!(scheduler.start(empty).await, Err(TaskError::InvalidRequest(_))));

        let bad_config = StartRequest::new("goal", TaskMode::Debate)
            .with_config(serde_json::json!({ "max_rounds": "many" }));
        assert!(matches!(
            scheduler.start(bad_config).await,
            Err(TaskError::InvalidRequest(_))
        ));
        assert!(scheduler.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_running_task_is_paused_directly() {
        let store = Arc::new(MemoryTaskStore::new());
        let task = Task::new("orphan".into(), "goal".into(), TaskMode::Write, serde_json::json!({}));
        store.insert_task(&task).await.unwrap();
        store.begin_generation("orphan").await.unwrap();

        let scheduler = scheduler(Arc::clone(&store));
        let snapshot = scheduler.pause("orphan").await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Paused);

        let snapshot = scheduler.cancel("orphan").await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert!(matches!(scheduler.resume("orphan").await, Err(TaskError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_bounds_beyond_step_limit_rejected_at_start() {
        let scheduler = scheduler(Arc::new(MemoryTaskStore::new()));
        let endless = StartRequest::new("goal", TaskMode::Explore)
            .with_config(serde_json::json!({ "max_steps": 100, "max_frontier": 1 }));
        match scheduler.start(endless).await {
            Err(TaskError::InvalidRequest(msg)) => assert!(msg.contains("limit of 64")),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
        assert!(scheduler.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finished_tasks_release_their_locks() {
        let scheduler = scheduler(Arc::new(MemoryTaskStore::new()));
        for n in 0..5 {
            let request = StartRequest::new("goal", TaskMode::Research).with_id(format!("t{n}"));
            scheduler.start(request).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while scheduler.active_count().await > 0 {
            assert!(tokio::time::Instant::now() < deadline, "executions did not exit");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(scheduler.lock_count().await, 0);
        for task in scheduler.list(None).await.unwrap() {
            assert_eq!(task.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_pending_task_cannot_be_resumed_by_clients() {
        let store = Arc::new(MemoryTaskStore::new());
        let task = Task::new("p".into(), "goal".into(), TaskMode::Plan, serde_json::json!({}));
        store.insert_task(&task).await.unwrap();
        let scheduler = scheduler(store);
        assert!(matches!(scheduler.resume("p").await, Err(TaskError::Conflict(_))));
    }
}
