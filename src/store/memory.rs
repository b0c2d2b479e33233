//! 内存任务存储（测试与临时运行）

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::core::checkpoint::{Checkpoint, StepRecord};
use crate::core::task::{Task, TaskFailure, TaskId, TaskStatus};
use crate::store::{
    check_commit, check_generation, normalize_error, StepCommit, StoreError, TaskStore,
};

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    /// 插入顺序，用于 list 的稳定排序
    order: Vec<TaskId>,
    checkpoints: HashMap<TaskId, Vec<Checkpoint>>,
    steps: HashMap<TaskId, Vec<StepRecord>>,
}

impl Inner {
    fn task_mut(&mut self, task_id: &str) -> Result<&mut Task, StoreError> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }
}

/// 内存存储：一把 RwLock 保护全部表，写操作天然原子
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id.clone()));
        }
        inner.order.push(task.id.clone());
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.inner.read().await.tasks.get(task_id).cloned())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn set_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<TaskFailure>,
        fence: Option<u64>,
    ) -> Result<Task, StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(task_id)?;
        check_generation(task, fence)?;
        task.status = status;
        task.error = normalize_error(status, error);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn begin_generation(&self, task_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(task_id)?;
        task.generation += 1;
        task.status = TaskStatus::Running;
        task.error = None;
        task.updated_at = Utc::now();
        Ok(task.generation)
    }

    async fn commit_step(&self, commit: &StepCommit) -> Result<Task, StoreError> {
        let mut inner = self.inner.write().await;
        let task_id = commit.checkpoint.task_id.clone();
        let latest = inner
            .checkpoints
            .get(&task_id)
            .and_then(|c| c.last())
            .map(|c| c.step_index);
        {
            let task = inner
                .tasks
                .get(&task_id)
                .ok_or_else(|| StoreError::TaskNotFound(task_id.clone()))?;
            check_commit(task, latest, &commit.checkpoint)?;
        }

        inner
            .checkpoints
            .entry(task_id.clone())
            .or_default()
            .push(commit.checkpoint.clone());
        inner
            .steps
            .entry(task_id.clone())
            .or_default()
            .extend(commit.steps.iter().cloned());

        let task = inner.task_mut(&task_id)?;
        for reference in &commit.result_refs {
            if !task.result_refs.contains(reference) {
                task.result_refs.push(reference.clone());
            }
        }
        if commit.finish {
            task.status = TaskStatus::Completed;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn latest_checkpoint(&self, task_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .checkpoints
            .get(task_id)
            .and_then(|c| c.last())
            .cloned())
    }

    async fn list_checkpoints(&self, task_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.checkpoints.get(task_id).cloned().unwrap_or_default())
    }

    async fn list_steps(&self, task_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut steps = inner.steps.get(task_id).cloned().unwrap_or_default();
        // 失败记录先于同序号的成功记录写入，稳定排序保持该顺序
        steps.sort_by_key(|s| s.step_index);
        Ok(steps)
    }

    async fn append_steps(
        &self,
        task_id: &str,
        generation: u64,
        steps: &[StepRecord],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        check_generation(inner.task_mut(task_id)?, Some(generation))?;
        inner
            .steps
            .entry(task_id.to_string())
            .or_default()
            .extend(steps.iter().cloned());
        Ok(())
    }
}
