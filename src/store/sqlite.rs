//! SQLite 任务存储
//!
//! 表：agent_tasks / agent_checkpoints / agent_task_steps / agent_artifacts。
//! rusqlite 为同步 API，所有操作经 spawn_blocking 执行；commit_step 在单个事务内完成。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::core::checkpoint::{Checkpoint, StepOutcomeKind, StepRecord};
use crate::core::task::{Task, TaskFailure, TaskStatus};
use crate::store::{
    check_commit, check_generation, normalize_error, StepCommit, StoreError, TaskStore,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agent_tasks (
    id TEXT PRIMARY KEY,
    goal TEXT NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    config TEXT NOT NULL,
    error_reason TEXT,
    error_detail TEXT,
    generation INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agent_tasks_status ON agent_tasks(status);

CREATE TABLE IF NOT EXISTS agent_checkpoints (
    task_id TEXT NOT NULL,
    step_index INTEGER NOT NULL,
    generation INTEGER NOT NULL,
    state_blob TEXT NOT NULL,
    done INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    PRIMARY KEY (task_id, step_index)
);

CREATE TABLE IF NOT EXISTS agent_task_steps (
    task_id TEXT NOT NULL,
    step_index INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    label TEXT NOT NULL,
    prompt TEXT NOT NULL,
    context TEXT NOT NULL,
    output TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (task_id, step_index, seq)
);

CREATE TABLE IF NOT EXISTS agent_artifacts (
    task_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    reference TEXT NOT NULL,
    PRIMARY KEY (task_id, seq),
    UNIQUE (task_id, reference)
);
"#;

const TASK_COLUMNS: &str = "id, goal, mode, status, config, error_reason, error_detail, generation, created_at, updated_at";

/// SQLite 存储：单连接 + 互斥锁
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

/// agent_tasks 一行的原始值（解析在 row 闭包之外进行）
struct TaskRow {
    id: String,
    goal: String,
    mode: String,
    status: String,
    config: String,
    error_reason: Option<String>,
    error_detail: Option<String>,
    generation: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            goal: row.get(1)?,
            mode: row.get(2)?,
            status: row.get(3)?,
            config: row.get(4)?,
            error_reason: row.get(5)?,
            error_detail: row.get(6)?,
            generation: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_task(self, result_refs: Vec<String>) -> Result<Task, StoreError> {
        let error = match (self.error_reason, self.error_detail) {
            (Some(reason), detail) => Some(TaskFailure::new(reason, detail.unwrap_or_default())),
            _ => None,
        };
        Ok(Task {
            mode: self.mode.parse().map_err(StoreError::Corrupt)?,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            config: serde_json::from_str(&self.config)?,
            id: self.id,
            goal: self.goal,
            created_at: self.created_at,
            updated_at: self.updated_at,
            error,
            result_refs,
            generation: self.generation as u64,
        })
    }
}

impl SqliteTaskStore {
    /// 打开（或创建）数据库文件并建表
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// 内存数据库（测试）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn load_refs(conn: &Connection, task_id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT reference FROM agent_artifacts WHERE task_id = ?1 ORDER BY seq")?;
    let refs = stmt
        .query_map(params![task_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(refs)
}

fn load_task(conn: &Connection, task_id: &str) -> Result<Option<Task>, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM agent_tasks WHERE id = ?1"),
            params![task_id],
            TaskRow::from_row,
        )
        .optional()?;
    match row {
        Some(row) => {
            let refs = load_refs(conn, task_id)?;
            Ok(Some(row.into_task(refs)?))
        }
        None => Ok(None),
    }
}

fn require_task(conn: &Connection, task_id: &str) -> Result<Task, StoreError> {
    load_task(conn, task_id)?.ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
}

fn latest_checkpoint(conn: &Connection, task_id: &str) -> Result<Option<Checkpoint>, StoreError> {
    let row = conn
        .query_row(
            "SELECT step_index, generation, state_blob, done, created_at
             FROM agent_checkpoints WHERE task_id = ?1
             ORDER BY step_index DESC LIMIT 1",
            params![task_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, DateTime<Utc>>(4)?,
                ))
            },
        )
        .optional()?;
    row.map(|(step_index, generation, blob, done, created_at)| {
        Ok(Checkpoint {
            task_id: task_id.to_string(),
            step_index: step_index as u64,
            generation: generation as u64,
            state_blob: serde_json::from_str(&blob)?,
            done,
            created_at,
        })
    })
    .transpose()
}

/// 写入步骤记录；seq 接在同一 step_index 已有记录之后
fn insert_steps(
    tx: &Transaction<'_>,
    task_id: &str,
    steps: &[StepRecord],
) -> Result<(), StoreError> {
    let now = Utc::now();
    for step in steps {
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM agent_task_steps
             WHERE task_id = ?1 AND step_index = ?2",
            params![task_id, step.step_index as i64],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO agent_task_steps
             (task_id, step_index, seq, label, prompt, context, output, attempts, outcome, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                task_id,
                step.step_index as i64,
                seq,
                step.label,
                step.prompt,
                serde_json::to_string(&step.context)?,
                step.output,
                step.attempts as i64,
                step.outcome.as_str(),
                now,
            ],
        )?;
    }
    Ok(())
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        let task = task.clone();
        self.with_conn(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM agent_tasks WHERE id = ?1)",
                params![task.id],
                |row| row.get(0),
            )?;
            if exists {
                return Err(StoreError::DuplicateTask(task.id.clone()));
            }
            conn.execute(
                &format!("INSERT INTO agent_tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    task.id,
                    task.goal,
                    task.mode.as_str(),
                    task.status.as_str(),
                    serde_json::to_string(&task.config)?,
                    task.error.as_ref().map(|e| e.reason.clone()),
                    task.error.as_ref().map(|e| e.detail.clone()),
                    task.generation as i64,
                    task.created_at,
                    task.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| load_task(conn, &task_id)).await
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError> {
        self.with_conn(move |conn| {
            let rows = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {TASK_COLUMNS} FROM agent_tasks WHERE status = ?1 ORDER BY created_at, rowid"
                    ))?;
                    let rows = stmt
                        .query_map(params![status.as_str()], TaskRow::from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {TASK_COLUMNS} FROM agent_tasks ORDER BY created_at, rowid"
                    ))?;
                    let rows = stmt
                        .query_map([], TaskRow::from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };
            rows.into_iter()
                .map(|row| {
                    let refs = load_refs(conn, &row.id)?;
                    row.into_task(refs)
                })
                .collect()
        })
        .await
    }

    async fn set_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<TaskFailure>,
        fence: Option<u64>,
    ) -> Result<Task, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let task = require_task(&tx, &task_id)?;
            check_generation(&task, fence)?;
            let error = normalize_error(status, error);
            tx.execute(
                "UPDATE agent_tasks SET status = ?2, error_reason = ?3, error_detail = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    task_id,
                    status.as_str(),
                    error.as_ref().map(|e| e.reason.clone()),
                    error.as_ref().map(|e| e.detail.clone()),
                    Utc::now(),
                ],
            )?;
            let task = require_task(&tx, &task_id)?;
            tx.commit()?;
            Ok(task)
        })
        .await
    }

    async fn begin_generation(&self, task_id: &str) -> Result<u64, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let task = require_task(&tx, &task_id)?;
            let generation = task.generation + 1;
            tx.execute(
                "UPDATE agent_tasks SET generation = ?2, status = ?3, error_reason = NULL,
                 error_detail = NULL, updated_at = ?4 WHERE id = ?1",
                params![
                    task_id,
                    generation as i64,
                    TaskStatus::Running.as_str(),
                    Utc::now(),
                ],
            )?;
            tx.commit()?;
            Ok(generation)
        })
        .await
    }

    async fn commit_step(&self, commit: &StepCommit) -> Result<Task, StoreError> {
        let commit = commit.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let checkpoint = &commit.checkpoint;
            let task_id = checkpoint.task_id.as_str();

            let task = require_task(&tx, task_id)?;
            let latest = latest_checkpoint(&tx, task_id)?.map(|c| c.step_index);
            check_commit(&task, latest, checkpoint)?;

            tx.execute(
                "INSERT INTO agent_checkpoints (task_id, step_index, generation, state_blob, done, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    task_id,
                    checkpoint.step_index as i64,
                    checkpoint.generation as i64,
                    serde_json::to_string(&checkpoint.state_blob)?,
                    checkpoint.done,
                    checkpoint.created_at,
                ],
            )?;
            insert_steps(&tx, task_id, &commit.steps)?;

            for reference in &commit.result_refs {
                tx.execute(
                    "INSERT OR IGNORE INTO agent_artifacts (task_id, seq, reference)
                     SELECT ?1, COALESCE(MAX(seq) + 1, 0), ?2 FROM agent_artifacts WHERE task_id = ?1",
                    params![task_id, reference],
                )?;
            }

            let status = if commit.finish {
                TaskStatus::Completed
            } else {
                task.status
            };
            tx.execute(
                "UPDATE agent_tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![task_id, status.as_str(), Utc::now()],
            )?;

            let task = require_task(&tx, task_id)?;
            tx.commit()?;
            Ok(task)
        })
        .await
    }

    async fn latest_checkpoint(&self, task_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| latest_checkpoint(conn, &task_id))
            .await
    }

    async fn list_checkpoints(&self, task_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT step_index, generation, state_blob, done, created_at
                 FROM agent_checkpoints WHERE task_id = ?1 ORDER BY step_index",
            )?;
            let rows = stmt
                .query_map(params![task_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, DateTime<Utc>>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(step_index, generation, blob, done, created_at)| {
                    Ok(Checkpoint {
                        task_id: task_id.clone(),
                        step_index: step_index as u64,
                        generation: generation as u64,
                        state_blob: serde_json::from_str(&blob)?,
                        done,
                        created_at,
                    })
                })
                .collect()
        })
        .await
    }

    async fn list_steps(&self, task_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT step_index, label, prompt, context, output, attempts, outcome
                 FROM agent_task_steps WHERE task_id = ?1 ORDER BY step_index, seq",
            )?;
            let rows = stmt
                .query_map(params![task_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(step_index, label, prompt, context, output, attempts, outcome)| {
                    Ok(StepRecord {
                        step_index: step_index as u64,
                        label,
                        prompt,
                        context: serde_json::from_str(&context)?,
                        output,
                        attempts: attempts as u32,
                        outcome: StepOutcomeKind::parse(&outcome),
                    })
                })
                .collect()
        })
        .await
    }

    async fn append_steps(
        &self,
        task_id: &str,
        generation: u64,
        steps: &[StepRecord],
    ) -> Result<(), StoreError> {
        let task_id = task_id.to_string();
        let steps = steps.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let task = require_task(&tx, &task_id)?;
            check_generation(&task, Some(generation))?;
            insert_steps(&tx, &task_id, &steps)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
