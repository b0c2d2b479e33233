//! 模式执行器：Plan / Explore / Write / Research / Debate
//!
//! 每个模式是一串步骤。`run_step` 只依赖 (task, checkpoint) 与协作方调用，自身不写任何东西，
//! 因此算出但未提交的步骤总可以安全丢弃。模式在启动时选定，分派只发生一次。

pub mod context;
pub mod debate;
pub mod explore;
pub mod parse;
pub mod plan;
pub mod prompts;
pub mod research;
pub mod settings;
pub mod write;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::checkpoint::{Artifact, Checkpoint, StepRecord};
use crate::core::error::StepError;
use crate::core::task::{Task, TaskMode};

pub use context::StepContext;
pub use debate::DebateMode;
pub use explore::ExploreMode;
pub use plan::PlanMode;
pub use research::ResearchMode;
pub use settings::ModeSettings;
pub use write::WriteMode;

/// 一个步骤的产出，交给调度器提交
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step_index: u64,
    pub state_blob: serde_json::Value,
    pub done: bool,
    /// 仅最后一步产出
    pub artifact: Option<Artifact>,
    pub records: Vec<StepRecord>,
}

/// 单步进展
#[derive(Debug, Default)]
pub struct StepProgress {
    pub records: Vec<StepRecord>,
    pub done: bool,
}

impl StepProgress {
    pub fn next(records: Vec<StepRecord>) -> Self {
        Self {
            records,
            done: false,
        }
    }

    pub fn finished(records: Vec<StepRecord>) -> Self {
        Self {
            records,
            done: true,
        }
    }
}

/// 模式策略：自定义可序列化状态，逐步推进
#[async_trait]
pub trait ModeStrategy: Send + Sync {
    type State: Serialize + DeserializeOwned + Default + Send + Sync;

    /// 在 state 上执行第 index 步
    async fn step(
        &self,
        ctx: &StepContext<'_>,
        task: &Task,
        index: u64,
        state: &mut Self::State,
    ) -> Result<StepProgress, StepError>;

    /// 根据最终状态生成报告
    fn render(&self, task: &Task, state: &Self::State) -> Artifact;
}

/// 从检查点恢复状态，执行下一步，再序列化回去
async fn drive<S: ModeStrategy>(
    strategy: &S,
    ctx: &StepContext<'_>,
    task: &Task,
    checkpoint: Option<&Checkpoint>,
) -> Result<StepOutcome, StepError> {
    let index = Checkpoint::next_step(checkpoint);
    let mut state: S::State = match checkpoint {
        Some(cp) => serde_json::from_value(cp.state_blob.clone())?,
        None => S::State::default(),
    };

    let progress = strategy.step(ctx, task, index, &mut state).await?;
    let artifact = progress.done.then(|| strategy.render(task, &state));

    Ok(StepOutcome {
        step_index: index,
        state_blob: serde_json::to_value(&state)?,
        done: progress.done,
        artifact,
        records: progress.records,
    })
}

/// 封闭的模式集合
#[derive(Debug, Clone, Copy)]
pub enum ModeExecutor {
    Plan(PlanMode),
    Explore(ExploreMode),
    Write(WriteMode),
    Research(ResearchMode),
    Debate(DebateMode),
}

impl ModeExecutor {
    pub fn for_mode(mode: TaskMode) -> Self {
        match mode {
            TaskMode::Plan => ModeExecutor::Plan(PlanMode),
            TaskMode::Explore => ModeExecutor::Explore(ExploreMode),
            TaskMode::Write => ModeExecutor::Write(WriteMode),
            TaskMode::Research => ModeExecutor::Research(ResearchMode),
            TaskMode::Debate => ModeExecutor::Debate(DebateMode),
        }
    }

    pub async fn run_step(
        &self,
        ctx: &StepContext<'_>,
        task: &Task,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<StepOutcome, StepError> {
        match self {
            ModeExecutor::Plan(m) => drive(m, ctx, task, checkpoint).await,
            ModeExecutor::Explore(m) => drive(m, ctx, task, checkpoint).await,
            ModeExecutor::Write(m) => drive(m, ctx, task, checkpoint).await,
            ModeExecutor::Research(m) => drive(m, ctx, task, checkpoint).await,
            ModeExecutor::Debate(m) => drive(m, ctx, task, checkpoint).await,
        }
    }
}
