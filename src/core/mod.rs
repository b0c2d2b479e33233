//! 核心编排层：任务模型、检查点、错误与重试、执行监管、任务调度、优雅关闭

pub mod checkpoint;
pub mod error;
mod execution;
pub mod recovery;
pub mod scheduler;
pub mod shutdown;
pub mod supervisor;
pub mod task;

pub use checkpoint::{Artifact, Checkpoint, StepOutcomeKind, StepRecord};
pub use error::{StepError, TaskError};
pub use recovery::{RecoveryAction, RecoveryEngine, RetryPolicy};
pub use scheduler::{ExecutionEnd, SchedulerSettings, StartRequest, TaskScheduler};
pub use shutdown::{SchedulerDrain, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use supervisor::{ExecutionControl, Signal};
pub use task::{Task, TaskFailure, TaskId, TaskMode, TaskSnapshot, TaskStatus};
