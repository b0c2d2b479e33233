//! Nexus - 智能体任务编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 任务模型、检查点、调度、执行监管、重试、优雅关闭
//! - **llm**: 补全网关抽象与实现（OpenAI 兼容 / Mock）
//! - **modes**: Plan / Explore / Write / Research / Debate 执行器
//! - **retrieval**: 上下文检索
//! - **store**: 任务与产物持久化（SQLite / 内存 / 文件）

pub mod config;
pub mod core;
pub mod llm;
pub mod modes;
pub mod observability;
pub mod retrieval;
pub mod store;

pub use crate::core::{StartRequest, TaskScheduler};
