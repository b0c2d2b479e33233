//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NEXUS__*` 覆盖（双下划线表示嵌套，如 `NEXUS__GATEWAY__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::recovery::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub scheduler: SchedulerSection,
    pub gateway: GatewaySection,
    pub retrieval: RetrievalSection,
    pub modes: ModesSection,
}

/// [app] 段：数据目录与笔记目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// SQLite 数据库与报告文件所在目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 关键词检索器加载的笔记目录（可选）
    pub notes_dir: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            notes_dir: None,
        }
    }
}

/// [scheduler] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// 单任务步骤上限，超出即 Failed
    #[serde(default = "default_max_steps_per_task")]
    pub max_steps_per_task: u64,
    /// 关闭时等待执行体暂停的秒数
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_steps_per_task() -> u64 {
    64
}

fn default_drain_timeout_secs() -> u64 {
    10
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_steps_per_task: default_max_steps_per_task(),
            drain_timeout_secs: default_drain_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

/// [gateway] 段：补全后端
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    /// mock / openai；openai 无 API Key 时回退到 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// 单次补全超时（秒），超时视为 Unavailable
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    60
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

/// [retrieval] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// 单次检索超时（秒），超时返回空结果
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_top_k() -> usize {
    5
}

fn default_retrieval_timeout_secs() -> u64 {
    10
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

/// [modes.*] 段：各模式的步骤上限
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ModesSection {
    pub plan: PlanSection,
    pub explore: ExploreSection,
    pub write: WriteSection,
    pub research: ResearchSection,
    pub debate: DebateSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanSection {
    #[serde(default = "default_max_sub_goals")]
    pub max_sub_goals: usize,
}

fn default_max_sub_goals() -> usize {
    8
}

impl Default for PlanSection {
    fn default() -> Self {
        Self {
            max_sub_goals: default_max_sub_goals(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExploreSection {
    #[serde(default = "default_explore_max_steps")]
    pub max_steps: u64,
    /// 每步最多展开的问题数
    #[serde(default = "default_max_frontier")]
    pub max_frontier: usize,
}

fn default_explore_max_steps() -> u64 {
    10
}

fn default_max_frontier() -> usize {
    3
}

impl Default for ExploreSection {
    fn default() -> Self {
        Self {
            max_steps: default_explore_max_steps(),
            max_frontier: default_max_frontier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteSection {
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,
}

fn default_max_sections() -> usize {
    12
}

impl Default for WriteSection {
    fn default() -> Self {
        Self {
            max_sections: default_max_sections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResearchSection {
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
}

fn default_max_queries() -> usize {
    5
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            max_queries: default_max_queries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebateSection {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// 累计分差达到该值时提前结束
    #[serde(default = "default_score_diff_threshold")]
    pub score_diff_threshold: i64,
    /// 预设立场；为空时由模型在第 0 步给出
    #[serde(default)]
    pub positions: Vec<String>,
}

fn default_max_rounds() -> u32 {
    3
}

fn default_score_diff_threshold() -> i64 {
    8
}

impl Default for DebateSection {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            score_diff_threshold: default_score_diff_threshold(),
            positions: Vec::new(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 NEXUS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NEXUS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NEXUS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scheduler.max_steps_per_task, 64);
        assert_eq!(cfg.scheduler.retry.max_attempts, 3);
        assert_eq!(cfg.gateway.provider, "mock");
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.modes.explore.max_steps, 10);
        assert_eq!(cfg.modes.debate.score_diff_threshold, 8);
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexus.toml");
        std::fs::write(
            &path,
            r#"
[scheduler.retry]
max_attempts = 5

[modes.debate]
positions = ["for", "against"]
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.scheduler.retry.max_attempts, 5);
        assert_eq!(cfg.scheduler.retry.initial_backoff_ms, 500);
        assert_eq!(cfg.modes.debate.positions, vec!["for", "against"]);
        assert_eq!(cfg.modes.debate.max_rounds, 3);
    }
}
