//! 模式参数：全局配置 + 任务级覆盖
//!
//! 任务 config JSON 中可识别的键覆盖对应参数，其余键原样保留、不做解释。

use serde::Deserialize;

use crate::config::AppConfig;
use crate::core::task::TaskMode;

/// 单个任务解析后的模式参数
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSettings {
    pub top_k: usize,
    /// 覆盖网关默认模型
    pub model: Option<String>,
    pub max_sub_goals: usize,
    pub explore_max_steps: u64,
    pub max_frontier: usize,
    pub max_sections: usize,
    pub max_queries: usize,
    pub max_rounds: u32,
    pub score_diff_threshold: i64,
    pub positions: Vec<String>,
}

/// 任务 config 中可识别的覆盖键
#[derive(Debug, Default, Deserialize)]
struct TaskOverrides {
    top_k: Option<usize>,
    model: Option<String>,
    max_sub_goals: Option<usize>,
    max_steps: Option<u64>,
    max_frontier: Option<usize>,
    max_sections: Option<usize>,
    max_queries: Option<usize>,
    max_rounds: Option<u32>,
    score_diff_threshold: Option<i64>,
    positions: Option<Vec<String>>,
}

impl ModeSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let modes = &cfg.modes;
        Self {
            top_k: cfg.retrieval.top_k,
            model: None,
            max_sub_goals: modes.plan.max_sub_goals,
            explore_max_steps: modes.explore.max_steps,
            max_frontier: modes.explore.max_frontier,
            max_sections: modes.write.max_sections,
            max_queries: modes.research.max_queries,
            max_rounds: modes.debate.max_rounds,
            score_diff_threshold: modes.debate.score_diff_threshold,
            positions: modes.debate.positions.clone(),
        }
    }

    /// 叠加任务级覆盖；类型不符或取值非法时返回错误描述
    pub fn with_overrides(&self, config: &serde_json::Value) -> Result<Self, String> {
        let overrides: TaskOverrides = match config {
            serde_json::Value::Null => TaskOverrides::default(),
            serde_json::Value::Object(_) => serde_json::from_value(config.clone())
                .map_err(|e| format!("invalid task config: {e}"))?,
            _ => return Err("task config must be a JSON object".to_string()),
        };

        let mut settings = self.clone();
        if let Some(v) = overrides.top_k {
            settings.top_k = v;
        }
        if let Some(v) = overrides.model {
            settings.model = Some(v);
        }
        if let Some(v) = overrides.max_sub_goals {
            settings.max_sub_goals = v;
        }
        if let Some(v) = overrides.max_steps {
            settings.explore_max_steps = v;
        }
        if let Some(v) = overrides.max_frontier {
            settings.max_frontier = v;
        }
        if let Some(v) = overrides.max_sections {
            settings.max_sections = v;
        }
        if let Some(v) = overrides.max_queries {
            settings.max_queries = v;
        }
        if let Some(v) = overrides.max_rounds {
            settings.max_rounds = v;
        }
        if let Some(v) = overrides.score_diff_threshold {
            settings.score_diff_threshold = v;
        }
        if let Some(v) = overrides.positions {
            settings.positions = v;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// 该模式在这些参数下最坏情况需要的步数
    pub fn step_budget(&self, mode: TaskMode) -> u64 {
        match mode {
            // 拆解 + 每个子目标 + 综合
            TaskMode::Plan => (self.max_sub_goals as u64).saturating_add(2),
            TaskMode::Explore => self.explore_max_steps.saturating_add(1),
            // 纲要 + 大纲 + 每节起草与润色
            TaskMode::Write => (self.max_sections as u64).saturating_mul(2).saturating_add(2),
            TaskMode::Research => (self.max_queries as u64).saturating_add(2),
            // 立场 + 每轮规则与辩论 + 裁决
            TaskMode::Debate => u64::from(self.max_rounds).saturating_mul(2).saturating_add(2),
        }
    }

    /// 模式上限必须能在单任务步骤上限内跑完
    pub fn check_step_limit(&self, mode: TaskMode, limit: u64) -> Result<(), String> {
        let budget = self.step_budget(mode);
        if budget > limit {
            return Err(format!(
                "{mode} task may need {budget} steps with this config, above the limit of {limit}"
            ));
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), String> {
        let bounds = [
            ("max_sub_goals", self.max_sub_goals as u64),
            ("max_steps", self.explore_max_steps),
            ("max_frontier", self.max_frontier as u64),
            ("max_sections", self.max_sections as u64),
            ("max_queries", self.max_queries as u64),
            ("max_rounds", self.max_rounds as u64),
        ];
        if let Some((name, _)) = bounds.iter().find(|(_, v)| *v == 0) {
            return Err(format!("{name} must be at least 1"));
        }
        if self.score_diff_threshold <= 0 {
            return Err("score_diff_threshold must be positive".to_string());
        }
        if self.positions.len() == 1 {
            return Err("positions needs at least two entries".to_string());
        }
        Ok(())
    }
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overrides_apply_and_unknown_keys_pass() {
        let base = ModeSettings::default();
        let settings = base
            .with_overrides(&json!({ "max_rounds": 2, "top_k": 1, "style": "terse" }))
            .unwrap();
        assert_eq!(settings.max_rounds, 2);
        assert_eq!(settings.top_k, 1);
        assert_eq!(settings.max_sections, base.max_sections);
    }

    #[test]
    fn test_null_config_keeps_defaults() {
        let base = ModeSettings::default();
        assert_eq!(base.with_overrides(&serde_json::Value::Null).unwrap(), base);
    }

    #[test]
    fn test_ill_typed_override_rejected() {
        let base = ModeSettings::default();
        assert!(base.with_overrides(&json!({ "max_rounds": "three" })).is_err());
        assert!(base.with_overrides(&json!("not an object")).is_err());
        assert!(base.with_overrides(&json!({ "max_sections": 0 })).is_err());
        assert!(base.with_overrides(&json!({ "positions": ["only one"] })).is_err());
    }

    #[test]
    fn test_step_budget_per_mode() {
        let settings = ModeSettings {
            max_sub_goals: 3,
            explore_max_steps: 4,
            max_sections: 5,
            max_queries: 2,
            max_rounds: 3,
            ..ModeSettings::default()
        };
        assert_eq!(settings.step_budget(TaskMode::Plan), 5);
        assert_eq!(settings.step_budget(TaskMode::Explore), 5);
        assert_eq!(settings.step_budget(TaskMode::Write), 12);
        assert_eq!(settings.step_budget(TaskMode::Research), 4);
        assert_eq!(settings.step_budget(TaskMode::Debate), 8);
    }

    #[test]
    fn test_bounds_beyond_step_limit_rejected() {
        let base = ModeSettings::default();
        let endless = base
            .with_overrides(&json!({ "max_steps": 100, "max_frontier": 1 }))
            .unwrap();
        assert!(endless.check_step_limit(TaskMode::Explore, 64).is_err());
        // 只约束所选模式
        assert!(endless.check_step_limit(TaskMode::Plan, 64).is_ok());

        for mode in [
            TaskMode::Plan,
            TaskMode::Explore,
            TaskMode::Write,
            TaskMode::Research,
            TaskMode::Debate,
        ] {
            assert!(base.check_step_limit(mode, 64).is_ok(), "{mode} defaults exceed 64 steps");
        }
        assert!(base.check_step_limit(TaskMode::Write, 25).is_err());
    }
}
