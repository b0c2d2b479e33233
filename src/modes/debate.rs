//! Debate 模式
//!
//! 第 0 步确定两个以上立场（可由配置预设）。每轮两步：评委先定本轮规则，
//! 再按立场顺序各补全一次并由评委打分。达到轮数上限或累计分差达到阈值后，
//! 最后一步给出裁决。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::checkpoint::Artifact;
use crate::core::error::StepError;
use crate::core::task::Task;
use crate::modes::{parse, prompts, ModeStrategy, StepContext, StepProgress};

/// 模型给出的立场数上限
const MAX_POSITIONS: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct DebateMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub rules: String,
    pub arguments: Vec<String>,
    pub scores: Vec<i64>,
    pub judgement: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebateState {
    pub positions: Vec<String>,
    pub rounds: Vec<Round>,
    pub totals: Vec<i64>,
    /// 已定规则、尚未辩论的当前轮
    pub pending_rules: Option<String>,
    /// 轮次阶段结束，下一步为裁决
    pub concluded: bool,
    pub verdict: Option<String>,
}

impl DebateState {
    /// 累计分最高与最低之差
    pub fn score_gap(&self) -> i64 {
        match (self.totals.iter().max(), self.totals.iter().min()) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        }
    }

    fn transcript(&self) -> String {
        let mut out = String::new();
        for (r, round) in self.rounds.iter().enumerate() {
            out.push_str(&format!("Round {}: {}\n", r + 1, round.rules));
            for (position, argument) in self.positions.iter().zip(&round.arguments) {
                out.push_str(&format!("[{}] {}\n", position, argument));
            }
        }
        if out.is_empty() {
            out.push_str("(no arguments yet)\n");
        }
        out
    }

    fn standings(&self) -> String {
        self.positions
            .iter()
            .zip(&self.totals)
            .map(|(p, t)| format!("{p}: {t}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn fallback_positions(goal: &str) -> Vec<String> {
    vec![format!("In favour of: {goal}"), format!("Against: {goal}")]
}

#[async_trait]
impl ModeStrategy for DebateMode {
    type State = DebateState;

    async fn step(
        &self,
        ctx: &StepContext<'_>,
        task: &Task,
        index: u64,
        state: &mut DebateState,
    ) -> Result<StepProgress, StepError> {
        if index == 0 {
            let mut records = Vec::new();
            state.positions = if ctx.settings.positions.len() >= 2 {
                ctx.settings.positions.clone()
            } else {
                let record = ctx
                    .ground_and_complete(0, "positions", &task.goal, prompts::debate_positions(&task.goal))
                    .await?;
                let parsed = parse::parse_list(&record.output, MAX_POSITIONS);
                records.push(record);
                if parsed.len() >= 2 {
                    parsed
                } else {
                    fallback_positions(&task.goal)
                }
            };
            state.totals = vec![0; state.positions.len()];
            return Ok(StepProgress::next(records));
        }

        if state.concluded {
            let record = ctx
                .ground_and_complete(
                    index,
                    "verdict",
                    &task.goal,
                    prompts::debate_verdict(&task.goal, &state.standings(), &state.transcript()),
                )
                .await?;
            state.verdict = Some(parse::clean(&record.output).to_string());
            return Ok(StepProgress::finished(vec![record]));
        }

        let round = state.rounds.len() + 1;
        let transcript = state.transcript();
        let Some(rules) = state.pending_rules.clone() else {
            let record = ctx
                .complete(
                    index,
                    &format!("round {round} rules"),
                    prompts::debate_rules(&task.goal, &state.positions, round, &transcript),
                    Vec::new(),
                )
                .await?;
            let rules = parse::clean(&record.output);
            state.pending_rules = Some(if rules.is_empty() {
                format!("Round {round} begins.")
            } else {
                rules.to_string()
            });
            return Ok(StepProgress::next(vec![record]));
        };

        let mut records = Vec::with_capacity(state.positions.len() + 1);
        let mut arguments = Vec::with_capacity(state.positions.len());
        for (i, position) in state.positions.iter().enumerate() {
            let record = ctx
                .ground_and_complete(
                    index,
                    &format!("round {round} position {}", i + 1),
                    &format!("{} {}", task.goal, position),
                    prompts::debate_argument(&task.goal, position, round, &rules, &transcript),
                )
                .await?;
            arguments.push(parse::clean(&record.output).to_string());
            records.push(record);
        }

        let judge = ctx
            .complete(
                index,
                &format!("round {round} judge"),
                prompts::debate_judge(&task.goal, &state.positions, &arguments),
                Vec::new(),
            )
            .await?;
        let scores = parse::parse_scores(&judge.output, state.positions.len());
        for (total, score) in state.totals.iter_mut().zip(&scores) {
            *total += score;
        }
        state.pending_rules = None;
        state.rounds.push(Round {
            rules,
            arguments,
            scores,
            judgement: parse::clean(&judge.output).to_string(),
        });
        records.push(judge);

        let gap = state.score_gap();
        if gap >= ctx.settings.score_diff_threshold {
            tracing::info!(round, gap, "score gap reached threshold, ending debate early");
            state.concluded = true;
        } else if state.rounds.len() as u32 >= ctx.settings.max_rounds {
            state.concluded = true;
        }
        Ok(StepProgress::next(records))
    }

    fn render(&self, task: &Task, state: &DebateState) -> Artifact {
        let mut out = format!("# Debate: {}\n\n## Positions\n\n", task.goal);
        for (i, position) in state.positions.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, position));
        }
        out.push('\n');
        for (r, round) in state.rounds.iter().enumerate() {
            out.push_str(&format!("## Round {}\n\n_{}_\n\n", r + 1, round.rules.trim()));
            for (position, argument) in state.positions.iter().zip(&round.arguments) {
                out.push_str(&format!("### {}\n\n{}\n\n", position, argument.trim()));
            }
            let scores: Vec<String> = round.scores.iter().map(|s| s.to_string()).collect();
            out.push_str(&format!("**Scores:** {}\n\n", scores.join(" / ")));
        }
        out.push_str(&format!("## Final standings\n\n{}\n\n", state.standings()));
        if let Some(verdict) = &state.verdict {
            out.push_str(&format!("## Verdict\n\n{}\n", verdict.trim()));
        }
        Artifact::report(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskMode;
    use crate::llm::MockGateway;
    use crate::modes::testing::{run_to_end, task, Harness};
    use crate::modes::{ModeExecutor, ModeSettings};
    use crate::retrieval::NoopRetriever;

    #[tokio::test]
    async fn test_debate_ends_early_on_score_gap() {
        let gateway = MockGateway::with_script(vec![
            Ok("Tabs\nSpaces".into()),
            Ok("Focus on readability.".into()),
            Ok("tabs argument".into()),
            Ok("spaces argument".into()),
            Ok("Position 1: 9\nPosition 2: 1\nTabs were sharper.".into()),
            Ok("Tabs win".into()),
        ]);
        let harness = Harness::new(ModeSettings::default());
        let ctx = harness.ctx(&gateway, &NoopRetriever);
        let task = task(TaskMode::Debate, "Tabs vs spaces");

        let outcomes = run_to_end(ModeExecutor::for_mode(TaskMode::Debate), &ctx, &task, 10).await;
        // 立场 + 规则 + 一轮 + 裁决
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[1].records[0].label, "round 1 rules");
        assert_eq!(outcomes[2].records.len(), 3);

        let state: DebateState = serde_json::from_value(outcomes[3].state_blob.clone()).unwrap();
        assert_eq!(state.totals, vec![9, 1]);
        assert_eq!(state.rounds.len(), 1);
        assert_eq!(state.rounds[0].rules, "Focus on readability.");
        assert!(state.pending_rules.is_none());
        assert_eq!(state.verdict.as_deref(), Some("Tabs win"));
    }

    #[tokio::test]
    async fn test_debate_runs_all_rounds_with_preset_positions() {
        let gateway = MockGateway::new();
        let settings = ModeSettings {
            positions: vec!["Yes".into(), "No".into(), "Maybe".into()],
            max_rounds: 2,
            ..ModeSettings::default()
        };
        let harness = Harness::new(settings);
        let ctx = harness.ctx(&gateway, &NoopRetriever);
        let task = task(TaskMode::Debate, "Should we?");

        let outcomes = run_to_end(ModeExecutor::for_mode(TaskMode::Debate), &ctx, &task, 10).await;
        // 立场 + 两轮（各含规则一步）+ 裁决
        assert_eq!(outcomes.len(), 6);
        assert!(outcomes[0].records.is_empty());
        // 每轮规则一次、三个立场各一次、打分一次
        assert_eq!(gateway.calls(), 2 * 5 + 1);
        let report = outcomes[5].artifact.clone().unwrap().content;
        assert!(report.contains("## Round 2"));
        assert!(report.contains("## Verdict"));
    }
}
