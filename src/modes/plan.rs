//! Plan 模式：第 0 步拆解子目标，第 i 步把子目标 i 展开为具体行动，
//! 全部展开后再用一步综合成最终计划

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::checkpoint::Artifact;
use crate::core::error::StepError;
use crate::core::task::Task;
use crate::modes::{parse, prompts, ModeStrategy, StepContext, StepProgress};

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanState {
    pub sub_goals: Vec<String>,
    /// 与 sub_goals 一一对应，按完成顺序追加
    pub actions: Vec<String>,
    pub summary: Option<String>,
}

impl PlanState {
    fn digest(&self) -> String {
        self.sub_goals
            .iter()
            .zip(&self.actions)
            .enumerate()
            .map(|(i, (sub_goal, actions))| format!("{}. {}\n{}", i + 1, sub_goal, actions))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl ModeStrategy for PlanMode {
    type State = PlanState;

    async fn step(
        &self,
        ctx: &StepContext<'_>,
        task: &Task,
        index: u64,
        state: &mut PlanState,
    ) -> Result<StepProgress, StepError> {
        if index == 0 {
            let max = ctx.settings.max_sub_goals;
            let record = ctx
                .ground_and_complete(0, "decompose", &task.goal, prompts::plan_decompose(&task.goal, max))
                .await?;
            state.sub_goals = parse::parse_list(&record.output, max);
            if state.sub_goals.is_empty() {
                state.sub_goals.push(task.goal.clone());
            }
            tracing::debug!(sub_goals = state.sub_goals.len(), "plan decomposed");
            return Ok(StepProgress::next(vec![record]));
        }

        if state.actions.len() >= state.sub_goals.len() {
            let record = ctx
                .complete(
                    index,
                    "synthesis",
                    prompts::plan_synthesis(&task.goal, &state.digest()),
                    Vec::new(),
                )
                .await?;
            state.summary = Some(parse::clean(&record.output).to_string());
            return Ok(StepProgress::finished(vec![record]));
        }

        let position = state.actions.len();
        let sub_goal = state
            .sub_goals
            .get(position)
            .cloned()
            .ok_or_else(|| StepError::State(format!("plan has no sub-goal {}", position + 1)))?;
        let record = ctx
            .ground_and_complete(
                index,
                &format!("sub-goal {}", position + 1),
                &sub_goal,
                prompts::plan_expand(&task.goal, &sub_goal, position + 1, state.sub_goals.len()),
            )
            .await?;
        state.actions.push(parse::clean(&record.output).to_string());
        Ok(StepProgress::next(vec![record]))
    }

    fn render(&self, task: &Task, state: &PlanState) -> Artifact {
        let mut out = format!("# Plan: {}\n\n", task.goal);
        if let Some(summary) = &state.summary {
            out.push_str(summary.trim());
            out.push_str("\n\n");
        }
        for (i, (sub_goal, actions)) in state.sub_goals.iter().zip(&state.actions).enumerate() {
            out.push_str(&format!("## {}. {}\n\n{}\n\n", i + 1, sub_goal, actions.trim()));
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
    async fn test_plan_expands_each_sub_goal() {
        let gateway = MockGateway::with_script(vec![
            Ok("1. Pick a venue\n2. Send invites".into()),
            Ok("Call three venues".into()),
            Ok("Draft the invite".into()),
            Ok("Book the venue first, then invite.".into()),
        ]);
        let harness = Harness::new(ModeSettings::default());
        let ctx = harness.ctx(&gateway, &NoopRetriever);
        let task = task(TaskMode::Plan, "Organise a meetup");

        let outcomes = run_to_end(ModeExecutor::for_mode(TaskMode::Plan), &ctx, &task, 10).await;
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.last().unwrap().done);
        assert_eq!(outcomes[3].records[0].label, "synthesis");
        assert!(outcomes[3].records[0].context.is_empty());

        let report = outcomes.last().unwrap().artifact.clone().unwrap().content;
        assert!(report.starts_with("# Plan: Organise a meetup\n\nBook the venue first, then invite."));
        assert!(report.contains("## 1. Pick a venue"));
        assert!(report.contains("Draft the invite"));
        assert!(outcomes[..3].iter().all(|o| o.artifact.is_none()));
        assert_eq!(gateway.calls(), 4);
    }

    #[tokio::test]
    async fn test_plan_falls_back_to_goal() {
        let gateway = MockGateway::with_script(vec![Ok("   ".into())]);
        let harness = Harness::new(ModeSettings::default());
        let ctx = harness.ctx(&gateway, &NoopRetriever);
        let task = task(TaskMode::Plan, "Ship it");

        let outcomes = run_to_end(ModeExecutor::for_mode(TaskMode::Plan), &ctx, &task, 10).await;
        assert_eq!(outcomes.len(), 3);
        let state: PlanState = serde_json::from_value(outcomes[2].state_blob.clone()).unwrap();
        assert_eq!(state.sub_goals, vec!["Ship it"]);
        assert!(state.summary.is_some());
    }
}
