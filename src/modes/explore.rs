//! Explore 模式：广度优先展开问题
//!
//! 第 0 步以目标作为前沿；每步至多处理 max_frontier 个开放问题（检索 + 补全），
//! 从回复中收集新问题并与已访问问题去重。前沿为空或达到步数上限后，
//! 再用一步把全部发现综合成概览。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::checkpoint::Artifact;
use crate::core::error::StepError;
use crate::core::task::Task;
use crate::modes::{parse, prompts, ModeStrategy, StepContext, StepProgress};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExploreMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExploreState {
    pub frontier: Vec<String>,
    pub visited: Vec<String>,
    pub findings: Vec<Finding>,
    /// 探索阶段结束，下一步为综合
    pub concluded: bool,
    pub overview: Option<String>,
}

impl ExploreState {
    fn is_known(&self, question: &str) -> bool {
        let key = parse::question_key(question);
        self.visited
            .iter()
            .chain(&self.frontier)
            .any(|q| parse::question_key(q) == key)
    }

    fn digest(&self) -> String {
        self.findings
            .iter()
            .map(|f| format!("Q: {}\nA: {}", f.question, f.answer))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl ModeStrategy for ExploreMode {
    type State = ExploreState;

    async fn step(
        &self,
        ctx: &StepContext<'_>,
        task: &Task,
        index: u64,
        state: &mut ExploreState,
    ) -> Result<StepProgress, StepError> {
        if state.concluded {
            let record = ctx
                .complete(
                    index,
                    "synthesis",
                    prompts::explore_synthesis(&task.goal, &state.digest(), &state.frontier),
                    Vec::new(),
                )
                .await?;
            state.overview = Some(parse::clean(&record.output).to_string());
            return Ok(StepProgress::finished(vec![record]));
        }

        if index == 0 {
            state.frontier = vec![task.goal.clone()];
        }

        let take = ctx.settings.max_frontier.min(state.frontier.len());
        let batch: Vec<String> = state.frontier.drain(..take).collect();
        let explored = state.visited.clone();
        // 整批先记为已访问，批内互相提到的问题不会重复入队
        state.visited.extend(batch.iter().cloned());
        let mut records = Vec::with_capacity(batch.len());

        for (n, question) in batch.into_iter().enumerate() {
            let prompt = prompts::explore_question(&task.goal, &question, &explored);
            let label = format!("explore {}", explored.len() + n + 1);

            let record = ctx.ground_and_complete(index, &label, &question, prompt).await?;
            for follow_up in parse::parse_questions(&record.output) {
                if !state.is_known(&follow_up) {
                    state.frontier.push(follow_up);
                }
            }
            state.findings.push(Finding {
                question,
                answer: parse::clean(&record.output).to_string(),
                sources: record.context.iter().map(|p| p.source.clone()).collect(),
            });
            records.push(record);
        }

        state.concluded = state.frontier.is_empty() || index + 1 >= ctx.settings.explore_max_steps;
        if state.concluded && !state.frontier.is_empty() {
            tracing::debug!(open = state.frontier.len(), "explore bound reached with open questions");
        }
        Ok(StepProgress::next(records))
    }

    fn render(&self, task: &Task, state: &ExploreState) -> Artifact {
        let mut out = format!("# Exploration: {}\n\n", task.goal);
        if let Some(overview) = &state.overview {
            out.push_str(overview.trim());
            out.push_str("\n\n");
        }
        for finding in &state.findings {
            out.push_str(&format!("## {}\n\n{}\n\n", finding.question, finding.answer));
            if !finding.sources.is_empty() {
                out.push_str(&format!("Sources: {}\n\n", finding.sources.join(", ")));
            }
        }
        if !state.frontier.is_empty() {
            out.push_str("## Open questions\n\n");
            for question in &state.frontier {
                out.push_str(&format!("- {}\n", question));
            }
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
    async fn test_explore_dedups_questions_and_drains_frontier() {
        let gateway = MockGateway::with_script(vec![
            Ok("Root answer\n- What is A?\n- What is B?".into()),
            Ok("A answer\n- what is b?\n- What is C?".into()),
            Ok("B answer".into()),
            Ok("C answer\n- What is A?".into()),
            Ok("X is explained by A, B and C.".into()),
        ]);
        let settings = ModeSettings {
            max_frontier: 2,
            ..ModeSettings::default()
        };
        let harness = Harness::new(settings);
        let ctx = harness.ctx(&gateway, &NoopRetriever);
        let task = task(TaskMode::Explore, "Explain X");

        let outcomes = run_to_end(ModeExecutor::for_mode(TaskMode::Explore), &ctx, &task, 20).await;
        let last = outcomes.last().unwrap();
        assert!(last.done);
        let state: ExploreState = serde_json::from_value(last.state_blob.clone()).unwrap();
        assert_eq!(
            state.visited,
            vec!["Explain X", "What is A?", "What is B?", "What is C?"]
        );
        assert!(state.frontier.is_empty());
        assert_eq!(last.records[0].label, "synthesis");
        assert_eq!(gateway.calls(), 5);

        let report = last.artifact.clone().unwrap().content;
        assert!(report.starts_with("# Exploration: Explain X\n\nX is explained by A, B and C."));
        assert!(report.contains("## What is C?\n\nC answer"));
    }

    #[tokio::test]
    async fn test_explore_respects_step_bound() {
        let gateway = MockGateway::with_script(
            (0..10).map(|i| Ok(format!("answer\n- Question number {i}?"))),
        );
        let settings = ModeSettings {
            explore_max_steps: 3,
            max_frontier: 1,
            ..ModeSettings::default()
        };
        let harness = Harness::new(settings);
        let ctx = harness.ctx(&gateway, &NoopRetriever);
        let task = task(TaskMode::Explore, "Endless");

        let outcomes = run_to_end(ModeExecutor::for_mode(TaskMode::Explore), &ctx, &task, 20).await;
        // 三步探索 + 一步综合
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[..3].iter().all(|o| o.artifact.is_none()));
        let report = outcomes[3].artifact.clone().unwrap().content;
        assert!(report.contains("## Open questions"));
    }
}
