//! Research 模式
//!
//! 第 0 步推导研究问题；第 1..=n 步逐个问题检索并抽取证据写入状态；
//! 第 n+1 步综合全部证据生成报告。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::checkpoint::Artifact;
use crate::core::error::StepError;
use crate::core::task::Task;
use crate::modes::{parse, prompts, ModeStrategy, StepContext, StepProgress};

#[derive(Debug, Clone, Copy, Default)]
pub struct ResearchMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub question: String,
    pub notes: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    pub questions: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub report: Option<String>,
}

impl ResearchState {
    fn evidence_digest(&self) -> String {
        self.evidence
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{}. {}\n{}", i + 1, e.question, e.notes))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl ModeStrategy for ResearchMode {
    type State = ResearchState;

    async fn step(
        &self,
        ctx: &StepContext<'_>,
        task: &Task,
        index: u64,
        state: &mut ResearchState,
    ) -> Result<StepProgress, StepError> {
        if index == 0 {
            let max = ctx.settings.max_queries;
            let record = ctx
                .ground_and_complete(0, "questions", &task.goal, prompts::research_questions(&task.goal, max))
                .await?;
            state.questions = parse::parse_list(&record.output, max);
            if state.questions.is_empty() {
                state.questions.push(task.goal.clone());
            }
            return Ok(StepProgress::next(vec![record]));
        }

        if state.evidence.len() < state.questions.len() {
            let position = state.evidence.len();
            let question = state.questions[position].clone();
            let record = ctx
                .ground_and_complete(
                    index,
                    &format!("evidence {}", position + 1),
                    &question,
                    prompts::research_extract(&task.goal, &question),
                )
                .await?;
            state.evidence.push(Evidence {
                question,
                notes: parse::clean(&record.output).to_string(),
                sources: record.context.iter().map(|p| p.source.clone()).collect(),
            });
            return Ok(StepProgress::next(vec![record]));
        }

        let record = ctx
            .ground_and_complete(
                index,
                "synthesis",
                &task.goal,
                prompts::research_synthesis(&task.goal, &state.evidence_digest()),
            )
            .await?;
        state.report = Some(parse::clean(&record.output).to_string());
        Ok(StepProgress::finished(vec![record]))
    }

    fn render(&self, task: &Task, state: &ResearchState) -> Artifact {
        let mut out = format!("# Research report: {}\n\n", task.goal);
        if let Some(report) = &state.report {
            out.push_str(report.trim());
            out.push_str("\n\n");
        }
        out.push_str("## Evidence\n\n");
        for evidence in &state.evidence {
            out.push_str(&format!("### {}\n\n{}\n\n", evidence.question, evidence.notes.trim()));
            if !evidence.sources.is_empty() {
                out.push_str(&format!("Sources: {}\n\n", evidence.sources.join(", ")));
            }
        }
        Artifact::report(out)
    }
}
