//! Write 模式
//!
//! 第 0 步写作纲要（受众、范围、基调），第 1 步据此生成大纲；之后每节两步：
//! 先以检索结果为依据起草，再单独一步润色，润色稿才进入报告。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::checkpoint::Artifact;
use crate::core::error::StepError;
use crate::core::task::Task;
use crate::modes::{parse, prompts, ModeStrategy, StepContext, StepProgress};

/// 传给下一节的上文长度（字符）
const PREVIOUS_TAIL_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteState {
    pub brief: String,
    pub outline: Vec<String>,
    /// 已润色的小节
    pub sections: Vec<String>,
    /// 当前小节的草稿，润色后清空
    pub draft: Option<String>,
}

fn tail(text: &str, chars: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(chars)).collect()
}

#[async_trait]
impl ModeStrategy for WriteMode {
    type State = WriteState;

    async fn step(
        &self,
        ctx: &StepContext<'_>,
        task: &Task,
        index: u64,
        state: &mut WriteState,
    ) -> Result<StepProgress, StepError> {
        if index == 0 {
            let record = ctx
                .ground_and_complete(
                    0,
                    "elaboration",
                    &task.goal,
                    prompts::write_elaboration(&task.goal),
                )
                .await?;
            state.brief = parse::clean(&record.output).to_string();
            return Ok(StepProgress::next(vec![record]));
        }

        if index == 1 {
            let max = ctx.settings.max_sections;
            let record = ctx
                .complete(
                    1,
                    "outline",
                    prompts::write_outline(&task.goal, &state.brief, max),
                    Vec::new(),
                )
                .await?;
            state.outline = parse::parse_list(&record.output, max);
            if state.outline.is_empty() {
                state.outline.push(task.goal.clone());
            }
            return Ok(StepProgress::next(vec![record]));
        }

        let position = state.sections.len();
        let title = state
            .outline
            .get(position)
            .cloned()
            .ok_or_else(|| StepError::State(format!("outline has no section {}", position + 1)))?;

        if let Some(draft) = state.draft.clone() {
            let record = ctx
                .complete(
                    index,
                    &format!("refine {}", position + 1),
                    prompts::write_refine(&task.goal, &title, &draft),
                    Vec::new(),
                )
                .await?;
            let refined = parse::clean(&record.output);
            // 润色结果为空时保留草稿
            let body = if refined.is_empty() { draft } else { refined.to_string() };
            state.sections.push(body);
            state.draft = None;

            let done = state.sections.len() >= state.outline.len();
            return Ok(StepProgress {
                records: vec![record],
                done,
            });
        }

        let previous = state.sections.last().map(|s| tail(s, PREVIOUS_TAIL_CHARS));
        let record = ctx
            .ground_and_complete(
                index,
                &format!("section {}", position + 1),
                &format!("{} {}", task.goal, title),
                prompts::write_section(
                    &task.goal,
                    &state.brief,
                    &state.outline,
                    &title,
                    previous.as_deref(),
                ),
            )
            .await?;
        state.draft = Some(parse::clean(&record.output).to_string());
        Ok(StepProgress::next(vec![record]))
    }

    fn render(&self, task: &Task, state: &WriteState) -> Artifact {
        let mut out = format!("# {}\n\n", task.goal);
        for (title, body) in state.outline.iter().zip(&state.sections) {
            out.push_str(&format!("## {}\n\n{}\n\n", title, body.trim()));
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
    use crate::retrieval::KeywordRetriever;

    #[tokio::test]
    async fn test_write_grounds_each_section() {
        let gateway = MockGateway::with_script(vec![
            Ok("Audience: new Rust users".into()),
            Ok("```\n- Introduction\n- Ownership\n```".into()),
            Ok("intro draft".into()),
            Ok("Intro body".into()),
            Ok("ownership draft".into()),
            Ok("Ownership body".into()),
        ]);
        let retriever = KeywordRetriever::new();
        retriever.add("notes/own.md", "Ownership moves values between bindings");
        let harness = Harness::new(ModeSettings::default());
        let ctx = harness.ctx(&gateway, &retriever);
        let task = task(TaskMode::Write, "Rust guide");

        let outcomes = run_to_end(ModeExecutor::for_mode(TaskMode::Write), &ctx, &task, 10).await;
        // 纲要 + 大纲 + 两节各起草、润色一次
        assert_eq!(outcomes.len(), 6);
        assert_eq!(outcomes[4].records[0].label, "section 2");
        assert_eq!(outcomes[4].records[0].context[0].source, "notes/own.md");
        assert_eq!(outcomes[5].records[0].label, "refine 2");
        assert!(outcomes[..5].iter().all(|o| o.artifact.is_none()));

        let state: WriteState = serde_json::from_value(outcomes[5].state_blob.clone()).unwrap();
        assert_eq!(state.brief, "Audience: new Rust users");
        assert!(state.draft.is_none());

        let report = outcomes[5].artifact.clone().unwrap().content;
        assert_eq!(
            report,
            "# Rust guide\n\n## Introduction\n\nIntro body\n\n## Ownership\n\nOwnership body\n\n"
        );
    }

    #[tokio::test]
    async fn test_empty_refinement_keeps_draft() {
        let gateway = MockGateway::with_script(vec![
            Ok("brief".into()),
            Ok("- Only".into()),
            Ok("draft body".into()),
            Ok("   ".into()),
        ]);
        let retriever = KeywordRetriever::new();
        let harness = Harness::new(ModeSettings::default());
        let ctx = harness.ctx(&gateway, &retriever);
        let task = task(TaskMode::Write, "Tiny doc");

        let outcomes = run_to_end(ModeExecutor::for_mode(TaskMode::Write), &ctx, &task, 10).await;
        assert_eq!(outcomes.len(), 4);
        let report = outcomes[3].artifact.clone().unwrap().content;
        assert_eq!(report, "# Tiny doc\n\n## Only\n\ndraft body\n\n");
    }

    #[test]
    fn test_tail_keeps_last_chars() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }
}
