//! 步骤上下文：执行器访问检索器与网关的唯一入口
//!
//! 检索与补全各自带超时；可重试的网关错误在此按 RecoveryEngine 退避重试，
//! 收到 Cancel / Superseded 时立即放弃当前步骤。

use std::time::Duration;

use crate::core::checkpoint::{StepOutcomeKind, StepRecord};
use crate::core::error::StepError;
use crate::core::recovery::{RecoveryAction, RecoveryEngine};
use crate::core::supervisor::ExecutionControl;
use crate::llm::{CompletionGateway, CompletionRequest, GatewayError};
use crate::modes::ModeSettings;
use crate::retrieval::{ContextRetriever, Passage};

pub struct StepContext<'a> {
    gateway: &'a dyn CompletionGateway,
    retriever: &'a dyn ContextRetriever,
    recovery: &'a RecoveryEngine,
    control: &'a ExecutionControl,
    pub settings: &'a ModeSettings,
    completion_timeout: Duration,
    retrieval_timeout: Duration,
}

impl<'a> StepContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: &'a dyn CompletionGateway,
        retriever: &'a dyn ContextRetriever,
        recovery: &'a RecoveryEngine,
        control: &'a ExecutionControl,
        settings: &'a ModeSettings,
        completion_timeout: Duration,
        retrieval_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            retriever,
            recovery,
            control,
            settings,
            completion_timeout,
            retrieval_timeout,
        }
    }

    /// 检索；超时返回空并记 warn
    pub async fn retrieve(&self, query: &str) -> Vec<Passage> {
        let top_k = self.settings.top_k;
        match tokio::time::timeout(self.retrieval_timeout, self.retriever.retrieve(query, top_k))
            .await
        {
            Ok(passages) => passages,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.retrieval_timeout.as_millis() as u64,
                    "retrieval timed out, continuing without context"
                );
                Vec::new()
            }
        }
    }

    /// 调用补全，可重试错误按退避策略重试
    pub async fn complete(
        &self,
        step_index: u64,
        label: &str,
        prompt: String,
        context: Vec<Passage>,
    ) -> Result<StepRecord, StepError> {
        let request = CompletionRequest::new(prompt)
            .with_context(context)
            .with_model(self.settings.model.clone());

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let call = tokio::time::timeout(self.completion_timeout, self.gateway.complete(&request));
            let result = tokio::select! {
                r = call => r.unwrap_or_else(|_| Err(GatewayError::Unavailable(format!(
                    "completion timed out after {}ms",
                    self.completion_timeout.as_millis()
                )))),
                _ = self.control.discarded() => return Err(StepError::Interrupted),
            };

            let error = match result {
                Ok(text) => {
                    tracing::debug!(label, attempt, chars = text.len(), "completion ok");
                    return Ok(StepRecord::succeeded(
                        step_index,
                        label,
                        request.prompt,
                        request.context,
                        text,
                        attempt,
                    ));
                }
                Err(e) => e,
            };

            match self.recovery.handle(&error, attempt) {
                RecoveryAction::RetryAfter(wait) => {
                    tracing::warn!(
                        label,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %error,
                        "retryable gateway error, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.control.discarded() => return Err(StepError::Interrupted),
                    }
                }
                RecoveryAction::Abort => {
                    tracing::warn!(label, attempt, error = %error, "gateway error is final");
                    let record = StepRecord {
                        step_index,
                        label: label.to_string(),
                        prompt: request.prompt,
                        context: request.context,
                        output: error.to_string(),
                        attempts: attempt,
                        outcome: StepOutcomeKind::Failed,
                    };
                    return Err(StepError::Gateway {
                        label: label.to_string(),
                        error,
                        attempts: attempt,
                        record: Box::new(record),
                    });
                }
            }
        }
    }

    /// 先以 query 检索，再带着检索结果补全
    pub async fn ground_and_complete(
        &self,
        step_index: u64,
        label: &str,
        query: &str,
        prompt: String,
    ) -> Result<StepRecord, StepError> {
        let context = self.retrieve(query).await;
        tracing::debug!(label, passages = context.len(), "context retrieved");
        self.complete(step_index, label, prompt, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recovery::RetryPolicy;
    use crate::core::supervisor::Signal;
    use crate::llm::MockGateway;
    use crate::retrieval::{KeywordRetriever, NoopRetriever};
    use async_trait::async_trait;

    fn fast_recovery() -> RecoveryEngine {
        RecoveryEngine::new(RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
        })
    }

    struct SlowRetriever;

    #[async_trait]
    impl ContextRetriever for SlowRetriever {
        async fn retrieve(&self, _query: &str, _top_k: usize) -> Vec<Passage> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            vec![Passage::new("late", "late", 1.0)]
        }
    }

    #[tokio::test]
    async fn test_rate_limited_twice_then_success() {
        let gateway = MockGateway::with_script(vec![
            Err(GatewayError::RateLimited { retry_after_ms: None }),
            Err(GatewayError::RateLimited { retry_after_ms: Some(1) }),
            Ok("third time".into()),
        ]);
        let recovery = fast_recovery();
        let control = ExecutionControl::new();
        let settings = ModeSettings::default();
        let ctx = StepContext::new(
            &gateway,
            &NoopRetriever,
            &recovery,
            &control,
            &settings,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        let record = ctx.complete(0, "outline", "p".into(), vec![]).await.unwrap();
        assert_eq!(record.output, "third time");
        assert_eq!(record.attempts, 3);
        assert_eq!(gateway.calls(), 3);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let gateway = MockGateway::with_script(vec![Err(GatewayError::Unauthorized("k".into()))]);
        let recovery = fast_recovery();
        let control = ExecutionControl::new();
        let settings = ModeSettings::default();
        let ctx = StepContext::new(
            &gateway,
            &NoopRetriever,
            &recovery,
            &control,
            &settings,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        let err = ctx.complete(0, "outline", "p".into(), vec![]).await.unwrap_err();
        assert_eq!(gateway.calls(), 1);
        assert_eq!(err.failure().reason, "gateway_unauthorized");
        assert_eq!(err.failed_record().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_retrieval_timeout_yields_empty_context() {
        let gateway = MockGateway::new();
        let recovery = fast_recovery();
        let control = ExecutionControl::new();
        let settings = ModeSettings::default();
        let ctx = StepContext::new(
            &gateway,
            &SlowRetriever,
            &recovery,
            &control,
            &settings,
            Duration::from_secs(5),
            Duration::from_millis(10),
        );
        assert!(ctx.retrieve("anything").await.is_empty());
    }

    #[tokio::test]
    async fn test_grounded_completion_carries_passages() {
        let gateway = MockGateway::new();
        let retriever = KeywordRetriever::new();
        retriever.add("notes/tokio.md", "tokio schedules tasks cooperatively");
        let recovery = fast_recovery();
        let control = ExecutionControl::new();
        let settings = ModeSettings::default();
        let ctx = StepContext::new(
            &gateway,
            &retriever,
            &recovery,
            &control,
            &settings,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        let record = ctx
            .ground_and_complete(1, "section", "tokio tasks", "Explain tokio tasks".into())
            .await
            .unwrap();
        assert_eq!(record.context.len(), 1);
        assert_eq!(record.context[0].source, "notes/tokio.md");
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_backoff() {
        let gateway = MockGateway::with_script(vec![Err(GatewayError::RateLimited {
            retry_after_ms: Some(60_000),
        })]);
        let recovery = RecoveryEngine::default();
        let control = ExecutionControl::new();
        let settings = ModeSettings::default();
        let ctx = StepContext::new(
            &gateway,
            &NoopRetriever,
            &recovery,
            &control,
            &settings,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        let canceller = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.request(Signal::Cancel);
        });
        let err = ctx.complete(0, "outline", "p".into(), vec![]).await.unwrap_err();
        assert!(matches!(err, StepError::Interrupted));
    }
}
