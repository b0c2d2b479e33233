//! Mock 补全网关（用于测试与无 API Key 时的本地运行）
//!
//! 先按顺序消费预置脚本（成功文本或网关错误），脚本用完后回显提示词首行，结果确定。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::llm::{CompletionGateway, CompletionRequest, GatewayError};

/// 回显时截取的最大字符数
const ECHO_CHARS: usize = 120;

/// Mock 网关：脚本优先，之后确定性回显
#[derive(Debug, Default)]
pub struct MockGateway {
    script: Mutex<VecDeque<Result<String, GatewayError>>>,
    calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一组响应，按调用顺序依次返回
    pub fn with_script(script: impl IntoIterator<Item = Result<String, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: Result<String, GatewayError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    /// 累计调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 回显：取提示词第一行非空内容
    pub fn echo(request: &CompletionRequest) -> String {
        let first_line = request
            .prompt
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("(empty prompt)");
        let text: String = first_line.chars().take(ECHO_CHARS).collect();
        format!("- Mock answer: {}", text)
    }
}

#[async_trait]
impl CompletionGateway for MockGateway {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(Self::echo(request)),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_echo() {
        let gateway = MockGateway::with_script(vec![
            Err(GatewayError::RateLimited { retry_after_ms: None }),
            Ok("scripted".to_string()),
        ]);
        let request = CompletionRequest::new("Outline the report\nmore detail");

        assert!(gateway.complete(&request).await.is_err());
        assert_eq!(gateway.complete(&request).await.unwrap(), "scripted");
        assert_eq!(
            gateway.complete(&request).await.unwrap(),
            "- Mock answer: Outline the report"
        );
        assert_eq!(gateway.calls(), 3);
    }
}
