//! OpenAI 兼容补全网关
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url），并把 API 错误映射为 GatewayError。
//! 客户端自带的退避重试被关闭，限流与 5xx 原样交给恢复引擎。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use backoff::ExponentialBackoff;

use crate::llm::{CompletionGateway, CompletionRequest, GatewayError, Message, Role};

/// OpenAI 兼容网关：持有 Client 与默认 model 名
pub struct OpenAiGateway {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGateway {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config).with_backoff(single_attempt()),
            model: model.to_string(),
        }
    }

    fn to_openai_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, GatewayError> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                };
                built.map_err(|e| GatewayError::Invalid(e.to_string()))
            })
            .collect()
    }
}

/// 第一次失败即放弃：max_elapsed_time 为零时 next_backoff 总是 None
fn single_attempt() -> ExponentialBackoff {
    ExponentialBackoff {
        max_elapsed_time: Some(Duration::ZERO),
        ..ExponentialBackoff::default()
    }
}

/// 按错误码 / 类型 / 文本归类
pub(crate) fn classify_error(err: OpenAIError) -> GatewayError {
    match err {
        OpenAIError::ApiError(api) => {
            let signature = format!(
                "{} {} {}",
                api.code.as_deref().unwrap_or_default(),
                api.r#type.as_deref().unwrap_or_default(),
                api.message
            )
            .to_lowercase();
            classify_message(&signature, api.message)
        }
        OpenAIError::InvalidArgument(msg) => GatewayError::Invalid(msg),
        other => GatewayError::Unavailable(other.to_string()),
    }
}

fn classify_message(signature: &str, message: String) -> GatewayError {
    if signature.contains("rate_limit") || signature.contains("rate limit") {
        GatewayError::RateLimited { retry_after_ms: None }
    } else if signature.contains("invalid_api_key")
        || signature.contains("authentication")
        || signature.contains("unauthorized")
        || signature.contains("permission")
    {
        GatewayError::Unauthorized(message)
    } else if signature.contains("invalid_request")
        || signature.contains("context_length")
        || signature.contains("model_not_found")
    {
        GatewayError::Invalid(message)
    } else {
        GatewayError::Unavailable(message)
    }
}

#[async_trait]
impl CompletionGateway for OpenAiGateway {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(Self::to_openai_messages(&request.messages())?)
            .build()
            .map_err(classify_error)?;

        let response = self
            .client
            .chat()
            .create(body)
            .await
            .map_err(classify_error)?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| GatewayError::Unavailable("empty completion".to_string()))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_messages() {
        assert!(matches!(
            classify_message("rate_limit_exceeded requests", "slow down".into()),
            GatewayError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_message("invalid_api_key invalid_request_error", "bad key".into()),
            GatewayError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_message("context_length_exceeded", "too long".into()),
            GatewayError::Invalid(_)
        ));
        assert!(matches!(
            classify_message("server_error", "boom".into()),
            GatewayError::Unavailable(_)
        ));
    }

    #[test]
    fn test_client_never_retries_on_its_own() {
        use backoff::backoff::Backoff;

        let mut policy = single_attempt();
        assert!(policy.next_backoff().is_none());

        let gateway =
            OpenAiGateway::new(Some("http://127.0.0.1:9/v1"), "gpt-4o-mini", Some("sk-test"));
        assert_eq!(gateway.name(), "openai");
    }

    #[test]
    fn test_invalid_argument_is_not_retryable() {
        let err = classify_error(OpenAIError::InvalidArgument("missing model".into()));
        assert!(!err.is_retryable());
    }
}
