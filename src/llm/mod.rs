//! LLM 层：补全网关抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::GatewaySection;

pub use mock::MockGateway;
pub use openai::OpenAiGateway;
pub use traits::{CompletionGateway, CompletionRequest, GatewayError, Message, Role};

/// 按配置创建网关；provider 为 mock 或没有 API Key 时使用 Mock
pub fn create_gateway_from_config(section: &GatewaySection) -> Arc<dyn CompletionGateway> {
    if section.provider.eq_ignore_ascii_case("mock") {
        return Arc::new(MockGateway::new());
    }

    let key = section
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    if key.as_deref().unwrap_or("").is_empty() || key.as_deref() == Some("sk-placeholder") {
        tracing::warn!(
            provider = %section.provider,
            "no API key configured, falling back to mock gateway"
        );
        return Arc::new(MockGateway::new());
    }

    Arc::new(OpenAiGateway::new(
        section.base_url.as_deref(),
        &section.model,
        key.as_deref(),
    ))
}
