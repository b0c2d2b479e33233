//! 补全网关抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 CompletionGateway：输入提示词与检索到的上下文，
//! 返回文本或带类型的失败。上下文由核心层注入到原始提示词之前，再交给后端。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retrieval::Passage;

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
}

/// 发往模型的一条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// 一次补全请求
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub context: Vec<Passage>,
    /// 覆盖网关默认模型
    pub model: Option<String>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Vec::new(),
            model: None,
        }
    }

    pub fn with_context(mut self, context: Vec<Passage>) -> Self {
        self.context = context;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// 上下文块（若有）在前，原始提示词在后
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if !self.context.is_empty() {
            let mut block = String::from("Relevant context:\n");
            for (i, passage) in self.context.iter().enumerate() {
                block.push_str(&format!(
                    "[{}] ({}) {}\n",
                    i + 1,
                    passage.source,
                    passage.content.trim()
                ));
            }
            messages.push(Message::system(block));
        }
        messages.push(Message::user(self.prompt.clone()));
        messages
    }
}

/// 网关失败类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid request: {0}")]
    Invalid(String),
}

impl GatewayError {
    /// RateLimited / Unavailable 可由执行循环重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. } | GatewayError::Unavailable(_)
        )
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Unavailable(_) => "unavailable",
            GatewayError::Invalid(_) => "invalid",
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

/// 补全网关 trait
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError>;

    /// 后端名称（日志用）
    fn name(&self) -> &str {
        "gateway"
    }
}
