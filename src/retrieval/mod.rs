//! 上下文检索：按查询返回相关片段
//!
//! 检索永不失败，结果可以为空；调用方负责超时（超时视为空结果并记日志）。

pub mod keyword;
pub mod tokenizer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use keyword::KeywordRetriever;

/// 一段检索到的文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// 来源（文件路径或文档 id）
    pub source: String,
    pub content: String,
    pub score: f32,
}

impl Passage {
    pub fn new(source: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            score,
        }
    }
}

/// 检索器 trait：按相关度降序返回至多 top_k 条
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<Passage>;
}

/// 空实现：未配置知识库时使用
#[derive(Debug, Clone, Default)]
pub struct NoopRetriever;

#[async_trait]
impl ContextRetriever for NoopRetriever {
    async fn retrieve(&self, _query: &str, _top_k: usize) -> Vec<Passage> {
        Vec::new()
    }
}
