//! 关键词检索器：按词重叠数打分
//!
//! 无向量库时的本地替代；可从笔记目录加载 .md / .txt 文件，按空行切段。
//! 中文文本经 jieba 分词后参与打分。

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::retrieval::tokenizer::tokenize;
use crate::retrieval::{ContextRetriever, Passage};

/// 一个已分词的片段
#[derive(Debug, Clone)]
struct Entry {
    source: String,
    content: String,
    tokens: HashSet<String>,
}

/// 简单内存实现：按关键词重叠检索
#[derive(Debug, Clone, Default)]
pub struct KeywordRetriever {
    entries: Arc<RwLock<Vec<Entry>>>,
}

impl KeywordRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// 存入一段文本
    pub fn add(&self, source: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let entry = Entry {
            source: source.to_string(),
            content: text.to_string(),
            tokens: tokenize(text),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 加载目录下的 .md / .txt 文件，每个空行分隔的段落为一条
    pub fn from_dir(dir: &Path) -> std::io::Result<Self> {
        let retriever = Self::new();
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("md") | Some("txt")
                    )
            })
            .collect();
        paths.sort();

        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            let source = path.display().to_string();
            for paragraph in text.split("\n\n") {
                retriever.add(&source, paragraph);
            }
        }
        Ok(retriever)
    }

    fn search(&self, query: &str, top_k: usize) -> Vec<Passage> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || top_k == 0 {
            return Vec::new();
        }
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut scored: Vec<(usize, &Entry)> = entries
            .iter()
            .map(|e| (query_tokens.intersection(&e.tokens).count(), e))
            .filter(|(s, _)| *s > 0)
            .collect();
        // 稳定排序：同分按加入顺序
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(top_k)
            .map(|(s, e)| Passage::new(e.source.clone(), e.content.clone(), s as f32))
            .collect()
    }
}

#[async_trait]
impl ContextRetriever for KeywordRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<Passage> {
        self.search(query, top_k)
    }
}
