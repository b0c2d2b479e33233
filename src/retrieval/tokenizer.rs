//! 中英文混合分词
//!
//! 含 CJK 字符的文本交给 jieba（搜索引擎模式），其余按非字母数字字符切分。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例，首次分中文时加载词典
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'     // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}'   // Extension A
        | '\u{F900}'..='\u{FAFF}'   // Compatibility Ideographs
        | '\u{3040}'..='\u{309F}'   // Hiragana
        | '\u{30A0}'..='\u{30FF}'   // Katakana
        | '\u{AC00}'..='\u{D7AF}'   // Hangul Syllables
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// 单个 CJK 字保留，其他词至少两个字符；纯标点丢弃
fn keep(token: &str) -> bool {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => is_cjk(c),
        (Some(_), Some(_)) => token.chars().any(char::is_alphanumeric),
        _ => false,
    }
}

/// 小写词集合
pub fn tokenize(text: &str) -> HashSet<String> {
    let text = text.trim();
    if text.is_empty() {
        return HashSet::new();
    }

    if contains_cjk(text) {
        jieba()
            .cut_for_search(text, true)
            .into_iter()
            .flat_map(|word| word.split(|c: char| !c.is_alphanumeric()))
            .map(str::to_lowercase)
            .filter(|w| keep(w))
            .collect()
    } else {
        text.split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|w| keep(w))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("我喜欢编程和人工智能");
        assert!(tokens.contains("编程"));
        assert!(tokens.iter().any(|t| t.contains("智能")));
        // 不再是整句一个词
        assert!(!tokens.contains("我喜欢编程和人工智能"));
    }

    #[test]
    fn test_tokenize_english() {
        let tokens = tokenize("Tokio's runtime, explained: a guide");
        assert!(tokens.contains("tokio"));
        assert!(tokens.contains("runtime"));
        assert!(tokens.contains("explained"));
        assert!(!tokens.contains("a"));
    }

    #[test]
    fn test_tokenize_mixed() {
        let tokens = tokenize("用 Rust 编写异步服务");
        assert!(tokens.contains("rust"));
        assert!(tokens.contains("异步"));
        assert!(!tokens.contains(" "));
    }

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("你好"));
        assert!(contains_cjk("Hello 世界"));
        assert!(!contains_cjk("Hello World"));
        assert!(tokenize("   ").is_empty());
    }
}
