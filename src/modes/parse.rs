//! 宽松解析模型回复：列表、问题、评分
//!
//! 容忍 `</think>` 前导、代码围栏、项目符号与编号；解析不出时由调用方回退。

use std::collections::HashSet;

/// 去掉推理模型的 `<think>...</think>` 前导
pub fn strip_think(text: &str) -> &str {
    match text.rfind("</think>") {
        Some(pos) => &text[pos + "</think>".len()..],
        None => text,
    }
}

/// 去掉包裹整段回复的 ``` 围栏
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match trimmed.find('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => return "",
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// 清洗后的正文
pub fn clean(text: &str) -> &str {
    strip_code_fence(strip_think(text))
}

/// 去掉行首的项目符号 / 编号 / 标题井号
fn strip_marker(line: &str) -> &str {
    let line = line.trim().trim_start_matches('#').trim();
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("+ "))
        .or_else(|| line.strip_prefix("• "))
    {
        return rest.trim();
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    if let Some(rest) = line.strip_prefix('(') {
        if let Some(pos) = rest.find(')') {
            if rest[..pos].chars().all(|c| c.is_ascii_digit()) && pos > 0 {
                return rest[pos + 1..].trim();
            }
        }
    }
    line
}

fn normalize(item: &str) -> String {
    item.trim()
        .trim_end_matches(['.', ':'])
        .to_lowercase()
}

/// 解析列表：优先 JSON 字符串数组，否则按行；大小写无关去重，至多 max 条
pub fn parse_list(text: &str, max: usize) -> Vec<String> {
    let body = clean(text);
    let items: Vec<String> = match serde_json::from_str::<Vec<String>>(body) {
        Ok(items) => items,
        Err(_) => body
            .lines()
            .map(strip_marker)
            .map(|l| l.trim_matches('*').trim().to_string())
            .collect(),
    };

    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(normalize(s)))
        .take(max)
        .collect()
}

/// 提取以问号结尾的行（支持全角问号）
pub fn parse_questions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    clean(text)
        .lines()
        .map(strip_marker)
        .filter(|l| l.ends_with('?') || l.ends_with('？'))
        .map(str::to_string)
        .filter(|q| seen.insert(normalize(q)))
        .collect()
}

/// 比较用的规范形式
pub fn question_key(question: &str) -> String {
    normalize(question.trim_end_matches(['?', '？']))
}

/// 解析评委打分：JSON 整数数组，或 `Position k: n` 行；缺失记 0，截断到 0..=10
pub fn parse_scores(text: &str, count: usize) -> Vec<i64> {
    let body = clean(text);
    if let Ok(values) = serde_json::from_str::<Vec<i64>>(body) {
        return (0..count)
            .map(|i| values.get(i).copied().unwrap_or(0).clamp(0, 10))
            .collect();
    }

    let mut scores = vec![0; count];
    for line in body.lines() {
        let lower = line.to_lowercase();
        let Some(pos) = lower.find("position") else {
            continue;
        };
        let numbers: Vec<i64> = lower[pos + "position".len()..]
            .split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        if let [index, score, ..] = numbers.as_slice() {
            if *index >= 1 && (*index as usize) <= count {
                scores[*index as usize - 1] = (*score).clamp(0, 10);
            }
        }
    }
    scores
}
