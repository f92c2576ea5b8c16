//! 结构化抽取：模型自由文本 → 结构化负载的唯一边界
//!
//! 代码块围栏剥离、JSON 片段定位、按字符截断；解析失败时由调用方给出确定性兜底。

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

static FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn fence_re() -> Option<&'static Regex> {
    FENCE_RE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[^\n]*\n(.*?)```").ok())
        .as_ref()
}

/// 剥离 markdown 代码围栏：有围栏时取第一个代码块内容，否则原样（去首尾空白）
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(caps) = fence_re().and_then(|re| re.captures(trimmed)) {
        if let Some(inner) = caps.get(1) {
            return inner.as_str().trim().to_string();
        }
    }
    // 只有开头围栏、没有闭合的情况
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
        return body.trim_end_matches("```").trim().to_string();
    }
    trimmed.to_string()
}

/// 定位文本中的 JSON 对象：优先代码块，其次第一个 `{` 到与之配对的 `}`
pub fn extract_json_block(text: &str) -> Option<String> {
    let candidate = strip_code_fences(text);
    let start = candidate.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in candidate[start..].char_indices() {
        if in_string {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(candidate[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// 从模型输出中解析结构化负载；失败返回 None 并记录告警
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Option<T> {
    let Some(json) = extract_json_block(text) else {
        tracing::warn!("No JSON object found in model output");
        return None;
    };
    match serde_json::from_str(&json) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Failed to parse structured output: {}", e);
            None
        }
    }
}

/// 按字符数截断（不会切在 UTF-8 字符中间）
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
