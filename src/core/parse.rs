//! 模型输出解析：带兜底的 JSON 解析
//!
//! 路由、分类、阶段决策都从自由文本中解析 JSON；解析永远不抛错，
//! 失败时返回调用点给定的默认值与原因，保证状态机转移函数是全函数。

use serde::de::DeserializeOwned;

/// 解析结果：Parsed(值) 或 Fallback(默认值, 原因)
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Fallback { value: T, reason: String },
}

impl<T> ParseOutcome<T> {
    pub fn into_value(self) -> T {
        match self {
            ParseOutcome::Parsed(v) => v,
            ParseOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn value(&self) -> &T {
        match self {
            ParseOutcome::Parsed(v) => v,
            ParseOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ParseOutcome::Fallback { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ParseOutcome::Parsed(_) => None,
            ParseOutcome::Fallback { reason, .. } => Some(reason),
        }
    }
}

/// 从文本中截取 JSON 片段：```json 代码块优先，其次首个 '{' 到最后一个 '}'
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析为 T；失败时用 fallback(原因) 构造默认值
pub fn parse_json_or<T, F>(text: &str, fallback: F) -> ParseOutcome<T>
where
    T: DeserializeOwned,
    F: FnOnce(&str) -> T,
{
    let Some(block) = extract_json_block(text) else {
        let reason = "no JSON object in model output".to_string();
        return ParseOutcome::Fallback {
            value: fallback(&reason),
            reason,
        };
    };
    match serde_json::from_str::<T>(block) {
        Ok(v) => ParseOutcome::Parsed(v),
        Err(e) => {
            let reason = format!("invalid JSON: {}", e);
            ParseOutcome::Fallback {
                value: fallback(&reason),
                reason,
            }
        }
    }
}
