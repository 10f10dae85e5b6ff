//! 文本格式化：工具结果截断、检索日期标记

use serde_json::Value;

/// 工具结果转文本：对象/数组用缩进 JSON，其余转字符串；超过 max_chars 截断
pub fn format_tool_result(result: &Value, max_chars: usize) -> String {
    let text = match result {
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
        }
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let text = text.trim();
    if text.is_empty() {
        return "Result is empty.".to_string();
    }
    if text.chars().count() > max_chars {
        return format!("{}... (truncated)", text.chars().take(max_chars).collect::<String>());
    }
    text.to_string()
}

/// 查询末尾追加 "(Search date: YYYY-MM-DD)"；已含该标记时原样返回
pub fn append_search_date(query: &str, date: &str) -> String {
    let tag = format!("(Search date: {})", date);
    if query.trim().is_empty() {
        return tag;
    }
    if query.contains(&tag) {
        return query.to_string();
    }
    format!("{} {}", query, tag)
}

/// 今天的日期（本地时区）
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// 按字符截取尾部 max_chars 个字符
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let (idx, _) = text.char_indices().nth(skip).unwrap_or((0, ' '));
    &text[idx..]
}
