//! 工具结果有效性判断
//!
//! null、空白字符串、空集合视为无效；对象中出现分页字段（hits / results / data.search.hits）时
//! 由该字段决定；其余对象只要任一值有效即有效。

use serde_json::Value;

const PAGINATION_KEYS: [&str; 2] = ["hits", "results"];

/// 递归判断工具结果是否有意义
pub fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(_) | Value::Number(_) => true,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => items.iter().any(is_meaningful),
        Value::Object(map) => {
            if let Some(hits) = map
                .get("data")
                .and_then(|d| d.get("search"))
                .and_then(|s| s.get("hits"))
            {
                return is_meaningful(hits);
            }
            for key in PAGINATION_KEYS {
                if let Some(page) = map.get(key) {
                    return is_meaningful(page);
                }
            }
            map.values().any(is_meaningful)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_shapes() {
        for v in [
            json!(null),
            json!(""),
            json!("   \n"),
            json!([]),
            json!({}),
            json!([null, "", []]),
            json!({"hits": []}),
            json!({"results": [], "total": 0}),
            json!({"data": {"search": {"hits": []}}}),
            json!({"data": null}),
        ] {
            assert!(!is_meaningful(&v), "{} should be empty", v);
        }
    }

    #[test]
    fn test_meaningful_shapes() {
        for v in [
            json!(0),
            json!(false),
            json!("EGFR"),
            json!([null, "x"]),
            json!({"hits": [{"id": 1}]}),
            json!({"data": {"search": {"hits": [{"id": "ENSG"}]}}}),
            json!({"error": "upstream 502"}),
            json!({"id": "P00533", "name": null}),
        ] {
            assert!(is_meaningful(&v), "{} should be meaningful", v);
        }
    }

    #[test]
    fn test_nested_pagination_decides() {
        assert!(!is_meaningful(&json!({"results": [{"hits": []}]})));
        assert!(!is_meaningful(&json!([{}, {"a": ""}])));
        assert!(is_meaningful(&json!({"data": {"search": {"hits": [1]}}})));
        assert!(!is_meaningful(&json!({"hits": null, "total": 3})));
    }
}
