//! 工具参数 Schema 处理
//!
//! 远端工具的 inputSchema 可能带顶层组合关键字，部分模型端点拒绝这类 schema；统一清理为 object。

use serde_json::Value;

const COMBINATORS: [&str; 4] = ["oneOf", "anyOf", "allOf", "not"];

/// 去掉顶层 oneOf/anyOf/allOf/not，强制 type=object，缺失 properties 时补空对象
pub fn sanitize_schema(schema: Value) -> Value {
    let mut map = match schema {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    for key in COMBINATORS {
        map.remove(key);
    }
    map.insert("type".to_string(), Value::String("object".to_string()));
    if !map.get("properties").map(Value::is_object).unwrap_or(false) {
        map.insert("properties".to_string(), Value::Object(serde_json::Map::new()));
    }
    Value::Object(map)
}

/// 参数字段名（声明顺序）；无 properties 时退化为顶层键
pub fn schema_fields(schema: &Value) -> Vec<String> {
    let Some(map) = schema.as_object() else {
        return Vec::new();
    };
    match map.get("properties").and_then(Value::as_object) {
        Some(props) => props.keys().cloned().collect(),
        None => map
            .keys()
            .filter(|k| !matches!(k.as_str(), "type" | "required" | "title" | "description"))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_strips_combinators() {
        let raw = json!({
            "anyOf": [{"required": ["a"]}, {"required": ["b"]}],
            "type": "null",
            "properties": {"a": {"type": "string"}}
        });
        let clean = sanitize_schema(raw);
        assert!(clean.get("anyOf").is_none());
        assert_eq!(clean["type"], "object");
        assert_eq!(clean["properties"]["a"]["type"], "string");

        assert_eq!(sanitize_schema(json!("bogus"))["properties"], json!({}));
    }

    #[test]
    fn test_fields_keep_declaration_order() {
        let schema = json!({
            "type": "object",
            "properties": {"target_id": {}, "limit": {}, "query": {}}
        });
        assert_eq!(schema_fields(&schema), vec!["target_id", "limit", "query"]);
        assert_eq!(schema_fields(&json!({"gene": "string"})), vec!["gene"]);
        assert!(schema_fields(&json!(null)).is_empty());
    }
}
