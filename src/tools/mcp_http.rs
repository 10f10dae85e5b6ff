//! MCP HTTP 提供方
//!
//! 每个配置的分组对应一个 JSON-RPC 2.0 端点：`tools/list` 发现工具，`tools/call` 调用；
//! 文本内容若是合法 JSON 则按 JSON 返回。发现结果按 allowlist / blocklist 过滤。

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ProviderSection;
use crate::tools::schema::sanitize_schema;
use crate::tools::{Tool, ToolError, ToolProvider};

/// JSON-RPC 连接（端点 + 附加请求头）
struct RpcEndpoint {
    client: Client,
    url: String,
    headers: Vec<(String, String)>,
    next_id: AtomicU64,
}

impl RpcEndpoint {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut req = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(&body);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ToolError::Protocol(format!("{}: {}", self.url, e)))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ToolError::Protocol(e.to_string()))?;
        if !status.is_success() {
            return Err(ToolError::Protocol(format!("HTTP {}: {}", status.as_u16(), text)));
        }
        let envelope: RpcResponse = serde_json::from_str(rpc_payload(&text))
            .map_err(|e| ToolError::Protocol(format!("invalid JSON-RPC response: {}", e)))?;
        if let Some(err) = envelope.error {
            return Err(ToolError::Protocol(format!("{} (code {})", err.message, err.code)));
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }
}

/// 服务端以 SSE 回包时取最后一条 data 行
fn rpc_payload(text: &str) -> &str {
    text.lines()
        .filter_map(|l| l.trim().strip_prefix("data:"))
        .last()
        .map(str::trim)
        .unwrap_or(text)
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListedTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "inputSchema")]
    input_schema: Value,
}

/// 远端工具
pub struct McpHttpTool {
    endpoint: Arc<RpcEndpoint>,
    name: String,
    description: String,
    schema: Value,
}

#[async_trait]
impl Tool for McpHttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let result = self
            .endpoint
            .call(
                "tools/call",
                serde_json::json!({ "name": self.name, "arguments": args }),
            )
            .await?;
        let output = flatten_content(&result);
        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ToolError::Invocation(match output {
                Value::String(s) => s,
                other => other.to_string(),
            }));
        }
        Ok(output)
    }
}

/// content: [{type: "text", text}] → 文本（能解析为 JSON 则为 JSON）；多段时为数组
fn flatten_content(result: &Value) -> Value {
    if let Some(structured) = result.get("structuredContent") {
        return structured.clone();
    }
    let Some(items) = result.get("content").and_then(Value::as_array) else {
        return result.clone();
    };
    let mut parts: Vec<Value> = items
        .iter()
        .map(|item| match item.get("text").and_then(Value::as_str) {
            Some(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
            None => item.clone(),
        })
        .collect();
    match parts.len() {
        0 => Value::Null,
        1 => parts.remove(0),
        _ => Value::Array(parts),
    }
}

struct GroupEntry {
    name: String,
    endpoint: Arc<RpcEndpoint>,
    allowlist: HashSet<String>,
    blocklist: HashSet<String>,
}

/// 按配置构建的 HTTP 提供方
pub struct HttpMcpProvider {
    entries: Vec<GroupEntry>,
}

impl HttpMcpProvider {
    pub fn from_config(sections: &[ProviderSection]) -> Self {
        let client = Client::new();
        let entries = sections
            .iter()
            .filter(|s| {
                let valid = !s.name.trim().is_empty() && !s.url.trim().is_empty();
                if !valid {
                    tracing::warn!(provider = %s.name, "provider entry missing name or url, skipped");
                }
                valid
            })
            .map(|s| GroupEntry {
                name: s.name.trim().to_string(),
                endpoint: Arc::new(RpcEndpoint {
                    client: client.clone(),
                    url: s.url.clone(),
                    headers: s.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    next_id: AtomicU64::new(1),
                }),
                allowlist: s.tool_allowlist.iter().cloned().collect(),
                blocklist: s.tool_blocklist.iter().cloned().collect(),
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn keep_tool(name: &str, allow: &HashSet<String>, block: &HashSet<String>) -> bool {
    (allow.is_empty() || allow.contains(name)) && !block.contains(name)
}

#[async_trait]
impl ToolProvider for HttpMcpProvider {
    fn groups(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    async fn discover(&self, group: &str) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == group)
            .ok_or_else(|| ToolError::Discovery(format!("unknown group {}", group)))?;
        let result = entry
            .endpoint
            .call("tools/list", serde_json::json!({}))
            .await
            .map_err(|e| ToolError::Discovery(e.to_string()))?;
        let listed: Vec<ListedTool> = serde_json::from_value(
            result.get("tools").cloned().unwrap_or(Value::Array(Vec::new())),
        )
        .map_err(|e| ToolError::Discovery(format!("malformed tools/list: {}", e)))?;

        Ok(listed
            .into_iter()
            .filter(|t| keep_tool(&t.name, &entry.allowlist, &entry.blocklist))
            .map(|t| {
                Arc::new(McpHttpTool {
                    endpoint: entry.endpoint.clone(),
                    name: t.name,
                    description: t.description,
                    schema: sanitize_schema(t.input_schema),
                }) as Arc<dyn Tool>
            })
            .collect())
    }
}
