//! 工具调用器
//!
//! 对每次调用施加超时，超时或失败转为 ToolError；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::tools::{ResolvedTool, ToolError};

/// 工具调用器：统一超时与审计
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 调用工具；输出 JSON 审计日志
    pub async fn invoke(&self, tool: &ResolvedTool, args: Value) -> Result<Value, ToolError> {
        let start = Instant::now();
        let label = tool.label();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.tool.call(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": label,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(r) => r,
            Err(_) => Err(ToolError::Timeout {
                tool: label,
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

impl Default for ToolInvoker {
    fn default() -> Self {
        Self::new(30)
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
