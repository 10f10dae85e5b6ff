//! 客户端可见事件：`{event, data}`，按产生顺序 FIFO 送达

use serde::Serialize;
use serde_json::Value;

/// 事件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// 阶段进度叙述
    Reasoning,
    /// 工具调用生命周期（started / completed / empty / error）
    ToolUse,
    /// 答案增量文本
    Token,
    Metadata,
    DocumentReferences,
    /// 终止标记
    Result,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Reasoning => "reasoning",
            EventKind::ToolUse => "tool_use",
            EventKind::Token => "token",
            EventKind::Metadata => "metadata",
            EventKind::DocumentReferences => "document_references",
            EventKind::Result => "result",
            EventKind::Error => "error",
        }
    }
}

/// 工具调用阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Started,
    Completed,
    Empty,
    Error,
}

/// 单条流事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEvent {
    pub event: EventKind,
    pub data: Value,
}

impl StreamEvent {
    pub fn new(event: EventKind, data: Value) -> Self {
        Self { event, data }
    }

    /// SSE 帧：`data: {...}\n\n`
    pub fn to_sse(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"event":"{}","data":null}}"#, self.event.as_str())
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.event == EventKind::Result
    }
}
