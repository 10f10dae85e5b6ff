//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式，用于决策类短调用）、
//! complete_stream（流式 Token + 末尾一条完整助手消息，可附带工具 schema）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::Message;

/// LLM 调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("LLM call timed out after {0}s")]
    Timeout(u64),
}

/// 流式请求：消息、可选工具 schema、温度
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Option<Vec<serde_json::Value>>,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>, temperature: f32) -> Self {
        Self {
            messages,
            tools: None,
            temperature,
        }
    }

    pub fn with_tools(mut self, tools: Vec<serde_json::Value>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// 模型请求的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    /// 原始 JSON 参数字符串
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }

    /// 解析参数；空串或非法 JSON 视为无参数
    pub fn parsed_arguments(&self) -> serde_json::Value {
        serde_json::from_str(&self.arguments).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// 流末尾的完整助手消息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// 流式输出单元：若干 Token，最后一条 Done
#[derive(Debug, Clone, PartialEq)]
pub enum LlmChunk {
    Token(String),
    Done(AssistantMessage),
}

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmChunk, LlmError>> + Send>>;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message], temperature: f32) -> Result<String, LlmError>;

    /// 流式完成：Token 流，最后一项为 Done(完整消息)
    async fn complete_stream(&self, request: ChatRequest) -> Result<LlmStream, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 把整段文本切成固定字符数的 Token 块（后端未真正流式返回时使用）
pub fn chunk_text(text: &str, chunk_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// 消费整条流：把 Token 交给 on_token，返回最终消息
///
/// 后端只给出 Done 而未产出任何 Token 时，按 256 字符切块补发 Token。
pub async fn drain_stream<F>(mut stream: LlmStream, mut on_token: F) -> Result<AssistantMessage, LlmError>
where
    F: FnMut(String) + Send,
{
    let mut streamed = String::new();
    let mut final_message: Option<AssistantMessage> = None;
    while let Some(item) = stream.next().await {
        match item? {
            LlmChunk::Token(t) => {
                streamed.push_str(&t);
                on_token(t);
            }
            LlmChunk::Done(msg) => final_message = Some(msg),
        }
    }
    let mut message = final_message.unwrap_or_default();
    if streamed.is_empty() && !message.content.is_empty() {
        for piece in chunk_text(&message.content, 256) {
            on_token(piece);
        }
    }
    if message.content.is_empty() {
        message.content = streamed;
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[test]
    fn test_tool_call_arguments_parse_leniently() {
        let call = ToolCallRequest::new("search", serde_json::json!({"query": "TP53"}));
        assert_eq!(call.parsed_arguments()["query"], "TP53");
        let broken = ToolCallRequest {
            name: "search".into(),
            arguments: "{\"query\": ".into(),
        };
        assert!(broken.parsed_arguments().is_null());
    }

    #[test]
    fn test_chunk_text_respects_char_boundaries() {
        let pieces = chunk_text("단백질abc", 2);
        assert_eq!(pieces, vec!["단백", "질a", "bc"]);
        assert!(chunk_text("", 256).is_empty());
    }

    #[tokio::test]
    async fn test_drain_collects_tokens() {
        let s: LlmStream = Box::pin(stream::iter(vec![
            Ok(LlmChunk::Token("he".into())),
            Ok(LlmChunk::Token("llo".into())),
            Ok(LlmChunk::Done(AssistantMessage::default())),
        ]));
        let mut seen = Vec::new();
        let msg = drain_stream(s, |t| seen.push(t)).await.unwrap();
        assert_eq!(seen, vec!["he", "llo"]);
        assert_eq!(msg.content, "hello");
    }

    #[tokio::test]
    async fn test_drain_chunks_unstreamed_content() {
        let content = "x".repeat(600);
        let s: LlmStream = Box::pin(stream::iter(vec![Ok(LlmChunk::Done(AssistantMessage {
            content: content.clone(),
            ..Default::default()
        }))]));
        let mut seen = Vec::new();
        let msg = drain_stream(s, |t| seen.push(t)).await.unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.concat(), content);
        assert_eq!(msg.content, content);
    }
}
