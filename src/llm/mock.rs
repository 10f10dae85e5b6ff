//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按规则回放：提示中包含 needle 时依次返回脚本里的回复（最后一条重复使用），否则返回默认回复。
//! 带工具 schema 的流式请求可先按 tool-call 规则返回若干批工具调用，用尽后回到文本规则。

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{
    chunk_text, AssistantMessage, ChatRequest, LlmChunk, LlmClient, LlmError, LlmStream, ToolCallRequest,
};
use crate::memory::Message;

#[derive(Debug)]
struct Rule {
    needle: String,
    replies: Vec<String>,
    cursor: usize,
}

#[derive(Debug)]
struct ToolCallRule {
    needle: String,
    batches: Vec<Vec<ToolCallRequest>>,
    cursor: usize,
}

/// 脚本化 Mock 客户端
#[derive(Debug)]
pub struct MockLlmClient {
    rules: Mutex<Vec<Rule>>,
    tool_rules: Mutex<Vec<ToolCallRule>>,
    default_reply: String,
    stream_error: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            tool_rules: Mutex::new(Vec::new()),
            default_reply: "general".to_string(),
            stream_error: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提示包含 needle 时返回 reply
    pub fn with_rule(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.with_sequence(needle, vec![reply.into()])
    }

    /// 提示包含 needle 时依次返回 replies，用尽后重复最后一条
    pub fn with_sequence(self, needle: impl Into<String>, replies: Vec<String>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                needle: needle.into(),
                replies,
                cursor: 0,
            });
        }
        self
    }

    /// 带工具 schema 的请求包含 needle 时，依次返回 batches 中的一批工具调用（不重复使用）
    pub fn with_tool_calls(self, needle: impl Into<String>, batches: Vec<Vec<ToolCallRequest>>) -> Self {
        if let Ok(mut rules) = self.tool_rules.lock() {
            rules.push(ToolCallRule {
                needle: needle.into(),
                batches,
                cursor: 0,
            });
        }
        self
    }

    pub fn with_default(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// 流式调用直接失败（模拟传输层错误）
    pub fn with_stream_error(mut self, message: impl Into<String>) -> Self {
        self.stream_error = Some(message.into());
        self
    }

    /// 已记录的提示文本（按调用顺序）
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn prompt_of(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn record(&self, prompt: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.to_string());
        }
    }

    fn tool_calls_for(&self, messages: &[Message]) -> Option<Vec<ToolCallRequest>> {
        let prompt = Self::prompt_of(messages);
        let mut rules = self.tool_rules.lock().ok()?;
        let rule = rules
            .iter_mut()
            .find(|r| r.cursor < r.batches.len() && prompt.contains(&r.needle))?;
        let batch = rule.batches[rule.cursor].clone();
        rule.cursor += 1;
        self.record(&prompt);
        Some(batch)
    }

    fn reply_for(&self, messages: &[Message]) -> String {
        let prompt = Self::prompt_of(messages);
        self.record(&prompt);
        let Ok(mut rules) = self.rules.lock() else {
            return self.default_reply.clone();
        };
        for rule in rules.iter_mut() {
            if rule.replies.is_empty() || !prompt.contains(&rule.needle) {
                continue;
            }
            let idx = rule.cursor.min(rule.replies.len() - 1);
            rule.cursor += 1;
            return rule.replies[idx].clone();
        }
        self.default_reply.clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], _temperature: f32) -> Result<String, LlmError> {
        Ok(self.reply_for(messages))
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<LlmStream, LlmError> {
        if let Some(err) = &self.stream_error {
            return Err(LlmError::Request(err.clone()));
        }
        if request.tools.is_some() {
            if let Some(tool_calls) = self.tool_calls_for(&request.messages) {
                let done = AssistantMessage {
                    tool_calls,
                    ..Default::default()
                };
                return Ok(Box::pin(stream::iter(vec![Ok(LlmChunk::Done(done))])));
            }
        }
        let content = self.reply_for(&request.messages);
        let mut items: Vec<Result<LlmChunk, LlmError>> = chunk_text(&content, 16)
            .into_iter()
            .map(|t| Ok(LlmChunk::Token(t)))
            .collect();
        items.push(Ok(LlmChunk::Done(AssistantMessage {
            content,
            ..Default::default()
        })));
        Ok(Box::pin(stream::iter(items)))
    }
}
