//! OpenAI 兼容 API 客户端
//!
//! complete 通过 async_openai 调用（决策类短调用）；complete_stream 直接向 `{base_url}/chat/completions`
//! 发送 `stream: true` 请求并解析 SSE，支持工具 schema 与分片 tool_calls 累积。

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use tokio::time::timeout;

use crate::llm::{AssistantMessage, ChatRequest, LlmChunk, LlmClient, LlmError, LlmStream, ToolCallRequest, Usage};
use crate::memory::{Message, Role};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    request_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, request_timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let config = OpenAIConfig::new()
            .with_api_base(base_url.clone())
            .with_api_key(api_key.clone());

        Self {
            client: Client::with_config(config),
            http: reqwest::Client::new(),
            base_url,
            api_key,
            model: model.to_string(),
            request_timeout: Duration::from_secs(request_timeout_secs),
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| LlmError::Request(e.to_string()))?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| LlmError::Request(e.to_string()))?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| LlmError::Request(e.to_string()))?,
                    ),
                };
                Ok(msg)
            })
            .collect()
    }

    fn stream_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = serde_json::Value::Array(tools.clone());
            body["tool_choice"] = serde_json::json!("auto");
        }
        body
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message], temperature: f32) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .temperature(temperature)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let response = timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.request_timeout.as_secs()))?
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let choice = response
            .choices
            .first()
            .ok_or_else(|| LlmError::Decode("response contained no choices".to_string()))?;
        Ok(choice.message.content.clone().unwrap_or_default())
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<LlmStream, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let send = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.stream_body(&request))
            .send();
        let response = timeout(self.request_timeout, send)
            .await
            .map_err(|_| LlmError::Timeout(self.request_timeout.as_secs()))?
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let state = StreamState {
            bytes: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
            usage: self.usage.clone(),
        };
        let out = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.finished {
                    return None;
                }
                match st.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let items = st.decoder.feed(&chunk);
                        st.pending.extend(items.into_iter().map(Ok));
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        st.pending.push_back(Err(LlmError::Request(e.to_string())));
                    }
                    None => {
                        st.finished = true;
                        let message = std::mem::take(&mut st.decoder).finish();
                        if let Some(u) = message.usage {
                            st.usage.add(u.prompt_tokens, u.completion_tokens);
                        }
                        st.pending.push_back(Ok(LlmChunk::Done(message)));
                    }
                }
            }
        });
        Ok(Box::pin(out))
    }
}

type ByteStream = std::pin::Pin<
    Box<dyn futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
>;

struct StreamState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<Result<LlmChunk, LlmError>>,
    finished: bool,
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// SSE 解码：按行切分 `data: {...}`，累积正文、分片 tool_calls 与 usage
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    content: String,
    tool_calls: BTreeMap<usize, ToolCallRequest>,
    usage: Option<Usage>,
    done: bool,
}

impl SseDecoder {
    /// 喂入一段字节，返回本段解析出的 Token
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<LlmChunk> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(token) = self.handle_line(line.trim()) {
                out.push(LlmChunk::Token(token));
            }
        }
        out
    }

    fn handle_line(&mut self, line: &str) -> Option<String> {
        if self.done || line.is_empty() || line.starts_with(':') {
            return None;
        }
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return None;
        }
        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(ev) => ev,
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable SSE line");
                return None;
            }
        };
        if let Some(u) = event.usage {
            self.usage = Some(Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens.max(u.prompt_tokens + u.completion_tokens),
            });
        }
        let mut token = String::new();
        for delta in event.choices.into_iter().filter_map(|c| c.delta) {
            if let Some(text) = delta.content {
                token.push_str(&text);
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let entry = self
                    .tool_calls
                    .entry(call.index.unwrap_or(0))
                    .or_insert_with(|| ToolCallRequest {
                        name: String::new(),
                        arguments: String::new(),
                    });
                if let Some(f) = call.function {
                    if let Some(name) = f.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(args) = f.arguments {
                        entry.arguments.push_str(&args);
                    }
                }
            }
        }
        if token.is_empty() {
            return None;
        }
        self.content.push_str(&token);
        Some(token)
    }

    /// 流结束：处理残余行并产出完整消息
    pub(crate) fn finish(mut self) -> AssistantMessage {
        if !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            self.handle_line(rest.trim());
        }
        AssistantMessage {
            content: self.content,
            tool_calls: self
                .tool_calls
                .into_values()
                .filter(|c| !c.name.is_empty())
                .collect(),
            usage: self.usage,
        }
    }
}
