//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{
    chunk_text, drain_stream, AssistantMessage, ChatRequest, LlmChunk, LlmClient, LlmError,
    LlmStream, ToolCallRequest, Usage,
};
