//! 运行级错误
//!
//! 只有无法在节点内部降级处理的错误才会以 AgentError 离开编排图；
//! 发现失败、工具失败、选错工具、模型输出格式错误都在各自调用点被吸收。

use thiserror::Error;

use crate::llm::LlmError;

/// 一次运行中可能冒泡到会话边界的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 调用方断开，运行被取消
    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}
