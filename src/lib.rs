//! Biograph - 生物医学多阶段工具编排引擎
//!
//! 模块划分：
//! - **agent**: 无头运行时（供 CLI / HTTP 调用），负责事件信封与失败兜底
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、带兜底的模型输出解析、会话取消监管
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话消息与历史持久化
//! - **observability**: 日志初始化
//! - **stream**: 流式事件、生产端句柄与带心跳的单消费者会话
//! - **tools**: 工具与提供方注册表、MCP HTTP 提供方、调用器
//! - **workflow**: 分类、阶段路由、阶段 Agent、兜底、压缩、合成与编排图
//! - **web**: axum SSE 端点（feature = "web"）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod stream;
pub mod tools;
#[cfg(feature = "web")]
pub mod web;
pub mod workflow;

pub use agent::{create_runtime, AgentRuntime};
pub use workflow::Orchestrator;
