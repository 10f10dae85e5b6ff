//! 工具层：Tool / ToolProvider 抽象、分组注册表（缓存 + 发现锁）、MCP HTTP 与进程内提供方、带超时的调用器

pub mod executor;
pub mod local;
pub mod mcp_http;
pub mod registry;
pub mod schema;

pub use executor::ToolInvoker;
pub use local::{FnTool, StaticProvider};
pub use mcp_http::{HttpMcpProvider, McpHttpTool};
pub use registry::{ProviderRegistry, ResolvedTool, Tool, ToolError, ToolProvider};
pub use schema::{sanitize_schema, schema_fields};
