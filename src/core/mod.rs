//! 核心层：运行级错误、带兜底的模型输出解析、取消监管

pub mod error;
pub mod parse;
pub mod session_supervisor;

pub use error::AgentError;
pub use parse::{extract_json_block, parse_json_or, ParseOutcome};
pub use session_supervisor::SessionSupervisor;
