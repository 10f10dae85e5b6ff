//! 编排工作流：分类、阶段路由、阶段 Agent、兜底、压缩与答案合成
//!
//! Orchestrator 是入口，其余组件各自可单独测试。

pub mod classifier;
pub mod compactor;
pub mod fallback;
pub mod format;
pub mod fuzzy;
pub mod graph;
pub mod meaningful;
pub mod retrieval;
pub mod router;
pub mod stage_agent;
pub mod stages;
pub mod state;
pub mod synthesis;

pub use classifier::{Classification, KeywordHit, QuestionClassifier, QuestionKind};
pub use compactor::HistoryCompactor;
pub use fallback::{default_args, FallbackExecutor, FallbackOutcome};
pub use format::{append_search_date, format_tool_result};
pub use graph::{Node, Orchestrator, RunReport};
pub use meaningful::is_meaningful;
pub use retrieval::{DocumentReference, DocumentSearch, DocumentSnippet, NoDocumentSearch};
pub use router::{RouteDecision, StageRouter};
pub use stage_agent::{StageAgent, StageDecision, StageOutcome};
pub use stages::{default_stages, CompiledStage, StageCatalog, StageDefinition};
pub use state::{RunState, StageResults, StageStatus, StageTraceEntry, ToolOutputs};
pub use synthesis::{Synthesizer, DEFAULT_SYSTEM_PROMPT};
