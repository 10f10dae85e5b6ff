//! 兜底执行：阶段没有得到任何有意义结果时，按相关度挑选工具直接调用
//!
//! 排序依据 partial_ratio(查询, "标签 分组 描述")，低于相关度下限的工具不参与；
//! 参数按 schema 字段推断（优先 query/text/prompt/input/question）。

use serde_json::{json, Map, Value};

use crate::core::AgentError;
use crate::stream::{EventEmitter, ToolPhase};
use crate::tools::{schema_fields, ResolvedTool, ToolInvoker};
use crate::workflow::format::format_tool_result;
use crate::workflow::fuzzy::partial_ratio;
use crate::workflow::meaningful::is_meaningful;
use crate::workflow::stages::CompiledStage;
use crate::workflow::state::ToolOutputs;

const PREFERRED_FIELDS: [&str; 5] = ["query", "text", "prompt", "input", "question"];

/// 参与相关度排序的查询前缀长度（字符）
const RANK_QUERY_CHARS: usize = 256;

/// 兜底执行结果
#[derive(Debug, Default)]
pub struct FallbackOutcome {
    pub results: ToolOutputs,
    pub used_tools: Vec<String>,
    pub notes: Vec<String>,
}

/// 兜底执行器
#[derive(Debug, Clone)]
pub struct FallbackExecutor {
    invoker: ToolInvoker,
    limit: usize,
    relevance_floor: u8,
    result_max_chars: usize,
}

impl FallbackExecutor {
    pub fn new(invoker: ToolInvoker, limit: usize, relevance_floor: u8, result_max_chars: usize) -> Self {
        Self {
            invoker,
            limit,
            relevance_floor,
            result_max_chars,
        }
    }

    /// 依相关度降序排列（同分保持原顺序）
    pub fn rank<'a>(&self, query: &str, tools: &'a [ResolvedTool]) -> Vec<(&'a ResolvedTool, u8)> {
        let query: String = query.to_lowercase().chars().take(RANK_QUERY_CHARS).collect();
        let mut scored: Vec<(&ResolvedTool, u8)> = tools
            .iter()
            .map(|t| {
                let haystack = format!("{} {} {}", t.label(), t.group, t.description()).to_lowercase();
                (t, partial_ratio(&query, &haystack))
            })
            .filter(|(_, score)| *score >= self.relevance_floor)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored
    }

    /// 最多尝试 limit 个工具；单个失败只记入 notes
    pub async fn run(
        &self,
        stage: &CompiledStage,
        query: &str,
        tools: &[ResolvedTool],
        emitter: &EventEmitter,
    ) -> Result<FallbackOutcome, AgentError> {
        let mut outcome = FallbackOutcome::default();
        let ranked = self.rank(query, tools);
        if ranked.is_empty() {
            tracing::info!(stage = %stage.key, "no tool passed the relevance floor for fallback");
            outcome
                .notes
                .push("Fallback skipped: no relevant tool.".to_string());
            return Ok(outcome);
        }

        for (tool, score) in ranked.into_iter().take(self.limit) {
            let label = tool.label();
            let args = default_args(query, &tool.argument_schema());
            tracing::info!(stage = %stage.key, tool = %label, score, "running fallback tool");
            emitter.tool_use(&stage.key, &label, ToolPhase::Started, &args, None);
            outcome.used_tools.push(label.clone());

            let invoked = emitter
                .supervisor()
                .guard(self.invoker.invoke(tool, args.clone()))
                .await?;
            match invoked {
                Ok(value) if is_meaningful(&value) => {
                    let formatted = format_tool_result(&value, self.result_max_chars);
                    emitter.tool_use(&stage.key, &label, ToolPhase::Completed, &args, Some(formatted.clone()));
                    outcome
                        .notes
                        .push(format!("[Fallback] {} input: {}\noutput: {}", label, args, formatted));
                    outcome.results.push(&label, value);
                }
                Ok(_) => {
                    emitter.tool_use(&stage.key, &label, ToolPhase::Empty, &args, None);
                    outcome
                        .notes
                        .push(format!("[Fallback] {} returned an empty result.", label));
                }
                Err(e) => {
                    tracing::warn!(stage = %stage.key, tool = %label, error = %e, "fallback tool failed");
                    emitter.tool_use(&stage.key, &label, ToolPhase::Error, &args, Some(e.to_string()));
                    outcome
                        .notes
                        .push(format!("[Fallback] {} failed: {}", label, e));
                }
            }
        }
        Ok(outcome)
    }
}

/// 按 schema 推断默认参数
pub fn default_args(query: &str, schema: &Value) -> Value {
    let fields = schema_fields(schema);
    let field = PREFERRED_FIELDS
        .iter()
        .find(|p| fields.iter().any(|f| f == *p))
        .map(|p| p.to_string())
        .or_else(|| fields.first().cloned());
    match field {
        Some(name) => {
            let mut args = Map::new();
            args.insert(name, Value::String(query.to_string()));
            Value::Object(args)
        }
        None => json!({ "query": query }),
    }
}
