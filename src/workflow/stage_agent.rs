//! 阶段 Agent：单个阶段内有界的推理-行动循环
//!
//! 每轮请 LLM 给出决策（调用工具或结束）；单阶段最多 max_stage_steps 轮、max_tool_calls 次工具调用。
//! 决策来源二选一：JSON 文本（默认），或模型原生 function calling（一轮可返回多个调用，不返回调用即结束）。
//! 选错工具记为错误并消耗一轮；工具异常转为 `{"error": ...}` 结果记录在草稿中；
//! 无意义结果只在草稿中记为 empty，不进入 results。

use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::config::WorkflowSection;
use crate::core::{parse_json_or, AgentError};
use crate::llm::{drain_stream, AssistantMessage, ChatRequest, LlmClient, LlmError};
use crate::memory::Message;
use crate::stream::{EventEmitter, ToolPhase};
use crate::tools::{ResolvedTool, ToolInvoker};
use crate::workflow::format::format_tool_result;
use crate::workflow::meaningful::is_meaningful;
use crate::workflow::stages::CompiledStage;
use crate::workflow::state::{StageStatus, ToolOutputs};

/// LLM 的单步决策
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StageDecision {
    /// 调用一个工具
    CallTool {
        tool_name: String,
        #[serde(default)]
        arguments: Value,
    },
    /// 结束本阶段并给出摘要
    Finish {
        #[serde(default)]
        summary: String,
    },
}

/// 决策 JSON Schema，拼入提示
pub fn decision_schema_json() -> String {
    let schema = schema_for!(StageDecision);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 草稿条目
#[derive(Debug, Clone)]
enum ScratchEntry {
    Tool {
        label: String,
        input: Value,
        output: String,
    },
    Empty {
        label: String,
        input: Value,
    },
    Error(String),
}

impl ScratchEntry {
    fn history_line(&self) -> String {
        match self {
            ScratchEntry::Tool { label, input, output } => {
                format!("[Tool Run] {} input={} output={}", label, input, output)
            }
            ScratchEntry::Empty { label, input } => {
                format!("[Tool Run] {} input={} output=empty", label, input)
            }
            ScratchEntry::Error(msg) => format!("[Error] {}", msg),
        }
    }

    fn note_line(&self) -> String {
        match self {
            ScratchEntry::Tool { label, input, output } => {
                format!("{} input: {}\noutput: {}", label, input, output)
            }
            ScratchEntry::Empty { label, input } => {
                format!("{} input: {}\noutput: empty", label, input)
            }
            ScratchEntry::Error(msg) => msg.clone(),
        }
    }
}

/// 阶段执行结果
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub results: ToolOutputs,
    pub used_tools: Vec<String>,
    pub status: StageStatus,
    pub notes: String,
    /// 面向用户的完成消息
    pub message: String,
    /// 实际发起的工具调用次数
    pub tool_calls: usize,
    /// 是否因工具调用上限而结束
    pub budget_reached: bool,
}

impl StageOutcome {
    /// 依据 results 重算状态与完成消息
    pub(crate) fn refresh_status(&mut self, title: &str) {
        if self.results.is_empty() {
            self.status = StageStatus::Skipped;
            self.message = format!("{} 단계를 건너뜁니다. 유의미한 툴 결과가 없습니다.", title);
        } else {
            self.status = StageStatus::Completed;
            self.message = format!("{} 단계 완료 ({}개 툴 결과)", title, self.results.len());
        }
    }
}

/// 阶段 Agent
pub struct StageAgent {
    llm: Arc<dyn LlmClient>,
    invoker: ToolInvoker,
    max_steps: usize,
    max_tool_calls: usize,
    scratch_max_chars: usize,
    temperature: f32,
    native_tools: bool,
}

impl StageAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        invoker: ToolInvoker,
        settings: &WorkflowSection,
        temperature: f32,
    ) -> Self {
        Self {
            llm,
            invoker,
            max_steps: settings.max_stage_steps,
            max_tool_calls: settings.max_tool_calls_per_stage,
            scratch_max_chars: settings.scratch_result_max_chars,
            temperature,
            native_tools: settings.native_tool_calls,
        }
    }

    /// 运行一个阶段；只有取消会以 Err 返回
    pub async fn run(
        &self,
        stage: &CompiledStage,
        query: &str,
        tools: &[ResolvedTool],
        emitter: &EventEmitter,
    ) -> Result<StageOutcome, AgentError> {
        let mut scratch: Vec<ScratchEntry> = Vec::new();
        let mut results = ToolOutputs::new();
        let mut used_tools: Vec<String> = Vec::new();
        let mut summary = String::new();
        let mut tool_calls = 0usize;
        let mut budget_reached = false;

        'steps: for step in 0..self.max_steps {
            let decisions = match self.decide(stage, query, tools, &scratch, emitter).await? {
                Ok(decisions) => decisions,
                Err(e) => {
                    tracing::warn!(stage = %stage.key, step, error = %e, "stage decision call failed");
                    scratch.push(ScratchEntry::Error(format!("Decision call failed: {}", e)));
                    break;
                }
            };

            for decision in decisions {
                match decision {
                    StageDecision::Finish { summary: s } => {
                        summary = s.trim().to_string();
                        break 'steps;
                    }
                    StageDecision::CallTool {
                        tool_name,
                        arguments,
                    } => {
                        if tool_calls >= self.max_tool_calls {
                            budget_reached = true;
                            scratch.push(ScratchEntry::Error(format!(
                                "Tool call budget reached ({} calls); {} was not executed.",
                                self.max_tool_calls, tool_name
                            )));
                            break 'steps;
                        }
                        let Some(tool) = find_tool(tools, &tool_name) else {
                            tracing::warn!(stage = %stage.key, tool = %tool_name, "model requested unknown tool");
                            scratch.push(ScratchEntry::Error(format!(
                                "Requested tool {} was not found.",
                                tool_name
                            )));
                            continue;
                        };
                        let arguments = if arguments.is_null() {
                            Value::Object(serde_json::Map::new())
                        } else {
                            arguments
                        };
                        tool_calls += 1;
                        let entry = self
                            .execute(stage, tool, arguments, &mut results, emitter)
                            .await?;
                        used_tools.push(tool.label());
                        scratch.push(entry);
                    }
                }
            }
        }

        let mut notes_lines: Vec<String> = scratch.iter().map(ScratchEntry::note_line).collect();
        if !summary.is_empty() {
            notes_lines.push(format!("Summary: {}", summary));
        }
        let notes = notes_lines
            .into_iter()
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut outcome = StageOutcome {
            results,
            used_tools,
            status: StageStatus::Pending,
            notes: if notes.is_empty() {
                "Tool results are empty.".to_string()
            } else {
                notes
            },
            message: String::new(),
            tool_calls,
            budget_reached,
        };
        outcome.refresh_status(&stage.title);
        Ok(outcome)
    }

    /// 取得本轮决策；外层 Err 只表示取消，内层 Err 为模型调用失败
    async fn decide(
        &self,
        stage: &CompiledStage,
        query: &str,
        tools: &[ResolvedTool],
        scratch: &[ScratchEntry],
        emitter: &EventEmitter,
    ) -> Result<Result<Vec<StageDecision>, LlmError>, AgentError> {
        let supervisor = emitter.supervisor();
        let system = if self.native_tools {
            format!(
                "You are the specialist agent for the {} stage. Use the provided functions to gather data, then answer with a short summary.",
                stage.title
            )
        } else {
            format!(
                "You are the specialist agent for the {} stage. Respond only with JSON that describes your next action.",
                stage.title
            )
        };
        let messages = vec![
            Message::system(system),
            Message::user(self.build_prompt(stage, query, tools, scratch)),
        ];

        if self.native_tools {
            let request = ChatRequest::new(messages, self.temperature)
                .with_tools(tools.iter().map(function_schema).collect());
            let reply = supervisor
                .guard(async {
                    let stream = self.llm.complete_stream(request).await?;
                    Ok::<AssistantMessage, LlmError>(drain_stream(stream, |_| {}).await?)
                })
                .await?;
            return Ok(reply.map(native_decisions));
        }

        let response = match supervisor
            .guard(self.llm.complete(&messages, self.temperature))
            .await?
        {
            Ok(text) => text,
            Err(e) => return Ok(Err(e)),
        };
        let outcome = parse_json_or(&response, |_| StageDecision::Finish {
            summary: response.trim().to_string(),
        });
        if let Some(reason) = outcome.reason() {
            tracing::debug!(stage = %stage.key, reason, "stage decision treated as finish");
        }
        Ok(Ok(vec![outcome.into_value()]))
    }

    async fn execute(
        &self,
        stage: &CompiledStage,
        tool: &ResolvedTool,
        arguments: Value,
        results: &mut ToolOutputs,
        emitter: &EventEmitter,
    ) -> Result<ScratchEntry, AgentError> {
        let label = tool.label();
        emitter.tool_use(&stage.key, &label, ToolPhase::Started, &arguments, None);
        emitter.reasoning_with(
            "mcp_tool",
            format!("{} 단계에서 {} 실행 중", stage.title, label),
            serde_json::json!({ "node": stage.key, "tool": label }),
        );

        let invoked = emitter
            .supervisor()
            .guard(self.invoker.invoke(tool, arguments.clone()))
            .await?;
        let entry = match invoked {
            Ok(value) if is_meaningful(&value) => {
                let output = format_tool_result(&value, self.scratch_max_chars);
                emitter.tool_use(&stage.key, &label, ToolPhase::Completed, &arguments, Some(output.clone()));
                results.push(&label, value);
                ScratchEntry::Tool {
                    label,
                    input: arguments,
                    output,
                }
            }
            Ok(_) => {
                tracing::info!(stage = %stage.key, tool = %label, "tool returned an empty result");
                emitter.tool_use(&stage.key, &label, ToolPhase::Empty, &arguments, None);
                ScratchEntry::Empty {
                    label,
                    input: arguments,
                }
            }
            Err(e) => {
                tracing::warn!(stage = %stage.key, tool = %label, error = %e, "tool execution failed");
                let error = serde_json::json!({ "error": e.to_string() });
                let output = format_tool_result(&error, self.scratch_max_chars);
                emitter.tool_use(&stage.key, &label, ToolPhase::Error, &arguments, Some(output.clone()));
                ScratchEntry::Tool {
                    label,
                    input: arguments,
                    output,
                }
            }
        };
        Ok(entry)
    }

    fn build_prompt(
        &self,
        stage: &CompiledStage,
        query: &str,
        tools: &[ResolvedTool],
        scratch: &[ScratchEntry],
    ) -> String {
        let tool_sections: Vec<String> = tools
            .iter()
            .map(|t| {
                let schema = serde_json::to_string_pretty(&t.argument_schema())
                    .unwrap_or_else(|_| "Input schema is unavailable".to_string());
                format!(
                    "- Tool name: {}\n  Server: {}\n  Description: {}\n  Schema: {}",
                    t.name(),
                    t.group,
                    t.description(),
                    schema
                )
            })
            .collect();
        let history = if scratch.is_empty() {
            "None".to_string()
        } else {
            scratch
                .iter()
                .map(ScratchEntry::history_line)
                .collect::<Vec<_>>()
                .join("\n")
        };

        if self.native_tools {
            return format!(
                "Stage: {}\nGoal: {}\nUser question: {}\nAvailable tools:\n{}\n\n\
                 Action guidelines:\n\
                 1. Call the provided functions to gather data.\n\
                 2. Review each tool output before deciding on additional calls.\n\
                 3. At most {} tool calls are allowed in this stage.\n\
                 4. When done, reply with a plain-text summary and no function call.\n\
                 Progress so far:\n{}",
                stage.title,
                stage.goal,
                query,
                tool_sections.join("\n"),
                self.max_tool_calls,
                history
            );
        }

        format!(
            "Stage: {}\nGoal: {}\nUser question: {}\nAvailable tools:\n{}\n\n\
             Action guidelines:\n\
             1. Call one tool at a time using a JSON command.\n\
             2. Review each tool output before deciding on additional calls.\n\
             3. At most {} tool calls are allowed in this stage.\n\
             4. When done, reply with action=\"finish\" and a summary.\n\
             Decision schema:\n{}\n\
             Output examples:\n\
             {{\"action\": \"call_tool\", \"tool_name\": \"tool\", \"arguments\": {{\"query\": \"...\"}}}}\n\
             {{\"action\": \"finish\", \"summary\": \"...\"}}\n\
             Progress so far:\n{}",
            stage.title,
            stage.goal,
            query,
            tool_sections.join("\n"),
            self.max_tool_calls,
            decision_schema_json(),
            history
        )
    }
}

/// OpenAI function 描述
fn function_schema(tool: &ResolvedTool) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name(),
            "description": tool.description(),
            "parameters": tool.argument_schema(),
        }
    })
}

/// 原生工具调用转为决策；没有调用时以正文作为摘要结束
fn native_decisions(message: AssistantMessage) -> Vec<StageDecision> {
    if message.tool_calls.is_empty() {
        return vec![StageDecision::Finish {
            summary: message.content,
        }];
    }
    message
        .tool_calls
        .into_iter()
        .map(|call| StageDecision::CallTool {
            arguments: call.parsed_arguments(),
            tool_name: call.name,
        })
        .collect()
}

/// 按工具名或 "group:name" 标签查找
fn find_tool<'a>(tools: &'a [ResolvedTool], requested: &str) -> Option<&'a ResolvedTool> {
    let requested = requested.trim();
    tools
        .iter()
        .find(|t| t.name() == requested)
        .or_else(|| tools.iter().find(|t| t.label() == requested))
}
