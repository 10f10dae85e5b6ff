//! 答案合成：直接回答与基于阶段结果的最终报告，均以 token 事件流式输出

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{drain_stream, ChatRequest, LlmClient};
use crate::memory::{Message, Role};
use crate::stream::EventEmitter;
use crate::workflow::format::format_tool_result;
use crate::workflow::stages::StageCatalog;
use crate::workflow::state::RunState;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

const REPORT_INSTRUCTIONS: &str = "당신은 바이오/신약 개발 전문 어시스턴트입니다. \
아래 단계별 MCP 데이터를 기반으로 일관된 연구 보고서를 작성하세요. \
결과가 있는 각 단계를 모두 언급하고 사용된 데이터의 한계나 후속 조치도 제안하세요.";

pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    temperature: f32,
    result_max_chars: usize,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>, temperature: f32, result_max_chars: usize) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            temperature,
            result_max_chars,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// 不经阶段流水线，直接基于对话历史回答（路由、摘要等内部 system 记录不带入）
    pub async fn direct_answer(&self, state: &mut RunState, emitter: &EventEmitter) -> Result<(), AgentError> {
        emitter.reasoning("final", "추가 검색 없이 직접 답변을 생성합니다.");
        let mut messages = vec![Message::system(self.system_prompt.clone())];
        messages.extend(
            state
                .conversation_history
                .messages()
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );
        self.stream_answer(messages, state, emitter).await
    }

    /// 汇总阶段结果、提示轨迹（可能已压缩）与检索文档生成最终报告；都为空时退回直接回答
    pub async fn final_answer(
        &self,
        catalog: &StageCatalog,
        state: &mut RunState,
        emitter: &EventEmitter,
    ) -> Result<(), AgentError> {
        let mut overview = Vec::new();
        let mut blocks = Vec::new();
        for stage in catalog.iter() {
            let Some(outputs) = state.stage_results.get(&stage.title) else {
                continue;
            };
            if outputs.is_empty() {
                continue;
            }
            overview.push(format!(
                "- {}: {} (툴: {})",
                stage.title,
                stage.goal,
                outputs.labels().join(", ")
            ));
            let mut lines = vec![format!("[{}] {}", stage.title, stage.goal)];
            for (label, values) in outputs.iter() {
                let value = serde_json::Value::Array(values.to_vec());
                lines.push(format!("{} 결과:\n{}", label, format_tool_result(&value, self.result_max_chars)));
            }
            blocks.push(lines.join("\n"));
        }

        if blocks.is_empty() && state.document_results.is_empty() {
            emitter.reasoning("final", "MCP 툴 결과가 없어 일반 답변으로 전환합니다.");
            return self.direct_answer(state, emitter).await;
        }

        let trace_notes: Vec<&str> = state
            .prompt_trace
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .collect();
        let documents: Vec<String> = state
            .document_results
            .iter()
            .map(|d| {
                format!(
                    "[{}] {}",
                    d.file_name.as_deref().unwrap_or("알 수 없는 문서"),
                    d.content.trim()
                )
            })
            .collect();

        let mut user = format!("질문: {}\n\n", state.original_question);
        if !overview.is_empty() {
            user.push_str(&format!("워크플로우 개요:\n{}\n\n", overview.join("\n")));
        }
        if !trace_notes.is_empty() {
            user.push_str(&format!("단계별 주요 메모:\n{}\n\n", trace_notes.join("\n")));
        }
        if !blocks.is_empty() {
            user.push_str(&format!("세부 데이터:\n{}\n\n", blocks.join("\n\n")));
        }
        if !documents.is_empty() {
            user.push_str(&format!("참고 문서:\n{}\n", documents.join("\n")));
        }

        emitter.reasoning("final", "바이오 워크플로우 결과를 바탕으로 최종 답변을 생성합니다.");
        let messages = vec![
            Message::system(format!("{}\n\n{}", self.system_prompt, REPORT_INSTRUCTIONS)),
            Message::user(user.trim_end().to_string()),
        ];
        self.stream_answer(messages, state, emitter).await
    }

    async fn stream_answer(
        &self,
        messages: Vec<Message>,
        state: &mut RunState,
        emitter: &EventEmitter,
    ) -> Result<(), AgentError> {
        let supervisor = emitter.supervisor();
        let request = ChatRequest::new(messages, self.temperature);
        let stream = supervisor.guard(self.llm.complete_stream(request)).await??;
        let message = supervisor
            .guard(drain_stream(stream, |t| {
                emitter.token(t);
            }))
            .await??;
        state
            .conversation_history
            .push(Message::assistant(message.content.clone()));
        state.set_final_answer(message.content);
        Ok(())
    }
}
