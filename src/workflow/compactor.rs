//! 轨迹压缩：提示轨迹过长时用 LLM 摘要最近一段文本
//!
//! 只替换 prompt_trace（路由与最终报告从中读取进度笔记）；stage_results 与 stage_trace 保持原样。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::stream::EventEmitter;
use crate::workflow::format::tail_chars;
use crate::workflow::state::RunState;

pub struct HistoryCompactor {
    llm: Arc<dyn LlmClient>,
    threshold_chars: usize,
    window_chars: usize,
    summary_words: usize,
    temperature: f32,
}

impl HistoryCompactor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        threshold_chars: usize,
        window_chars: usize,
        summary_words: usize,
        temperature: f32,
    ) -> Self {
        Self {
            llm,
            threshold_chars,
            window_chars,
            summary_words,
            temperature,
        }
    }

    pub fn needs_compaction(&self, state: &RunState) -> bool {
        state.trace_text().chars().count() > self.threshold_chars
    }

    /// 超过阈值时压缩；返回是否发生压缩
    pub async fn compact(&self, state: &mut RunState, emitter: &EventEmitter) -> Result<bool, AgentError> {
        if !self.needs_compaction(state) {
            return Ok(false);
        }
        let text = state.trace_text();
        let recent = tail_chars(&text, self.window_chars).to_string();
        let before = text.chars().count();

        let messages = [
            Message::system(format!(
                "Summarize the research progress below in at most {} words. Keep tool names, identifiers and key findings.",
                self.summary_words
            )),
            Message::user(recent.clone()),
        ];
        let summary = match emitter
            .supervisor()
            .guard(self.llm.complete(&messages, self.temperature))
            .await?
        {
            Ok(text) if !text.trim().is_empty() => limit_words(text.trim(), self.summary_words),
            Ok(_) => recent,
            Err(e) => {
                tracing::warn!(error = %e, "trace summary failed, keeping recent tail");
                recent
            }
        };

        let note = format!("[Summary] {}", summary);
        state.prompt_trace = vec![note.clone()];
        state.conversation_history.push(Message::system(note));
        tracing::info!(before, after = state.trace_text().chars().count(), "prompt trace compacted");
        emitter.reasoning("summary", "진행 기록이 길어 요약했습니다.");
        Ok(true)
    }
}

fn limit_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    words[..max_words].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::workflow::state::ToolOutputs;
    use serde_json::json;

    fn compactor(llm: MockLlmClient) -> HistoryCompactor {
        HistoryCompactor::new(Arc::new(llm), 100, 40, 5, 0.0)
    }

    #[tokio::test]
    async fn test_short_trace_untouched() {
        let mut state = RunState::new("q", vec![]);
        state.prompt_trace.push("short".into());
        let (emitter, _rx) = EventEmitter::channel();
        assert!(!compactor(MockLlmClient::new()).compact(&mut state, &emitter).await.unwrap());
        assert_eq!(state.prompt_trace, vec!["short".to_string()]);
    }

    #[tokio::test]
    async fn test_compaction_keeps_stage_results() {
        let llm = MockLlmClient::new()
            .with_rule("Summarize", "one two three four five six seven");
        let mut state = RunState::new("q", vec![]);
        state.prompt_trace.push("x".repeat(150));
        let mut outputs = ToolOutputs::new();
        outputs.push("PDB:search", json!({"id": 1}));
        state.stage_results.merge("StructureAgent", outputs);
        let (emitter, _rx) = EventEmitter::channel();

        assert!(compactor(llm).compact(&mut state, &emitter).await.unwrap());
        assert_eq!(state.prompt_trace, vec!["[Summary] one two three four five".to_string()]);
        assert!(state.stage_results.has_any());
        assert!(state
            .conversation_history
            .messages()
            .last()
            .unwrap()
            .content
            .starts_with("[Summary]"));
    }
}
