//! 阶段路由：在访问计数与迭代预算之上选择下一个阶段
//!
//! 预算耗尽或全部阶段已访问时结束；否则由 LLM 给出 `{next, rationale}`，
//! 解析失败、阶段未知或已访问时强制改为优先级顺序中第一个未访问阶段。
//! 提示中带入 prompt_trace（压缩后为摘要加其后的新笔记）。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::{parse_json_or, AgentError};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::stream::EventEmitter;
use crate::workflow::stages::StageCatalog;
use crate::workflow::state::RunState;

/// 路由结论
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// 执行某阶段（overridden 表示 LLM 选择被改写）
    Stage {
        key: String,
        rationale: String,
        overridden: bool,
    },
    /// 进入检索与最终回答
    Finish { reason: String },
}

#[derive(Debug, Deserialize)]
struct RouterReply {
    #[serde(default)]
    next: String,
    #[serde(default)]
    rationale: String,
}

pub struct StageRouter {
    llm: Arc<dyn LlmClient>,
    max_iterations: usize,
    temperature: f32,
    history_window: usize,
}

impl StageRouter {
    pub fn new(llm: Arc<dyn LlmClient>, max_iterations: usize, temperature: f32) -> Self {
        Self {
            llm,
            max_iterations,
            temperature,
            history_window: 12,
        }
    }

    /// 无需询问 LLM 即可结束的情形
    pub fn finish_reason(&self, catalog: &StageCatalog, state: &RunState) -> Option<String> {
        if catalog.is_empty() {
            return Some("no stages configured".to_string());
        }
        if state.step_count >= self.max_iterations {
            return Some(format!("iteration budget exhausted ({})", self.max_iterations));
        }
        let any_visited = catalog.iter().any(|s| state.visits(&s.key) > 0);
        let all_visited = catalog.iter().all(|s| state.visits(&s.key) > 0);
        if any_visited && all_visited {
            return Some("all stages visited".to_string());
        }
        None
    }

    /// 选择下一步；决定会以 system 消息写入 conversation_history
    pub async fn route(
        &self,
        catalog: &StageCatalog,
        state: &mut RunState,
        emitter: &EventEmitter,
    ) -> Result<RouteDecision, AgentError> {
        if let Some(reason) = self.finish_reason(catalog, state) {
            state
                .conversation_history
                .push(Message::system(format!("[router] finish: {}", reason)));
            return Ok(RouteDecision::Finish { reason });
        }

        let first_unvisited = catalog
            .iter()
            .find(|s| state.visits(&s.key) == 0)
            .map(|s| s.key.clone())
            .ok_or_else(|| AgentError::Internal("router found no unvisited stage".to_string()))?;

        let messages = [
            Message::system(
                "You route a biomedical research workflow. Pick the next stage to run. Respond with JSON: {\"next\": \"<stage key>\", \"rationale\": \"<one sentence>\"}.",
            ),
            Message::user(self.build_prompt(catalog, state)),
        ];
        let reply = emitter
            .supervisor()
            .guard(self.llm.complete(&messages, self.temperature))
            .await?;

        let (choice, rationale, override_reason) = match reply {
            Ok(text) => {
                let parsed = parse_json_or(&text, |_| RouterReply {
                    next: String::new(),
                    rationale: String::new(),
                });
                let fallback_reason = parsed.reason().map(str::to_string);
                let reply = parsed.into_value();
                match (fallback_reason, catalog.find(&reply.next)) {
                    (Some(reason), _) => (first_unvisited.clone(), reply.rationale, Some(reason)),
                    (None, None) => (
                        first_unvisited.clone(),
                        reply.rationale,
                        Some(format!("unknown stage '{}'", reply.next)),
                    ),
                    (None, Some(stage)) if state.visits(&stage.key) > 0 => (
                        first_unvisited.clone(),
                        reply.rationale,
                        Some(format!("stage '{}' already visited", stage.key)),
                    ),
                    (None, Some(stage)) => (stage.key.clone(), reply.rationale, None),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "router call failed, using first unvisited stage");
                (first_unvisited.clone(), String::new(), Some(e.to_string()))
            }
        };

        let overridden = override_reason.is_some();
        if let Some(reason) = &override_reason {
            tracing::info!(chosen = %choice, reason = %reason, "router selection overridden");
        }
        let rationale = if rationale.trim().is_empty() {
            "미방문 단계를 우선순위대로 진행합니다.".to_string()
        } else {
            rationale.trim().to_string()
        };

        state.conversation_history.push(Message::system(format!(
            "[router] next={} rationale={}",
            choice, rationale
        )));
        emitter.reasoning_with(
            "router",
            format!("다음 단계: {}", choice),
            serde_json::json!({ "rationale": rationale, "overridden": overridden }),
        );
        Ok(RouteDecision::Stage {
            key: choice,
            rationale,
            overridden,
        })
    }

    fn build_prompt(&self, catalog: &StageCatalog, state: &RunState) -> String {
        let mut visited = Vec::new();
        let mut pending = Vec::new();
        for stage in catalog.iter() {
            let line = format!("- {} ({}): {}", stage.key, stage.title, stage.goal);
            if state.visits(&stage.key) > 0 {
                visited.push(line);
            } else {
                pending.push(line);
            }
        }
        let or_none = |lines: Vec<String>| {
            if lines.is_empty() {
                "None".to_string()
            } else {
                lines.join("\n")
            }
        };
        format!(
            "Question: {}\nVisited stages:\n{}\nPending stages:\n{}\nProgress notes:\n{}\nConversation so far:\n{}\nChoose one pending stage.",
            state.original_question,
            or_none(visited),
            or_none(pending),
            or_none(state.prompt_trace.clone()),
            state.conversation_history.transcript(self.history_window)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::workflow::stages::CompiledStage;

    fn catalog() -> StageCatalog {
        let stage = |key: &str| CompiledStage {
            key: key.into(),
            title: key.to_uppercase(),
            goal: "goal".into(),
            available_groups: vec![],
            missing_groups: vec![],
        };
        StageCatalog::from_stages(vec![stage("disease"), stage("target"), stage("structure")])
    }

    fn router(reply: &str) -> StageRouter {
        StageRouter::new(Arc::new(MockLlmClient::new().with_default(reply)), 8, 0.0)
    }

    #[tokio::test]
    async fn test_valid_choice_is_kept() {
        let mut state = RunState::new("q", vec![]);
        let (emitter, _rx) = EventEmitter::channel();
        let decision = router(r#"{"next": "target", "rationale": "targets first"}"#)
            .route(&catalog(), &mut state, &emitter)
            .await
            .unwrap();
        assert_eq!(
            decision,
            RouteDecision::Stage {
                key: "target".into(),
                rationale: "targets first".into(),
                overridden: false
            }
        );
        let last = state.conversation_history.messages().last().unwrap();
        assert!(last.content.contains("next=target"));
    }

    #[tokio::test]
    async fn test_revisit_is_overridden() {
        let mut state = RunState::new("q", vec![]);
        state.record_visit("disease");
        let (emitter, _rx) = EventEmitter::channel();
        let decision = router(r#"{"next": "DISEASE", "rationale": "again"}"#)
            .route(&catalog(), &mut state, &emitter)
            .await
            .unwrap();
        assert!(matches!(
            decision,
            RouteDecision::Stage { ref key, overridden: true, .. } if key == "target"
        ));
    }

    #[tokio::test]
    async fn test_garbage_falls_back_to_first_unvisited() {
        let mut state = RunState::new("q", vec![]);
        let (emitter, _rx) = EventEmitter::channel();
        let decision = router("no idea").route(&catalog(), &mut state, &emitter).await.unwrap();
        assert!(matches!(
            decision,
            RouteDecision::Stage { ref key, overridden: true, .. } if key == "disease"
        ));
    }

    #[tokio::test]
    async fn test_prompt_carries_compacted_progress() {
        let llm = Arc::new(MockLlmClient::new().with_default(r#"{"next": "target"}"#));
        let router = StageRouter::new(llm.clone(), 8, 0.0);
        let mut state = RunState::new("q", vec![]);
        state.record_visit("disease");
        state.prompt_trace = vec!["[Summary] disease stage found EGFR".into()];
        let (emitter, _rx) = EventEmitter::channel();

        router.route(&catalog(), &mut state, &emitter).await.unwrap();
        assert!(llm.calls()[0].contains("Progress notes:\n[Summary] disease stage found EGFR"));
    }

    #[tokio::test]
    async fn test_finish_on_budget_and_coverage() {
        let (emitter, _rx) = EventEmitter::channel();
        let r = router("{}");

        let mut state = RunState::new("q", vec![]);
        state.step_count = 8;
        assert!(matches!(
            r.route(&catalog(), &mut state, &emitter).await.unwrap(),
            RouteDecision::Finish { .. }
        ));

        let mut state = RunState::new("q", vec![]);
        for key in ["disease", "target", "structure"] {
            state.record_visit(key);
        }
        assert!(matches!(
            r.route(&catalog(), &mut state, &emitter).await.unwrap(),
            RouteDecision::Finish { .. }
        ));

        let state = RunState::new("q", vec![]);
        assert!(r.finish_reason(&StageCatalog::default(), &state).is_some());
    }
}
