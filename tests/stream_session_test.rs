//! 流式会话集成测试：事件信封、运行失败兜底与断开取消

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use biograph::agent::AgentRuntime;
use biograph::config::AppConfig;
use biograph::llm::MockLlmClient;
use biograph::stream::{EventKind, SessionFrame, StreamEvent, StreamSession};
use biograph::tools::{ProviderRegistry, StaticProvider, Tool, ToolError};
use serde_json::{json, Value};

async fn collect(mut session: StreamSession) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(frame) = session.next_frame().await {
        if let SessionFrame::Event(ev) = frame {
            events.push(ev);
        }
    }
    events
}

fn runtime(llm: MockLlmClient, registry: ProviderRegistry) -> AgentRuntime {
    let mut cfg = AppConfig::default();
    cfg.workflow.append_search_date = false;
    AgentRuntime::new(cfg, Arc::new(llm), registry)
}

#[tokio::test]
async fn test_envelope_order_for_direct_answer() {
    let rt = runtime(MockLlmClient::new().with_default("general"), ProviderRegistry::default());
    let events = collect(rt.ask("오늘 날씨 어때?", vec![], "chat-1")).await;

    let kinds: Vec<EventKind> = events.iter().map(|e| e.event).collect();
    assert_eq!(kinds.first(), Some(&EventKind::Token));
    assert_eq!(events[0].data, json!(""));
    let n = kinds.len();
    assert_eq!(
        &kinds[n - 3..],
        &[EventKind::DocumentReferences, EventKind::Metadata, EventKind::Result]
    );
    let metadata = &events[n - 2].data;
    assert_eq!(metadata["chat_id"], json!("chat-1"));
    assert_eq!(metadata["search_iterations"], json!(0));
    assert_eq!(events[n - 1].data["ok"], json!(true));

    let answer: String = events
        .iter()
        .filter(|e| e.event == EventKind::Token)
        .filter_map(|e| e.data.as_str())
        .collect();
    assert_eq!(answer, "general");
}

#[tokio::test]
async fn test_run_failure_emits_error_apology_and_result() {
    let llm = MockLlmClient::new()
        .with_default("general")
        .with_stream_error("connection reset");
    let rt = runtime(llm, ProviderRegistry::default());
    let events = collect(rt.ask("hello", vec![], "chat-2")).await;

    let errors: Vec<&StreamEvent> = events.iter().filter(|e| e.event == EventKind::Error).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].data.as_str().unwrap().contains("connection reset"));

    let apology = events
        .iter()
        .filter(|e| e.event == EventKind::Token)
        .filter_map(|e| e.data.as_str())
        .find(|t| t.contains("오류가 발생했습니다"));
    assert!(apology.is_some());

    let last = events.last().unwrap();
    assert!(last.is_terminal());
    assert_eq!(last.data["ok"], json!(false));
    assert!(events.iter().all(|e| e.event != EventKind::Metadata));
}

/// 长时间运行的工具：future 被丢弃时置位 dropped
struct SlowTool {
    dropped: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow_search"
    }

    fn description(&self) -> &str {
        "slow search"
    }

    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        let flag = DropFlag(self.dropped.clone());
        tokio::time::sleep(Duration::from_secs(30)).await;
        self.finished.store(true, Ordering::SeqCst);
        std::mem::forget(flag);
        Ok(json!({"hits": [1]}))
    }
}

#[tokio::test]
async fn test_disconnect_cancels_in_flight_run() {
    let dropped = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let provider = StaticProvider::new().with_tool(
        "PDB",
        SlowTool {
            dropped: dropped.clone(),
            finished: finished.clone(),
        },
    );
    let mut registry = ProviderRegistry::default();
    registry.register(Arc::new(provider));

    let llm = MockLlmClient::new()
        .with_rule("Classify the user question", "professional")
        .with_rule(
            "Stage: ",
            r#"{"action": "call_tool", "tool_name": "slow_search", "arguments": {"query": "EGFR"}}"#,
        );
    let mut cfg = AppConfig::default();
    cfg.workflow.append_search_date = false;
    let rt = AgentRuntime {
        orchestrator: Arc::new(
            biograph::Orchestrator::new(Arc::new(llm), Arc::new(registry), &cfg).with_stages(vec![
                biograph::workflow::StageDefinition::new("structure", "StructureAgent", "3D.", &["PDB"]),
            ]),
        ),
        llm: Arc::new(MockLlmClient::new()),
        config: cfg,
    };

    let mut session = rt.ask("EGFR protein structure", vec![], "chat-3");
    loop {
        match session.next_frame().await {
            Some(SessionFrame::Event(ev))
                if ev.event == EventKind::ToolUse && ev.data["status"] == json!("started") =>
            {
                break
            }
            Some(_) => continue,
            None => panic!("stream ended before the tool started"),
        }
    }
    drop(session);

    for _ in 0..50 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(dropped.load(Ordering::SeqCst));
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_explicit_cancel_still_delivers_terminal() {
    let rt = runtime(MockLlmClient::new().with_default("general"), ProviderRegistry::default());
    let session = rt.ask("hello", vec![], "chat-4");
    session.cancel();
    let events = collect(session).await;
    assert!(events.last().map(|e| e.is_terminal()).unwrap_or(false));
    assert!(events.iter().all(|e| e.event != EventKind::Error));
}
