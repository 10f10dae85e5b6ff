//! 编排图集成测试：Mock LLM + 进程内工具提供方

use std::sync::Arc;

use biograph::config::AppConfig;
use biograph::llm::MockLlmClient;
use biograph::stream::{EventEmitter, EventKind, StreamEvent};
use biograph::tools::{FnTool, ProviderRegistry, StaticProvider};
use biograph::workflow::{Node, Orchestrator, StageDefinition, StageStatus};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.workflow.append_search_date = false;
    cfg
}

fn registry(provider: StaticProvider) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::default();
    registry.register(Arc::new(provider));
    Arc::new(registry)
}

fn drain(rx: &mut UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn data_tool(name: &str, description: &str) -> FnTool {
    let name_owned = name.to_string();
    FnTool::new(name, description, move |args| {
        Ok(json!({"tool": name_owned, "hits": [{"query": args["query"]}]}))
    })
}

#[tokio::test]
async fn test_weather_question_answers_directly() {
    let llm = Arc::new(MockLlmClient::new().with_default("general"));
    let orchestrator = Orchestrator::new(llm, registry(StaticProvider::new()), &config());
    let (emitter, mut rx) = EventEmitter::channel();

    let report = orchestrator.run("오늘 날씨 어때?", vec![], &emitter).await.unwrap();

    assert_eq!(report.path, vec![Node::Router, Node::Classify, Node::DirectAnswer]);
    assert_eq!(report.path.iter().filter(|n| n.is_terminal()).count(), 1);
    assert!(report.state.stage_trace.is_empty());
    assert!(report.state.stage_visit_counts.is_empty());
    assert_eq!(report.state.final_answer(), Some("general"));
    let events = drain(&mut rx);
    assert!(events.iter().all(|e| e.event != EventKind::ToolUse));
}

#[tokio::test]
async fn test_keyword_forces_pipeline_over_llm_verdict() {
    let llm = Arc::new(
        MockLlmClient::new()
            .with_rule("Classify the user question", "일반")
            .with_default("보고서"),
    );
    let orchestrator = Orchestrator::new(llm, registry(StaticProvider::new()), &config())
        .with_stages(vec![StageDefinition::new("structure", "StructureAgent", "3D structure.", &["PDB"])]);
    let (emitter, _rx) = EventEmitter::channel();

    let report = orchestrator.run("EGFR 단백질 구조", vec![], &emitter).await.unwrap();

    assert_eq!(report.path[2], Node::ClassifyMcp);
    assert!(!report.path.contains(&Node::DirectAnswer));
    assert_eq!(*report.path.last().unwrap(), Node::FinalAnswer);
    assert!(report.path[..report.path.len() - 1].iter().all(|n| !n.is_terminal()));
}

#[tokio::test]
async fn test_stage_without_tools_is_skipped() {
    let llm = Arc::new(
        MockLlmClient::new()
            .with_rule("Classify the user question", "professional")
            .with_default("답변"),
    );
    let provider = StaticProvider::new()
        .with_tool("Reactome", data_tool("pathway_search", "pathway search"))
        .with_failing_group("KEGG", "connection refused");
    let orchestrator = Orchestrator::new(llm, registry(provider), &config()).with_stages(vec![
        StageDefinition::new("missing", "MissingAgent", "No groups registered.", &["Nowhere"]),
        StageDefinition::new("failing", "FailingAgent", "Discovery fails.", &["KEGG"]),
    ]);
    let (emitter, _rx) = EventEmitter::channel();

    let report = orchestrator.run("pathway of EGFR", vec![], &emitter).await.unwrap();

    let statuses: Vec<StageStatus> = report.state.stage_trace.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![StageStatus::Skipped, StageStatus::Skipped]);
    assert!(!report.state.stage_results.has_any());
    assert_eq!(report.state.visits("missing"), 1);
    assert_eq!(report.state.visits("failing"), 1);
    assert_eq!(report.state.final_answer(), Some("답변"));
}

#[tokio::test]
async fn test_partially_missing_groups_are_noted() {
    let llm = Arc::new(
        MockLlmClient::new()
            .with_rule("Classify the user question", "professional")
            .with_default("답변"),
    );
    let provider =
        StaticProvider::new().with_tool("PDB", data_tool("structure_lookup", "protein structure lookup"));
    let orchestrator = Orchestrator::new(llm, registry(provider), &config()).with_stages(vec![
        StageDefinition::new("structure", "StructureAgent", "3D structure.", &["PDB", "Nowhere"]),
    ]);
    let (emitter, _rx) = EventEmitter::channel();

    let report = orchestrator.run("EGFR protein structure", vec![], &emitter).await.unwrap();

    let trace = &report.state.stage_trace[0];
    assert!(trace.notes.starts_with("Missing provider groups: Nowhere"));
    assert_eq!(trace.status, StageStatus::Completed);
    assert!(report.state.stage_results.get("StructureAgent").is_some());
}

#[tokio::test]
async fn test_tool_cap_then_fallback_recovers_results() {
    let llm = Arc::new(
        MockLlmClient::new()
            .with_rule("Classify the user question", "professional")
            .with_rule("You route", r#"{"next": "structure", "rationale": "structure first"}"#)
            .with_rule(
                "Stage: StructureAgent",
                r#"{"action": "call_tool", "tool_name": "empty_search", "arguments": {"query": "EGFR"}}"#,
            )
            .with_rule("세부 데이터", "구조 보고서"),
    );
    let empty = FnTool::new("empty_search", "generic search", |_| Ok(json!({"hits": []})));
    let provider = StaticProvider::new()
        .with_tool("PDB", empty)
        .with_tool("PDB", data_tool("structure_lookup", "protein structure lookup"));
    let orchestrator = Orchestrator::new(llm, registry(provider), &config())
        .with_stages(vec![StageDefinition::new("structure", "StructureAgent", "3D structure.", &["PDB"])]);
    let (emitter, mut rx) = EventEmitter::channel();

    let report = orchestrator.run("EGFR protein structure", vec![], &emitter).await.unwrap();

    let trace = &report.state.stage_trace[0];
    assert_eq!(trace.status, StageStatus::Completed);
    assert!(trace.notes.contains("Tool call budget reached (3 calls)"));
    assert!(trace.notes.contains("[Fallback] PDB:structure_lookup"));
    assert_eq!(trace.tools.iter().filter(|t| *t == "PDB:empty_search").count(), 3);
    assert!(trace.tools.contains(&"PDB:structure_lookup".to_string()));

    let outputs = report.state.stage_results.get("StructureAgent").unwrap();
    assert_eq!(outputs.labels(), vec!["PDB:structure_lookup"]);
    assert_eq!(report.state.final_answer(), Some("구조 보고서"));

    let empty_events = drain(&mut rx)
        .into_iter()
        .filter(|e| e.event == EventKind::ToolUse && e.data["status"] == json!("empty"))
        .count();
    assert_eq!(empty_events, 3);
}

#[tokio::test]
async fn test_router_never_revisits_and_terminates() {
    let llm = Arc::new(
        MockLlmClient::new()
            .with_rule("Classify the user question", "professional")
            .with_rule("You route", r#"{"next": "a", "rationale": "always a"}"#)
            .with_sequence(
                "Stage: ",
                vec![
                    r#"{"action": "call_tool", "tool_name": "lookup", "arguments": {"query": "x"}}"#.into(),
                    r#"{"action": "finish", "summary": "done"}"#.into(),
                ],
            )
            .with_default("final"),
    );
    let provider = StaticProvider::new().with_tool("G", data_tool("lookup", "lookup"));
    let stages = vec![
        StageDefinition::new("a", "A", "first", &["G"]),
        StageDefinition::new("b", "B", "second", &["G"]),
        StageDefinition::new("c", "C", "third", &["G"]),
    ];
    let orchestrator = Orchestrator::new(llm, registry(provider), &config()).with_stages(stages);
    let (emitter, _rx) = EventEmitter::channel();

    let report = orchestrator.run("drug target discovery", vec![], &emitter).await.unwrap();

    assert_eq!(report.visited_stages(), vec!["A", "B", "C"]);
    for key in ["a", "b", "c"] {
        assert_eq!(report.state.visits(key), 1);
    }
    assert_eq!(report.state.step_count, 3);
    assert_eq!(*report.path.last().unwrap(), Node::FinalAnswer);
    let loops = report.path.iter().filter(|n| **n == Node::McpExecution).count();
    assert_eq!(loops, 3);
}

#[tokio::test]
async fn test_iteration_budget_bounds_the_loop() {
    let llm = Arc::new(
        MockLlmClient::new()
            .with_rule("Classify the user question", "professional")
            .with_default("{}"),
    );
    let provider = StaticProvider::new().with_tool("G", data_tool("lookup", "lookup"));
    let stages = ["a", "b", "c", "d"]
        .iter()
        .map(|k| StageDefinition::new(k, &k.to_uppercase(), "goal", &["G"]))
        .collect();
    let mut cfg = config();
    cfg.workflow.max_iterations = 2;
    let orchestrator = Orchestrator::new(llm, registry(provider), &cfg).with_stages(stages);
    let (emitter, _rx) = EventEmitter::channel();

    let report = orchestrator.run("drug", vec![], &emitter).await.unwrap();

    assert_eq!(report.state.step_count, 2);
    assert_eq!(report.visited_stages(), vec!["A", "B"]);
    assert_eq!(report.state.visits("c"), 0);
    assert_eq!(*report.path.last().unwrap(), Node::FinalAnswer);
}

#[tokio::test]
async fn test_first_tool_output_is_stored_as_list() {
    let llm = Arc::new(
        MockLlmClient::new()
            .with_rule("Classify the user question", "professional")
            .with_sequence(
                "Stage: ",
                vec![
                    r#"{"action": "call_tool", "tool_name": "lookup", "arguments": {"query": "x"}}"#.into(),
                    r#"{"action": "finish", "summary": "done"}"#.into(),
                ],
            )
            .with_default("final"),
    );
    let provider = StaticProvider::new().with_tool("G", data_tool("lookup", "lookup"));
    let orchestrator = Orchestrator::new(llm, registry(provider), &config())
        .with_stages(vec![StageDefinition::new("a", "A", "first", &["G"])]);
    let (emitter, _rx) = EventEmitter::channel();

    let report = orchestrator.run("drug", vec![], &emitter).await.unwrap();

    let values = report.state.stage_results.get("A").unwrap().get("G:lookup").unwrap();
    assert_eq!(values.len(), 1);
    let as_json: Value = serde_json::to_value(values).unwrap();
    assert!(as_json.is_array());
}

#[tokio::test]
async fn test_final_report_sees_compacted_trace() {
    let raw_note = format!("RAWNOTE {}", "x".repeat(400));
    let finish = json!({"action": "finish", "summary": raw_note}).to_string();
    let call = r#"{"action": "call_tool", "tool_name": "search", "arguments": {"query": "EGFR"}}"#.to_string();
    let llm = Arc::new(
        MockLlmClient::new()
            .with_rule("Classify the user question", "professional")
            .with_rule("Summarize the research progress", "COMPACTED progress")
            .with_sequence("Stage: DiseaseAgent", vec![call.clone(), finish.clone()])
            .with_sequence("Stage: TargetAgent", vec![call, finish])
            .with_rule("세부 데이터", "보고서"),
    );
    let mut cfg = config();
    cfg.workflow.compact_threshold_chars = 200;
    let provider = StaticProvider::new().with_tool("PDB", data_tool("search", "generic search"));
    let orchestrator = Orchestrator::new(llm.clone(), registry(provider), &cfg).with_stages(vec![
        StageDefinition::new("disease", "DiseaseAgent", "Disease context.", &["PDB"]),
        StageDefinition::new("target", "TargetAgent", "Target discovery.", &["PDB"]),
    ]);
    let (emitter, _rx) = EventEmitter::channel();

    let report = orchestrator.run("EGFR disease targets", vec![], &emitter).await.unwrap();

    assert_eq!(report.path.iter().filter(|n| **n == Node::Summary).count(), 2);
    assert_eq!(report.state.final_answer(), Some("보고서"));
    assert!(report.state.stage_trace.iter().all(|e| e.notes.contains("RAWNOTE")));

    let calls = llm.calls();
    let final_prompt = calls.iter().find(|c| c.contains("세부 데이터")).unwrap();
    assert!(final_prompt.contains("[Summary] COMPACTED progress"));
    assert!(!final_prompt.contains("RAWNOTE"));
}
