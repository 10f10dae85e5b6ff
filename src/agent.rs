//! Headless 运行时
//!
//! 供 CLI 与 HTTP 前端调用：create_runtime 按配置构建 LLM、工具注册表与编排器；
//! run_question_stream 把一次运行包装为 StreamSession，负责事件信封与失败兜底。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::{load_config, AppConfig, StreamSection};
use crate::core::AgentError;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::Message;
use crate::stream::{EventEmitter, EventKind, StreamSession};
use crate::tools::{HttpMcpProvider, ProviderRegistry};
use crate::workflow::{Orchestrator, RunReport, DEFAULT_SYSTEM_PROMPT};

/// 文档引用正文截取长度
const REFERENCE_SNIPPET_CHARS: usize = 240;

/// 按配置选择 LLM 后端；openai 缺少 API Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM");
        return Arc::new(MockLlmClient::new());
    }
    let api_key = cfg
        .llm
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    match api_key {
        Some(key) => {
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&key),
                cfg.llm.timeouts.request,
            ))
        }
        None => {
            tracing::warn!("No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 按 [[providers]] 构建工具注册表
pub fn build_registry(cfg: &AppConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new(Duration::from_secs(cfg.tools.discovery_timeout_secs));
    let provider = HttpMcpProvider::from_config(&cfg.providers);
    if !provider.is_empty() {
        registry.register(Arc::new(provider));
    }
    registry
}

/// 读取 system prompt 文件；缺失或读取失败时用内置文案
pub fn load_system_prompt(cfg: &AppConfig) -> String {
    let candidates: Vec<PathBuf> = match &cfg.app.system_prompt_path {
        Some(p) => vec![p.clone()],
        None => vec![
            PathBuf::from("config/prompts/system.txt"),
            PathBuf::from("../config/prompts/system.txt"),
        ],
    };
    candidates
        .iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// 进程级运行时：多个运行共享编排器与注册表缓存
#[derive(Clone)]
pub struct AgentRuntime {
    pub config: AppConfig,
    pub llm: Arc<dyn LlmClient>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AgentRuntime {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>, registry: ProviderRegistry) -> Self {
        let orchestrator = Orchestrator::new(llm.clone(), Arc::new(registry), &config)
            .with_system_prompt(load_system_prompt(&config));
        Self {
            config,
            llm,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// 启动一次流式运行
    pub fn ask(&self, question: impl Into<String>, history: Vec<Message>, chat_id: impl Into<String>) -> StreamSession {
        run_question_stream(
            self.orchestrator.clone(),
            self.llm.clone(),
            question.into(),
            history,
            chat_id.into(),
            &self.config.stream,
        )
    }
}

/// 加载配置并构建运行时
pub fn create_runtime(config_path: Option<PathBuf>) -> anyhow::Result<AgentRuntime> {
    let config = load_config(config_path)?;
    let llm = create_llm_from_config(&config);
    let registry = build_registry(&config);
    Ok(AgentRuntime::new(config, llm, registry))
}

/// 把一次运行包装为事件流
///
/// 顺序：空 token → 图内事件 → document_references → metadata → result。
/// 运行失败（取消除外）时发送 error 与致歉 token，终止标记照常送达。
pub fn run_question_stream(
    orchestrator: Arc<Orchestrator>,
    llm: Arc<dyn LlmClient>,
    question: String,
    history: Vec<Message>,
    chat_id: String,
    stream_cfg: &StreamSection,
) -> StreamSession {
    let heartbeat = Duration::from_secs(stream_cfg.heartbeat_secs.max(1));
    let apology_prefix = stream_cfg.apology_prefix.clone();
    StreamSession::spawn(heartbeat, move |emitter| async move {
        let usage_before = llm.token_usage();
        emitter.token("");
        let outcome = orchestrator.run(&question, history, &emitter).await;
        let (ok, iterations) = match outcome {
            Ok(report) => {
                emit_envelope(&emitter, &report, &chat_id);
                (true, report.state.step_count)
            }
            Err(AgentError::Cancelled) => {
                tracing::info!(chat_id = %chat_id, "run cancelled by consumer");
                (false, 0)
            }
            Err(e) => {
                tracing::error!(chat_id = %chat_id, error = %e, "run failed");
                emitter.error(e.to_string());
                emitter.token(format!("{}{}", apology_prefix, e));
                (false, 0)
            }
        };
        usage_summary(&chat_id, ok, iterations, usage_before, llm.token_usage())
    })
}

fn emit_envelope(emitter: &EventEmitter, report: &RunReport, chat_id: &str) {
    let documents: Vec<Value> = report
        .state
        .document_results
        .iter()
        .filter_map(|d| serde_json::to_value(d.to_reference(REFERENCE_SNIPPET_CHARS)).ok())
        .collect();
    emitter.emit(EventKind::DocumentReferences, json!({ "documents": documents }));
    emitter.emit(
        EventKind::Metadata,
        json!({
            "chat_id": chat_id,
            "search_iterations": report.state.step_count,
            "stage_trace": report.state.stage_trace,
            "visited_stages": report.visited_stages(),
            "path": report.path,
        }),
    );
}

fn usage_summary(chat_id: &str, ok: bool, iterations: usize, before: (u64, u64, u64), after: (u64, u64, u64)) -> Value {
    json!({
        "chat_id": chat_id,
        "ok": ok,
        "search_iterations": iterations,
        "usage": {
            "prompt_tokens": after.0.saturating_sub(before.0),
            "completion_tokens": after.1.saturating_sub(before.1),
            "total_tokens": after.2.saturating_sub(before.2),
        }
    })
}
