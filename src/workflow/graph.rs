//! 编排图：显式状态机驱动一次运行
//!
//! router → classify → {direct_answer | classify_mcp}；
//! classify_mcp → {search_query | mcp_execution} → history_check → [summary] → increment_step → classify_mcp ...；
//! search_query → vector_search → final_answer。direct_answer 与 final_answer 为终止节点。
//! step_count 每轮严格递增并与 max_iterations 比较，循环必然终止。

use std::sync::Arc;

use serde::Serialize;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::stream::EventEmitter;
use crate::tools::{ProviderRegistry, ToolInvoker};
use crate::workflow::classifier::{QuestionClassifier, QuestionKind};
use crate::workflow::compactor::HistoryCompactor;
use crate::workflow::fallback::FallbackExecutor;
use crate::workflow::format::{append_search_date, today};
use crate::workflow::retrieval::{DocumentSearch, NoDocumentSearch};
use crate::workflow::router::{RouteDecision, StageRouter};
use crate::workflow::stage_agent::StageAgent;
use crate::workflow::stages::{default_stages, CompiledStage, StageCatalog, StageDefinition};
use crate::workflow::state::{RunState, StageStatus, StageTraceEntry};
use crate::workflow::synthesis::{Synthesizer, DEFAULT_SYSTEM_PROMPT};

/// 图节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Router,
    Classify,
    DirectAnswer,
    ClassifyMcp,
    McpExecution,
    HistoryCheck,
    Summary,
    IncrementStep,
    SearchQuery,
    VectorSearch,
    FinalAnswer,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Router => "router",
            Node::Classify => "classify",
            Node::DirectAnswer => "direct_answer",
            Node::ClassifyMcp => "classify_mcp",
            Node::McpExecution => "mcp_execution",
            Node::HistoryCheck => "history_check",
            Node::Summary => "summary",
            Node::IncrementStep => "increment_step",
            Node::SearchQuery => "search_query",
            Node::VectorSearch => "vector_search",
            Node::FinalAnswer => "final_answer",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Node::DirectAnswer | Node::FinalAnswer)
    }
}

/// 一次运行的产出：最终状态与经过的节点路径
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub path: Vec<Node>,
}

impl RunReport {
    pub fn visited_stages(&self) -> Vec<String> {
        self.state
            .stage_trace
            .iter()
            .map(|e| e.stage.clone())
            .collect()
    }
}

/// 编排器：进程内构建一次，多个运行并发共享
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    catalog: StageCatalog,
    classifier: QuestionClassifier,
    router: StageRouter,
    stage_agent: StageAgent,
    fallback: FallbackExecutor,
    compactor: HistoryCompactor,
    synthesizer: Synthesizer,
    documents: Arc<dyn DocumentSearch>,
    max_iterations: usize,
    append_search_date: bool,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ProviderRegistry>, config: &AppConfig) -> Self {
        let wf = &config.workflow;
        let decision_t = config.llm.decision_temperature;
        let invoker = ToolInvoker::new(config.tools.tool_timeout_secs);
        let catalog = StageCatalog::compile(default_stages(), &registry);
        tracing::info!(stages = catalog.len(), groups = ?registry.available_groups(), "orchestrator ready");
        Self {
            catalog,
            classifier: QuestionClassifier::new(
                llm.clone(),
                wf.classifier_keywords.clone(),
                wf.classifier_fuzzy_threshold,
                decision_t,
            ),
            router: StageRouter::new(llm.clone(), wf.max_iterations, decision_t),
            stage_agent: StageAgent::new(llm.clone(), invoker.clone(), wf, decision_t),
            fallback: FallbackExecutor::new(
                invoker,
                wf.fallback_tool_limit,
                wf.fuzzy_relevance_floor,
                wf.scratch_result_max_chars,
            ),
            compactor: HistoryCompactor::new(
                llm.clone(),
                wf.compact_threshold_chars,
                wf.compact_window_chars,
                wf.compact_summary_words,
                decision_t,
            ),
            synthesizer: Synthesizer::new(
                llm,
                DEFAULT_SYSTEM_PROMPT,
                config.llm.answer_temperature,
                wf.tool_result_max_chars,
            ),
            registry,
            documents: Arc::new(NoDocumentSearch),
            max_iterations: wf.max_iterations,
            append_search_date: wf.append_search_date,
        }
    }

    /// 替换阶段表（按给定顺序决定优先级）
    pub fn with_stages(mut self, definitions: Vec<StageDefinition>) -> Self {
        self.catalog = StageCatalog::compile(definitions, &self.registry);
        self
    }

    pub fn with_document_search(mut self, documents: Arc<dyn DocumentSearch>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.synthesizer = self.synthesizer.with_system_prompt(prompt);
        self
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// 执行一次完整运行；只有取消与 LLM 流式失败会以 Err 返回
    pub async fn run(
        &self,
        question: &str,
        history: Vec<Message>,
        emitter: &EventEmitter,
    ) -> Result<RunReport, AgentError> {
        let mut state = RunState::new(question, history);
        let mut path = Vec::new();
        let mut node = Node::Router;

        loop {
            emitter.supervisor().checkpoint()?;
            path.push(node);
            tracing::debug!(node = node.as_str(), step = state.step_count, "enter node");
            let next = match node {
                Node::Router => {
                    self.enter(&mut state, emitter);
                    Node::Classify
                }
                Node::Classify => {
                    let classification = self.classifier.classify(question, emitter).await?;
                    emitter.reasoning_with(
                        "classify",
                        match classification.kind {
                            QuestionKind::Domain => "전문 질문으로 분류되어 MCP 워크플로우를 진행합니다.",
                            QuestionKind::General => "일반 질문으로 분류되어 바로 답변합니다.",
                        },
                        serde_json::json!({
                            "kind": classification.kind,
                            "keyword": classification.keyword_hit.as_ref().map(|h| h.keyword.clone()),
                        }),
                    );
                    match classification.kind {
                        QuestionKind::Domain => Node::ClassifyMcp,
                        QuestionKind::General => Node::DirectAnswer,
                    }
                }
                Node::DirectAnswer => {
                    self.synthesizer.direct_answer(&mut state, emitter).await?;
                    node
                }
                Node::ClassifyMcp => match self.router.route(&self.catalog, &mut state, emitter).await? {
                    RouteDecision::Stage { key, .. } => {
                        state.set_next_stage(key);
                        Node::McpExecution
                    }
                    RouteDecision::Finish { reason } => {
                        tracing::info!(reason = %reason, "stage loop finished");
                        Node::SearchQuery
                    }
                },
                Node::McpExecution => {
                    match state.take_next_stage().and_then(|k| self.catalog.get(&k).cloned()) {
                        Some(stage) => self.execute_stage(&stage, &mut state, emitter).await?,
                        None => tracing::warn!("mcp_execution entered without a selected stage"),
                    }
                    Node::HistoryCheck
                }
                Node::HistoryCheck => {
                    if self.compactor.needs_compaction(&state) {
                        Node::Summary
                    } else {
                        Node::IncrementStep
                    }
                }
                Node::Summary => {
                    self.compactor.compact(&mut state, emitter).await?;
                    Node::IncrementStep
                }
                Node::IncrementStep => {
                    state.step_count += 1;
                    if state.step_count >= self.max_iterations {
                        Node::SearchQuery
                    } else {
                        Node::ClassifyMcp
                    }
                }
                Node::SearchQuery => {
                    emitter.reasoning_with(
                        "search_query",
                        "문서 검색 쿼리를 준비합니다.",
                        serde_json::json!({ "query": state.query() }),
                    );
                    Node::VectorSearch
                }
                Node::VectorSearch => {
                    let query = state.query().to_string();
                    match emitter.supervisor().guard(self.documents.search(&query)).await? {
                        Ok(docs) => state.document_results = docs,
                        Err(e) => tracing::warn!(error = %e, "document search failed"),
                    }
                    Node::FinalAnswer
                }
                Node::FinalAnswer => {
                    self.synthesizer
                        .final_answer(&self.catalog, &mut state, emitter)
                        .await?;
                    node
                }
            };
            if node.is_terminal() {
                break;
            }
            node = next;
        }

        tracing::info!(
            path = ?path.iter().map(Node::as_str).collect::<Vec<_>>(),
            steps = state.step_count,
            "run finished"
        );
        Ok(RunReport { state, path })
    }

    fn enter(&self, state: &mut RunState, emitter: &EventEmitter) {
        if self.append_search_date {
            state.stage_query = Some(append_search_date(&state.original_question, &today()));
        }
        emitter.reasoning_with(
            "router",
            "질문을 바이오/신약개발 MCP 워크플로우 단계로 라우팅합니다.",
            serde_json::json!({ "pipeline": self.catalog.titles() }),
        );
    }

    async fn execute_stage(
        &self,
        stage: &CompiledStage,
        state: &mut RunState,
        emitter: &EventEmitter,
    ) -> Result<(), AgentError> {
        state.record_visit(&stage.key);
        emitter.reasoning_with(
            &stage.key,
            format!("{} 단계 시작: {}", stage.title, stage.goal),
            serde_json::json!({ "node": stage.key }),
        );

        let tools = if stage.available_groups.is_empty() {
            Vec::new()
        } else {
            emitter
                .supervisor()
                .guard(self.registry.resolve(&stage.available_groups))
                .await?
        };
        if tools.is_empty() {
            let notes = if stage.available_groups.is_empty() {
                format!("No registered tool groups (missing: {}).", stage.missing_groups.join(", "))
            } else {
                "Tool discovery returned no tools.".to_string()
            };
            tracing::info!(stage = %stage.key, "stage skipped, no tools");
            emitter.reasoning_with(
                &stage.key,
                format!("{} 단계를 건너뜁니다. 사용할 수 있는 툴이 없습니다.", stage.title),
                serde_json::json!({ "status": StageStatus::Skipped }),
            );
            self.record_trace(state, stage, Vec::new(), StageStatus::Skipped, notes);
            return Ok(());
        }

        let query = state.query().to_string();
        let mut outcome = self.stage_agent.run(stage, &query, &tools, emitter).await?;

        if outcome.results.is_empty() {
            tracing::info!(
                stage = %stage.key,
                calls = outcome.tool_calls,
                budget_reached = outcome.budget_reached,
                "stage produced no results, running fallback"
            );
            let fb = self.fallback.run(stage, &query, &tools, emitter).await?;
            outcome.results.merge(fb.results);
            outcome.used_tools.extend(fb.used_tools);
            if !fb.notes.is_empty() {
                outcome.notes = format!("{}\n{}", outcome.notes, fb.notes.join("\n"));
            }
            outcome.refresh_status(&stage.title);
        }

        if !stage.missing_groups.is_empty() {
            outcome.notes = format!(
                "Missing provider groups: {}\n{}",
                stage.missing_groups.join(", "),
                outcome.notes
            );
        }
        emitter.reasoning_with(
            &stage.key,
            outcome.message.clone(),
            serde_json::json!({ "status": outcome.status, "tools": outcome.used_tools }),
        );
        if !outcome.results.is_empty() {
            state.stage_results.merge(&stage.title, outcome.results);
        }
        self.record_trace(state, stage, outcome.used_tools, outcome.status, outcome.notes);
        Ok(())
    }

    fn record_trace(
        &self,
        state: &mut RunState,
        stage: &CompiledStage,
        tools: Vec<String>,
        status: StageStatus,
        notes: String,
    ) {
        state
            .prompt_trace
            .push(format!("[{}] ({:?}) {}", stage.title, status, notes));
        state.stage_trace.push(StageTraceEntry {
            stage: stage.title.clone(),
            goal: stage.goal.clone(),
            tools,
            status,
            notes,
        });
    }
}
