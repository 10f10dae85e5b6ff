//! 运行状态
//!
//! RunState 每个问题创建一次，由编排图独占并逐节点修改。stage_results 只追加合并，
//! 同一工具标签的输出总是列表；final_answer 只写一次。

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::memory::{ConversationLog, Message};
use crate::workflow::retrieval::DocumentSnippet;

/// 阶段状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Completed,
    Skipped,
}

/// stage_trace 中的一条审计记录
#[derive(Debug, Clone, Serialize)]
pub struct StageTraceEntry {
    /// 阶段标题
    pub stage: String,
    pub goal: String,
    pub tools: Vec<String>,
    pub status: StageStatus,
    pub notes: String,
}

/// 单个阶段的工具输出：工具标签 → 输出列表（保持首次出现顺序）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolOutputs {
    entries: Vec<(String, Vec<Value>)>,
}

impl ToolOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条输出；首次出现的标签也以列表形式保存
    pub fn push(&mut self, label: &str, value: Value) {
        match self.entries.iter_mut().find(|(l, _)| l == label) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((label.to_string(), vec![value])),
        }
    }

    pub fn merge(&mut self, other: ToolOutputs) {
        for (label, values) in other.entries {
            for v in values {
                self.push(&label, v);
            }
        }
    }

    pub fn get(&self, label: &str) -> Option<&[Value]> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_slice())
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 全部阶段的结果：阶段标题 → ToolOutputs
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageResults {
    stages: Vec<(String, ToolOutputs)>,
}

impl StageResults {
    /// 合并某阶段的输出（不覆盖已有内容）
    pub fn merge(&mut self, title: &str, outputs: ToolOutputs) {
        match self.stages.iter_mut().find(|(t, _)| t == title) {
            Some((_, existing)) => existing.merge(outputs),
            None => self.stages.push((title.to_string(), outputs)),
        }
    }

    pub fn get(&self, title: &str) -> Option<&ToolOutputs> {
        self.stages.iter().find(|(t, _)| t == title).map(|(_, o)| o)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolOutputs)> {
        self.stages.iter().map(|(t, o)| (t.as_str(), o))
    }

    /// 是否至少有一个阶段产出了结果
    pub fn has_any(&self) -> bool {
        self.stages.iter().any(|(_, o)| !o.is_empty())
    }
}

/// 一次运行的共享状态
#[derive(Debug, Clone)]
pub struct RunState {
    pub original_question: String,
    pub conversation_history: ConversationLog,
    pub stage_results: StageResults,
    pub stage_trace: Vec<StageTraceEntry>,
    pub stage_visit_counts: HashMap<String, u32>,
    pub step_count: usize,
    pub document_results: Vec<DocumentSnippet>,
    /// 供 LLM 提示使用的自由文本轨迹（压缩只作用于此）
    pub(crate) prompt_trace: Vec<String>,
    /// 阶段执行使用的查询（可能附带检索日期）
    pub(crate) stage_query: Option<String>,
    next_stage_choice: Option<String>,
    final_answer: Option<String>,
}

impl RunState {
    pub fn new(question: impl Into<String>, history: Vec<Message>) -> Self {
        let question = question.into();
        let mut conversation_history = ConversationLog::from_messages(history);
        conversation_history.push(Message::user(question.clone()));
        Self {
            original_question: question,
            conversation_history,
            stage_results: StageResults::default(),
            stage_trace: Vec::new(),
            stage_visit_counts: HashMap::new(),
            step_count: 0,
            document_results: Vec::new(),
            prompt_trace: Vec::new(),
            stage_query: None,
            next_stage_choice: None,
            final_answer: None,
        }
    }

    pub fn visits(&self, stage_key: &str) -> u32 {
        self.stage_visit_counts.get(stage_key).copied().unwrap_or(0)
    }

    /// 阶段执行一次，计数加一
    pub(crate) fn record_visit(&mut self, stage_key: &str) {
        *self
            .stage_visit_counts
            .entry(stage_key.to_string())
            .or_insert(0) += 1;
    }

    pub(crate) fn set_next_stage(&mut self, stage_key: impl Into<String>) {
        self.next_stage_choice = Some(stage_key.into());
    }

    pub(crate) fn take_next_stage(&mut self) -> Option<String> {
        self.next_stage_choice.take()
    }

    /// 写入最终答案；已写入时忽略后续写入并返回 false
    pub(crate) fn set_final_answer(&mut self, answer: impl Into<String>) -> bool {
        if self.final_answer.is_some() {
            tracing::warn!("final answer already set, ignoring second write");
            return false;
        }
        self.final_answer = Some(answer.into());
        true
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    /// 当前用于压缩判断的轨迹文本
    pub fn trace_text(&self) -> String {
        self.prompt_trace.join("\n")
    }

    pub fn query(&self) -> &str {
        self.stage_query.as_deref().unwrap_or(&self.original_question)
    }
}
