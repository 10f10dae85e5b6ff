//! 问题分类器：领域问题（走阶段流水线）或一般问题（直接回答）
//!
//! 两路信号取 OR：LLM 判定 professional / general；关键词字面包含或 partial ratio 达到阈值时强制判为领域问题。

use std::sync::Arc;

use serde::Serialize;

use crate::core::{AgentError, ParseOutcome};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::stream::EventEmitter;
use crate::workflow::fuzzy::partial_ratio;

/// 问题类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Domain,
    General,
}

/// 关键词命中
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub keyword: String,
    pub score: u8,
    pub literal: bool,
}

/// 分类结果
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: QuestionKind,
    /// LLM 判定（解析失败时为 Fallback(General)）
    pub llm_verdict: ParseOutcome<QuestionKind>,
    pub keyword_hit: Option<KeywordHit>,
}

const FEW_SHOT: &str = "Examples:\n\
Q: EGFR 억제제의 결합 부위를 알려줘 -> professional\n\
Q: What are the clinical trials for pembrolizumab? -> professional\n\
Q: 오늘 점심 뭐 먹을까? -> general\n\
Q: Write a haiku about autumn -> general";

pub struct QuestionClassifier {
    llm: Arc<dyn LlmClient>,
    keywords: Vec<String>,
    threshold: u8,
    temperature: f32,
}

impl QuestionClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, keywords: Vec<String>, threshold: u8, temperature: f32) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| {
                let keep = k.chars().count() >= 2;
                if !keep && !k.is_empty() {
                    tracing::warn!(keyword = %k, "ignoring single-character classifier keyword");
                }
                keep
            })
            .collect();
        Self {
            llm,
            keywords,
            threshold,
            temperature,
        }
    }

    /// 关键词规则：字面包含优先，否则取最高 partial ratio
    pub fn keyword_hit(&self, question: &str) -> Option<KeywordHit> {
        let lowered = question.to_lowercase();
        if let Some(k) = self.keywords.iter().find(|k| lowered.contains(k.as_str())) {
            return Some(KeywordHit {
                keyword: k.clone(),
                score: 100,
                literal: true,
            });
        }
        self.keywords
            .iter()
            .map(|k| (k, partial_ratio(k, &lowered)))
            .max_by_key(|(_, score)| *score)
            .filter(|(_, score)| *score >= self.threshold)
            .map(|(k, score)| KeywordHit {
                keyword: k.clone(),
                score,
                literal: false,
            })
    }

    /// LLM 判定；LLM 失败或回复无法识别时回落为 General
    async fn llm_verdict(
        &self,
        question: &str,
        emitter: &EventEmitter,
    ) -> Result<ParseOutcome<QuestionKind>, AgentError> {
        let messages = [
            Message::system(
                "Classify the user question. Answer with exactly one word: professional (biomedical, drug discovery or life-science research) or general (anything else).",
            ),
            Message::user(format!("{}\n\nQuestion: {}\nAnswer:", FEW_SHOT, question)),
        ];
        let reply = emitter
            .supervisor()
            .guard(self.llm.complete(&messages, self.temperature))
            .await?;
        let outcome = match reply {
            Ok(text) => parse_verdict(&text),
            Err(e) => {
                tracing::warn!(error = %e, "classifier call failed, defaulting to general");
                ParseOutcome::Fallback {
                    value: QuestionKind::General,
                    reason: e.to_string(),
                }
            }
        };
        Ok(outcome)
    }

    pub async fn classify(&self, question: &str, emitter: &EventEmitter) -> Result<Classification, AgentError> {
        let llm_verdict = self.llm_verdict(question, emitter).await?;
        let keyword_hit = self.keyword_hit(question);
        let kind = if keyword_hit.is_some() {
            QuestionKind::Domain
        } else {
            *llm_verdict.value()
        };
        tracing::info!(
            kind = ?kind,
            llm = ?llm_verdict.value(),
            keyword = keyword_hit.as_ref().map(|h| h.keyword.as_str()).unwrap_or(""),
            "question classified"
        );
        Ok(Classification {
            kind,
            llm_verdict,
            keyword_hit,
        })
    }
}

/// 只看回复的第一个词，避免 "not professional, general" 这类回复被误判
fn parse_verdict(text: &str) -> ParseOutcome<QuestionKind> {
    let lowered = text.trim().to_lowercase();
    let first = lowered
        .split(|c: char| !c.is_alphanumeric())
        .find(|t| !t.is_empty())
        .unwrap_or_default();
    let kind = match first {
        "professional" => Some(QuestionKind::Domain),
        "general" => Some(QuestionKind::General),
        t if t.starts_with("전문") => Some(QuestionKind::Domain),
        t if t.starts_with("일반") => Some(QuestionKind::General),
        _ => None,
    };
    match kind {
        Some(kind) => ParseOutcome::Parsed(kind),
        None => ParseOutcome::Fallback {
            value: QuestionKind::General,
            reason: format!("unrecognized verdict: {}", text.trim()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowSection;
    use crate::llm::MockLlmClient;

    fn classifier(llm: MockLlmClient) -> QuestionClassifier {
        let settings = WorkflowSection::default();
        QuestionClassifier::new(
            Arc::new(llm),
            settings.classifier_keywords,
            settings.classifier_fuzzy_threshold,
            0.0,
        )
    }

    #[tokio::test]
    async fn test_weather_is_general() {
        let c = classifier(MockLlmClient::new().with_default("general"));
        let (emitter, _rx) = EventEmitter::channel();
        let out = c.classify("오늘 날씨 어때?", &emitter).await.unwrap();
        assert_eq!(out.kind, QuestionKind::General);
        assert!(out.keyword_hit.is_none());
        assert!(!out.llm_verdict.is_fallback());
    }

    #[tokio::test]
    async fn test_keyword_overrides_llm() {
        let c = classifier(MockLlmClient::new().with_default("일반"));
        let (emitter, _rx) = EventEmitter::channel();
        let out = c.classify("EGFR 단백질 구조 알려줘", &emitter).await.unwrap();
        assert_eq!(out.kind, QuestionKind::Domain);
        assert_eq!(*out.llm_verdict.value(), QuestionKind::General);
        assert!(out.keyword_hit.unwrap().literal);
    }

    #[tokio::test]
    async fn test_llm_professional_without_keyword() {
        let c = classifier(MockLlmClient::new().with_default("professional"));
        let (emitter, _rx) = EventEmitter::channel();
        let out = c.classify("What does imatinib do?", &emitter).await.unwrap();
        assert_eq!(out.kind, QuestionKind::Domain);
    }

    #[tokio::test]
    async fn test_unrecognized_verdict_falls_back_to_general() {
        let c = classifier(MockLlmClient::new().with_default("maybe?"));
        let (emitter, _rx) = EventEmitter::channel();
        let out = c.classify("hello there", &emitter).await.unwrap();
        assert_eq!(out.kind, QuestionKind::General);
        assert!(out.llm_verdict.is_fallback());
    }

    #[test]
    fn test_verdict_uses_first_word() {
        assert_eq!(parse_verdict("Professional."), ParseOutcome::Parsed(QuestionKind::Domain));
        assert_eq!(parse_verdict("-> general"), ParseOutcome::Parsed(QuestionKind::General));
        assert_eq!(parse_verdict("전문 질문입니다"), ParseOutcome::Parsed(QuestionKind::Domain));
        assert_eq!(parse_verdict("일반"), ParseOutcome::Parsed(QuestionKind::General));
        let hedged = parse_verdict("not professional, general");
        assert!(hedged.is_fallback());
        assert_eq!(*hedged.value(), QuestionKind::General);
    }

    #[test]
    fn test_everyday_words_do_not_force_pipeline() {
        let c = classifier(MockLlmClient::new());
        for q in [
            "서울역까지 가는 경로 알려줘",
            "암기 잘하는 법 알려줘",
            "이 계약서의 binding 조항이 뭐야?",
            "두 파일을 결합하는 방법",
        ] {
            assert!(c.keyword_hit(q).is_none(), "{} should not hit a keyword", q);
        }
        assert!(c.keyword_hit("EGFR 신호 경로와 항암 치료").unwrap().literal);
    }

    #[test]
    fn test_single_character_keywords_are_ignored() {
        let c = QuestionClassifier::new(
            Arc::new(MockLlmClient::new()),
            vec!["암".into(), "kinase".into()],
            80,
            0.0,
        );
        assert!(c.keyword_hit("암기 잘하는 법").is_none());
        assert!(c.keyword_hit("kinase inhibitors").is_some());
    }

    #[test]
    fn test_fuzzy_hit_without_literal_match() {
        let c = classifier(MockLlmClient::new());
        let hit = c.keyword_hit("what is protien folding").unwrap();
        assert!(hit.score >= 80);
        assert!(!hit.literal);
        assert!(c.keyword_hit("what should I cook tonight").is_none());
    }
}
