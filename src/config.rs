//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BIOGRAPH__*` 覆盖（双下划线表示嵌套，如 `BIOGRAPH__LLM__PROVIDER=mock`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub workflow: WorkflowSection,
    pub tools: ToolsSection,
    /// [[providers]]：工具提供方分组（MCP 服务器）
    pub providers: Vec<ProviderSection>,
    pub stream: StreamSection,
    pub web: WebSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 每次运行带入的历史消息条数
    pub history_limit: usize,
    /// 直接回答与最终报告使用的 system prompt 文件；缺失时用内置文案
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "biograph".to_string(),
            history_limit: 10,
            system_prompt_path: None,
        }
    }
}

/// [llm] 段：后端选择、温度与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    /// 最终答案流式生成温度
    pub answer_temperature: f32,
    /// 路由 / 分类 / 阶段决策温度
    pub decision_temperature: f32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            answer_temperature: 0.2,
            decision_temperature: 0.0,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

/// [workflow] 段：预算与阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// 阶段 Agent 推理轮数上限
    pub max_stage_steps: usize,
    /// 单阶段工具调用次数上限
    pub max_tool_calls_per_stage: usize,
    /// 阶段 Agent 使用模型原生 function calling；关闭时按 JSON 决策文本解析
    pub native_tool_calls: bool,
    /// 兜底执行时最多尝试的工具数
    pub fallback_tool_limit: usize,
    /// 路由迭代预算
    pub max_iterations: usize,
    /// trace 文本超过该字符数时触发压缩
    pub compact_threshold_chars: usize,
    /// 压缩时取最近多少字符做摘要
    pub compact_window_chars: usize,
    pub compact_summary_words: usize,
    /// 兜底工具排序的相似度下限（0-100）
    pub fuzzy_relevance_floor: u8,
    /// 分类器关键词 partial ratio 阈值（0-100）
    pub classifier_fuzzy_threshold: u8,
    pub classifier_keywords: Vec<String>,
    pub tool_result_max_chars: usize,
    pub scratch_result_max_chars: usize,
    /// 查询末尾追加 "(Search date: YYYY-MM-DD)"
    pub append_search_date: bool,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_stage_steps: 4,
            max_tool_calls_per_stage: 3,
            native_tool_calls: false,
            fallback_tool_limit: 1,
            max_iterations: 8,
            compact_threshold_chars: 10_000,
            compact_window_chars: 4_000,
            compact_summary_words: 150,
            fuzzy_relevance_floor: 30,
            classifier_fuzzy_threshold: 80,
            classifier_keywords: default_classifier_keywords(),
            tool_result_max_chars: 1200,
            scratch_result_max_chars: 400,
            append_search_date: true,
        }
    }
}

fn default_classifier_keywords() -> Vec<String> {
    [
        // 한국어
        "단백질",
        "단백질 구조",
        "유전자",
        "타겟 단백질",
        "표적",
        "신약",
        "화합물",
        "임상",
        "임상시험",
        "신호 경로",
        "대사 경로",
        "신호전달",
        "오믹스",
        "돌연변이",
        "질환",
        "항암",
        "암 치료",
        "약물",
        "결합 부위",
        "결합 친화도",
        // English
        "protein",
        "genome",
        "drug target",
        "drug",
        "compound",
        "clinical trial",
        "pathway",
        "mutation",
        "multi-omics",
        "disease",
        "cancer",
        "binding affinity",
        "binding site",
        "protein structure",
        "inhibitor",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 发现（tools/list）超时（秒）
    pub discovery_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            discovery_timeout_secs: 20,
        }
    }
}

/// [[providers]]：一个工具提供方分组
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProviderSection {
    pub name: String,
    pub display_name: Option<String>,
    pub description: String,
    /// JSON-RPC 端点
    pub url: String,
    pub headers: HashMap<String, String>,
    /// 非空时只保留这些工具
    pub tool_allowlist: Vec<String>,
    pub tool_blocklist: Vec<String>,
}

/// [stream] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// 无事件时的心跳间隔（秒）
    pub heartbeat_secs: u64,
    /// 运行失败时追加给用户的提示前缀
    pub apology_prefix: String,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            heartbeat_secs: 10,
            apology_prefix: "\n\n오류가 발생했습니다: ".to_string(),
        }
    }
}

/// [web] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub bind: String,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BIOGRAPH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BIOGRAPH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BIOGRAPH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_budgets() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.workflow.max_stage_steps, 4);
        assert_eq!(cfg.workflow.max_tool_calls_per_stage, 3);
        assert_eq!(cfg.workflow.fallback_tool_limit, 1);
        assert_eq!(cfg.workflow.max_iterations, 8);
        assert_eq!(cfg.workflow.compact_threshold_chars, 10_000);
        assert_eq!(cfg.stream.heartbeat_secs, 10);
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[llm]
provider = "mock"

[workflow]
max_iterations = 3

[[providers]]
name = "PDB-MCP-Server"
url = "http://localhost:9001/mcp"
tool_blocklist = ["debug"]
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.workflow.max_iterations, 3);
        assert_eq!(cfg.workflow.max_stage_steps, 4);
        assert!(cfg
            .providers
            .iter()
            .any(|p| p.name == "PDB-MCP-Server" && p.tool_blocklist == vec!["debug".to_string()]));
    }
}
