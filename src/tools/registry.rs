//! 工具与提供方注册表
//!
//! 工具实现 Tool trait；提供方（ToolProvider）按分组名发现工具。ProviderRegistry 缓存每个分组的发现结果，
//! 同一分组的并发发现通过按分组加锁串行化（二次检查缓存），不同分组互不阻塞。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// 工具调用 / 发现错误
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("tool invocation failed: {0}")]
    Invocation(String),

    #[error("tool {tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("discovery failed: {0}")]
    Discovery(String),
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步调用（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema
    /// 默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// 工具提供方：一个提供方可服务多个分组
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// 该提供方声明的分组名
    fn groups(&self) -> Vec<String>;

    /// 发现某分组的工具（可能较慢，涉及 I/O）
    async fn discover(&self, group: &str) -> Result<Vec<Arc<dyn Tool>>, ToolError>;
}

/// 已解析工具：(分组, 工具)，解析后不可变，跨运行只读共享
#[derive(Clone)]
pub struct ResolvedTool {
    pub group: String,
    pub tool: Arc<dyn Tool>,
}

impl ResolvedTool {
    pub fn new(group: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        Self {
            group: group.into(),
            tool,
        }
    }

    /// "group:name"
    pub fn label(&self) -> String {
        format!("{}:{}", self.group, self.tool.name())
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn description(&self) -> &str {
        self.tool.description()
    }

    pub fn argument_schema(&self) -> Value {
        self.tool.parameters_schema()
    }
}

impl fmt::Debug for ResolvedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTool")
            .field("group", &self.group)
            .field("name", &self.tool.name())
            .finish()
    }
}

type ToolList = Arc<Vec<ResolvedTool>>;

/// 提供方注册表：分组 → 提供方，带分组级缓存与发现锁
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ToolProvider>>,
    /// 注册顺序
    group_order: Vec<String>,
    cache: RwLock<HashMap<String, ToolList>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    discovery_timeout: Duration,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}

impl ProviderRegistry {
    pub fn new(discovery_timeout: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            group_order: Vec::new(),
            cache: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            discovery_timeout,
        }
    }

    /// 注册提供方；分组重名时后注册者覆盖
    pub fn register(&mut self, provider: Arc<dyn ToolProvider>) {
        for group in provider.groups() {
            if !self.providers.contains_key(&group) {
                self.group_order.push(group.clone());
            }
            self.providers.insert(group, provider.clone());
        }
    }

    /// 可用分组（注册顺序）
    pub fn available_groups(&self) -> Vec<String> {
        self.group_order.clone()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.providers.contains_key(group)
    }

    /// 解析多个分组的工具：去重保序，逐组取缓存或发现
    pub async fn resolve(&self, groups: &[String]) -> Vec<ResolvedTool> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for group in groups {
            if !seen.insert(group.as_str()) {
                continue;
            }
            let tools = self.group_tools(group).await;
            resolved.extend(tools.iter().cloned());
        }
        resolved
    }

    /// 清空缓存（重新发现）
    pub fn refresh(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    fn cached(&self, group: &str) -> Option<ToolList> {
        self.cache.read().ok()?.get(group).cloned()
    }

    fn store(&self, group: &str, tools: ToolList) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(group.to_string(), tools);
        }
    }

    fn group_lock(&self, group: &str) -> Arc<tokio::sync::Mutex<()>> {
        match self.locks.lock() {
            Ok(mut locks) => locks.entry(group.to_string()).or_default().clone(),
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    async fn group_tools(&self, group: &str) -> ToolList {
        if let Some(tools) = self.cached(group) {
            return tools;
        }

        let Some(provider) = self.providers.get(group).cloned() else {
            tracing::warn!(group = %group, "requested provider group is not registered");
            let empty: ToolList = Arc::new(Vec::new());
            self.store(group, empty.clone());
            return empty;
        };

        let lock = self.group_lock(group);
        let _guard = lock.lock().await;
        if let Some(tools) = self.cached(group) {
            return tools;
        }

        let discovered = tokio::time::timeout(self.discovery_timeout, provider.discover(group)).await;
        let tools: Vec<ResolvedTool> = match discovered {
            Ok(Ok(tools)) => {
                tracing::info!(group = %group, count = tools.len(), "provider tools discovered");
                tools
                    .into_iter()
                    .map(|t| ResolvedTool::new(group, t))
                    .collect()
            }
            Ok(Err(e)) => {
                tracing::warn!(group = %group, error = %e, "provider discovery failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    group = %group,
                    secs = self.discovery_timeout.as_secs(),
                    "provider discovery timed out"
                );
                Vec::new()
            }
        };

        let tools = Arc::new(tools);
        self.store(group, tools.clone());
        tools
    }
}
