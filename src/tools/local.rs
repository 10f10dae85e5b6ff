//! 进程内提供方
//!
//! StaticProvider 直接持有各分组的工具列表，用于离线运行与测试；FnTool 用闭包实现 Tool。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolError, ToolProvider};

type Handler = dyn Fn(Value) -> Result<Value, String> + Send + Sync;

/// 闭包工具
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    handler: Box<Handler>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({ "type": "object", "properties": {} }),
            handler: Box::new(handler),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        (self.handler)(args).map_err(ToolError::Invocation)
    }
}

enum GroupEntry {
    Tools(Vec<Arc<dyn Tool>>),
    Failing(String),
}

/// 静态提供方：分组 → 工具列表（或固定的发现失败）
#[derive(Default)]
pub struct StaticProvider {
    groups: Vec<(String, GroupEntry)>,
    discoveries: HashMap<String, AtomicUsize>,
    delay: Option<Duration>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, group: impl Into<String>, tool: impl Tool + 'static) -> Self {
        let group = group.into();
        self.discoveries.entry(group.clone()).or_default();
        let tool: Arc<dyn Tool> = Arc::new(tool);
        match self.groups.iter_mut().find(|(g, _)| *g == group) {
            Some((_, GroupEntry::Tools(tools))) => tools.push(tool),
            Some((_, entry)) => *entry = GroupEntry::Tools(vec![tool]),
            None => self.groups.push((group, GroupEntry::Tools(vec![tool]))),
        }
        self
    }

    /// 声明一个分组但发现总是失败
    pub fn with_failing_group(mut self, group: impl Into<String>, reason: impl Into<String>) -> Self {
        let group = group.into();
        self.discoveries.entry(group.clone()).or_default();
        self.groups.retain(|(g, _)| *g != group);
        self.groups.push((group, GroupEntry::Failing(reason.into())));
        self
    }

    /// 发现前等待（模拟慢速 I/O）
    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn discovery_count(&self, group: &str) -> usize {
        self.discoveries
            .get(group)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[async_trait]
impl ToolProvider for StaticProvider {
    fn groups(&self) -> Vec<String> {
        self.groups.iter().map(|(g, _)| g.clone()).collect()
    }

    async fn discover(&self, group: &str) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        if let Some(counter) = self.discoveries.get(group) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.groups.iter().find(|(g, _)| g == group) {
            Some((_, GroupEntry::Tools(tools))) => Ok(tools.clone()),
            Some((_, GroupEntry::Failing(reason))) => Err(ToolError::Discovery(reason.clone())),
            None => Ok(Vec::new()),
        }
    }
}
