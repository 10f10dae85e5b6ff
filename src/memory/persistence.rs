//! 对话持久化
//!
//! 命令行模式下将对话历史写入/从 JSON 文件加载，使多次调用之间保留上下文。

use std::path::Path;

use crate::memory::Message;

/// 单文件 JSON 持久化，每条消息含 role + content
#[derive(Debug)]
pub struct ConversationPersistence {
    path: std::path::PathBuf,
}

impl ConversationPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 加载最近 limit 条消息；文件不存在时返回空 Vec
    pub fn load(&self, limit: usize) -> anyhow::Result<Vec<Message>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let mut messages: Vec<Message> = serde_json::from_str(&data)?;
        let skip = messages.len().saturating_sub(limit);
        messages.drain(..skip);
        Ok(messages)
    }

    /// 追加消息并写回；父目录不存在时自动创建
    pub fn append(&self, new_messages: &[Message]) -> anyhow::Result<()> {
        let mut messages = self.load(usize::MAX)?;
        messages.extend_from_slice(new_messages);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&messages)?)?;
        Ok(())
    }
}
