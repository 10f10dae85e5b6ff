//! 文档检索接口
//!
//! 向量检索属于外部协作方；编排图只依赖 DocumentSearch trait，默认实现返回空结果。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 检索到的文档片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnippet {
    pub file_name: Option<String>,
    pub page: Option<u32>,
    pub position: Option<u32>,
    pub content: String,
}

/// 客户端展示用的文档引用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReference {
    pub file_name: String,
    pub page: Option<u32>,
    pub position: Option<u32>,
    pub content_snippet: String,
}

impl DocumentSnippet {
    /// 转为引用：正文截取前 max_chars 个字符，截断时追加 "…"
    pub fn to_reference(&self, max_chars: usize) -> DocumentReference {
        let content = self.content.trim();
        let content_snippet = if max_chars > 0 && content.chars().count() > max_chars {
            let cut: String = content.chars().take(max_chars).collect();
            format!("{}…", cut.trim_end())
        } else {
            content.to_string()
        };
        DocumentReference {
            file_name: self
                .file_name
                .clone()
                .unwrap_or_else(|| "알 수 없는 문서".to_string()),
            page: self.page,
            position: self.position,
            content_snippet,
        }
    }
}

/// 文档检索
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<DocumentSnippet>, String>;
}

/// 未配置向量库时使用
#[derive(Debug, Default)]
pub struct NoDocumentSearch;

#[async_trait]
impl DocumentSearch for NoDocumentSearch {
    async fn search(&self, _query: &str) -> Result<Vec<DocumentSnippet>, String> {
        Ok(Vec::new())
    }
}
