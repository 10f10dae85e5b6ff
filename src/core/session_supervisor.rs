//! 运行监管：取消令牌
//!
//! 每次运行持有一个 CancellationToken；消费端断开时触发取消，
//! 生产端在每个挂起点（LLM 调用、工具调用、发现）检查并放弃后续输出。

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;

/// 单次运行的取消监管
#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(cancel_token: CancellationToken) -> Self {
        Self { cancel_token }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（调用方断开）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 挂起点检查：已取消则返回 Cancelled
    pub fn checkpoint(&self) -> Result<(), AgentError> {
        if self.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }

    /// 在取消令牌与 fut 之间竞速；取消先到时丢弃 fut 的结果
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, AgentError>
    where
        F: Future<Output = T>,
    {
        self.checkpoint()?;
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(AgentError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_passes_through_when_live() {
        let sup = SessionSupervisor::new();
        let out = sup.guard(async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_guard_short_circuits_after_cancel() {
        let sup = SessionSupervisor::new();
        sup.cancel();
        assert!(matches!(sup.guard(async { 1 }).await, Err(AgentError::Cancelled)));
        assert!(sup.checkpoint().is_err());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let sup = SessionSupervisor::new();
        let token = sup.cancel_token();
        tokio::spawn(async move { token.cancel() });
        let out = sup.guard(std::future::pending::<()>()).await;
        assert!(matches!(out, Err(AgentError::Cancelled)));
    }
}
