//! 事件生产端句柄
//!
//! 各节点通过 EventEmitter 写入同一无界通道，单一消费者按 FIFO 读取。
//! 运行取消后 emit 直接丢弃事件，节点据此停止后续输出。

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::SessionSupervisor;
use crate::stream::{EventKind, StreamEvent, ToolPhase};

/// 可克隆的事件发送端
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<StreamEvent>,
    supervisor: SessionSupervisor,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>, cancel_token: CancellationToken) -> Self {
        Self {
            tx,
            supervisor: SessionSupervisor::from_token(cancel_token),
        }
    }

    /// 独立通道（测试与无会话场景）
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, CancellationToken::new()), rx)
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn is_cancelled(&self) -> bool {
        self.supervisor.is_cancelled()
    }

    /// 发送事件；已取消或消费端已关闭时返回 false
    pub fn emit(&self, event: EventKind, data: Value) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.tx.send(StreamEvent::new(event, data)).is_ok()
    }

    /// 终止标记：不受取消影响，消费端仍在时总会送达
    pub fn emit_terminal(&self, data: Value) -> bool {
        self.tx.send(StreamEvent::new(EventKind::Result, data)).is_ok()
    }

    pub fn reasoning(&self, stage: &str, message: impl Into<String>) -> bool {
        self.emit(
            EventKind::Reasoning,
            json!({ "stage": stage, "message": message.into() }),
        )
    }

    /// 带附加字段的 reasoning（extra 必须是对象，字段并入 data）
    pub fn reasoning_with(&self, stage: &str, message: impl Into<String>, extra: Value) -> bool {
        let mut data = json!({ "stage": stage, "message": message.into() });
        if let (Some(obj), Value::Object(extra)) = (data.as_object_mut(), extra) {
            obj.extend(extra);
        }
        self.emit(EventKind::Reasoning, data)
    }

    pub fn token(&self, text: impl Into<String>) -> bool {
        self.emit(EventKind::Token, Value::String(text.into()))
    }

    pub fn tool_use(
        &self,
        stage: &str,
        tool: &str,
        phase: ToolPhase,
        input: &Value,
        output: Option<String>,
    ) -> bool {
        let mut data = json!({
            "stage": stage,
            "tool": tool,
            "status": phase,
            "input": input,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(out) = output {
            data["output"] = Value::String(out);
        }
        self.emit(EventKind::ToolUse, data)
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(EventKind::Error, Value::String(message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_preserves_order() {
        let (emitter, mut rx) = EventEmitter::channel();
        emitter.reasoning("router", "first");
        emitter.token("a");
        emitter.token("b");
        let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event)
            .collect();
        assert_eq!(kinds, vec![EventKind::Reasoning, EventKind::Token, EventKind::Token]);
    }

    #[test]
    fn test_cancel_drops_events_but_not_terminal() {
        let (emitter, mut rx) = EventEmitter::channel();
        emitter.supervisor().cancel();
        assert!(!emitter.token("late"));
        assert!(emitter.emit_terminal(Value::Null));
        let ev = rx.try_recv().unwrap();
        assert!(ev.is_terminal());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reasoning_with_merges_fields() {
        let (emitter, mut rx) = EventEmitter::channel();
        emitter.reasoning_with("chem_agent", "running", json!({"tools": ["G:t"]}));
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.data["stage"], "chem_agent");
        assert_eq!(ev.data["tools"][0], "G:t");
    }
}
