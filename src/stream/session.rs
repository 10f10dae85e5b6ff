//! 流式会话
//!
//! spawn 启动后台生产任务并返回会话；消费端逐帧读取事件，空闲超过心跳间隔时产出 KeepAlive。
//! 生产任务结束时总会写入终止标记 `result`，随后通道关闭（哨兵）。
//! 会话被丢弃（调用方断开）时触发取消并中止生产任务。

use std::future::Future;
use std::time::Duration;

use futures_util::{stream, Stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::SessionSupervisor;
use crate::stream::{EventEmitter, StreamEvent};

/// 消费端读到的一帧
#[derive(Debug, Clone, PartialEq)]
pub enum SessionFrame {
    Event(StreamEvent),
    KeepAlive,
}

impl SessionFrame {
    /// SSE 文本：事件为 `data: {...}\n\n`，心跳为注释行 `: keep-alive\n\n`
    pub fn to_sse(&self) -> String {
        match self {
            SessionFrame::Event(ev) => ev.to_sse(),
            SessionFrame::KeepAlive => ": keep-alive\n\n".to_string(),
        }
    }
}

/// 单消费者会话
pub struct StreamSession {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    supervisor: SessionSupervisor,
    producer: Option<JoinHandle<()>>,
    heartbeat: Duration,
    closed: bool,
}

impl StreamSession {
    /// 启动生产任务；run 的返回值作为终止标记 `result` 的 data
    pub fn spawn<F, Fut>(heartbeat: Duration, run: F) -> Self
    where
        F: FnOnce(EventEmitter) -> Fut,
        Fut: Future<Output = Value> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = SessionSupervisor::new();
        let emitter = EventEmitter::new(tx, supervisor.cancel_token());
        let fut = run(emitter.clone());
        let producer = tokio::spawn(async move {
            let summary = fut.await;
            emitter.emit_terminal(summary);
        });
        Self {
            rx,
            supervisor,
            producer: Some(producer),
            heartbeat,
            closed: false,
        }
    }

    /// 下一帧；通道关闭后返回 None
    pub async fn next_frame(&mut self) -> Option<SessionFrame> {
        if self.closed {
            return None;
        }
        tokio::select! {
            ev = self.rx.recv() => match ev {
                Some(ev) => Some(SessionFrame::Event(ev)),
                None => {
                    self.closed = true;
                    None
                }
            },
            _ = tokio::time::sleep(self.heartbeat) => Some(SessionFrame::KeepAlive),
        }
    }

    /// 主动断开：取消运行，已排队的事件与终止标记仍可读取
    pub fn cancel(&self) {
        self.supervisor.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.supervisor.is_cancelled()
    }

    pub fn into_stream(self) -> impl Stream<Item = SessionFrame> + Send {
        stream::unfold(self, |mut session| async move {
            let frame = session.next_frame().await?;
            Some((frame, session))
        })
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.supervisor.cancel();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}
