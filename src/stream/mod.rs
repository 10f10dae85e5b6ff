//! 流式事件层：事件类型、生产端句柄、单消费者会话（心跳 + 断开取消）

pub mod emitter;
pub mod events;
pub mod session;

pub use emitter::EventEmitter;
pub use events::{EventKind, StreamEvent, ToolPhase};
pub use session::{SessionFrame, StreamSession};
