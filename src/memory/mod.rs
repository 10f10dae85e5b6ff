//! 对话层：消息类型、运行内只追加的对话记录、JSON 文件持久化

pub mod conversation;
pub mod persistence;

pub use conversation::{ConversationLog, Message, Role};
pub use persistence::ConversationPersistence;
