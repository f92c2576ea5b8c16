//! 记忆层：对话消息（运行状态中的 append-only 日志）

pub mod conversation;

pub use conversation::{latest_user_message, Message, Role};
