//! 运行事件：按顺序推送给 CLI / WebSocket 客户端

use serde::Serialize;

/// 一次运行中产生的流式事件（JSON 中以 `type` 区分）
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// 用户输入回显
    UserEcho { content: String },
    /// 某组件产生的日志行（会话消息）
    Log { sender: String, content: String },
    /// 产物更新（报告 / 幻灯片代码）
    ArtifactUpdate { key: String, content: String },
    Error { message: String },
    Cancelled { message: String },
    Done { status: String },
}

impl RunEvent {
    pub fn log(sender: impl Into<String>, content: impl Into<String>) -> Self {
        RunEvent::Log {
            sender: sender.into(),
            content: content.into(),
        }
    }
}
