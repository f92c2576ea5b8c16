//! 接入层：HTTP + WebSocket（axum）
//!
//! - `POST /api/chat`：同步运行到完成 / 暂停
//! - `GET /ws/:thread_id`：按顺序推送运行事件，随时接受 `/pause`
//! - 线程列表、投影状态、检查点历史、取消 / 恢复、资料导入

mod server;

pub use server::{parse_client_frame, router, AppState, ChatRequest, ChatResponse, ClientFrame};
