//! 运行错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Degrade / Pause / Abort。

use thiserror::Error;

use crate::llm::LlmError;
use crate::persistence::PersistenceError;

/// 一次运行过程中可能出现的错误（模型、取消、持久化、配置、状态不一致等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Worker {worker} failed: {reason}")]
    Worker { worker: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 提交仅含状态消息的降级结果，交给评审拒绝后重试
    Degrade(String),
    /// 保留已提交状态，等待用户恢复
    Pause,
    /// 终止本次运行并上报
    Abort,
}
