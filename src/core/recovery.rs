//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供编排循环决定是降级提交、暂停还是终止。

use crate::core::{AgentError, RecoveryAction};
use crate::llm::LlmError;

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// worker / 干预调用失败时的处理建议；持久化与配置错误一律终止
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Cancelled => RecoveryAction::Pause,
            AgentError::Llm(LlmError::NoModel) => RecoveryAction::Abort,
            AgentError::Llm(e) => RecoveryAction::Degrade(format!("Model call failed: {e}")),
            AgentError::Worker { worker, reason } => {
                RecoveryAction::Degrade(format!("{worker} failed: {reason}"))
            }
            AgentError::Io(e) => RecoveryAction::Degrade(format!("IO failure: {e}")),
            AgentError::Persistence(_) | AgentError::Config(_) | AgentError::InvalidState(_) => {
                RecoveryAction::Abort
            }
        }
    }
}
