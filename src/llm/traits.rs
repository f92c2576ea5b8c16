//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Fallback 链 / Mock）实现 LlmClient::complete（非流式）。
//! 错误区分「暂时性」（限流、不可用、超时）与「永久性」，Fallback 链只对前者切换模型。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Rate limited")]
    RateLimited,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timeout after {0}s")]
    Timeout(u64),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No model available")]
    NoModel,
}

impl LlmError {
    /// 是否为暂时性故障（可切换到备用模型重试）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited | LlmError::Unavailable(_) | LlmError::Timeout(_)
        )
    }

    /// 从后端返回的错误文本归类（HTTP 状态码 / 常见关键字）
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
            LlmError::RateLimited
        } else if lower.contains("503")
            || lower.contains("502")
            || lower.contains("overloaded")
            || lower.contains("unavailable")
            || lower.contains("connection")
        {
            LlmError::Unavailable(message)
        } else if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Unavailable(message)
        } else {
            LlmError::Api(message)
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 模型名（日志用）
    fn model_name(&self) -> &str;
}
