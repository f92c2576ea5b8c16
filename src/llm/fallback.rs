//! 降级链：主模型遇到限流 / 不可用 / 超时时，依次切换到备用（能力较弱）模型
//!
//! 只对暂时性错误切换；永久性错误（鉴权、请求格式）直接返回，避免把同样的坏请求打到每个模型。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{LlmClient, LlmError};
use crate::memory::Message;

/// 带超时与降级的 LLM 客户端
pub struct FallbackLlmClient {
    chain: Vec<Arc<dyn LlmClient>>,
    timeout: Duration,
}

impl FallbackLlmClient {
    pub fn new(chain: Vec<Arc<dyn LlmClient>>, timeout_secs: u64) -> Self {
        Self {
            chain,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }
}

#[async_trait]
impl LlmClient for FallbackLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut last_err = LlmError::NoModel;
        for (i, client) in self.chain.iter().enumerate() {
            if i > 0 {
                tracing::warn!(
                    "Falling back to {} after: {}",
                    client.model_name(),
                    last_err
                );
            }
            let result = match tokio::time::timeout(self.timeout, client.complete(messages)).await
            {
                Ok(r) => r,
                Err(_) => Err(LlmError::Timeout(self.timeout.as_secs())),
            };
            match result {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => last_err = e,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    fn model_name(&self) -> &str {
        self.chain
            .first()
            .map(|c| c.model_name())
            .unwrap_or("none")
    }
}
