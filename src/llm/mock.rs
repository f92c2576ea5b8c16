//! Mock / 脚本化 LLM 客户端（无需 API，用于本地跑通与测试）
//!
//! - MockLlmClient：按 system prompt 判断角色，给出确定性回复（评审一律 APPROVED）
//! - ScriptedLlmClient：按顺序吐出预设回复，用尽后返回默认回复；记录调用次数与每次请求的总字符数

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{latest_user_message, Message, Role};

/// Mock 客户端：离线演示用
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let input = latest_user_message(messages)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let reply = if system.contains("Lead Project Planner") {
            // 走 Planner 解析失败兜底，得到默认三步计划
            "(mock) no plan".to_string()
        } else if system.contains("Critique Gate") {
            "APPROVED: (mock) meets the step requirements".to_string()
        } else if system.contains("Plan Reviewer") {
            r#"{"revise": false}"#.to_string()
        } else if system.contains("Infographic Architect") {
            "export default function Presentation() { return <div>Mock slides</div>; }".to_string()
        } else {
            let preview: String = input.chars().take(200).collect();
            format!("(mock) Findings for the requested task:\n{}", preview)
        };
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 脚本化客户端：依次返回预设回复
#[derive(Debug)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<String>>,
    default_reply: String,
    calls: AtomicUsize,
    request_chars: Mutex<Vec<usize>>,
}

impl ScriptedLlmClient {
    pub fn new<S: Into<String>>(replies: Vec<S>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            default_reply: String::new(),
            calls: AtomicUsize::new(0),
            request_chars: Mutex::new(Vec::new()),
        }
    }

    /// 预设回复用尽后返回的默认回复
    pub fn with_default(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用时所有消息内容的字符数之和
    pub fn request_sizes(&self) -> Vec<usize> {
        self.request_chars
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.request_chars.lock() {
            sizes.push(messages.iter().map(|m| m.content.chars().count()).sum());
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| LlmError::Unavailable("scripted client poisoned".into()))?
            .pop_front();
        Ok(next.unwrap_or_else(|| self.default_reply.clone()))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_order_and_default() {
        let llm = ScriptedLlmClient::new(vec!["one", "two"]).with_default("rest");
        assert_eq!(llm.complete(&[]).await.unwrap(), "one");
        assert_eq!(llm.complete(&[]).await.unwrap(), "two");
        assert_eq!(llm.complete(&[]).await.unwrap(), "rest");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_critique_approves() {
        let reply = MockLlmClient
            .complete(&[
                Message::system("You are the Critique Gate"),
                Message::user("output"),
            ])
            .await
            .unwrap();
        assert!(reply.starts_with("APPROVED"));
    }
}
