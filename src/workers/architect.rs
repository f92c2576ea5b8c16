//! Architect：基于综合知识生成多页 React 演示文稿源码（写入 `slide_1`）

use std::sync::Arc;

use async_trait::async_trait;

use super::{RunContext, Worker};
use crate::core::{AgentError, RunState, StateUpdate};
use crate::extract::{strip_code_fences, truncate_chars};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::prompts;

/// 送入模型的知识上下文上限（字符）
const CONTEXT_CHARS: usize = 16_000;

pub struct Architect {
    llm: Arc<dyn LlmClient>,
}

impl Architect {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Worker for Architect {
    fn name(&self) -> &str {
        "Architect"
    }

    async fn invoke(&self, state: &RunState, ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        let storyboard = state.knowledge.merged_text();
        let version = state.iteration_count + 1;
        let prompt = format!(
            "Create a high-quality interactive presentation for this topic: {}\n\nContext:\n{}\n\nVersion: {}{}",
            ctx.goal,
            truncate_chars(&storyboard, CONTEXT_CHARS),
            version,
            ctx.task_brief()
        );

        let response = self
            .llm
            .complete(&[Message::system(prompts::ARCHITECT), Message::user(prompt)])
            .await?;
        let code = strip_code_fences(&response);

        Ok(StateUpdate::from_sender(self.name())
            .artifact("slide_1", code)
            .message(Message::system("Slide code generated.").from_sender(self.name())))
    }
}
