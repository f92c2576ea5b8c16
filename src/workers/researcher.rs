//! Researcher：综合事实，整合本地知识并指出冲突

use std::sync::Arc;

use async_trait::async_trait;

use super::{RunContext, Worker};
use crate::core::{AgentError, RunState, StateUpdate};
use crate::extract::truncate_chars;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::prompts;
use crate::retrieval::{render_snippets, Retriever};

/// 本地知识与团队已有结论各自写入 prompt 的上限
const CONTEXT_CHARS: usize = 8_000;

pub struct Researcher {
    llm: Arc<dyn LlmClient>,
    retriever: Option<Arc<dyn Retriever>>,
    top_k: usize,
}

impl Researcher {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            retriever: None,
            top_k: 5,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        self.retriever = Some(retriever);
        self.top_k = top_k;
        self
    }
}

#[async_trait]
impl Worker for Researcher {
    fn name(&self) -> &str {
        "Researcher"
    }

    async fn invoke(&self, state: &RunState, ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        let mut local = state.knowledge.local_text();
        if let Some(retriever) = &self.retriever {
            let query = ctx.task_input.as_deref().unwrap_or(&ctx.goal);
            let hits = retriever.search(query, self.top_k).await;
            if !hits.is_empty() {
                if !local.is_empty() {
                    local.push_str("\n\n");
                }
                local.push_str(&render_snippets(&hits));
            }
        }

        let mut prompt = format!(
            "Research this topic deeply: {}. Focus on recent developments.",
            ctx.goal
        );
        if !local.is_empty() {
            prompt.push_str(&format!(
                "\n\nInternal knowledge (local files):\n{}\n\n\
                 Integrate this local knowledge. If other sources contradict it, note the conflict. \
                 If they support it, strengthen the argument.",
                truncate_chars(&local, CONTEXT_CHARS)
            ));
        }
        let merged = state.knowledge.merged_text();
        if !merged.is_empty() {
            prompt.push_str(&format!(
                "\n\nTeam findings so far:\n{}",
                truncate_chars(&merged, CONTEXT_CHARS)
            ));
        }
        prompt.push_str(&ctx.task_brief());

        let text = self
            .llm
            .complete(&[Message::system(prompts::RESEARCHER), Message::user(prompt)])
            .await?;
        let text = text.trim().to_string();

        Ok(StateUpdate::from_sender(self.name())
            .web(self.name(), text.clone())
            .merged(self.name(), text)
            .message(
                Message::system(format!(
                    "Research complete for: {}",
                    ctx.step_title.as_deref().unwrap_or(&ctx.goal)
                ))
                .from_sender(self.name()),
            ))
    }
}
