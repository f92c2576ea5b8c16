//! Archivist：扫描本地资料并摘要
//!
//! 模型不可用时直接把扫描摘录作为本地知识返回。

use std::sync::Arc;

use async_trait::async_trait;

use super::{RunContext, Worker};
use crate::core::{AgentError, RunState, StateUpdate};
use crate::extract::truncate_chars;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::prompts;
use crate::retrieval::{render_snippets, Retriever};

const RAW_EXCERPT_CHARS: usize = 200;

pub struct Archivist {
    llm: Arc<dyn LlmClient>,
    retriever: Option<Arc<dyn Retriever>>,
    top_k: usize,
}

impl Archivist {
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

    async fn scan(&self, ctx: &RunContext) -> String {
        let Some(retriever) = &self.retriever else {
            return "No local directory configured.".to_string();
        };
        let query = format!("{} {}", ctx.goal, ctx.task_input.as_deref().unwrap_or_default());
        let hits = retriever.search(&query, self.top_k).await;
        if hits.is_empty() {
            "No relevant local files found.".to_string()
        } else {
            render_snippets(&hits)
        }
    }
}

#[async_trait]
impl Worker for Archivist {
    fn name(&self) -> &str {
        "Archivist"
    }

    async fn invoke(&self, _state: &RunState, ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        let raw = self.scan(ctx).await;
        let prompt = format!(
            "Context from local files:\n{}\n\nTask: Summarize this considering the topic '{}'.{}",
            raw,
            ctx.goal,
            ctx.task_brief()
        );

        let summary = match self
            .llm
            .complete(&[Message::system(prompts::ARCHIVIST), Message::user(prompt)])
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!("Archivist model failed ({}), returning raw scan", e);
                format!(
                    "Local model unavailable. Raw scan result: {}...",
                    truncate_chars(&raw, RAW_EXCERPT_CHARS)
                )
            }
        };

        Ok(StateUpdate::from_sender(self.name())
            .local(self.name(), summary.clone())
            .merged(self.name(), summary)
            .message(Message::system("Local scanning complete.").from_sender(self.name())))
    }
}
