//! DeepResearcher：穷尽式技术报告
//!
//! 主题提到 "web" 且配置了网络搜索时先搜索；搜索失败只在报告上下文里注明。报告同时写入 `report` 产物。

use std::sync::Arc;

use async_trait::async_trait;

use super::{RunContext, Worker};
use crate::core::{AgentError, RunState, StateUpdate};
use crate::extract::truncate_chars;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::prompts;
use crate::retrieval::{render_snippets, Retriever, WebSearcher};

/// 本地上下文写入 prompt 的上限
const CONTEXT_CHARS: usize = 12_000;

pub struct DeepResearcher {
    llm: Arc<dyn LlmClient>,
    retriever: Option<Arc<dyn Retriever>>,
    web: Option<Arc<dyn WebSearcher>>,
    top_k: usize,
    web_results: usize,
}

impl DeepResearcher {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            retriever: None,
            web: None,
            top_k: 5,
            web_results: 5,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        self.retriever = Some(retriever);
        self.top_k = top_k;
        self
    }

    pub fn with_web(mut self, web: Arc<dyn WebSearcher>, num_results: usize) -> Self {
        self.web = Some(web);
        self.web_results = num_results;
        self
    }

    /// 主题是否要求网络数据
    fn wants_web(ctx: &RunContext) -> bool {
        let topic = format!(
            "{} {}",
            ctx.goal,
            ctx.task_input.as_deref().unwrap_or_default()
        );
        topic.to_lowercase().contains("web")
    }

    async fn web_findings(&self, ctx: &RunContext) -> String {
        if !Self::wants_web(ctx) {
            return String::new();
        }
        let Some(web) = &self.web else {
            return "(web search unavailable)".to_string();
        };
        tracing::info!("Performing web research on: {}", ctx.goal);
        match web.search(&ctx.goal, self.web_results).await {
            Ok(hits) if !hits.is_empty() => hits
                .iter()
                .map(|h| format!("- [{}]: {}", h.source, h.text))
                .collect::<Vec<_>>()
                .join("\n"),
            Ok(_) => "(web search returned no results)".to_string(),
            Err(e) => {
                tracing::warn!("Web search failed: {}", e);
                "(web search failed)".to_string()
            }
        }
    }
}

#[async_trait]
impl Worker for DeepResearcher {
    fn name(&self) -> &str {
        "DeepResearcher"
    }

    async fn invoke(&self, state: &RunState, ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        let mut local = state.knowledge.local_text();
        if let Some(retriever) = &self.retriever {
            let hits = retriever.search(&ctx.goal, self.top_k).await;
            if !hits.is_empty() {
                local.push_str("\n\n");
                local.push_str(&render_snippets(&hits));
            }
        }
        let web = self.web_findings(ctx).await;

        let mut prompt = format!(
            "STRICT TASK: PERFORM DEEP RESEARCH ON \"{}\"\n\n\
             LOCAL KNOWLEDGE BASE (context):\n{}\n\n\
             WEB FINDINGS (new data):\n{}\n\n\
             Instructions:\n\
             1. Analyze the local context deeply.\n\
             2. Provide a comprehensive technical report.\n\
             3. Cite relevant file names mentioned in the context.",
            ctx.goal,
            if local.trim().is_empty() {
                "(none)"
            } else {
                truncate_chars(local.trim(), CONTEXT_CHARS)
            },
            if web.is_empty() { "(none)" } else { web.as_str() },
        );
        prompt.push_str(&ctx.task_brief());

        tracing::info!("Deep research engine running for: {}", ctx.goal);
        let report = self
            .llm
            .complete(&[Message::system(prompts::DEEP_RESEARCHER), Message::user(prompt)])
            .await?;
        let report = report.trim().to_string();

        Ok(StateUpdate::from_sender(self.name())
            .web(self.name(), report.clone())
            .merged(self.name(), report.clone())
            .artifact("report", report)
            .message(
                Message::system(format!("Deep research on '{}' completed.", ctx.goal))
                    .from_sender(self.name()),
            ))
    }
}
