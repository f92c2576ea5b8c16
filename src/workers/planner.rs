//! Planner：把用户请求拆成线性执行计划
//!
//! 模型输出 `{"steps":[...]}`；解析失败或为空时用默认三步计划（Research → Drafting → Finalize）。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{RunContext, Worker};
use crate::core::{AgentError, Phase, RunState, StateUpdate, Step, WorkerKind};
use crate::extract::parse_structured;
use crate::llm::LlmClient;
use crate::memory::{latest_user_message, Message, Role};
use crate::prompts;
use crate::retrieval::{render_snippets, Retriever};

/// 计划 JSON 中的一步（宽松解析，assigned_to 未知时回落 Researcher）
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RawStep {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[schemars(with = "WorkerKind")]
    pub assigned_to: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PlanDoc {
    pub steps: Vec<RawStep>,
}

/// 默认三步计划
pub fn default_plan() -> Vec<Step> {
    vec![
        Step::new("step_1", "Research", "Analyze request", WorkerKind::Researcher),
        Step::new("step_2", "Drafting", "Draft content", WorkerKind::Researcher),
        Step::new("step_3", "Finalize", "Generate Output", WorkerKind::Architect),
    ]
}

/// 规范化：id 缺失或重复时按序号重编，状态一律 pending
pub fn normalize_steps(raw: Vec<RawStep>, id_prefix: &str, offset: usize) -> Vec<Step> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .enumerate()
        .map(|(i, r)| {
            let fallback = format!("{}{}", id_prefix, offset + i + 1);
            let id = match r.id {
                Some(id) if !id.trim().is_empty() && seen.insert(id.clone()) => id,
                _ => {
                    seen.insert(fallback.clone());
                    fallback
                }
            };
            Step::new(
                id,
                r.title,
                r.description,
                WorkerKind::parse_assigned(&r.assigned_to),
            )
        })
        .collect()
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    retriever: Option<Arc<dyn Retriever>>,
    top_k: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            retriever: None,
            top_k: 3,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        self.retriever = Some(retriever);
        self.top_k = top_k;
        self
    }

    fn system_prompt() -> String {
        let schema = schemars::schema_for!(PlanDoc);
        let schema = serde_json::to_string_pretty(&schema).unwrap_or_default();
        prompts::PLANNER.replace("{schema}", &schema)
    }

    /// 解析模型输出；失败或空计划时返回默认计划
    pub fn parse_plan(text: &str) -> Vec<Step> {
        match parse_structured::<PlanDoc>(text) {
            Some(doc) if !doc.steps.is_empty() => normalize_steps(doc.steps, "step_", 0),
            _ => {
                tracing::warn!("Plan parsing failed, falling back to default plan");
                default_plan()
            }
        }
    }
}

#[async_trait]
impl Worker for Planner {
    fn name(&self) -> &str {
        "Planner"
    }

    async fn invoke(&self, state: &RunState, ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        let goal = latest_user_message(&state.conversation)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "General Inquiry".to_string());

        let earlier: Vec<String> = state
            .recent_messages(ctx.context_messages)
            .iter()
            .filter(|m| m.role == Role::User && m.content != goal)
            .map(|m| format!("- {}", m.content))
            .collect();

        let mut prompt = format!("User Goal: {}", goal);
        if !earlier.is_empty() {
            prompt.push_str(&format!("\n\nEarlier requests in this thread:\n{}", earlier.join("\n")));
        }
        if let Some(retriever) = &self.retriever {
            let hits = retriever.search(&goal, self.top_k).await;
            if !hits.is_empty() {
                prompt.push_str(&format!(
                    "\n\nLocal documents that may be relevant:\n{}",
                    render_snippets(&hits)
                ));
            }
        }

        tracing::info!("Generating project plan for: {}", goal);
        let plan = match self
            .llm
            .complete(&[Message::system(Self::system_prompt()), Message::user(prompt)])
            .await
        {
            Ok(text) => Self::parse_plan(&text),
            Err(e) => {
                tracing::warn!("Planner model failed ({}), using default plan", e);
                default_plan()
            }
        };

        let summary = plan
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {} [{}]", i + 1, s.title, s.assigned_worker))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(StateUpdate {
            goal: Some(goal),
            current_step_index: Some(0),
            iteration_count: Some(0),
            task_input: Some(None),
            critique_feedback: Some(None),
            baseline_draft: Some(None),
            plan: Some(plan.clone()),
            ..StateUpdate::new()
                .message(
                    Message::system(format!(
                        "Planning complete. Total steps: {}\n{}",
                        plan.len(),
                        summary
                    ))
                    .from_sender("Planner"),
                )
                .phase(Phase::AwaitingDispatch { step: 0 })
        })
    }
}
