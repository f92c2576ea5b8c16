//! 计划修订：步骤通过后，只允许改写尚未开始的后缀 `plan[current+1..]`

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::core::{RunState, Step};
use crate::extract::{parse_structured, truncate_chars};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::prompts;
use crate::workers::planner::RawStep;

const OUTPUT_PREVIEW_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
struct RefineDoc {
    #[serde(default)]
    revise: bool,
    #[serde(default)]
    steps: Vec<RawStep>,
}

/// 保留 `plan[..=current]`，用新步骤替换其后的部分；新步骤拿新 id 且为 pending
pub fn splice_suffix(plan: &[Step], current: usize, suffix: Vec<RawStep>) -> Vec<Step> {
    let keep = (current + 1).min(plan.len());
    let mut out: Vec<Step> = plan[..keep].to_vec();
    let mut taken: HashSet<String> = out.iter().map(|s| s.id.clone()).collect();

    for (i, raw) in suffix.into_iter().enumerate() {
        let mut id = format!("step_{}", keep + i + 1);
        let mut n = 1;
        while taken.contains(&id) {
            id = format!("step_{}_r{}", keep + i + 1, n);
            n += 1;
        }
        taken.insert(id.clone());
        out.push(Step::new(
            id,
            raw.title,
            raw.description,
            crate::core::WorkerKind::parse_assigned(&raw.assigned_to),
        ));
    }
    out
}

pub struct PlanRefiner {
    llm: Arc<dyn LlmClient>,
    enabled: bool,
}

impl PlanRefiner {
    pub fn new(llm: Arc<dyn LlmClient>, enabled: bool) -> Self {
        Self { llm, enabled }
    }

    /// 返回修订后的完整计划；不修订 / 解析失败 / 无剩余步骤时为 None
    pub async fn refine(&self, state: &RunState, plan: &[Step], approved_output: &str) -> Option<Vec<Step>> {
        let current = state.current_step_index;
        if !self.enabled || current + 1 >= plan.len() {
            return None;
        }

        let list = |steps: &[Step]| {
            steps
                .iter()
                .map(|s| format!("- {} [{}]: {}", s.title, s.assigned_worker, s.description))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let prompt = format!(
            "Goal: {}\n\nCompleted steps:\n{}\n\nRemaining steps:\n{}\n\nApproved output of the latest step:\n{}",
            state.goal,
            list(&plan[..=current]),
            list(&plan[current + 1..]),
            truncate_chars(approved_output, OUTPUT_PREVIEW_CHARS)
        );
        let system = format!("{}\n\n{}", prompts::supervisor_persona(), prompts::PLAN_REVIEWER);

        let text = match self
            .llm
            .complete(&[Message::system(system), Message::user(prompt)])
            .await
        {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Plan refinement skipped: {}", e);
                return None;
            }
        };

        match parse_structured::<RefineDoc>(&text) {
            Some(doc) if doc.revise && !doc.steps.is_empty() => {
                tracing::info!(
                    "Plan refined: {} remaining steps replaced by {}",
                    plan.len() - current - 1,
                    doc.steps.len()
                );
                Some(splice_suffix(plan, current, doc.steps))
            }
            _ => None,
        }
    }
}
