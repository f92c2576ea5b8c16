//! Critic：评审门，对当前步骤的 worker 输出给出 Verdict
//!
//! 失败即拒绝：空输出或仅有状态消息（如 "Done."）不调用模型直接 Rejected；模型报错、输出无法解析也是 Rejected。
//! prompt 中列出后续步骤，越界完成后续步骤的输出同样拒绝。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::{Step, WorkerKind};
use crate::extract::{extract_json_block, truncate_chars};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::prompts;

/// 评审结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approved { rationale: String },
    Rejected { reason: String },
    /// 缺少外部信息；路由与 Rejected 相同
    InsufficientData { reason: String },
}

impl Verdict {
    /// 拒绝时写入 critique_feedback 的文本
    pub fn feedback(&self) -> Option<String> {
        match self {
            Verdict::Approved { .. } => None,
            Verdict::Rejected { reason } => Some(reason.clone()),
            Verdict::InsufficientData { reason } => Some(format!("[INSUFFICIENT_DATA] {}", reason)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Approved { .. } => "APPROVED",
            Verdict::Rejected { .. } => "REJECTED",
            Verdict::InsufficientData { .. } => "INSUFFICIENT_DATA",
        }
    }
}

#[derive(Deserialize)]
struct VerdictDoc {
    verdict: String,
    #[serde(default, alias = "rationale")]
    reason: String,
}

fn classify(head: &str, reason: String) -> Option<Verdict> {
    let head = head
        .trim_start_matches(|c: char| c == '*' || c == '#' || c == '`' || c.is_whitespace())
        .to_uppercase();
    if head.starts_with("INSUFFICIENT_DATA") || head.starts_with("INSUFFICIENT DATA") {
        Some(Verdict::InsufficientData { reason })
    } else if head.starts_with("REJECT") {
        Some(Verdict::Rejected { reason })
    } else if head.starts_with("APPROVE") {
        Some(Verdict::Approved { rationale: reason })
    } else {
        None
    }
}

/// 把评审模型的自由文本解析为 Verdict；无法识别时为 Rejected
pub fn parse_verdict(text: &str) -> Verdict {
    if let Some(doc) = extract_json_block(text)
        .and_then(|json| serde_json::from_str::<VerdictDoc>(&json).ok())
    {
        if let Some(v) = classify(&doc.verdict, doc.reason) {
            return v;
        }
    }

    let trimmed = text.trim();
    if let Some(first) = trimmed.lines().find(|l| !l.trim().is_empty()) {
        let rest: String = trimmed
            .lines()
            .skip_while(|l| l.trim().is_empty())
            .skip(1)
            .collect::<Vec<_>>()
            .join("\n");
        let inline = first
            .split_once(':')
            .map(|(_, r)| r.trim().to_string())
            .unwrap_or_default();
        let reason = [inline, rest.trim().to_string()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(v) = classify(first, reason) {
            return v;
        }
    }

    tracing::warn!("Unparseable critique, treating as rejection");
    Verdict::Rejected {
        reason: format!(
            "Critique could not be parsed; resubmit the deliverable. Reviewer said: {}",
            truncate_chars(trimmed, 500)
        ),
    }
}

const STATUS_PHRASES: [&str; 12] = [
    "done",
    "ok",
    "okay",
    "complete",
    "completed",
    "finished",
    "task complete",
    "task completed",
    "step complete",
    "step completed",
    "all done",
    "n a",
];

/// 输出是否只是状态消息（没有实质内容）
pub fn is_status_only(payload: &str) -> bool {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed.lines().count() > 1 || trimmed.chars().count() > 40 {
        return false;
    }
    let norm: String = trimmed
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let norm = norm.split_whitespace().collect::<Vec<_>>().join(" ");
    norm.is_empty() || STATUS_PHRASES.contains(&norm.as_str())
}

/// 一次评审的输入
#[derive(Debug, Clone, Copy)]
pub struct CritiqueRequest<'a> {
    pub goal: &'a str,
    pub step: &'a Step,
    pub future_steps: &'a [Step],
    pub worker: WorkerKind,
    pub output: &'a str,
}

pub struct Critic {
    llm: Arc<dyn LlmClient>,
    char_budget: usize,
}

impl Critic {
    pub fn new(llm: Arc<dyn LlmClient>, char_budget: usize) -> Self {
        Self {
            llm,
            char_budget: char_budget.max(1),
        }
    }

    fn build_prompt(&self, req: &CritiqueRequest<'_>) -> String {
        let checklist = if req.worker.is_research() {
            prompts::CONTENT_CHECKLIST
        } else {
            prompts::DESIGN_CHECKLIST
        }
        .replace("{topic}", req.goal);

        let future = if req.future_steps.is_empty() {
            "(none)".to_string()
        } else {
            req.future_steps
                .iter()
                .map(|s| format!("- {} [{}]: {}", s.title, s.assigned_worker, s.description))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "{}\n\nGoal: {}\nCurrent step: {} [{}]\nStep description: {}\n\nFuture steps (out of scope for this output):\n{}\n\nOutput from {}:\n{}",
            checklist,
            req.goal,
            req.step.title,
            req.worker,
            req.step.description,
            future,
            req.worker,
            truncate_chars(req.output, self.char_budget)
        )
    }

    pub async fn evaluate(&self, req: CritiqueRequest<'_>) -> Verdict {
        if is_status_only(req.output) {
            return Verdict::Rejected {
                reason: format!(
                    "{} returned no substantive output for '{}'. Deliver the actual content.",
                    req.worker, req.step.title
                ),
            };
        }

        let system = format!("{}\n\n{}", prompts::supervisor_persona(), prompts::CRITIQUE_GATE);
        let messages = [Message::system(system), Message::user(self.build_prompt(&req))];
        match self.llm.complete(&messages).await {
            Ok(text) => parse_verdict(&text),
            Err(e) => {
                tracing::warn!("Critique model failed: {}", e);
                Verdict::Rejected {
                    reason: format!("Critique unavailable ({}); output could not be verified.", e),
                }
            }
        }
    }
}
