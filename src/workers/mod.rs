//! 工作者：Planner / Researcher / DeepResearcher / Archivist / Architect
//!
//! 每个工作者读取只读状态与 RunContext，返回 StateUpdate（sender + 知识追加或产物写入），由编排器合并。

pub mod architect;
pub mod archivist;
pub mod deep_researcher;
pub mod planner;
pub mod researcher;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RunState, StateUpdate, WorkerKind};

pub use architect::Architect;
pub use archivist::Archivist;
pub use deep_researcher::DeepResearcher;
pub use planner::{default_plan, Planner};
pub use researcher::Researcher;

/// 一次调用的上下文
#[derive(Clone, Debug)]
pub struct RunContext {
    pub thread_id: String,
    pub goal: String,
    /// 当前步骤描述（派发时注入）
    pub task_input: Option<String>,
    pub step_title: Option<String>,
    /// 上一次评审的拒绝理由
    pub critique_feedback: Option<String>,
    /// 软干预注入的修正稿
    pub baseline_draft: Option<String>,
    /// 模型上下文携带的最近会话条数
    pub context_messages: usize,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn from_state(state: &RunState, context_messages: usize, cancel: CancellationToken) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            goal: state.goal.clone(),
            task_input: state.task_input.clone(),
            step_title: state.current_step().map(|s| s.title.clone()),
            critique_feedback: state.critique_feedback.clone(),
            baseline_draft: state.baseline_draft.clone(),
            context_messages,
            cancel,
        }
    }

    /// 工作者 prompt 公共尾部：当前任务、评审意见、主管修正稿
    pub fn task_brief(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.step_title {
            out.push_str(&format!("\n\nCurrent step: {}", title));
        }
        if let Some(task) = &self.task_input {
            out.push_str(&format!("\nTask: {}", task));
        }
        if let Some(feedback) = &self.critique_feedback {
            out.push_str(&format!(
                "\n\nReviewer feedback on your previous attempt (address it):\n{}",
                feedback
            ));
        }
        if let Some(draft) = &self.baseline_draft {
            out.push_str(&format!(
                "\n\nThe director wrote this corrected baseline. Build on it:\n{}",
                draft
            ));
        }
        out
    }
}

/// 工作者接口
#[async_trait]
pub trait Worker: Send + Sync {
    /// 作为 sender / 检查点来源的名字
    fn name(&self) -> &str;

    async fn invoke(&self, state: &RunState, ctx: &RunContext) -> Result<StateUpdate, AgentError>;
}

/// WorkerKind → 工作者
#[derive(Clone, Default)]
pub struct WorkerSet {
    workers: HashMap<WorkerKind, Arc<dyn Worker>>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: WorkerKind, worker: Arc<dyn Worker>) {
        self.workers.insert(kind, worker);
    }

    pub fn with(mut self, kind: WorkerKind, worker: Arc<dyn Worker>) -> Self {
        self.insert(kind, worker);
        self
    }

    pub fn get(&self, kind: WorkerKind) -> Option<Arc<dyn Worker>> {
        self.workers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: WorkerKind) -> bool {
        self.workers.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Step, WorkerKind};

    #[test]
    fn test_task_brief_includes_feedback_and_baseline() {
        let mut state = RunState::new("t1");
        state.goal = "vector search".into();
        state.plan = vec![Step::new("step_1", "Research", "Survey ANN indexes", WorkerKind::Researcher)];
        state.task_input = Some("Survey ANN indexes".into());
        state.critique_feedback = Some("Cite benchmarks".into());
        state.baseline_draft = Some("HNSW, IVF".into());

        let ctx = RunContext::from_state(&state, 10, CancellationToken::new());
        let brief = ctx.task_brief();
        assert!(brief.contains("Current step: Research"));
        assert!(brief.contains("Cite benchmarks"));
        assert!(brief.contains("HNSW, IVF"));
    }
}
