//! 主管 / 路由：计划驱动的状态机
//!
//! 每个主管回合按优先级：
//! 1. 最新会话是用户消息 → 重新规划
//! 2. 计划为空 → 规划
//! 3. 步骤全部完成 → Done
//! 4. 当前步等待评审 → 评审并按结论 / 升级阶梯处理
//! 5. 否则派发当前步给指定 worker

pub mod critic;
pub mod escalation;
pub mod refinement;

use std::sync::Arc;

use crate::config::SupervisorSection;
use crate::core::{Phase, RunState, StateUpdate, StepStatus, WorkerKind};
use crate::extract::{strip_code_fences, truncate_chars};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::prompts;

pub use critic::{is_status_only, parse_verdict, Critic, CritiqueRequest, Verdict};
pub use escalation::{Escalation, EscalationLadder};
pub use refinement::{splice_suffix, PlanRefiner};

pub const SENDER: &str = "Supervisor";

/// 主管行为参数
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub soft_thresholds: Vec<u32>,
    pub hard_threshold: u32,
    pub critique_char_budget: usize,
    pub plan_refinement: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        SupervisorSection::default().into()
    }
}

impl From<SupervisorSection> for SupervisorSettings {
    fn from(s: SupervisorSection) -> Self {
        Self {
            soft_thresholds: s.soft_thresholds,
            hard_threshold: s.hard_threshold,
            critique_char_budget: s.critique_char_budget,
            plan_refinement: s.plan_refinement,
        }
    }
}

/// 路由决策（纯函数结果）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 新的用户请求：丢弃计划重新规划
    Replan,
    /// 尚无计划
    Plan,
    Complete,
    Critique { step: usize, worker: WorkerKind },
    Dispatch { step: usize },
}

/// 根据当前状态决定主管本回合要做什么
pub fn route(state: &RunState) -> Route {
    if state.conversation.last().map(|m| m.is_user()).unwrap_or(false) {
        return Route::Replan;
    }
    if state.plan.is_empty() {
        return Route::Plan;
    }
    if state.is_complete() {
        return Route::Complete;
    }
    let index = state.current_step_index;
    match state.phase {
        Phase::AwaitingCritique { step, worker } if step == index => {
            Route::Critique { step, worker }
        }
        _ => Route::Dispatch { step: index },
    }
}

pub struct Supervisor {
    critic: Critic,
    ladder: EscalationLadder,
    refiner: PlanRefiner,
    director: Arc<dyn LlmClient>,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        critic_llm: Arc<dyn LlmClient>,
        director_llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            critic: Critic::new(critic_llm, settings.critique_char_budget),
            ladder: EscalationLadder::new(settings.soft_thresholds, settings.hard_threshold),
            refiner: PlanRefiner::new(director_llm.clone(), settings.plan_refinement),
            director: director_llm,
        }
    }

    /// 执行一个主管回合，返回要合并的更新
    pub async fn turn(&self, state: &RunState) -> StateUpdate {
        match route(state) {
            Route::Replan => {
                tracing::info!("New user request on thread {}, re-planning", state.thread_id);
                reset_for_planning(
                    "New request received. Re-planning from scratch.",
                )
            }
            Route::Plan => reset_for_planning("No plan yet. Planning."),
            Route::Complete => {
                let summary = format!(
                    "All {} steps complete for '{}'. Artifacts: {}",
                    state.plan.len(),
                    state.goal,
                    if state.artifacts.is_empty() {
                        "(none)".to_string()
                    } else {
                        state.artifacts.keys().cloned().collect::<Vec<_>>().join(", ")
                    }
                );
                StateUpdate::new()
                    .phase(Phase::Done)
                    .message(Message::agent(summary).from_sender(SENDER))
            }
            Route::Dispatch { step } => self.dispatch(state, step),
            Route::Critique { step, worker } => self.critique(state, step, worker).await,
        }
    }

    fn dispatch(&self, state: &RunState, index: usize) -> StateUpdate {
        let mut plan = state.plan.clone();
        plan[index].status = StepStatus::InProgress;
        let step = &state.plan[index];
        let worker = step.assigned_worker;
        let line = format!(
            "Step {}/{} '{}' dispatched to {}.",
            index + 1,
            state.plan.len(),
            step.title,
            worker
        );
        tracing::info!("{}", line);
        StateUpdate {
            task_input: Some(Some(step.description.clone())),
            plan: Some(plan),
            ..StateUpdate::new()
                .phase(Phase::WorkerRunning { step: index, worker })
                .message(Message::system(line).from_sender(SENDER))
        }
    }

    async fn critique(&self, state: &RunState, index: usize, worker: WorkerKind) -> StateUpdate {
        let count = state.iteration_count;
        if self.ladder.assess(count) == Escalation::Hard {
            let feedback = state.critique_feedback.clone().unwrap_or_default();
            return self.hard_intervene(state, index, worker, count, &feedback).await;
        }

        let output = state
            .last_output
            .as_ref()
            .map(|o| o.payload.as_str())
            .unwrap_or("");
        let step = &state.plan[index];
        let verdict = self
            .critic
            .evaluate(CritiqueRequest {
                goal: &state.goal,
                step,
                future_steps: state.future_steps(),
                worker,
                output,
            })
            .await;

        let Some(feedback) = verdict.feedback() else {
            let rationale = match &verdict {
                Verdict::Approved { rationale } => rationale.clone(),
                _ => String::new(),
            };
            return self.approve(state, index, output, &rationale).await;
        };

        let n = count + 1;
        tracing::info!(
            "Step {} {} by critique (rejection {}): {}",
            index + 1,
            verdict.label(),
            n,
            truncate_chars(&feedback, 200)
        );
        match self.ladder.assess(n) {
            Escalation::Hard => self.hard_intervene(state, index, worker, n, &feedback).await,
            Escalation::Soft => {
                let draft = self
                    .director_draft(state, index, worker, &feedback)
                    .await
                    .unwrap_or_else(|| output.to_string());
                StateUpdate {
                    iteration_count: Some(n),
                    critique_feedback: Some(Some(feedback)),
                    baseline_draft: Some(Some(draft)),
                    ..StateUpdate::new()
                        .phase(Phase::WorkerRunning { step: index, worker })
                        .message(
                            Message::system(format!(
                                "Soft intervention after {} rejections: the director drafted a baseline for step {}. Back to {}.",
                                n,
                                index + 1,
                                worker
                            ))
                            .from_sender(SENDER),
                        )
                }
            }
            Escalation::None => StateUpdate {
                iteration_count: Some(n),
                critique_feedback: Some(Some(feedback.clone())),
                ..StateUpdate::new()
                    .phase(Phase::WorkerRunning { step: index, worker })
                    .message(
                        Message::system(format!(
                            "Step {} rejected (attempt {}): {}",
                            index + 1,
                            n,
                            feedback
                        ))
                        .from_sender(SENDER),
                    )
            },
        }
    }

    /// 通过：标记完成，必要时修订后缀，再推进
    async fn approve(&self, state: &RunState, index: usize, output: &str, rationale: &str) -> StateUpdate {
        let mut plan = state.plan.clone();
        plan[index].status = StepStatus::Completed;
        if let Some(refined) = self.refiner.refine(state, &plan, output).await {
            plan = refined;
        }
        let next = index + 1;
        let mut line = format!("Step {} '{}' approved.", index + 1, plan[index].title);
        if !rationale.is_empty() {
            line.push(' ');
            line.push_str(rationale);
        }
        tracing::info!("Step {} approved on thread {}", index + 1, state.thread_id);
        advance(plan, next).message(Message::system(line).from_sender(SENDER))
    }

    /// 硬干预：主管代写写入该 worker 的字段，步骤标记 escalated 并推进
    async fn hard_intervene(
        &self,
        state: &RunState,
        index: usize,
        worker: WorkerKind,
        count: u32,
        feedback: &str,
    ) -> StateUpdate {
        tracing::warn!(
            "Hard intervention on step {} after {} rejections",
            index + 1,
            count
        );
        let draft = match self.director_draft(state, index, worker, feedback).await {
            Some(d) => d,
            None => state
                .last_output
                .as_ref()
                .map(|o| o.payload.clone())
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| format!("(director could not draft step {})", index + 1)),
        };

        let mut plan = state.plan.clone();
        plan[index].status = StepStatus::Escalated;
        let contributor = format!("{} (director)", worker);
        let update = advance(plan, index + 1);
        let update = match worker {
            WorkerKind::Architect => update.artifact("slide_1", draft),
            WorkerKind::Researcher => update
                .web(&contributor, draft.clone())
                .merged(&contributor, draft),
            WorkerKind::DeepResearcher => update
                .web(&contributor, draft.clone())
                .merged(&contributor, draft.clone())
                .artifact("report", draft),
            WorkerKind::Archivist => update
                .local(&contributor, draft.clone())
                .merged(&contributor, draft),
        };
        update.message(
            Message::system(format!(
                "Hard intervention: the director completed step {} on behalf of {} after {} rejections.",
                index + 1,
                worker,
                count
            ))
            .from_sender(SENDER),
        )
    }

    /// 主管模型写修正稿；失败或为空时 None
    async fn director_draft(
        &self,
        state: &RunState,
        index: usize,
        worker: WorkerKind,
        feedback: &str,
    ) -> Option<String> {
        let step = state.plan.get(index)?;
        let last = state
            .last_output
            .as_ref()
            .map(|o| o.payload.as_str())
            .unwrap_or("");
        let prompt = format!(
            "Goal: {}\nStep: {} [{}]\nDescription: {}\n\nLatest feedback:\n{}\n\nWorker's latest output:\n{}\n\nTeam knowledge:\n{}",
            state.goal,
            step.title,
            worker,
            step.description,
            if feedback.is_empty() { "(none)" } else { feedback },
            truncate_chars(last, 8000),
            truncate_chars(&state.knowledge.merged_text(), 8000)
        );
        let system = format!("{}\n\n{}", prompts::supervisor_persona(), prompts::INTERVENTION);
        match self
            .director
            .complete(&[Message::system(system), Message::user(prompt)])
            .await
        {
            Ok(text) => {
                let text = if worker == WorkerKind::Architect {
                    strip_code_fences(&text)
                } else {
                    text.trim().to_string()
                };
                if is_status_only(&text) {
                    None
                } else {
                    Some(text)
                }
            }
            Err(e) => {
                tracing::warn!("Director draft failed: {}", e);
                None
            }
        }
    }
}

/// 清空计划与进度，交给 Planner
fn reset_for_planning(line: &str) -> StateUpdate {
    StateUpdate {
        plan: Some(Vec::new()),
        current_step_index: Some(0),
        iteration_count: Some(0),
        task_input: Some(None),
        critique_feedback: Some(None),
        baseline_draft: Some(None),
        ..StateUpdate::new()
            .phase(Phase::NoPlan)
            .message(Message::system(line).from_sender(SENDER))
    }
}

/// 推进到 next：计数清零、清除反馈与修正稿
fn advance(plan: Vec<crate::core::Step>, next: usize) -> StateUpdate {
    StateUpdate {
        plan: Some(plan),
        current_step_index: Some(next),
        iteration_count: Some(0),
        task_input: Some(None),
        critique_feedback: Some(None),
        baseline_draft: Some(None),
        ..StateUpdate::new().phase(Phase::AwaitingDispatch { step: next })
    }
}
