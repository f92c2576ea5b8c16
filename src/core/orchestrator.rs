//! 编排器：回合驱动的主控循环
//!
//! 每次运行从一次主管回合开始，之后按 phase 选择组件：
//! NoPlan → Planner，WorkerRunning → 对应 worker（返回后置为 AwaitingCritique），Done → 结束，其余 → 主管。
//! 每个组件调用都与该 thread 的 CancellationToken 竞争；被取消的调用结果直接丢弃，不提交。
//! 每次合并后写检查点，再推送事件、落盘产物。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{
    AgentError, Phase, RecoveryAction, RecoveryEngine, RunEvent, RunState, RunView,
    SessionRegistry, StateUpdate, WorkerKind,
};
use crate::extract::truncate_chars;
use crate::memory::{Message, Role};
use crate::persistence::{ArtifactSink, CheckpointMeta, CheckpointStore, ThreadSummary};
use crate::retrieval::{IngestSummary, Retriever};
use crate::supervisor::{self, Supervisor};
use crate::workers::{RunContext, Worker, WorkerSet};

/// 事件发送端（CLI / WebSocket 各自持有接收端）
pub type EventSender = mpsc::UnboundedSender<RunEvent>;

/// 一次运行的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// 被用户暂停或被新消息抢占；已提交状态可恢复
    Paused,
    /// 达到 max_turns 仍未完成
    TurnLimit,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Paused => "paused",
            RunOutcome::TurnLimit => "turn_limit",
        }
    }
}

/// 返回给调用方（HTTP / CLI）的运行结果
#[derive(Debug, Clone, Serialize)]
pub struct RunReply {
    pub thread_id: String,
    /// 最近一条非用户消息
    pub reply: String,
    pub current_step: Option<String>,
    pub outcome: RunOutcome,
    pub artifacts: BTreeMap<String, String>,
}

impl RunReply {
    fn from_state(state: &RunState, outcome: RunOutcome) -> Self {
        let reply = state
            .conversation
            .iter()
            .rev()
            .find(|m| m.role != Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Self {
            thread_id: state.thread_id.clone(),
            reply,
            current_step: state.current_step().map(|s| s.title.clone()),
            outcome,
            artifacts: state.artifacts.clone(),
        }
    }
}

/// 本回合由谁执行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Supervisor,
    Planner,
    Worker(WorkerKind),
}

fn next_turn(phase: &Phase) -> Option<Turn> {
    match phase {
        Phase::NoPlan => Some(Turn::Planner),
        Phase::WorkerRunning { worker, .. } => Some(Turn::Worker(*worker)),
        Phase::Done => None,
        Phase::AwaitingDispatch { .. } | Phase::AwaitingCritique { .. } => Some(Turn::Supervisor),
    }
}

fn emit(events: Option<&EventSender>, event: RunEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// 运行入口失败：推送 Error 事件后原样返回错误
fn fail(events: Option<&EventSender>, e: AgentError) -> AgentError {
    tracing::error!("Run failed before start: {}", e);
    emit(
        events,
        RunEvent::Error {
            message: e.to_string(),
        },
    );
    e
}

pub struct Orchestrator {
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) artifacts: Option<ArtifactSink>,
    pub(crate) supervisor: Supervisor,
    pub(crate) planner: Arc<dyn Worker>,
    pub(crate) workers: WorkerSet,
    pub(crate) retriever: Option<Arc<dyn Retriever>>,
    pub(crate) sessions: SessionRegistry,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) max_turns: usize,
    pub(crate) keep_checkpoints: usize,
    pub(crate) context_messages: usize,
}

impl Orchestrator {
    /// 提交一条用户消息：抢占该 thread 的当前运行，排队取锁后运行到完成 / 暂停 / 回合上限
    pub async fn submit(
        &self,
        thread_id: &str,
        message: &str,
        events: Option<EventSender>,
    ) -> Result<RunReply, AgentError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(fail(events.as_ref(), AgentError::InvalidState("empty message".into())));
        }

        let session = self.sessions.get_or_create(thread_id).await;
        let ticket = session.preempt().await;
        let (_guard, token) = session.begin_run(ticket).await;

        let mut state = match self.store.latest(thread_id).await {
            Ok(Some(cp)) => cp.state,
            Ok(None) => RunState::new(thread_id),
            Err(e) => return Err(fail(events.as_ref(), e.into())),
        };
        state.apply(StateUpdate::new().message(Message::user(message)));
        emit(
            events.as_ref(),
            RunEvent::UserEcho {
                content: message.to_string(),
            },
        );
        if let Err(e) = self.store.put(thread_id, "user", &state).await {
            return Err(fail(events.as_ref(), e.into()));
        }
        tracing::info!("Run started on thread {}", thread_id);

        self.drive(state, token, events.as_ref()).await
    }

    /// 从最新检查点继续（暂停或进程重启之后）
    pub async fn resume(
        &self,
        thread_id: &str,
        events: Option<EventSender>,
    ) -> Result<RunReply, AgentError> {
        let session = self.sessions.get_or_create(thread_id).await;
        let (_guard, token) = session.begin_run(session.generation()).await;

        let state = match self.store.latest(thread_id).await {
            Ok(Some(cp)) => cp.state,
            Ok(None) => {
                let e = AgentError::InvalidState(format!("unknown thread '{}'", thread_id));
                return Err(fail(events.as_ref(), e));
            }
            Err(e) => return Err(fail(events.as_ref(), e.into())),
        };
        if state.phase == Phase::Done {
            emit(
                events.as_ref(),
                RunEvent::Done {
                    status: RunOutcome::Completed.as_str().to_string(),
                },
            );
            return Ok(RunReply::from_state(&state, RunOutcome::Completed));
        }
        tracing::info!(
            "Resuming thread {} at step {} ({})",
            thread_id,
            state.current_step_index + 1,
            state.phase.label()
        );
        self.drive(state, token, events.as_ref()).await
    }

    /// 暂停：取消当前运行及排队中的运行，本身不排队；返回该 thread 是否存在会话
    pub async fn cancel(&self, thread_id: &str) -> bool {
        let found = self.sessions.cancel(thread_id).await;
        if found {
            tracing::info!("Cancellation requested for thread {}", thread_id);
        }
        found
    }

    pub async fn is_running(&self, thread_id: &str) -> bool {
        match self.sessions.get(thread_id).await {
            Some(s) => s.is_running(),
            None => false,
        }
    }

    /// 最新已提交状态
    pub async fn state(&self, thread_id: &str) -> Result<Option<RunState>, AgentError> {
        Ok(self.store.latest(thread_id).await?.map(|cp| cp.state))
    }

    pub async fn snapshot(&self, thread_id: &str) -> Result<Option<RunView>, AgentError> {
        Ok(self.state(thread_id).await?.map(|s| s.project()))
    }

    pub async fn threads(&self) -> Result<Vec<ThreadSummary>, AgentError> {
        Ok(self.store.threads().await?)
    }

    pub async fn history(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>, AgentError> {
        Ok(self.store.history(thread_id).await?)
    }

    /// 向本地索引导入资料
    pub async fn ingest(&self, paths: &[PathBuf]) -> Result<IngestSummary, AgentError> {
        match &self.retriever {
            Some(r) => r.ingest(paths).await,
            None => Err(AgentError::Config("no retriever configured".into())),
        }
    }

    async fn run_turn(
        &self,
        turn: Turn,
        state: &RunState,
        ctx: &RunContext,
    ) -> Result<(String, StateUpdate), AgentError> {
        match turn {
            Turn::Supervisor => Ok((
                supervisor::SENDER.to_string(),
                self.supervisor.turn(state).await,
            )),
            Turn::Planner => {
                let update = self.planner.invoke(state, ctx).await?;
                Ok((self.planner.name().to_string(), update))
            }
            Turn::Worker(kind) => {
                let worker = self
                    .workers
                    .get(kind)
                    .ok_or_else(|| AgentError::Config(format!("no worker registered for {}", kind)))?;
                let update = worker.invoke(state, ctx).await?;
                Ok((worker.name().to_string(), update))
            }
        }
    }

    async fn drive(
        &self,
        mut state: RunState,
        token: CancellationToken,
        events: Option<&EventSender>,
    ) -> Result<RunReply, AgentError> {
        let mut turn = Turn::Supervisor;

        for _ in 0..self.max_turns {
            let ctx = RunContext::from_state(&state, self.context_messages, token.clone());
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(AgentError::Cancelled),
                r = self.run_turn(turn, &state, &ctx) => r,
            };

            let (source, mut update) = match result {
                Ok(v) => v,
                Err(e) => {
                    let action = if token.is_cancelled() {
                        RecoveryAction::Pause
                    } else {
                        self.recovery.handle(&e)
                    };
                    match (action, turn) {
                        (RecoveryAction::Pause, _) => {
                            tracing::info!(
                                "Run on thread {} paused at step {}",
                                state.thread_id,
                                state.current_step_index + 1
                            );
                            emit(
                                events,
                                RunEvent::Cancelled {
                                    message: "Run paused. Send /resume or a new message to continue."
                                        .into(),
                                },
                            );
                            return Ok(RunReply::from_state(&state, RunOutcome::Paused));
                        }
                        (RecoveryAction::Degrade(note), Turn::Worker(kind)) => {
                            tracing::warn!("{} degraded: {}", kind, note);
                            let update = StateUpdate::from_sender(kind.label())
                                .message(Message::system(note).from_sender(kind.label()));
                            (kind.label().to_string(), update)
                        }
                        _ => {
                            tracing::error!("Run on thread {} aborted: {}", state.thread_id, e);
                            emit(
                                events,
                                RunEvent::Error {
                                    message: e.to_string(),
                                },
                            );
                            return Err(e);
                        }
                    }
                }
            };

            if let Turn::Worker(worker) = turn {
                update.phase = Some(Phase::AwaitingCritique {
                    step: state.current_step_index,
                    worker,
                });
            }

            let messages = update.messages.clone();
            let artifacts = update.artifacts.clone();
            state.apply(update);

            if let Err(e) = self.store.put(&state.thread_id, &source, &state).await {
                let e = AgentError::from(e);
                tracing::error!("Checkpoint write failed on thread {}: {}", state.thread_id, e);
                emit(
                    events,
                    RunEvent::Error {
                        message: e.to_string(),
                    },
                );
                return Err(e);
            }
            if self.keep_checkpoints > 0 {
                if let Err(e) = self.store.prune(&state.thread_id, self.keep_checkpoints).await {
                    tracing::warn!("Checkpoint prune failed: {}", e);
                }
            }

            for m in messages {
                let sender = m.sender.clone().unwrap_or_else(|| source.clone());
                emit(events, RunEvent::log(sender, m.content));
            }
            for (key, content) in &artifacts {
                emit(
                    events,
                    RunEvent::ArtifactUpdate {
                        key: key.clone(),
                        content: content.clone(),
                    },
                );
            }
            self.persist_artifacts(&state, &artifacts).await;

            match next_turn(&state.phase) {
                Some(t) => turn = t,
                None => {
                    tracing::info!("Run on thread {} completed", state.thread_id);
                    emit(
                        events,
                        RunEvent::Done {
                            status: RunOutcome::Completed.as_str().to_string(),
                        },
                    );
                    return Ok(RunReply::from_state(&state, RunOutcome::Completed));
                }
            }
        }

        tracing::warn!(
            "Run on thread {} hit the turn limit ({})",
            state.thread_id,
            self.max_turns
        );
        emit(
            events,
            RunEvent::Done {
                status: RunOutcome::TurnLimit.as_str().to_string(),
            },
        );
        Ok(RunReply::from_state(&state, RunOutcome::TurnLimit))
    }

    /// 产物落盘：report → markdown，slide_* → tsx；失败只告警
    async fn persist_artifacts(&self, state: &RunState, written: &BTreeMap<String, String>) {
        let Some(sink) = &self.artifacts else {
            return;
        };
        for (key, content) in written {
            let (name, ext) = if key == "report" {
                (
                    format!("deep_investigation_{}", truncate_chars(&state.goal, 20)),
                    "md",
                )
            } else if key.starts_with("slide_") {
                (key.clone(), "tsx")
            } else {
                (key.clone(), "txt")
            };
            match sink.write(&name, content, ext, Some(&state.thread_id)).await {
                Ok(path) => tracing::info!("Artifact {} saved to {}", key, path.display()),
                Err(e) => tracing::warn!("Failed to save artifact {}: {}", key, e),
            }
        }
    }
}
