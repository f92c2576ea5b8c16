//! 监督循环集成测试：桩工作者 + 脚本化模型，检查点谱系作为观测手段

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use infinite::core::{
    AgentError, Phase, RunEvent, RunOutcome, RunState, StateUpdate, Step, StepStatus, WorkerKind,
};
use infinite::llm::{LlmError, MockLlmClient, ScriptedLlmClient};
use infinite::memory::{latest_user_message, Message};
use infinite::persistence::{
    ArtifactSink, Checkpoint, CheckpointMeta, CheckpointStore, MemoryCheckpointStore,
    PersistenceError, SqliteCheckpointStore, ThreadSummary,
};
use infinite::supervisor::SupervisorSettings;
use infinite::workers::{RunContext, Worker};
use infinite::{LabBuilder, Orchestrator};

struct FixedPlanner {
    steps: Vec<Step>,
    calls: AtomicUsize,
}

impl FixedPlanner {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Worker for FixedPlanner {
    fn name(&self) -> &str {
        "Planner"
    }

    async fn invoke(&self, state: &RunState, _ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let goal = latest_user_message(&state.conversation)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(StateUpdate {
            goal: Some(goal),
            plan: Some(self.steps.clone()),
            current_step_index: Some(0),
            iteration_count: Some(0),
            task_input: Some(None),
            critique_feedback: Some(None),
            baseline_draft: Some(None),
            ..StateUpdate::new()
                .message(Message::system("Planning complete.").from_sender("Planner"))
                .phase(Phase::AwaitingDispatch { step: 0 })
        })
    }
}

/// 每次返回固定内容；记录收到的修正稿
struct StubWorker {
    kind: WorkerKind,
    payload: String,
    calls: AtomicUsize,
    baselines: Mutex<Vec<Option<String>>>,
}

impl StubWorker {
    fn new(kind: WorkerKind, payload: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            payload: payload.to_string(),
            calls: AtomicUsize::new(0),
            baselines: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Worker for StubWorker {
    fn name(&self) -> &str {
        self.kind.label()
    }

    async fn invoke(&self, _state: &RunState, ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.baselines.lock().unwrap().push(ctx.baseline_draft.clone());
        let label = self.kind.label();
        let update = StateUpdate::from_sender(label)
            .message(Message::system(format!("{} finished.", label)).from_sender(label));
        Ok(match self.kind {
            WorkerKind::Architect => update.artifact("slide_1", self.payload.clone()),
            _ => update
                .web(label, self.payload.clone())
                .merged(label, self.payload.clone()),
        })
    }
}

/// 只回报 "Done."
struct StatusOnlyWorker;

#[async_trait]
impl Worker for StatusOnlyWorker {
    fn name(&self) -> &str {
        "Researcher"
    }

    async fn invoke(&self, _state: &RunState, _ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        Ok(StateUpdate::from_sender("Researcher").message(Message::system("Done.").from_sender("Researcher")))
    }
}

struct FailingWorker;

#[async_trait]
impl Worker for FailingWorker {
    fn name(&self) -> &str {
        "Researcher"
    }

    async fn invoke(&self, _state: &RunState, _ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        Err(LlmError::Unavailable("all models down".into()).into())
    }
}

/// 第一次调用通知后挂起，之后正常返回
struct BlockOnceWorker {
    started: Arc<Notify>,
    calls: AtomicUsize,
}

#[async_trait]
impl Worker for BlockOnceWorker {
    fn name(&self) -> &str {
        "Researcher"
    }

    async fn invoke(&self, _state: &RunState, _ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(StateUpdate::from_sender("Researcher")
            .web("Researcher", "Graph engines compared")
            .merged("Researcher", "Graph engines compared"))
    }
}

/// 每次调用都通知后挂起，直到被取消
struct StallingWorker {
    started: Arc<Notify>,
}

#[async_trait]
impl Worker for StallingWorker {
    fn name(&self) -> &str {
        "Researcher"
    }

    async fn invoke(&self, _state: &RunState, _ctx: &RunContext) -> Result<StateUpdate, AgentError> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(StateUpdate::from_sender("Researcher"))
    }
}

/// 磁盘不可用：所有读写都失败
struct UnavailableStore;

fn disk_error() -> PersistenceError {
    PersistenceError::Storage("disk unavailable".into())
}

#[async_trait]
impl CheckpointStore for UnavailableStore {
    async fn put(&self, _thread_id: &str, _source: &str, _state: &RunState) -> Result<u64, PersistenceError> {
        Err(disk_error())
    }

    async fn latest(&self, _thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
        Err(disk_error())
    }

    async fn get(&self, _thread_id: &str, _version: u64) -> Result<Option<Checkpoint>, PersistenceError> {
        Err(disk_error())
    }

    async fn history(&self, _thread_id: &str) -> Result<Vec<CheckpointMeta>, PersistenceError> {
        Err(disk_error())
    }

    async fn threads(&self) -> Result<Vec<ThreadSummary>, PersistenceError> {
        Err(disk_error())
    }

    async fn prune(&self, _thread_id: &str, _keep: usize) -> Result<usize, PersistenceError> {
        Err(disk_error())
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

fn settings(soft: Vec<u32>, hard: u32, refinement: bool) -> SupervisorSettings {
    SupervisorSettings {
        soft_thresholds: soft,
        hard_threshold: hard,
        critique_char_budget: 12_000,
        plan_refinement: refinement,
    }
}

fn research_step(id: &str, title: &str) -> Step {
    Step::new(id, title, format!("{} the topic", title), WorkerKind::Researcher)
}

async fn lineage(store: &MemoryCheckpointStore, thread: &str) -> Vec<Checkpoint> {
    let mut out = Vec::new();
    for meta in store.history(thread).await.unwrap() {
        out.push(store.get(thread, meta.version).await.unwrap().unwrap());
    }
    out
}

/// 评审回合之后的检查点（前一个检查点处于 AwaitingCritique）
fn critique_turns(lineage: &[Checkpoint]) -> Vec<&Checkpoint> {
    lineage
        .windows(2)
        .filter(|w| {
            matches!(w[0].state.phase, Phase::AwaitingCritique { .. }) && w[1].meta.source == "Supervisor"
        })
        .map(|w| &w[1])
        .collect()
}

#[tokio::test]
async fn test_two_rejections_then_approval_counters() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let critic = Arc::new(ScriptedLlmClient::new(vec![
        "REJECTED: missing benchmarks",
        "REJECTED: still no numbers",
        "APPROVED: solid",
        "APPROVED: slides fine",
    ]));
    let lab = LabBuilder::new()
        .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())))
        .with_critic_llm(critic.clone())
        .with_settings(settings(vec![10, 20], 30, false))
        .with_store(store.clone())
        .with_planner(FixedPlanner::new(vec![
            research_step("step_1", "Research"),
            Step::new("step_2", "Slides", "Build deck", WorkerKind::Architect),
        ]))
        .with_worker(WorkerKind::Researcher, StubWorker::new(WorkerKind::Researcher, "Neo4j vs Dgraph"))
        .with_worker(WorkerKind::Architect, StubWorker::new(WorkerKind::Architect, "<Deck/>"))
        .build()
        .unwrap();

    let reply = lab.submit("t1", "graph databases", None).await.unwrap();
    assert_eq!(reply.outcome, RunOutcome::Completed);
    assert_eq!(critic.call_count(), 4);

    let lineage = lineage(&store, "t1").await;
    let turns: Vec<(u32, usize)> = critique_turns(&lineage)
        .iter()
        .map(|c| (c.state.iteration_count, c.state.current_step_index))
        .collect();
    assert_eq!(turns, vec![(1, 0), (2, 0), (0, 1), (0, 2)]);

    // 索引只增不减
    for w in lineage.windows(2) {
        assert!(w[1].state.current_step_index >= w[0].state.current_step_index);
    }
    let last = &lineage.last().unwrap().state;
    assert_eq!(last.phase, Phase::Done);
    assert!(last.plan.iter().all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn test_soft_intervention_at_tenth_rejection() {
    let mut replies = vec!["REJECTED: too shallow"; 10];
    replies.push("APPROVED: good");
    let critic = Arc::new(ScriptedLlmClient::new(replies));
    let director = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("Director baseline"));
    let worker = StubWorker::new(WorkerKind::Researcher, "Some findings");
    let store = Arc::new(MemoryCheckpointStore::new());
    let lab = LabBuilder::new()
        .with_llm(director.clone())
        .with_critic_llm(critic.clone())
        .with_settings(settings(vec![10, 20], 30, false))
        .with_store(store.clone())
        .with_planner(FixedPlanner::new(vec![research_step("step_1", "Research")]))
        .with_worker(WorkerKind::Researcher, worker.clone())
        .build()
        .unwrap();

    let reply = lab.submit("t1", "vector search", None).await.unwrap();
    assert_eq!(reply.outcome, RunOutcome::Completed);
    assert_eq!(critic.call_count(), 11);
    assert_eq!(director.call_count(), 1);

    let baselines = worker.baselines.lock().unwrap().clone();
    assert_eq!(baselines.len(), 11);
    assert!(baselines[..10].iter().all(Option::is_none));
    assert_eq!(baselines[10].as_deref(), Some("Director baseline"));

    // 软干预回合：仍停在该步，交回原 worker
    let lineage = lineage(&store, "t1").await;
    let tenth = critique_turns(&lineage)[9];
    assert_eq!(tenth.state.iteration_count, 10);
    assert_eq!(tenth.state.current_step_index, 0);
    assert_eq!(
        tenth.state.phase,
        Phase::WorkerRunning {
            step: 0,
            worker: WorkerKind::Researcher
        }
    );
    assert_eq!(tenth.state.plan[0].status, StepStatus::InProgress);
}

#[tokio::test]
async fn test_hard_intervention_at_thirtieth_rejection() {
    let critic = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("REJECTED: never good enough"));
    let director = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("Director final draft"));
    let store = Arc::new(MemoryCheckpointStore::new());
    let lab = LabBuilder::new()
        .with_llm(director.clone())
        .with_critic_llm(critic.clone())
        .with_settings(settings(vec![10, 20], 30, false))
        .with_store(store.clone())
        .with_planner(FixedPlanner::new(vec![research_step("step_1", "Research")]))
        .with_worker(WorkerKind::Researcher, StubWorker::new(WorkerKind::Researcher, "weak"))
        .build()
        .unwrap();

    let reply = lab.submit("t1", "quantum networking", None).await.unwrap();
    assert_eq!(reply.outcome, RunOutcome::Completed);
    // 第 30 次拒绝即硬干预，不再追加评审
    assert_eq!(critic.call_count(), 30);
    // 软干预 10、20 + 硬干预 30
    assert_eq!(director.call_count(), 3);

    let lineage = lineage(&store, "t1").await;
    let hard = critique_turns(&lineage)[29];
    assert_eq!(hard.state.current_step_index, 1);
    assert_eq!(hard.state.iteration_count, 0);
    assert_eq!(hard.state.plan[0].status, StepStatus::Escalated);
    assert!(hard
        .state
        .knowledge
        .merged
        .iter()
        .any(|e| e.content == "Director final draft"));
}

#[tokio::test]
async fn test_status_only_output_is_rejected_without_critic_call() {
    let critic = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("APPROVED: fine"));
    let store = Arc::new(MemoryCheckpointStore::new());
    let lab = LabBuilder::new()
        .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("Director draft")))
        .with_critic_llm(critic.clone())
        .with_settings(settings(vec![], 2, false))
        .with_store(store.clone())
        .with_planner(FixedPlanner::new(vec![research_step("step_1", "Research")]))
        .with_worker(WorkerKind::Researcher, Arc::new(StatusOnlyWorker))
        .build()
        .unwrap();

    lab.submit("t1", "llm routing", None).await.unwrap();
    assert_eq!(critic.call_count(), 0);

    let lineage = lineage(&store, "t1").await;
    let first = critique_turns(&lineage)[0];
    assert_eq!(first.state.iteration_count, 1);
    assert!(first
        .state
        .critique_feedback
        .as_deref()
        .unwrap_or("")
        .contains("no substantive output"));
}

#[tokio::test]
async fn test_worker_failure_degrades_and_escalates() {
    let critic = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("APPROVED: fine"));
    let store = Arc::new(MemoryCheckpointStore::new());
    let lab = LabBuilder::new()
        .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("Director draft")))
        .with_critic_llm(critic.clone())
        .with_settings(settings(vec![], 3, false))
        .with_store(store.clone())
        .with_planner(FixedPlanner::new(vec![research_step("step_1", "Research")]))
        .with_worker(WorkerKind::Researcher, Arc::new(FailingWorker))
        .build()
        .unwrap();

    let reply = lab.submit("t1", "edge inference", None).await.unwrap();
    assert_eq!(reply.outcome, RunOutcome::Completed);
    assert_eq!(critic.call_count(), 0);

    let state = store.latest("t1").await.unwrap().unwrap().state;
    assert_eq!(state.plan[0].status, StepStatus::Escalated);
    assert!(state
        .conversation
        .iter()
        .any(|m| m.content.contains("all models down")));
}

#[tokio::test]
async fn test_refinement_keeps_completed_prefix() {
    let director = Arc::new(
        ScriptedLlmClient::new(vec![
            r#"{"revise": true, "steps": [{"title": "Deep dive", "description": "Exhaustive report", "assigned_to": "DEEP_RESEARCHER"}]}"#,
        ])
        .with_default(r#"{"revise": false}"#),
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let deep = StubWorker::new(WorkerKind::DeepResearcher, "Long report");
    let lab = LabBuilder::new()
        .with_llm(director)
        .with_critic_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("APPROVED: ok")))
        .with_settings(settings(vec![10, 20], 30, true))
        .with_store(store.clone())
        .with_planner(FixedPlanner::new(vec![
            research_step("step_1", "Research"),
            research_step("step_2", "Drafting"),
            Step::new("step_3", "Slides", "Build deck", WorkerKind::Architect),
        ]))
        .with_worker(WorkerKind::Researcher, StubWorker::new(WorkerKind::Researcher, "findings"))
        .with_worker(WorkerKind::DeepResearcher, deep.clone())
        .with_worker(WorkerKind::Architect, StubWorker::new(WorkerKind::Architect, "<Deck/>"))
        .build()
        .unwrap();

    lab.submit("t1", "rust async runtimes", None).await.unwrap();
    assert_eq!(deep.calls.load(Ordering::SeqCst), 1);

    let lineage = lineage(&store, "t1").await;
    let last = &lineage.last().unwrap().state;
    assert_eq!(last.plan.len(), 2);
    assert_eq!(last.plan[0].id, "step_1");
    assert_eq!(last.plan[0].title, "Research");
    assert_eq!(last.plan[1].assigned_worker, WorkerKind::DeepResearcher);

    // 每次转移都不改动 index 及之前的步骤
    for w in lineage.windows(2) {
        let (prev, next) = (&w[0].state, &w[1].state);
        if prev.plan.is_empty() || next.plan.is_empty() {
            continue;
        }
        let upto = prev.current_step_index.min(prev.plan.len() - 1);
        for i in 0..=upto {
            assert_eq!(next.plan[i].id, prev.plan[i].id);
            assert_eq!(next.plan[i].title, prev.plan[i].title);
            assert_eq!(next.plan[i].assigned_worker, prev.plan[i].assigned_worker);
        }
    }
}

fn blocking_lab(store: Arc<MemoryCheckpointStore>, started: Arc<Notify>) -> (Arc<Orchestrator>, Arc<FixedPlanner>) {
    let planner = FixedPlanner::new(vec![research_step("step_1", "Research")]);
    let lab = LabBuilder::new()
        .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())))
        .with_critic_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("APPROVED: ok")))
        .with_settings(settings(vec![10, 20], 30, false))
        .with_store(store)
        .with_planner(planner.clone())
        .with_worker(
            WorkerKind::Researcher,
            Arc::new(BlockOnceWorker {
                started,
                calls: AtomicUsize::new(0),
            }),
        )
        .build()
        .unwrap();
    (Arc::new(lab), planner)
}

#[tokio::test]
async fn test_cancel_leaves_committed_state_and_resume_finishes() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let started = Arc::new(Notify::new());
    let (lab, _) = blocking_lab(store.clone(), started.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn({
        let lab = lab.clone();
        async move { lab.submit("t1", "graph databases", Some(tx)).await }
    });
    started.notified().await;
    let before = store.latest("t1").await.unwrap().unwrap();
    assert!(lab.cancel("t1").await);

    let reply = handle.await.unwrap().unwrap();
    assert_eq!(reply.outcome, RunOutcome::Paused);
    let after = store.latest("t1").await.unwrap().unwrap();
    assert_eq!(after.meta.version, before.meta.version);
    assert_eq!(after.state, before.state);
    assert_eq!(
        after.state.phase,
        Phase::WorkerRunning {
            step: 0,
            worker: WorkerKind::Researcher
        }
    );

    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    assert!(matches!(events.first(), Some(RunEvent::UserEcho { .. })));
    assert!(matches!(events.last(), Some(RunEvent::Cancelled { .. })));

    let resumed = lab.resume("t1", None).await.unwrap();
    assert_eq!(resumed.outcome, RunOutcome::Completed);
}

#[tokio::test]
async fn test_new_message_mid_plan_replans() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let started = Arc::new(Notify::new());
    let (lab, planner) = blocking_lab(store.clone(), started.clone());

    let first = tokio::spawn({
        let lab = lab.clone();
        async move { lab.submit("t1", "graph databases", None).await }
    });
    started.notified().await;

    // 新消息抢占正在运行的 worker
    let reply = lab.submit("t1", "time-series databases", None).await.unwrap();
    assert_eq!(first.await.unwrap().unwrap().outcome, RunOutcome::Paused);
    assert_eq!(reply.outcome, RunOutcome::Completed);
    assert_eq!(planner.calls.load(Ordering::SeqCst), 2);

    let lineage = lineage(&store, "t1").await;
    let second_user = lineage
        .iter()
        .rposition(|c| c.meta.source == "user")
        .unwrap();
    let next = &lineage[second_user + 1];
    assert_eq!(next.meta.source, "Supervisor");
    assert_eq!(next.state.phase, Phase::NoPlan);
    assert!(next.state.plan.is_empty());
    assert_eq!(lineage.last().unwrap().state.goal, "time-series databases");
}

#[tokio::test]
async fn test_turn_limit() {
    let lab = LabBuilder::new()
        .with_llm(Arc::new(MockLlmClient))
        .with_max_turns(3)
        .build()
        .unwrap();
    let reply = lab.submit("t1", "solid state batteries", None).await.unwrap();
    assert_eq!(reply.outcome, RunOutcome::TurnLimit);
}

#[tokio::test]
async fn test_mock_end_to_end_persists_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let lab = LabBuilder::new()
        .with_llm(Arc::new(MockLlmClient))
        .with_artifacts(ArtifactSink::new(dir.path()))
        .build()
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reply = lab.submit("t1", "graph databases", Some(tx)).await.unwrap();
    assert_eq!(reply.outcome, RunOutcome::Completed);
    assert!(reply.artifacts.contains_key("slide_1"));

    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    assert_eq!(
        events.last(),
        Some(&RunEvent::Done {
            status: "completed".into()
        })
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::ArtifactUpdate { key, .. } if key == "slide_1")));

    let saved: Vec<_> = std::fs::read_dir(dir.path().join("t1"))
        .unwrap()
        .flatten()
        .filter(|e| e.path().extension().map_or(false, |x| x == "tsx"))
        .collect();
    assert!(!saved.is_empty());

    let view = lab.snapshot("t1").await.unwrap().unwrap();
    assert_eq!(view.phase, "done");
    let threads = lab.threads().await.unwrap();
    assert_eq!(threads[0].thread_id, "t1");
    assert_eq!(
        threads[0].latest_version as usize,
        lab.history("t1").await.unwrap().len()
    );
}

#[tokio::test]
async fn test_queued_message_is_superseded_by_newer_one() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let started = Arc::new(Notify::new());
    let (lab, _) = blocking_lab(store.clone(), started.clone());

    let first = tokio::spawn({
        let lab = lab.clone();
        async move { lab.submit("t1", "graph databases", None).await }
    });
    started.notified().await;

    // 两条消息背靠背排队，较早的一条必须让位
    let second = tokio::spawn({
        let lab = lab.clone();
        async move { lab.submit("t1", "second", None).await }
    });
    let third = tokio::spawn({
        let lab = lab.clone();
        async move { lab.submit("t1", "third", None).await }
    });

    assert_eq!(first.await.unwrap().unwrap().outcome, RunOutcome::Paused);
    assert_eq!(second.await.unwrap().unwrap().outcome, RunOutcome::Paused);
    assert_eq!(third.await.unwrap().unwrap().outcome, RunOutcome::Completed);

    let lineage = lineage(&store, "t1").await;
    let finished_goals: Vec<&str> = lineage
        .iter()
        .filter(|c| c.state.phase == Phase::Done)
        .map(|c| c.state.goal.as_str())
        .collect();
    assert!(!finished_goals.is_empty());
    assert!(finished_goals.iter().all(|g| *g == "third"));
    // 被抢占的消息仍记录在会话里
    let last = &lineage.last().unwrap().state;
    assert!(last.conversation.iter().any(|m| m.content == "second"));
}

#[tokio::test]
async fn test_pause_stops_run_that_preempted_the_previous_one() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let started = Arc::new(Notify::new());
    let lab = Arc::new(
        LabBuilder::new()
            .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())))
            .with_critic_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("APPROVED: ok")))
            .with_store(store.clone())
            .with_planner(FixedPlanner::new(vec![research_step("step_1", "Research")]))
            .with_worker(WorkerKind::Researcher, Arc::new(StallingWorker { started: started.clone() }))
            .build()
            .unwrap(),
    );

    let first = tokio::spawn({
        let lab = lab.clone();
        async move { lab.submit("t1", "graph databases", None).await }
    });
    started.notified().await;
    let second = tokio::spawn({
        let lab = lab.clone();
        async move { lab.submit("t1", "time-series databases", None).await }
    });

    // 第一个运行结束说明第二条消息已抢占；此时它可能仍在排队，也可能已开始
    assert_eq!(first.await.unwrap().unwrap().outcome, RunOutcome::Paused);
    assert!(lab.cancel("t1").await);
    assert_eq!(second.await.unwrap().unwrap().outcome, RunOutcome::Paused);

    let last = store.latest("t1").await.unwrap().unwrap().state;
    assert_ne!(last.phase, Phase::Done);
    assert!(last
        .conversation
        .iter()
        .any(|m| m.content == "time-series databases"));
}

#[tokio::test]
async fn test_persistence_fault_is_reported_as_error_event() {
    let lab = LabBuilder::new()
        .with_llm(Arc::new(MockLlmClient))
        .with_store(Arc::new(UnavailableStore))
        .build()
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let err = lab.submit("t1", "graph databases", Some(tx.clone())).await.unwrap_err();
    assert!(matches!(err, AgentError::Persistence(_)));
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], RunEvent::Error { message } if message.contains("disk unavailable")));

    assert!(lab.resume("t1", Some(tx)).await.is_err());
    let events = drain(&mut rx);
    assert!(matches!(events.as_slice(), [RunEvent::Error { message }] if message.contains("disk unavailable")));
}

#[tokio::test]
async fn test_empty_message_is_reported_as_error_event() {
    let lab = LabBuilder::new().with_llm(Arc::new(MockLlmClient)).build().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(lab.submit("t1", "   ", Some(tx)).await.is_err());
    assert!(matches!(drain(&mut rx).as_slice(), [RunEvent::Error { .. }]));
}

#[tokio::test]
async fn test_resume_after_restart_from_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("checkpoints.db");
    let started = Arc::new(Notify::new());

    let paused_version = {
        let store = Arc::new(SqliteCheckpointStore::open(&db).unwrap());
        let lab = Arc::new(
            LabBuilder::new()
                .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())))
                .with_critic_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("APPROVED: ok")))
                .with_store(store.clone())
                .with_planner(FixedPlanner::new(vec![
                    research_step("step_1", "Research"),
                    Step::new("step_2", "Slides", "Build deck", WorkerKind::Architect),
                ]))
                .with_worker(WorkerKind::Researcher, Arc::new(StallingWorker { started: started.clone() }))
                .build()
                .unwrap(),
        );
        let run = tokio::spawn({
            let lab = lab.clone();
            async move { lab.submit("t1", "graph databases", None).await }
        });
        started.notified().await;
        lab.cancel("t1").await;
        assert_eq!(run.await.unwrap().unwrap().outcome, RunOutcome::Paused);
        store.latest("t1").await.unwrap().unwrap().meta.version
    };

    // 进程重启：新的存储句柄与新的编排器
    let store = Arc::new(SqliteCheckpointStore::open(&db).unwrap());
    let planner = FixedPlanner::new(vec![research_step("unused", "Unused")]);
    let lab = LabBuilder::new()
        .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())))
        .with_critic_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_default("APPROVED: ok")))
        .with_settings(settings(vec![10, 20], 30, false))
        .with_store(store.clone())
        .with_planner(planner.clone())
        .with_worker(WorkerKind::Researcher, StubWorker::new(WorkerKind::Researcher, "findings"))
        .with_worker(WorkerKind::Architect, StubWorker::new(WorkerKind::Architect, "<Deck/>"))
        .build()
        .unwrap();

    let reply = lab.resume("t1", None).await.unwrap();
    assert_eq!(reply.outcome, RunOutcome::Completed);
    assert!(reply.artifacts.contains_key("slide_1"));
    // 计划来自检查点，不重新规划
    assert_eq!(planner.calls.load(Ordering::SeqCst), 0);

    let latest = store.latest("t1").await.unwrap().unwrap();
    assert!(latest.meta.version > paused_version);
    assert_eq!(latest.state.plan[0].id, "step_1");
    assert_eq!(latest.state.phase, Phase::Done);
    let history = store.history("t1").await.unwrap();
    assert_eq!(history.len() as u64, latest.meta.version);
}

#[tokio::test]
async fn test_insufficient_data_returns_step_to_same_worker() {
    let critic = Arc::new(ScriptedLlmClient::new(vec![
        "INSUFFICIENT_DATA: need 2025 benchmark numbers",
        "APPROVED: sourced",
    ]));
    let worker = StubWorker::new(WorkerKind::Researcher, "Neo4j vs Dgraph");
    let store = Arc::new(MemoryCheckpointStore::new());
    let lab = LabBuilder::new()
        .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())))
        .with_critic_llm(critic.clone())
        .with_settings(settings(vec![10, 20], 30, false))
        .with_store(store.clone())
        .with_planner(FixedPlanner::new(vec![research_step("step_1", "Research")]))
        .with_worker(WorkerKind::Researcher, worker.clone())
        .build()
        .unwrap();

    let reply = lab.submit("t1", "graph databases", None).await.unwrap();
    assert_eq!(reply.outcome, RunOutcome::Completed);
    assert_eq!(critic.call_count(), 2);
    assert_eq!(worker.calls.load(Ordering::SeqCst), 2);

    let lineage = lineage(&store, "t1").await;
    let first = critique_turns(&lineage)[0];
    assert_eq!(first.state.iteration_count, 1);
    assert_eq!(first.state.current_step_index, 0);
    assert_eq!(
        first.state.phase,
        Phase::WorkerRunning {
            step: 0,
            worker: WorkerKind::Researcher
        }
    );
    let feedback = first.state.critique_feedback.as_deref().unwrap();
    assert!(feedback.starts_with("[INSUFFICIENT_DATA]"));
    assert!(feedback.contains("2025 benchmark numbers"));
}

#[tokio::test]
async fn test_checkpoints_are_kept_unless_pruning_is_requested() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let lab = LabBuilder::new()
        .with_llm(Arc::new(MockLlmClient))
        .with_store(store.clone())
        .build()
        .unwrap();
    lab.submit("t1", "graph databases", None).await.unwrap();
    let history = store.history("t1").await.unwrap();
    assert_eq!(history[0].version, 1);
    assert_eq!(history.len() as u64, history.last().unwrap().version);
    let first = store.get("t1", 1).await.unwrap().unwrap();
    assert_eq!(first.meta.source, "user");

    let pruned = Arc::new(MemoryCheckpointStore::new());
    let lab = LabBuilder::new()
        .with_llm(Arc::new(MockLlmClient))
        .with_store(pruned.clone())
        .with_keep_checkpoints(3)
        .build()
        .unwrap();
    lab.submit("t1", "graph databases", None).await.unwrap();
    let history = pruned.history("t1").await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(pruned.get("t1", 1).await.unwrap().is_none());
}
