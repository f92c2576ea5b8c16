//! 共享运行状态：RunState、部分更新 StateUpdate 与合并策略
//!
//! 每个组件只返回 StateUpdate；由编排器调用 [`RunState::apply`] 合并：
//! - conversation / knowledge：追加
//! - 标量字段：出现即覆盖（可清空字段用 `Option<Option<_>>`）
//! - artifacts：按 key 浅合并，后写覆盖
//! - 带 sender 的更新会重新计算 last_output（评审输入）
//!
//! UI 只看 [`RunView`] 投影，不直接持有完整状态。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// 工作者种类（计划步骤的 assigned_to）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerKind {
    Researcher,
    DeepResearcher,
    Architect,
    Archivist,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 4] = [
        WorkerKind::Researcher,
        WorkerKind::DeepResearcher,
        WorkerKind::Architect,
        WorkerKind::Archivist,
    ];

    /// 作为 sender 写入会话的名字
    pub fn label(&self) -> &'static str {
        match self {
            WorkerKind::Researcher => "Researcher",
            WorkerKind::DeepResearcher => "DeepResearcher",
            WorkerKind::Architect => "Architect",
            WorkerKind::Archivist => "Archivist",
        }
    }

    /// 解析计划里的 assigned_to；未知值按 Researcher 处理
    pub fn parse_assigned(raw: &str) -> Self {
        let norm = raw.trim().to_uppercase().replace([' ', '-'], "_");
        match norm.as_str() {
            "DEEP_RESEARCHER" | "DEEPRESEARCHER" => WorkerKind::DeepResearcher,
            "ARCHITECT" => WorkerKind::Architect,
            "ARCHIVIST" => WorkerKind::Archivist,
            _ => WorkerKind::Researcher,
        }
    }

    /// 研究类（产出文字内容）还是设计类（产出幻灯片代码）
    pub fn is_research(&self) -> bool {
        !matches!(self, WorkerKind::Architect)
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    /// 由主管硬干预代写完成
    Escalated,
}

/// 计划中的一步；assigned_worker 创建后不再改变
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "assigned_to")]
    pub assigned_worker: WorkerKind,
    #[serde(default)]
    pub status: StepStatus,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        worker: WorkerKind,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            assigned_worker: worker,
            status: StepStatus::Pending,
        }
    }
}

/// 路由游标
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Phase {
    /// 需要（重新）规划
    #[default]
    NoPlan,
    /// 等待主管派发第 step 步
    AwaitingDispatch { step: usize },
    /// 第 step 步交给 worker 执行
    WorkerRunning { step: usize, worker: WorkerKind },
    /// worker 已返回，等待评审
    AwaitingCritique { step: usize, worker: WorkerKind },
    Done,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::NoPlan => "planning",
            Phase::AwaitingDispatch { .. } => "dispatching",
            Phase::WorkerRunning { .. } => "working",
            Phase::AwaitingCritique { .. } => "reviewing",
            Phase::Done => "done",
        }
    }
}

/// 带来源标签的一条知识
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub contributor: String,
    pub content: String,
}

/// 知识库：本地 / 网络 / 综合，均只追加
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Knowledge {
    #[serde(default)]
    pub local: Vec<KnowledgeEntry>,
    #[serde(default)]
    pub web: Vec<KnowledgeEntry>,
    #[serde(default)]
    pub merged: Vec<KnowledgeEntry>,
}

impl Knowledge {
    pub fn append(&mut self, other: Knowledge) {
        self.local.extend(other.local);
        self.web.extend(other.web);
        self.merged.extend(other.merged);
    }

    /// 供 prompt 使用的综合知识文本
    pub fn merged_text(&self) -> String {
        render_entries(&self.merged)
    }

    pub fn local_text(&self) -> String {
        render_entries(&self.local)
    }

    /// 所有条目内容（去重，按 local → web → merged 顺序）
    fn payload_parts(&self) -> Vec<&str> {
        let mut parts: Vec<&str> = Vec::new();
        for e in self.local.iter().chain(&self.web).chain(&self.merged) {
            let c = e.content.trim();
            if !c.is_empty() && !parts.contains(&c) {
                parts.push(c);
            }
        }
        parts
    }
}

fn render_entries(entries: &[KnowledgeEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("--- {} ---\n{}", e.contributor, e.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 最近一次 worker 返回的实质内容（评审输入）
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOutput {
    pub sender: String,
    /// 知识 + 产物文本；只含状态消息时为空
    pub payload: String,
}

/// 贯穿整个运行的共享状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub thread_id: String,
    /// 研究主题：最近一次用户请求
    pub goal: String,
    pub conversation: Vec<Message>,
    pub plan: Vec<Step>,
    pub current_step_index: usize,
    pub phase: Phase,
    pub task_input: Option<String>,
    pub knowledge: Knowledge,
    pub artifacts: BTreeMap<String, String>,
    /// 当前步骤被拒绝的次数
    pub iteration_count: u32,
    pub critique_feedback: Option<String>,
    pub baseline_draft: Option<String>,
    pub last_output: Option<LastOutput>,
}

impl RunState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Default::default()
        }
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.plan.get(self.current_step_index)
    }

    /// 当前步之后尚未开始的步骤
    pub fn future_steps(&self) -> &[Step] {
        let from = (self.current_step_index + 1).min(self.plan.len());
        &self.plan[from..]
    }

    pub fn is_complete(&self) -> bool {
        !self.plan.is_empty() && self.current_step_index >= self.plan.len()
    }

    /// 最近 n 条会话（模型上下文）
    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let from = self.conversation.len().saturating_sub(n);
        &self.conversation[from..]
    }

    /// 按字段策略合并一次部分更新
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            sender,
            messages,
            knowledge,
            artifacts,
            goal,
            plan,
            current_step_index,
            phase,
            task_input,
            iteration_count,
            critique_feedback,
            baseline_draft,
        } = update;

        if let Some(sender) = sender {
            let mut parts: Vec<String> = knowledge
                .payload_parts()
                .into_iter()
                .map(String::from)
                .collect();
            parts.extend(
                artifacts
                    .values()
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
                    .map(String::from),
            );
            self.last_output = Some(LastOutput {
                sender,
                payload: parts.join("\n\n"),
            });
        }

        self.conversation.extend(messages);
        self.knowledge.append(knowledge);
        self.artifacts.extend(artifacts);

        if let Some(v) = goal {
            self.goal = v;
        }
        if let Some(v) = plan {
            self.plan = v;
        }
        if let Some(v) = current_step_index {
            self.current_step_index = v;
        }
        if let Some(v) = phase {
            self.phase = v;
        }
        if let Some(v) = task_input {
            self.task_input = v;
        }
        if let Some(v) = iteration_count {
            self.iteration_count = v;
        }
        if let Some(v) = critique_feedback {
            self.critique_feedback = v;
        }
        if let Some(v) = baseline_draft {
            self.baseline_draft = v;
        }
    }

    /// 投影为 UI / API 可直接渲染的轻量视图
    pub fn project(&self) -> RunView {
        RunView {
            thread_id: self.thread_id.clone(),
            goal: self.goal.clone(),
            phase: self.phase.label().to_string(),
            current_step: self.current_step().map(|s| s.title.clone()),
            current_step_index: self.current_step_index,
            iteration_count: self.iteration_count,
            plan: self.plan.clone(),
            artifact_keys: self.artifacts.keys().cloned().collect(),
            messages: self.conversation.len(),
        }
    }
}

/// UI 看到的「投影」状态
#[derive(Clone, Debug, Serialize)]
pub struct RunView {
    pub thread_id: String,
    pub goal: String,
    pub phase: String,
    pub current_step: Option<String>,
    pub current_step_index: usize,
    pub iteration_count: u32,
    pub plan: Vec<Step>,
    pub artifact_keys: Vec<String>,
    pub messages: usize,
}

/// 组件返回的稀疏更新
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateUpdate {
    pub sender: Option<String>,
    pub messages: Vec<Message>,
    pub knowledge: Knowledge,
    pub artifacts: BTreeMap<String, String>,
    pub goal: Option<String>,
    pub plan: Option<Vec<Step>>,
    pub current_step_index: Option<usize>,
    pub phase: Option<Phase>,
    pub task_input: Option<Option<String>>,
    pub iteration_count: Option<u32>,
    pub critique_feedback: Option<Option<String>>,
    pub baseline_draft: Option<Option<String>>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// worker 返回值的起点：设置 sender
    pub fn from_sender(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            ..Default::default()
        }
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn local(mut self, contributor: &str, content: impl Into<String>) -> Self {
        self.knowledge.local.push(KnowledgeEntry {
            contributor: contributor.to_string(),
            content: content.into(),
        });
        self
    }

    pub fn web(mut self, contributor: &str, content: impl Into<String>) -> Self {
        self.knowledge.web.push(KnowledgeEntry {
            contributor: contributor.to_string(),
            content: content.into(),
        });
        self
    }

    pub fn merged(mut self, contributor: &str, content: impl Into<String>) -> Self {
        self.knowledge.merged.push(KnowledgeEntry {
            contributor: contributor.to_string(),
            content: content.into(),
        });
        self
    }

    pub fn artifact(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.artifacts.insert(key.into(), value.into());
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }
}
