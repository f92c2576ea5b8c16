//! 核心编排层：运行状态与合并、错误与恢复、会话监管、事件流、编排器与构建器

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::LabBuilder;
pub use error::{AgentError, RecoveryAction};
pub use events::RunEvent;
pub use orchestrator::{EventSender, Orchestrator, RunOutcome, RunReply};
pub use recovery::RecoveryEngine;
pub use session_supervisor::{SessionRegistry, SessionSupervisor};
pub use state::{
    Knowledge, KnowledgeEntry, LastOutput, Phase, RunState, RunView, StateUpdate, Step, StepStatus,
    WorkerKind,
};
