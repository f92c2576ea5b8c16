//! Infinite - 多智能体研究实验室
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 运行状态与合并、编排器（回合驱动）、错误与恢复、会话监管、构建器
//! - **extract**: 自由文本 -> 结构化数据的统一抽取边界（带确定性兜底）
//! - **gateway**: HTTP + WebSocket 接入层（feature = "web"）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Fallback 链 / Mock）
//! - **memory**: 对话消息类型
//! - **observability**: 日志初始化
//! - **persistence**: 检查点存储（内存 / SQLite）与产物落盘
//! - **prompts**: 各角色提示词模板
//! - **retrieval**: 本地资料索引与 Web 搜索
//! - **supervisor**: 监督者状态机：路由、评审、升级阶梯、计划修订
//! - **workers**: 工作者智能体（Planner / Researcher / DeepResearcher / Archivist / Architect）

pub mod config;
pub mod core;
pub mod extract;
#[cfg(feature = "web")]
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod persistence;
pub mod prompts;
pub mod retrieval;
pub mod supervisor;
pub mod workers;

pub use crate::core::{LabBuilder, Orchestrator, RunOutcome, RunReply};
