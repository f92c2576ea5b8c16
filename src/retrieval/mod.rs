//! 检索协作者：本地资料索引（ingest / search）与可选的网络搜索

pub mod local;
pub mod web;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::AgentError;

pub use local::{Chunker, LocalIndex};
pub use web::{GoogleSearch, WebSearchError, WebSearcher};

/// 一条检索结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snippet {
    pub source: String,
    pub text: String,
    pub score: f32,
}

/// 一次导入的统计
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub files: usize,
    pub chunks: usize,
    pub skipped: usize,
}

/// 检索接口
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn ingest(&self, paths: &[PathBuf]) -> Result<IngestSummary, AgentError>;

    async fn search(&self, query: &str, top_k: usize) -> Vec<Snippet>;
}

/// 把检索结果渲染为 prompt 上下文
pub fn render_snippets(snippets: &[Snippet]) -> String {
    snippets
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Source [{}]: {}\nContent: {}", i + 1, s.source, s.text))
        .collect::<Vec<_>>()
        .join("\n---\n")
}
