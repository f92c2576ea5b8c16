//! 本地资料索引：遍历目录 → 分块 → 关键词重叠检索
//!
//! 导入在阻塞线程里完成分块，再持写锁一次性替换同一来源目录下的旧块。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use walkdir::{DirEntry, WalkDir};

use super::{IngestSummary, Retriever, Snippet};
use crate::core::AgentError;

const SKIP_DIRS: [&str; 6] = ["node_modules", "venv", "dist", "build", "__pycache__", "target"];
const SUPPORTED_EXTS: [&str; 12] = [
    "md", "txt", "py", "js", "ts", "tsx", "json", "html", "css", "rs", "toml", "csv",
];

/// 文档块
#[derive(Debug, Clone)]
struct IndexedChunk {
    path: PathBuf,
    text: String,
    tokens: HashSet<String>,
}

/// 文档分块器（按字符计数，优先在分隔符处断开，UTF-8 安全）
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: vec!["\n\n", "\n", "。", ". ", " "],
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let target_end = (start + self.chunk_size).min(total);
            let mut end = target_end;

            if target_end < total {
                let slice: String = chars[start..target_end].iter().collect();
                for sep in &self.separators {
                    if let Some(pos) = slice.rfind(sep) {
                        let to_sep = slice[..pos].chars().count() + sep.chars().count();
                        // 分隔符太靠前时宁可硬切，避免产生碎块
                        if to_sep > self.chunk_overlap {
                            end = start + to_sep;
                            break;
                        }
                    }
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
            if end >= total {
                break;
            }

            let next = end.saturating_sub(self.chunk_overlap);
            start = if next > start { next } else { end };
        }
        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

/// 小写词集合（去掉首尾标点），用于词重叠打分
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.chars().count() > 1)
        .collect()
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    entry.file_type().is_dir() && (name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref()))
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// 遍历并分块（阻塞）
fn build_chunks(roots: &[PathBuf], chunker: &Chunker) -> (Vec<IndexedChunk>, IngestSummary) {
    let mut summary = IngestSummary::default();
    let mut out = Vec::new();

    for root in roots {
        if !root.exists() {
            tracing::warn!("Retrieval source not found: {}", root.display());
            continue;
        }
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e));
        for entry in walker.filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_supported(path) {
                continue;
            }
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with('.')
            {
                continue;
            }
            match std::fs::read_to_string(path) {
                Ok(text) => {
                    let pieces = chunker.chunk(&text);
                    summary.files += 1;
                    summary.chunks += pieces.len();
                    out.extend(pieces.into_iter().map(|text| IndexedChunk {
                        path: path.to_path_buf(),
                        tokens: tokenize_lower(&text),
                        text,
                    }));
                }
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", path.display(), e);
                    summary.skipped += 1;
                }
            }
        }
    }
    (out, summary)
}

/// 本地资料索引
#[derive(Debug, Default)]
pub struct LocalIndex {
    chunker: Chunker,
    chunks: RwLock<Vec<IndexedChunk>>,
}

impl LocalIndex {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunker: Chunker::new(chunk_size, chunk_overlap),
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// 已索引的文件列表（去重，按导入顺序）
    pub async fn sources(&self) -> Vec<String> {
        let chunks = self.chunks.read().await;
        let mut seen = HashSet::new();
        chunks
            .iter()
            .filter(|c| seen.insert(c.path.clone()))
            .map(|c| c.path.display().to_string())
            .collect()
    }
}

#[async_trait]
impl Retriever for LocalIndex {
    async fn ingest(&self, paths: &[PathBuf]) -> Result<IngestSummary, AgentError> {
        let roots = paths.to_vec();
        let chunker = self.chunker.clone();
        let prefixes = roots.clone();
        let (fresh, summary) =
            tokio::task::spawn_blocking(move || build_chunks(&roots, &chunker))
                .await
                .map_err(|e| AgentError::InvalidState(format!("Ingest task failed: {}", e)))?;

        let mut chunks = self.chunks.write().await;
        // 按路径组件比较：/data/notes 不会误删 /data/notes2 下的块
        chunks.retain(|c| !prefixes.iter().any(|p| c.path.starts_with(p)));
        chunks.extend(fresh);
        tracing::info!(
            "Indexed {} chunks from {} files ({} skipped)",
            summary.chunks,
            summary.files,
            summary.skipped
        );
        Ok(summary)
    }

    async fn search(&self, query: &str, top_k: usize) -> Vec<Snippet> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() || top_k == 0 {
            return Vec::new();
        }
        let chunks = self.chunks.read().await;
        let mut scored: Vec<(usize, &IndexedChunk)> = chunks
            .iter()
            .map(|c| (query_tokens.intersection(&c.tokens).count(), c))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(top_k)
            .map(|(score, c)| Snippet {
                source: c.path.display().to_string(),
                text: c.text.clone(),
                score: score as f32 / query_tokens.len() as f32,
            })
            .collect()
    }
}
