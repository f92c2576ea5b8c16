//! 实验室构建器：统一的 Orchestrator 初始化逻辑
//!
//! CLI 与 Web 共享同一套组件：LLM、检查点存储、产物目录、本地索引、Web 搜索、工作者。
//! 所有依赖在构建时注入，测试可替换任意一个。

use std::sync::Arc;

use crate::config::{AppConfig, StorageBackend};
use crate::core::{AgentError, Orchestrator, RecoveryEngine, SessionRegistry, WorkerKind};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::persistence::{
    ArtifactSink, CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore,
};
use crate::retrieval::{GoogleSearch, LocalIndex, Retriever, WebSearcher};
use crate::supervisor::{Supervisor, SupervisorSettings};
use crate::workers::{Architect, Archivist, DeepResearcher, Planner, Researcher, Worker, WorkerSet};

/// Orchestrator 构建器
pub struct LabBuilder {
    llm: Option<Arc<dyn LlmClient>>,
    critic_llm: Option<Arc<dyn LlmClient>>,
    settings: SupervisorSettings,
    store: Option<Arc<dyn CheckpointStore>>,
    artifacts: Option<ArtifactSink>,
    retriever: Option<Arc<dyn Retriever>>,
    web: Option<Arc<dyn WebSearcher>>,
    planner: Option<Arc<dyn Worker>>,
    workers: WorkerSet,
    top_k: usize,
    web_results: usize,
    max_turns: usize,
    keep_checkpoints: usize,
    context_messages: usize,
}

impl Default for LabBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LabBuilder {
    pub fn new() -> Self {
        Self {
            llm: None,
            critic_llm: None,
            settings: SupervisorSettings::default(),
            store: None,
            artifacts: None,
            retriever: None,
            web: None,
            planner: None,
            workers: WorkerSet::new(),
            top_k: 5,
            web_results: 5,
            max_turns: 500,
            keep_checkpoints: 0,
            context_messages: 20,
        }
    }

    /// 按配置装配全部组件；配置的资料目录会先导入本地索引
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let store: Arc<dyn CheckpointStore> = match cfg.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryCheckpointStore::new()),
            StorageBackend::Sqlite => {
                if let Some(parent) = cfg.storage.checkpoint_db.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                tracing::info!("Checkpoints stored in {}", cfg.storage.checkpoint_db.display());
                Arc::new(SqliteCheckpointStore::open(&cfg.storage.checkpoint_db)?)
            }
        };

        let index = Arc::new(LocalIndex::new(
            cfg.retrieval.chunk_size,
            cfg.retrieval.chunk_overlap,
        ));
        let sources = cfg.retrieval.effective_sources();
        if !sources.is_empty() {
            match index.ingest(&sources).await {
                Ok(summary) => {
                    tracing::info!(
                        "Indexed {} files ({} chunks, {} skipped)",
                        summary.files,
                        summary.chunks,
                        summary.skipped
                    );
                    tracing::debug!("Local sources: {:?}", index.sources().await);
                }
                Err(e) => tracing::warn!("Local ingest failed: {}", e),
            }
        }

        let web: Option<Arc<dyn WebSearcher>> = if cfg.retrieval.web.enabled {
            match GoogleSearch::from_config(&cfg.retrieval.web) {
                Some(g) => Some(Arc::new(g)),
                None => {
                    tracing::warn!("Web search enabled but GOOGLE_API_KEY / GOOGLE_CSE_ID missing");
                    None
                }
            }
        } else {
            None
        };

        let mut builder = Self::new()
            .with_llm(create_llm_from_config(cfg))
            .with_settings(cfg.supervisor.clone().into())
            .with_store(store)
            .with_artifacts(ArtifactSink::new(&cfg.storage.artifacts_dir))
            .with_retriever(index, cfg.retrieval.top_k);
        builder.web = web;
        builder.web_results = cfg.retrieval.web.num_results;
        builder.max_turns = cfg.supervisor.max_turns;
        builder.keep_checkpoints = cfg.storage.keep_checkpoints;
        builder.context_messages = cfg.app.max_context_messages;
        Ok(builder)
    }

    /// 所有角色默认共用的模型
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 评审单独使用的模型
    pub fn with_critic_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.critic_llm = Some(llm);
        self
    }

    pub fn with_settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_artifacts(mut self, sink: ArtifactSink) -> Self {
        self.artifacts = Some(sink);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        self.retriever = Some(retriever);
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_web(mut self, web: Arc<dyn WebSearcher>, num_results: usize) -> Self {
        self.web = Some(web);
        self.web_results = num_results.max(1);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Worker>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// 替换某一类工作者
    pub fn with_worker(mut self, kind: WorkerKind, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(kind, worker);
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn with_keep_checkpoints(mut self, keep: usize) -> Self {
        self.keep_checkpoints = keep;
        self
    }

    /// 未显式提供的工作者按默认实现补齐
    fn default_worker(&self, kind: WorkerKind, llm: &Arc<dyn LlmClient>) -> Arc<dyn Worker> {
        match kind {
            WorkerKind::Researcher => {
                let mut w = Researcher::new(llm.clone());
                if let Some(r) = &self.retriever {
                    w = w.with_retriever(r.clone(), self.top_k);
                }
                Arc::new(w)
            }
            WorkerKind::DeepResearcher => {
                let mut w = DeepResearcher::new(llm.clone());
                if let Some(r) = &self.retriever {
                    w = w.with_retriever(r.clone(), self.top_k);
                }
                if let Some(web) = &self.web {
                    w = w.with_web(web.clone(), self.web_results);
                }
                Arc::new(w)
            }
            WorkerKind::Archivist => {
                let mut w = Archivist::new(llm.clone());
                if let Some(r) = &self.retriever {
                    w = w.with_retriever(r.clone(), self.top_k);
                }
                Arc::new(w)
            }
            WorkerKind::Architect => Arc::new(Architect::new(llm.clone())),
        }
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        let llm = self
            .llm
            .clone()
            .ok_or_else(|| AgentError::Config("no LLM client configured".into()))?;
        let critic_llm = self.critic_llm.clone().unwrap_or_else(|| llm.clone());

        let mut workers = self.workers.clone();
        for kind in WorkerKind::ALL {
            if !workers.contains(kind) {
                workers.insert(kind, self.default_worker(kind, &llm));
            }
        }

        let planner = match &self.planner {
            Some(p) => p.clone(),
            None => {
                let mut p = Planner::new(llm.clone());
                if let Some(r) = &self.retriever {
                    p = p.with_retriever(r.clone(), self.top_k);
                }
                Arc::new(p)
            }
        };

        tracing::info!(
            "Lab ready (model: {}, soft at {:?}, hard at {})",
            llm.model_name(),
            self.settings.soft_thresholds,
            self.settings.hard_threshold
        );

        Ok(Orchestrator {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new())),
            artifacts: self.artifacts,
            supervisor: Supervisor::new(self.settings, critic_llm, llm),
            planner,
            workers,
            retriever: self.retriever,
            sessions: SessionRegistry::new(),
            recovery: RecoveryEngine::new(),
            max_turns: self.max_turns,
            keep_checkpoints: self.keep_checkpoints,
            context_messages: self.context_messages,
        })
    }
}
