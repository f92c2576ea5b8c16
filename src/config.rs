//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `INFINITE__*` 覆盖（双下划线表示嵌套，如 `INFINITE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub supervisor: SupervisorSection,
    pub storage: StorageSection,
    pub retrieval: RetrievalSection,
    pub web: WebSection,
}

/// [app] 段：应用名、送入模型的对话上下文条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 每次调用模型时携带的最近对话条数（短期上下文）
    pub max_context_messages: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "Infinite Research Lab".to_string(),
            max_context_messages: 20,
        }
    }
}

/// [llm] 段：后端选择、降级链与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：mock / openai / deepseek；无对应 API Key 时回落到 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 采样温度；评审与路由依赖稳定输出，默认偏低
    pub temperature: f32,
    /// 主模型暂时性失败时依次尝试的备用模型
    pub fallback_models: Vec<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            temperature: 0.2,
            fallback_models: Vec::new(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次模型调用超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 120 }
    }
}

/// [supervisor] 段：升级阈值、评审截断、计划修订与回合预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub soft_thresholds: Vec<u32>,
    pub hard_threshold: u32,
    /// 送入评审的 worker 输出最大字符数
    pub critique_char_budget: usize,
    pub plan_refinement: bool,
    /// 单次 drive 的最大回合数
    pub max_turns: usize,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            soft_thresholds: vec![10, 20],
            hard_threshold: 30,
            critique_char_budget: 12_000,
            plan_refinement: true,
            max_turns: 500,
        }
    }
}

/// 检查点存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

/// [storage] 段：检查点与产物目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    pub checkpoint_db: PathBuf,
    pub artifacts_dir: PathBuf,
    /// 每个线程保留的检查点数；0 表示不裁剪
    pub keep_checkpoints: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            checkpoint_db: PathBuf::from("data/checkpoints.db"),
            artifacts_dir: PathBuf::from("artifacts"),
            keep_checkpoints: 0,
        }
    }
}

/// [retrieval] 段：本地资料目录与分块参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub sources: Vec<PathBuf>,
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub web: WebSearchSection,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            top_k: 5,
            chunk_size: 1000,
            chunk_overlap: 200,
            web: WebSearchSection::default(),
        }
    }
}

impl RetrievalSection {
    /// 配置中的目录加上环境变量 LOCAL_RESEARCH_DIR（若设置）
    pub fn effective_sources(&self) -> Vec<PathBuf> {
        let mut sources = self.sources.clone();
        if let Ok(dir) = std::env::var("LOCAL_RESEARCH_DIR") {
            let dir = PathBuf::from(dir);
            if !dir.as_os_str().is_empty() && !sources.contains(&dir) {
                sources.push(dir);
            }
        }
        sources
    }
}

/// [retrieval.web] 段：Google Custom Search；api_key / cx 缺省时读 GOOGLE_API_KEY / GOOGLE_CSE_ID
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSearchSection {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub cx: Option<String>,
    pub num_results: usize,
    pub timeout_secs: u64,
}

impl Default for WebSearchSection {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            cx: None,
            num_results: 5,
            timeout_secs: 15,
        }
    }
}

/// [web] 段：HTTP/WS 服务监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub bind_addr: String,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 INFINITE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 INFINITE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("INFINITE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.supervisor.soft_thresholds, vec![10, 20]);
        assert_eq!(cfg.supervisor.hard_threshold, 30);
        assert_eq!(cfg.retrieval.chunk_size, 1000);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.storage.keep_checkpoints, 0);
    }

    #[test]
    fn test_shipped_config_keeps_all_checkpoints() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.storage.keep_checkpoints, 0);
        assert_eq!(cfg.supervisor.hard_threshold, 30);
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[supervisor]\nhard_threshold = 5\n[storage]\nbackend = \"sqlite\"\n"
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.supervisor.hard_threshold, 5);
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
        // 未出现的键保持默认
        assert_eq!(cfg.supervisor.critique_char_budget, 12_000);
    }
}
