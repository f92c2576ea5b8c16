//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek 预设 / 降级链 / Mock）

pub mod fallback;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use fallback::FallbackLlmClient;
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use traits::{LlmClient, LlmError};

use crate::config::AppConfig;

/// 根据配置与环境变量创建 LLM：主模型 + fallback_models 组成降级链（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai = std::env::var("OPENAI_API_KEY").is_ok();

    let models: Vec<String> = std::iter::once(cfg.llm.model.clone())
        .chain(cfg.llm.fallback_models.iter().cloned())
        .collect();

    let base = cfg.llm.base_url.as_deref();
    let temperature = cfg.llm.temperature;
    let chain: Vec<Arc<dyn LlmClient>> = match provider.as_str() {
        "deepseek" if has_deepseek || has_openai => {
            tracing::info!("Using DeepSeek LLM chain {:?}", models);
            models
                .iter()
                .map(|m| {
                    Arc::new(OpenAiClient::deepseek(base, m).with_temperature(temperature))
                        as Arc<dyn LlmClient>
                })
                .collect()
        }
        "openai" if has_openai => {
            tracing::info!("Using OpenAI LLM chain {:?}", models);
            models
                .iter()
                .map(|m| {
                    Arc::new(OpenAiClient::new(base, m, None).with_temperature(temperature))
                        as Arc<dyn LlmClient>
                })
                .collect()
        }
        _ => {
            tracing::warn!(
                "No API key set or provider '{}' unknown, using Mock LLM",
                provider
            );
            return Arc::new(MockLlmClient);
        }
    };

    Arc::new(FallbackLlmClient::new(chain, cfg.llm.timeouts.request))
}
