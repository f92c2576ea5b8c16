//! 网络搜索：Google Custom Search JSON API
//!
//! api_key / cx 未在配置中给出时读取 GOOGLE_API_KEY / GOOGLE_CSE_ID。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use super::Snippet;
use crate::config::WebSearchSection;

const ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// 网络搜索错误；调用方只记录并降级，不中断运行
#[derive(Debug, Error)]
pub enum WebSearchError {
    #[error("Request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("HTTP {0}")]
    Status(StatusCode),
    #[error("Read body: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("Search quota exceeded")]
    Quota,
}

/// 网络搜索接口（DeepResearcher 使用）
#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, num: usize) -> Result<Vec<Snippet>, WebSearchError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

pub struct GoogleSearch {
    client: Client,
    api_key: String,
    cx: String,
}

impl GoogleSearch {
    pub fn new(api_key: impl Into<String>, cx: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            cx: cx.into(),
        }
    }

    /// 配置启用且凭据齐全时创建
    pub fn from_config(cfg: &WebSearchSection) -> Option<Self> {
        if !cfg.enabled {
            return None;
        }
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())?;
        let cx = cfg
            .cx
            .clone()
            .or_else(|| std::env::var("GOOGLE_CSE_ID").ok())?;
        Some(Self::new(api_key, cx, cfg.timeout_secs))
    }
}

#[async_trait]
impl WebSearcher for GoogleSearch {
    async fn search(&self, query: &str, num: usize) -> Result<Vec<Snippet>, WebSearchError> {
        let num = num.clamp(1, 10).to_string();
        let resp = self
            .client
            .get(ENDPOINT)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(WebSearchError::Request)?;
        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(WebSearchError::Quota),
            s if !s.is_success() => return Err(WebSearchError::Status(s)),
            _ => {}
        }
        let body: SearchResponse = resp.json().await.map_err(WebSearchError::Decode)?;
        Ok(body
            .items
            .into_iter()
            .map(|item| Snippet {
                source: item.link,
                text: format!("{}: {}", item.title, item.snippet),
                score: 1.0,
            })
            .collect())
    }
}
