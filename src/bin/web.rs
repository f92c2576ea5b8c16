//! Infinite Research Lab - HTTP / WebSocket 服务
//!
//! 启动: cargo run --bin infinite-web
//! 地址由 [web] bind_addr 决定，默认 http://127.0.0.1:8000

#![cfg(feature = "web")]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use infinite::config::load_config;
use infinite::gateway::router;
use infinite::{observability, LabBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::var("INFINITE_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });

    let lab = LabBuilder::from_config(&cfg)
        .await
        .context("Failed to assemble lab")?
        .build()
        .context("Failed to build orchestrator")?;
    let app = router(Arc::new(lab));

    let listener = tokio::net::TcpListener::bind(&cfg.web.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.web.bind_addr))?;
    tracing::info!("Infinite Research Lab: http://{}", cfg.web.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
