//! axum 路由与处理函数

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::{AgentError, Orchestrator, RunEvent, RunReply, RunView};
use crate::persistence::{CheckpointMeta, ThreadSummary};
use crate::retrieval::IngestSummary;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// 缺省时新建 thread
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub thread_id: String,
    pub response: String,
    pub current_step: Option<String>,
    pub status: String,
    pub artifacts: std::collections::BTreeMap<String, String>,
}

impl From<RunReply> for ChatResponse {
    fn from(r: RunReply) -> Self {
        Self {
            thread_id: r.thread_id,
            response: r.reply,
            current_step: r.current_step,
            status: r.outcome.as_str().to_string(),
            artifacts: r.artifacts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    paths: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    thread_id: String,
    cancelled: bool,
}

/// WebSocket 客户端帧
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message { content: String },
    Cancel,
    Resume,
}

/// 解析客户端文本：`/pause`、`/resume`、JSON 帧，其余按用户消息处理
pub fn parse_client_frame(text: &str) -> Option<ClientFrame> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed {
        "/pause" | "/cancel" | "/stop" => return Some(ClientFrame::Cancel),
        "/resume" => return Some(ClientFrame::Resume),
        _ => {}
    }
    if trimmed.starts_with('{') {
        if let Ok(frame) = serde_json::from_str::<ClientFrame>(trimmed) {
            return Some(frame);
        }
    }
    Some(ClientFrame::Message {
        content: trimmed.to_string(),
    })
}

fn error_status(e: &AgentError) -> StatusCode {
    match e {
        AgentError::InvalidState(_) => StatusCode::BAD_REQUEST,
        AgentError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn internal(e: AgentError) -> (StatusCode, String) {
    (error_status(&e), e.to_string())
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/chat", post(api_chat))
        .route("/api/ingest", post(api_ingest))
        .route("/api/threads", get(api_threads))
        .route("/api/threads/:id", get(api_thread))
        .route("/api/threads/:id/checkpoints", get(api_checkpoints))
        .route("/api/threads/:id/cancel", post(api_cancel))
        .route("/api/threads/:id/resume", post(api_resume))
        .route("/ws/:thread_id", get(ws_handler))
        .with_state(AppState { orchestrator })
}

async fn api_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }
    let thread_id = req
        .thread_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let reply = state
        .orchestrator
        .submit(&thread_id, message, None)
        .await
        .map_err(internal)?;
    Ok(Json(reply.into()))
}

async fn api_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestSummary>, (StatusCode, String)> {
    if req.paths.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "paths is required".to_string()));
    }
    let summary = state.orchestrator.ingest(&req.paths).await.map_err(internal)?;
    Ok(Json(summary))
}

async fn api_threads(
    State(state): State<AppState>,
) -> Result<Json<Vec<ThreadSummary>>, (StatusCode, String)> {
    Ok(Json(state.orchestrator.threads().await.map_err(internal)?))
}

async fn api_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunView>, (StatusCode, String)> {
    match state.orchestrator.snapshot(&id).await.map_err(internal)? {
        Some(view) => Ok(Json(view)),
        None => Err((StatusCode::NOT_FOUND, format!("thread '{}' not found", id))),
    }
}

async fn api_checkpoints(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<CheckpointMeta>>, (StatusCode, String)> {
    Ok(Json(state.orchestrator.history(&id).await.map_err(internal)?))
}

async fn api_cancel(State(state): State<AppState>, Path(id): Path<String>) -> Json<CancelResponse> {
    let cancelled = state.orchestrator.cancel(&id).await;
    Json(CancelResponse {
        thread_id: id,
        cancelled,
    })
}

async fn api_resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if state.orchestrator.snapshot(&id).await.map_err(internal)?.is_none() {
        return Err((StatusCode::NOT_FOUND, format!("thread '{}' not found", id)));
    }
    let reply = state.orchestrator.resume(&id, None).await.map_err(internal)?;
    Ok(Json(reply.into()))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(thread_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, thread_id, state))
}

/// 一个连接：事件经 mpsc 汇入发送任务；提交 / 恢复在独立任务中运行，接收循环随时处理暂停
async fn handle_socket(socket: WebSocket, thread_id: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RunEvent>();

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
    });

    tracing::info!("WebSocket connected for thread {}", thread_id);
    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let Some(frame) = parse_client_frame(&text) else {
            continue;
        };
        let orchestrator = state.orchestrator.clone();
        let thread = thread_id.clone();
        let events = tx.clone();
        match frame {
            ClientFrame::Cancel => {
                if !orchestrator.cancel(&thread).await {
                    let _ = events.send(RunEvent::Error {
                        message: "no active run for this thread".into(),
                    });
                }
            }
            ClientFrame::Resume => {
                tokio::spawn(async move {
                    // 失败已由编排器以 Error 事件推送
                    if let Err(e) = orchestrator.resume(&thread, Some(events)).await {
                        tracing::warn!("Resume on thread {} failed: {}", thread, e);
                    }
                });
            }
            ClientFrame::Message { content } => {
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.submit(&thread, &content, Some(events)).await {
                        tracing::warn!("Run on thread {} failed: {}", thread, e);
                    }
                });
            }
        }
    }

    tracing::info!("WebSocket closed for thread {}", thread_id);
    drop(tx);
    send_task.abort();
}
