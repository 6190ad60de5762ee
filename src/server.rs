//! HTTP service — live-chat WebSocket endpoint plus the assistant and
//! feedback routes used by the chat widget.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::assistant::gemini::{GeminiConfig, GeminiGenerator};
use crate::assistant::{Assistant, AssistantReply, ChatTurn, Generator, Unconfigured};
use crate::broker::{self, Broker};
use crate::ipc::protocol::{CloseCode, Role};
use crate::store::{self, Feedback, SharedStore, SqliteStore, StoreError};

/// Service startup/runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("record store: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings for `serve`.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    /// `None` runs without a generator.
    pub gemini: Option<GeminiConfig>,
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub assistant: Arc<Assistant>,
    pub store: SharedStore,
}

impl AppState {
    pub fn new(broker: Broker, store: SharedStore, generator: Arc<dyn Generator>) -> Self {
        Self {
            broker,
            assistant: Arc::new(Assistant::new(Arc::clone(&store), generator)),
            store,
        }
    }
}

/// Run the service until SIGTERM or SIGINT.
pub async fn serve(config: ServeConfig) -> Result<(), ServerError> {
    let store: SharedStore = Arc::new(SqliteStore::open(&config.db_path)?);
    let generator: Arc<dyn Generator> = match config.gemini {
        Some(gemini) => {
            tracing::info!(model = %gemini.model, "gemini generator enabled");
            Arc::new(GeminiGenerator::new(gemini))
        }
        None => {
            tracing::warn!("no GEMINI_API_KEY set, assistant will use fallback replies");
            Arc::new(Unconfigured)
        }
    };

    let state = AppState::new(Broker::spawn(), store, generator);
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|source| ServerError::BindFailed {
            addr: config.bind,
            source,
        })?;
    tracing::info!(addr = %config.bind, "livechatd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("livechatd stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut sigterm), Ok(mut sigint)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        tracing::warn!("signal handlers unavailable, running until killed");
        std::future::pending::<()>().await;
        return;
    };
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/chat", post(chat))
        .route("/feedback", post(submit_feedback))
        .route("/livechat/status", get(livechat_status))
        .route("/ws/livechat/{client_type}/{client_id}", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({"message": "Campus Guide backend is running"}))
}

#[derive(Debug, Deserialize)]
pub struct ChatInput {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default = "default_lang")]
    pub target_lang: String,
}

fn default_lang() -> String {
    "en".to_string()
}

async fn chat(State(state): State<AppState>, Json(input): Json<ChatInput>) -> Json<AssistantReply> {
    let reply = state
        .assistant
        .respond(&input.message, &input.history, &input.target_lang)
        .await;
    Json(reply)
}

async fn submit_feedback(
    State(state): State<AppState>,
    Json(feedback): Json<Feedback>,
) -> Json<Value> {
    match store::run_blocking(&state.store, move |s| s.save_feedback(&feedback)).await {
        Ok(()) => Json(json!({"status": "success", "message": "Feedback received"})),
        Err(e) => {
            tracing::error!(error = %e, "error saving feedback");
            Json(json!({"status": "error", "message": e.to_string()}))
        }
    }
}

async fn livechat_status(State(state): State<AppState>) -> Json<Value> {
    match state.broker.snapshot().await {
        Ok(snapshot) => Json(json!(snapshot)),
        Err(e) => Json(json!({"status": "error", "message": e.to_string()})),
    }
}

/// GET /ws/livechat/{client_type}/{client_id}
///
/// Unknown client types are upgraded and then closed with 1003.
async fn ws_upgrade(
    State(state): State<AppState>,
    Path((client_type, client_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    match client_type.parse::<Role>() {
        Ok(role) => ws.on_upgrade(move |socket| {
            broker::run_connection(socket, client_id, role, state.broker)
        }),
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "rejecting connection");
            ws.on_upgrade(move |mut socket| async move {
                let code = CloseCode::UnsupportedData;
                let frame = CloseFrame {
                    code: code.code(),
                    reason: code.reason().into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
            })
        }
    }
}
