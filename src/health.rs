//! HTTP health-check service. Keeps hosting platforms happy and runs the
//! Telegram bot as a supervised background task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use teloxide::Bot;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::bot;
use crate::bot::conversation::Conversation;
use crate::config::Config;
use crate::desk::DeskError;
use crate::desk::stock::{self, MAX_UPLOAD_BYTES};
use crate::desk::workbooks::sample_stock;
use crate::sheet::{SheetFormat, read_sheet, write_xlsx};
use crate::store::Store;
use crate::supervisor::task::{RestartPolicy, SupervisedTask, TaskProbe, TaskState};

const SERVICE_NAME: &str = "Diamond Trading Bot";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(300);
const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
/// Room for the multipart framing around a maximum-size file.
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES as usize + 64 * 1024;

#[derive(Clone)]
pub struct HealthState {
    pub bot: TaskProbe,
    /// Shared with the bot task, so counts reflect live chats.
    pub desk: Arc<Conversation>,
    pub port: u16,
    pub environment: String,
    pub session_timeout: Duration,
    pub token_set: bool,
}

impl HealthState {
    fn store(&self) -> &Store {
        self.desk.store()
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ping", get(ping))
        .route("/keep-alive", get(ping))
        .route("/status", get(status))
        .route("/sessions", get(sessions))
        .route("/api/download-template", get(download_template))
        .route(
            "/api/upload-excel",
            post(upload_excel).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .with_state(Arc::new(state))
}

/// Fixed payload; never looks at the bot task.
async fn root() -> Json<Value> {
    Json(json!({ "status": "online", "service": SERVICE_NAME }))
}

async fn health(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Value>) {
    let bot = state.bot.status();
    let (status, code) = match bot.state {
        TaskState::Running => ("healthy", StatusCode::OK),
        TaskState::Starting | TaskState::Restarting => ("starting", StatusCode::OK),
        TaskState::Failed | TaskState::Stopped => ("degraded", StatusCode::SERVICE_UNAVAILABLE),
    };
    let active_sessions = state.store().sessions().map(|s| s.len()).unwrap_or(0);

    (
        code,
        Json(json!({
            "status": status,
            "service": SERVICE_NAME,
            "bot": bot.state,
            "active_sessions": active_sessions,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

async fn ping() -> Json<Value> {
    Json(json!({ "status": "alive", "timestamp": chrono::Utc::now().to_rfc3339() }))
}

async fn status(State(state): State<Arc<HealthState>>) -> Json<Value> {
    let bot = state.bot.status();
    let activity = state.desk.activity();
    let active_sessions = state.store().sessions().map(|s| s.len()).unwrap_or(0);
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.environment,
        "bot": bot.state,
        "restarts": bot.restarts,
        "last_error": bot.last_error,
        "port": state.port,
        "session_timeout_secs": state.session_timeout.as_secs(),
        "token_set": state.token_set,
        "active_sessions": active_sessions,
        "conversation_states": activity.open_flows,
        "rate_limited_users": activity.rate_limited_users,
    }))
}

async fn sessions(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Value>) {
    match state.store().sessions() {
        Ok(sessions) => {
            let users: Vec<Value> = sessions
                .iter()
                .map(|s| json!({ "username": s.username, "role": s.role.as_str() }))
                .collect();
            (StatusCode::OK, Json(json!({ "active_sessions": users.len(), "users": users })))
        }
        Err(e) => {
            error!("Failed to list sessions: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "database unavailable" })))
        }
    }
}

async fn download_template() -> Response {
    match write_xlsx(&sample_stock()) {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, XLSX_CONTENT_TYPE),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"sample_stock.xlsx\""),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to build sample workbook: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e }))).into_response()
        }
    }
}

fn rejected(code: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (code, Json(json!({ "success": false, "message": message.into() })))
}

/// Multipart stock upload for a supplier account, outside of Telegram.
/// Expects a `username` field and a `file` field.
async fn upload_excel(State(state): State<Arc<HealthState>>, mut multipart: Multipart) -> (StatusCode, Json<Value>) {
    let mut username = None;
    let mut file = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return rejected(e.status(), e.body_text()),
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("username") => match field.text().await {
                Ok(text) => username = Some(text.trim().to_string()),
                Err(e) => return rejected(e.status(), e.body_text()),
            },
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((name, bytes)),
                    Err(e) => return rejected(e.status(), e.body_text()),
                }
            }
            _ => {}
        }
    }

    let (Some(username), Some((file_name, data))) = (username, file) else {
        return rejected(StatusCode::BAD_REQUEST, "Both username and file are required");
    };
    let account = match state.store().find_account(&username) {
        Ok(account) => account,
        Err(e) => {
            error!("❌ API upload lookup failed: {e}");
            return rejected(StatusCode::INTERNAL_SERVER_ERROR, "database unavailable");
        }
    };
    let Some(account) = account else {
        return rejected(StatusCode::FORBIDDEN, "Only suppliers can upload stock");
    };
    if data.len() > MAX_UPLOAD_BYTES as usize {
        return rejected(StatusCode::BAD_REQUEST, "File size exceeds 10MB limit");
    }
    let sheet = match SheetFormat::from_file_name(&file_name).and_then(|format| read_sheet(&data, format)) {
        Ok(sheet) => sheet,
        Err(e) => return rejected(StatusCode::BAD_REQUEST, e),
    };

    let report = match stock::upload_stock_for(state.store(), &account, &sheet) {
        Ok(report) => report,
        Err(DeskError::Forbidden(msg)) => return rejected(StatusCode::FORBIDDEN, msg),
        Err(e) => {
            error!("❌ API upload failed for {username}: {e}");
            return rejected(StatusCode::INTERNAL_SERVER_ERROR, e.detail());
        }
    };
    if !report.is_valid() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": "Validation failed",
                "errors": report.errors,
                "warnings": report.warnings,
            })),
        );
    }

    let summary = stock::summarize(&report.stones);
    info!("✅ API upload: {} diamonds for supplier {}", summary.stones, account.username);
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": format!("Successfully uploaded {} diamonds", summary.stones),
            "stats": {
                "total_diamonds": summary.stones,
                "total_carats": summary.carats,
                "total_value": summary.value,
                "avg_price_per_carat": summary.avg_price,
            },
            "warnings": report.warnings,
        })),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

fn spawn_keep_alive(url: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut interval = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            match client.get(&url).send().await {
                Ok(resp) => info!("💓 Keep-alive ping: {}", resp.status()),
                Err(e) => warn!("Keep-alive ping failed: {e}"),
            }
        }
    })
}

/// Serve the health endpoints until Ctrl-C or SIGTERM, running the bot
/// alongside. The bot task is aborted on the way out.
pub async fn serve(config: Config, store: Arc<Store>) -> Result<(), String> {
    let desk = Arc::new(Conversation::from_config(store, &config));
    let bot_task = {
        let token = config.telegram_bot_token.clone();
        let desk = desk.clone();
        SupervisedTask::spawn("telegram bot", RestartPolicy::default(), move || {
            bot::run(desk.clone(), Bot::new(token.clone()), false)
        })
    };

    let keep_alive = config.keep_alive_url.clone().map(spawn_keep_alive);

    let app = router(HealthState {
        bot: bot_task.probe(),
        desk,
        port: config.port,
        environment: config.environment.clone(),
        session_timeout: config.session_timeout,
        token_set: config.check_token().is_ok(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind {addr}: {e}"))?;
    info!("🌐 Health server listening on http://{addr}");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("Health server error: {e}"));

    if let Some(task) = keep_alive {
        task.abort();
    }
    bot_task.abort();
    served
}
