use std::net::SocketAddr;

use {
    axum::{
        Json, Router,
        extract::State,
        http::{StatusCode, header},
        response::{Html, IntoResponse, Response},
        routing::{get, post},
    },
    stickerbot_supervisor::StartOutcome,
    tokio_util::sync::CancellationToken,
    tower_http::trace::TraceLayer,
    tracing::info,
};

use crate::state::AppState;

/// Reload interval of the QR page while waiting for a scan.
const QR_REFRESH_SECS: u32 = 10;

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/healthz", get(healthz_handler))
        .route("/qr", get(qr_page_handler))
        .route("/qr.png", get(qr_png_handler))
        .route("/status", get(status_handler))
        .route("/restart", post(restart_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    app: Router,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn root_handler() -> &'static str {
    "✅ Bot ativo"
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn qr_page_handler(State(state): State<AppState>) -> Html<String> {
    let body = match state.qr.current() {
        Some(image) => format!(
            "<h1>Conecte o bot</h1>\
             <p>WhatsApp &gt; Aparelhos conectados &gt; Conectar um aparelho</p>\
             <img src=\"/qr.png?v={}\" alt=\"QR code\" width=\"320\" height=\"320\">",
            image.sequence
        ),
        None => "<h1>Nenhum QR code pendente</h1>\
                 <p>O bot já está conectado ou ainda está iniciando.</p>"
            .to_string(),
    };
    Html(format!(
        "<!doctype html><html lang=\"pt-BR\"><head><meta charset=\"utf-8\">\
         <meta http-equiv=\"refresh\" content=\"{QR_REFRESH_SECS}\">\
         <title>stickerbot</title></head><body>{body}</body></html>"
    ))
}

async fn qr_png_handler(State(state): State<AppState>) -> Response {
    match state.qr.current() {
        Some(image) => (
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            image.png,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "no pairing code pending").into_response(),
    }
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.status().await)
}

async fn restart_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("restart requested over HTTP");
    let (status, outcome) = match state.session.restart().await {
        StartOutcome::Started => (StatusCode::ACCEPTED, "started"),
        StartOutcome::AlreadyActive => (StatusCode::OK, "already_active"),
        StartOutcome::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
    };
    (status, Json(serde_json::json!({ "outcome": outcome })))
}
