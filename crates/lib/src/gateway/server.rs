//! Gateway HTTP server (single port): status, pairing, messaging and session actions.

use crate::activity::ActivityLog;
use crate::address::normalize_address;
use crate::channels::BridgeConnector;
use crate::config::{self, Config};
use crate::connection::{self, ConnectionHandle, ConnectionSettings, Connector};
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::error::GatewayError;
use crate::gateway::api::{
    format_uptime, ActionBody, ActivityBody, QrBody, SendMessageRequest, StatusBody, UptimeBody,
    QR_ALREADY_AUTHENTICATED, QR_AVAILABLE, QR_NOT_READY,
};
use crate::qr;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// When auth mode is token and a token is configured, returns it for request validation.
fn require_api_token(config: &Config) -> Option<String> {
    if config.gateway.auth.mode == config::GatewayAuthMode::Token {
        config::resolve_gateway_token(config)
    } else {
        None
    }
}

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub connection: ConnectionHandle,
    pub started_at: Instant,
    /// Port actually served (config, possibly overridden by env PORT).
    pub port: u16,
    /// When Some, every route but `GET /` needs `Authorization: Bearer <token>`.
    pub required_token: Option<String>,
}

impl GatewayState {
    fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Run the gateway server; binds to config.gateway.bind and the resolved port.
/// Sessions go through the bridge sidecar and credentials live in the session directory next
/// to `config_path`. Blocks until shutdown (SIGINT or SIGTERM).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let credentials_path = config::resolve_credentials_path(&config, &config_path);
    log::info!("credentials stored at {}", credentials_path.display());
    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(credentials_path));
    let connector: Arc<dyn Connector> = Arc::new(BridgeConnector::from_config(&config));
    run_gateway_with(config, connector, store, shutdown_signal()).await
}

/// Run the gateway against the given collaborator and credential store until `shutdown`
/// completes, then end the live session and stop the connection manager.
/// When bind is not loopback, token auth must be configured or startup fails.
pub async fn run_gateway_with<F>(
    config: Config,
    connector: Arc<dyn Connector>,
    store: Arc<dyn CredentialStore>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind = config.gateway.bind.trim().to_string();
    let required_token = require_api_token(&config);
    if !config::is_loopback_bind(&bind) && required_token.is_none() {
        anyhow::bail!(
            "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and gateway.auth.token or CHATGATE_GATEWAY_TOKEN)",
            bind
        );
    }

    let activity = Arc::new(ActivityLog::new(config.activity.capacity));
    if config::resolve_force_delete(&config) {
        match store.wipe().await {
            Ok(()) => {
                log::info!("stored credentials wiped before startup");
                activity
                    .info("session deleted on startup (forced)")
                    .await;
            }
            Err(e) => {
                log::warn!("startup credential wipe failed: {}", e);
                activity
                    .error(format!("failed to delete session on startup: {}", e))
                    .await;
            }
        }
    }

    let (connection, manager_task) = connection::spawn(
        ConnectionSettings::from_config(&config),
        connector,
        store,
        activity,
    );

    let port = config::resolve_gateway_port(&config);
    let state = GatewayState {
        config: Arc::new(config),
        connection: connection.clone(),
        started_at: Instant::now(),
        port,
        required_token,
    };
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            connection.shutdown().await;
            return Err(e).with_context(|| format!("binding to {}", bind_addr));
        }
    };
    log::info!("gateway listening on {}", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server exited");

    log::info!("http server stopped, closing session");
    connection.shutdown().await;
    let _ = manager_task.await;
    log::info!("gateway stopped");
    served
}

fn router(state: GatewayState) -> Router {
    let protected = Router::new()
        .route("/status", get(status_http))
        .route("/info", get(status_http))
        .route("/uptime", get(uptime_http))
        .route("/qr", get(qr_http))
        .route("/qr-image", get(qr_image_http))
        .route("/activity", get(activity_http))
        .route("/send-message", post(send_message_http))
        .route("/logout", post(logout_http))
        .route("/reconnect", post(reconnect_http))
        .route("/delete-session", post(delete_session_http))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/", get(health_http))
        .merge(protected)
        .with_state(state)
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

async fn require_token(State(state): State<GatewayState>, request: Request, next: Next) -> Response {
    if let Some(ref expected) = state.required_token {
        if bearer_token(request.headers()) != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ActionBody::failed("unauthorized")),
            )
                .into_response();
        }
    }
    next.run(request).await
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
    }))
}

/// GET /status and GET /info.
async fn status_http(State(state): State<GatewayState>) -> Json<StatusBody> {
    let snapshot = state.connection.snapshot().await;
    let pairing = snapshot.pairing_view(Utc::now());
    Json(StatusBody {
        status: "online",
        ready: snapshot.is_ready(),
        qr_available: pairing.present,
        qr_expires_in: pairing.seconds_remaining,
        connection_attempts: snapshot.attempts,
        uptime_seconds: state.uptime_seconds(),
        state: snapshot.state.name(),
        last_disconnect: snapshot.last_disconnect,
    })
}

async fn uptime_http(State(state): State<GatewayState>) -> Json<UptimeBody> {
    let secs = state.uptime_seconds();
    Json(UptimeBody {
        uptime: format_uptime(secs),
        uptime_seconds: secs,
    })
}

/// GET /qr returns the live pairing token with a rendered image, or why there is none.
async fn qr_http(State(state): State<GatewayState>) -> Json<QrBody> {
    let snapshot = state.connection.snapshot().await;
    if let Some(challenge) = snapshot.pairing.as_ref() {
        let qr_image = match qr::svg_data_url(&challenge.token) {
            Ok(url) => Some(url),
            Err(e) => {
                log::warn!("rendering pairing QR failed: {}", e);
                None
            }
        };
        return Json(QrBody {
            success: true,
            qr: Some(challenge.token.clone()),
            qr_image,
            expires_in: Some(challenge.seconds_remaining(Utc::now())),
            message: QR_AVAILABLE,
        });
    }
    let message = if snapshot.is_ready() {
        QR_ALREADY_AUTHENTICATED
    } else {
        QR_NOT_READY
    };
    Json(QrBody {
        success: false,
        qr: None,
        qr_image: None,
        expires_in: None,
        message,
    })
}

/// GET /qr-image returns the pairing token as SVG, or 404 JSON when there is none.
async fn qr_image_http(State(state): State<GatewayState>) -> Response {
    let snapshot = state.connection.snapshot().await;
    let Some(challenge) = snapshot.pairing.as_ref() else {
        let message = if snapshot.is_ready() {
            QR_ALREADY_AUTHENTICATED
        } else {
            QR_NOT_READY
        };
        return (StatusCode::NOT_FOUND, Json(ActionBody::failed(message))).into_response();
    };
    match qr::render_svg(&challenge.token) {
        Ok(svg) => ([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response(),
        Err(e) => GatewayError::Transport(format!("rendering QR code: {}", e)).into_response(),
    }
}

async fn activity_http(State(state): State<GatewayState>) -> Json<ActivityBody> {
    let snapshot = state.connection.snapshot().await;
    let activity = state.connection.activity();
    let logs = activity.snapshot().await;
    Json(ActivityBody {
        success: true,
        total: logs.len(),
        logs,
        capacity: activity.capacity(),
        connection_attempts: snapshot.attempts,
        ready: snapshot.is_ready(),
    })
}

/// POST /send-message `{phone, message}`. 400 on bad input, 503 when not ready, 500 on transport failure.
async fn send_message_http(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<ActionBody>, GatewayError> {
    let request: SendMessageRequest = if body.is_empty() {
        SendMessageRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return Err(rejected_send(
                    &state,
                    GatewayError::input(format!("invalid JSON body: {}", e)),
                )
                .await)
            }
        }
    };
    let (address, message) = match request
        .require()
        .and_then(|(phone, message)| Ok((normalize_address(phone)?, message)))
    {
        Ok(parsed) => parsed,
        Err(e) => return Err(rejected_send(&state, e).await),
    };
    state.connection.send_message(&address, message).await?;
    Ok(Json(ActionBody::ok("Message sent successfully")))
}

/// Record a send request that never reached the connection manager.
async fn rejected_send(state: &GatewayState, err: GatewayError) -> GatewayError {
    state
        .connection
        .activity()
        .error(format!("failed to send message: {}", err))
        .await;
    err
}

async fn logout_http(State(state): State<GatewayState>) -> Result<Json<ActionBody>, GatewayError> {
    state.connection.logout().await?;
    Ok(Json(ActionBody::ok(
        "Logged out successfully. New QR code will be generated.",
    )))
}

async fn reconnect_http(
    State(state): State<GatewayState>,
) -> Result<Json<ActionBody>, GatewayError> {
    state.connection.reconnect().await?;
    Ok(Json(ActionBody::ok("Reconnecting...")))
}

async fn delete_session_http(
    State(state): State<GatewayState>,
) -> Result<Json<ActionBody>, GatewayError> {
    state.connection.delete_session().await?;
    Ok(Json(ActionBody::ok(
        "Session deleted. New QR code will be generated.",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer s3cret".parse().expect("header"));
        assert_eq!(bearer_token(&headers), Some("s3cret"));
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().expect("header"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn api_token_only_in_token_mode() {
        let mut config = Config::default();
        config.gateway.auth.token = Some("s3cret".into());
        assert_eq!(require_api_token(&config), None);
        config.gateway.auth.mode = config::GatewayAuthMode::Token;
        if std::env::var("CHATGATE_GATEWAY_TOKEN").is_err() {
            assert_eq!(require_api_token(&config).as_deref(), Some("s3cret"));
        }
    }
}
