//! HTTP API Server
//!
//! REST frontend for user provisioning. Parses requests, hands validated
//! parameters to the [`SyncEngine`] and maps outcomes to status codes.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::registry::ClientRecord;
use crate::sync::{ClientConfig, DeleteOutcome, ReconcileReport, SyncEngine};

/// Shared application state
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, engine: Arc<SyncEngine>) -> Self {
        let state = Arc::new(AppState { engine });
        Self { config, state }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Self::create_router(Arc::clone(&self.state))
    }

    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/", get(handle_root))
            .route("/users", get(handle_list_users).post(handle_create_user))
            .route("/users/:username", axum::routing::delete(handle_delete_user))
            .route("/users/:username/config", get(handle_client_config))
            .route("/users/:username/retry", post(handle_retry))
            .route("/reconcile", post(handle_reconcile))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        tracing::info!("HTTP API stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl+C received, shutting down");
}

// ============ Request/Response Types ============

/// Create user request
#[derive(Debug, Deserialize, Serialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub allowed_ips: String,
}

/// Create user response
#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub message: String,
    pub config: ClientConfig,
    pub already_present: bool,
}

/// Client config response
#[derive(Debug, Serialize)]
pub struct ClientConfigResponse {
    pub config: ClientConfig,
    /// wg-quick file for the client
    pub wg_quick: String,
}

/// Registered user, without private key material
#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub username: String,
    pub public_key: String,
    pub allowed_ips: String,
    pub created_at: DateTime<Utc>,
    /// Delete started but not finished
    pub revoking: bool,
}

impl From<ClientRecord> for UserSummary {
    fn from(record: ClientRecord) -> Self {
        Self {
            username: record.username,
            public_key: record.public_key,
            allowed_ips: record.allowed_ips,
            created_at: record.created_at,
            revoking: record.revoking,
        }
    }
}

/// List users response
#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub count: usize,
    pub users: Vec<UserSummary>,
}

/// Root status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
    pub gateway_public_key: String,
    pub listen_port: u16,
    pub users: u64,
}

/// Message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Engine error rendered as JSON
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: self.0.code().to_string(),
            }),
        )
            .into_response()
    }
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidUsername(_) | Error::InvalidAllowedIps { .. } | Error::InvalidKey(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::DuplicateUsername(_) | Error::DuplicatePublicKey(_) | Error::AddressConflict { .. } => {
            StatusCode::CONFLICT
        }
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============ Handlers ============

async fn handle_root(State(state): State<Arc<AppState>>) -> std::result::Result<Json<StatusResponse>, ApiError> {
    let gateway = state.engine.gateway();
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
        message: "WolfGate running".to_string(),
        gateway_public_key: gateway.public_key(),
        listen_port: gateway.listen_port(),
        users: state.engine.registry().count().await?,
    }))
}

async fn handle_list_users(State(state): State<Arc<AppState>>) -> std::result::Result<Json<UsersResponse>, ApiError> {
    let users: Vec<UserSummary> = state
        .engine
        .list_users()
        .await?
        .into_iter()
        .map(UserSummary::from)
        .collect();
    Ok(Json(UsersResponse {
        count: users.len(),
        users,
    }))
}

async fn handle_create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let created = state.engine.create_user(&req.username, &req.allowed_ips).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            message: "User created".to_string(),
            already_present: created.already_present(),
            config: created.client,
        }),
    ))
}

async fn handle_retry(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> std::result::Result<Json<CreateUserResponse>, ApiError> {
    let created = state.engine.retry_config(&username).await?;
    let message = if created.already_present() {
        "Peer already present"
    } else {
        "Peer restored"
    };
    Ok(Json(CreateUserResponse {
        message: message.to_string(),
        already_present: created.already_present(),
        config: created.client,
    }))
}

async fn handle_client_config(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> std::result::Result<Json<ClientConfigResponse>, ApiError> {
    let config = state
        .engine
        .client_config(&username)
        .await?
        .ok_or(Error::NotFound(username))?;
    Ok(Json(ClientConfigResponse {
        wg_quick: config.render(),
        config,
    }))
}

async fn handle_delete_user(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> std::result::Result<Json<MessageResponse>, ApiError> {
    match state.engine.delete_user(&username).await? {
        DeleteOutcome::Deleted => Ok(Json(MessageResponse {
            message: format!("User '{}' deleted successfully", username),
        })),
        DeleteOutcome::NotFound => Err(Error::NotFound(username).into()),
    }
}

async fn handle_reconcile(State(state): State<Arc<AppState>>) -> std::result::Result<Json<ReconcileReport>, ApiError> {
    Ok(Json(state.engine.reconcile().await?))
}
