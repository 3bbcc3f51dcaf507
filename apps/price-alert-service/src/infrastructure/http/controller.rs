//! HTTP Controller (Driver Adapter)
//!
//! Axum REST API over the rule store, plus the WebSocket alert stream.
//!
//! # Endpoints
//!
//! - `GET /api/products` - Instrument catalogue
//! - `GET /api/alerts?user_id=` - Rules of one owner, newest first
//! - `POST /api/alerts` - Create a rule (201)
//! - `DELETE /api/alerts/{id}` - Delete a rule (204, 404 when absent)
//! - `GET /ws` - WebSocket alert stream
//!
//! Mutations reload the rule snapshot before responding so new rules are
//! evaluated on the next tick.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::application::ports::{SharedRuleStore, StoreError};
use crate::application::services::AlertEngine;
use crate::domain::market::InstrumentId;
use crate::domain::rules::{NewRule, RuleId, ThresholdKind};
use crate::infrastructure::hub::AlertHub;

use super::request::{AlertsQuery, CreateAlertRequest};
use super::response::{AlertRuleResponse, ErrorResponse, ProductResponse};
use super::ws::ws_handler;

// =============================================================================
// Application State
// =============================================================================

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Rule store.
    pub store: SharedRuleStore,
    /// Engine reloaded after mutations.
    pub engine: Arc<AlertEngine>,
    /// Hub that WebSocket clients subscribe to.
    pub hub: AlertHub,
    /// Owner used when a request does not name one.
    pub default_owner: Arc<str>,
}

impl AppState {
    fn owner(&self, requested: Option<String>) -> String {
        requested
            .map(|owner| owner.trim().to_string())
            .filter(|owner| !owner.is_empty())
            .unwrap_or_else(|| self.default_owner.to_string())
    }

    async fn reload(&self) {
        // The engine logs and records reload failures itself.
        let _ = self.engine.reload_rules().await;
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/products", get(list_products))
        .route("/api/alerts", get(list_alerts).post(create_alert))
        .route("/api/alerts/{id}", delete(delete_alert))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// Handler error mapped to a status code and `{"error": ...}` body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or invalid request.
    #[error("{0}")]
    BadRequest(String),

    /// Referenced rule does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Store failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::NotFound(format!("alert rule {id} not found")),
            other => Self::Store(other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(e) => {
                tracing::error!(error = %e, "Rule store request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let instruments = state.store.instruments().await?;
    Ok(Json(instruments.into_iter().map(ProductResponse::from).collect()))
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<AlertRuleResponse>>, ApiError> {
    let owner = state.owner(query.user_id);
    let rules = state.store.rules_for_owner(&owner).await?;
    Ok(Json(rules.into_iter().map(AlertRuleResponse::from).collect()))
}

async fn create_alert(
    State(state): State<AppState>,
    body: Result<Json<CreateAlertRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AlertRuleResponse>), ApiError> {
    let Json(request) = body?;

    let kind = request
        .threshold_type
        .parse::<ThresholdKind>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if request.threshold_value <= Decimal::ZERO {
        return Err(ApiError::BadRequest(
            "threshold_value must be positive".to_string(),
        ));
    }

    let instrument_id = InstrumentId(request.product_id);
    let instruments = state.store.instruments().await?;
    if !instruments.iter().any(|i| i.id == instrument_id) {
        return Err(ApiError::BadRequest(format!(
            "unknown product_id {}",
            request.product_id
        )));
    }

    let rule = state
        .store
        .create_rule(NewRule {
            owner_id: state.owner(request.user_id),
            instrument_id,
            kind,
            threshold: request.threshold_value,
        })
        .await?;

    tracing::info!(
        rule_id = %rule.id,
        owner = %rule.owner_id,
        instrument_id = %rule.instrument_id,
        kind = %rule.kind,
        threshold = %rule.threshold,
        "Alert rule created"
    );
    state.reload().await;

    Ok((StatusCode::CREATED, Json(AlertRuleResponse::from(rule))))
}

async fn delete_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_rule(RuleId(id)).await?;

    tracing::info!(rule_id = id, "Alert rule deleted");
    state.reload().await;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// HTTP Server
// =============================================================================

/// REST API and WebSocket server.
pub struct HttpServer {
    port: u16,
    state: AppState,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new HTTP server.
    #[must_use]
    pub const fn new(port: u16, state: AppState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server stops with
    /// an error.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = create_router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let error = ApiError::from(StoreError::NotFound(RuleId(9)));
        assert!(matches!(&error, ApiError::NotFound(_)));
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_failures_map_to_internal_error() {
        let error = ApiError::from(StoreError::Query("timeout".to_string()));
        assert_eq!(error.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_request_maps_to_400() {
        let error = ApiError::BadRequest("nope".to_string());
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
