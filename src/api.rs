use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::crypto::SignatureDetails;
use crate::error::Error;
use crate::manager::SessionManager;
use crate::relay::{self, RelayServer};
use crate::session::{SessionStatus, SessionView};
use crate::subscription::RegistryStats;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayServer>,
    pub manager: Arc<SessionManager>,
}

/// REST endpoints plus the websocket relay at `/relay`.
pub fn router(state: AppState) -> Router {
    let relay = relay::router(Arc::clone(&state.relay));
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/session/create", post(create_session))
        .route("/api/session/status", get(session_status))
        .route("/api/session/disconnect", post(disconnect_session))
        .route("/api/message/sign", post(sign_message))
        .route("/api/sessions", get(active_sessions))
        .route("/api/relay/stats", get(relay_stats))
        .with_state(state)
        .merge(relay)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    session_id: String,
    pairing_uri: String,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session: Option<String>,
}

impl SessionQuery {
    fn session_id(self) -> Result<String, ApiError> {
        self.session
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("missing session parameter"))
    }
}

#[derive(Debug, Serialize)]
struct SessionStatusResponse {
    session_id: String,
    status: SessionStatus,
    wallet_address: Option<alloy::primitives::Address>,
}

#[derive(Debug, Serialize)]
struct DisconnectResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct SignRequest {
    session_id: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct SignResponse {
    signature: String,
    details: SignatureDetails,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = match &error {
            Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Error::SessionNotActive(_)
            | Error::InvalidKey(_)
            | Error::MalformedSignature(_)
            | Error::FromHexError(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::WalletRejected { .. } | Error::SignatureMismatch { .. } => {
                StatusCode::BAD_GATEWAY
            }
            e if e.is_transport() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("request failed: {error}");
        }
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

async fn create_session(
    State(state): State<AppState>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let (session, pairing_uri) = state.manager.create_session();
    state.manager.connect_to_relay(&session.id).await?;

    Ok(Json(CreateSessionResponse {
        session_id: session.id,
        pairing_uri,
    }))
}

async fn session_status(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let session = state.manager.get_session(&query.session_id()?)?;
    Ok(Json(SessionStatusResponse {
        session_id: session.id,
        status: session.status,
        wallet_address: session.wallet_address,
    }))
}

async fn disconnect_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    state
        .manager
        .disconnect_session(&query.session_id()?)
        .await?;
    Ok(Json(DisconnectResponse { success: true }))
}

async fn sign_message(
    State(state): State<AppState>,
    Json(payload): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    if payload.session_id.trim().is_empty() {
        return Err(ApiError::bad_request("session_id must not be empty"));
    }
    if payload.message.is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let details = state
        .manager
        .sign_message(&payload.session_id, &payload.message)
        .await?;
    Ok(Json(SignResponse {
        signature: details.signature.clone(),
        details,
    }))
}

async fn active_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let views = state
        .manager
        .get_active_sessions()
        .iter()
        .map(|session| session.view())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(views))
}

async fn relay_stats(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.relay.stats())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::SessionNotFound("s".into()), StatusCode::NOT_FOUND),
            (Error::SessionNotActive("s".into()), StatusCode::BAD_REQUEST),
            (Error::Timeout("wallet signature"), StatusCode::GATEWAY_TIMEOUT),
            (Error::ConnectionClosed, StatusCode::BAD_GATEWAY),
            (
                Error::WalletRejected {
                    code: 5000,
                    message: "User rejected.".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (Error::Decryption, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn test_missing_session_parameter() {
        let query = SessionQuery { session: None };
        assert_eq!(
            query.session_id().unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );

        let query = SessionQuery {
            session: Some("abc".into()),
        };
        assert_eq!(query.session_id().unwrap(), "abc");
    }
}
