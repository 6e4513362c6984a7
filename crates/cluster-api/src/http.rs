//! HTTP boundary.
//!
//! - `POST /join?name=` enrolls a node. Unauthenticated.
//! - `GET /info` echoes the proxy's TLS metadata headers to an
//!   authenticated node.
//! - `GET /health` reports liveness and drain state.
//!
//! Status mapping for `/join`: success and directory failures are both
//! `200` and differ in `code`; anything else is an opaque `500`.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth::{identity_from_subject_dn, AuthenticationGuard, Unauthenticated};
use crate::config::TlsHeaderConfig;
use crate::directory::NodeId;
use crate::enrollment::{EnrollmentError, EnrollmentService};
use crate::shutdown::ShutdownHandle;

/// Value of the verify header when the proxy accepted the client certificate.
pub const VERIFY_SUCCESS: &str = "SUCCESS";

/// Body of an unexpected `/join` failure.
pub const INTERNAL_ERROR_BODY: &str = "Server Internal Error";

/// Application state shared across handlers
#[derive(Debug)]
pub struct AppState {
    pub enrollment: EnrollmentService,
    pub guard: AuthenticationGuard,
    pub headers: TlsHeaderConfig,
    pub shutdown: ShutdownHandle,
}

/// Errors surfaced by handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Draining; no new work is accepted.
    Draining,
    Unauthenticated,
    Enrollment(EnrollmentError),
}

impl From<Unauthenticated> for ApiError {
    fn from(_: Unauthenticated) -> Self {
        Self::Unauthenticated
    }
}

impl From<EnrollmentError> for ApiError {
    fn from(err: EnrollmentError) -> Self {
        Self::Enrollment(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Draining => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            Self::Unauthenticated => StatusCode::UNAUTHORIZED.into_response(),
            Self::Enrollment(EnrollmentError::Failed(_)) => (
                StatusCode::OK,
                Json(JoinResponse {
                    code: 1,
                    message: "unable to create node",
                    data: None,
                }),
            )
                .into_response(),
            Self::Enrollment(err) => {
                error!(error = %err, "join failed");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
            }
        }
    }
}

/// Query string of `POST /join`.
#[derive(Debug, Deserialize)]
pub struct JoinParams {
    pub name: Option<String>,
}

/// Envelope of every `/join` reply that is not a 5xx.
#[derive(Debug, Serialize)]
pub struct JoinResponse<'a> {
    pub code: u8,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JoinData<'a>>,
}

/// Credentials handed to a freshly enrolled node.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinData<'a> {
    pub cert: &'a str,
    pub key: &'a str,
    pub node_id: NodeId,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Health check endpoint
///
/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let (status, label) = if state.shutdown.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ok")
    };
    (
        status,
        Json(HealthResponse {
            status: label,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
        .into_response()
}

/// Enroll a new node.
///
/// POST /join?name=<display name>
pub async fn join(
    State(state): State<Arc<AppState>>,
    Query(params): Query<JoinParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if state.shutdown.is_draining() {
        return Err(ApiError::Draining);
    }

    let source = header_str(&headers, &state.headers.forwarded_for_header)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let enrollment = state
        .enrollment
        .join(params.name.as_deref(), source)
        .await?;

    let body = JoinResponse {
        code: 0,
        message: "success",
        data: Some(JoinData {
            cert: enrollment.certificate.pem(),
            key: enrollment.key().pem(),
            node_id: enrollment.node_id,
        }),
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

/// Echo the TLS metadata headers back to an authenticated node.
///
/// GET /info
pub async fn info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    if state.shutdown.is_draining() {
        return Err(ApiError::Draining);
    }

    let names = &state.headers;
    let verified = header_str(&headers, &names.verify_header) == Some(VERIFY_SUCCESS);
    let identity =
        header_str(&headers, &names.subject_dn_header).and_then(identity_from_subject_dn);
    let fingerprint = header_str(&headers, &names.fingerprint_header);

    state
        .guard
        .authenticate(verified, identity, fingerprint)
        .await?;

    Ok(Json(metadata_headers(&headers, &names.metadata_prefix)))
}

/// Headers whose name starts with `prefix`, first value wins.
fn metadata_headers(headers: &HeaderMap, prefix: &str) -> BTreeMap<String, String> {
    let prefix = prefix.to_ascii_lowercase();
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        if name.as_str().starts_with(&prefix) {
            out.entry(name.as_str().to_string())
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
    }
    out
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/join", post(join))
        .route("/info", get(info))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
