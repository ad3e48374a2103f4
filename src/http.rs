//! HTTP transport for the [`Custos`] façade.
//!
//! | Method | Path                  | Operation          | Success |
//! |--------|-----------------------|--------------------|---------|
//! | GET    | `/health`             | unauthenticated    | 200     |
//! | GET    | `/data/{id}`          | retrieve-secret    | 200     |
//! | PUT    | `/data/{id}`          | store-secret       | 201     |
//! | POST   | `/lock`               | lock               | 200     |
//! | POST   | `/unlock`             | unlock             | 200     |
//! | GET    | `/status/{device_id}` | read-lock-status   | 200     |
//! | DELETE | `/wipe`               | wipe-all           | 200     |
//!
//! Credentials arrive as `Authorization: Bearer <token>`. Without a bearer
//! header the `token` query parameter is used, and `/lock` and `/unlock`
//! also accept a `token` field in a urlencoded form body. Errors are JSON
//! `{"error": "..."}` bodies; every authorization failure has the same body.
//!
//! `data` in `PUT /data/{id}` may be any JSON value. A string is stored as its
//! UTF-8 text and anything else as its JSON encoding. On retrieval a payload
//! that decodes to a JSON object or array is returned as that value; every
//! other payload is returned as a string.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::{Form, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};
use zeroize::Zeroizing;

use crate::error::CustosError;
use crate::service::Custos;
use crate::store::SecretPayload;

pub type AppState = Arc<Custos>;

impl IntoResponse for CustosError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            Self::Locked => (StatusCode::LOCKED, "Service is locked".to_string()),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "Data not found".to_string()),
            Self::ConfirmationRequired => {
                (StatusCode::BAD_REQUEST, "Confirmation required".to_string())
            }
            Self::InvalidRequest(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            Self::AlreadyProvisioned => (StatusCode::CONFLICT, self.to_string()),
            Self::Storage(_) | Self::Config(_) | Self::RandomnessFailure => {
                error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// The token presented with a request, if any. Wiped on drop.
pub struct Credential(Option<Zeroizing<String>>);

impl Credential {
    fn as_deref(&self) -> Option<&str> {
        self.0.as_ref().map(|t| t.as_str())
    }

    /// Fall back to a form `token` field when the request carried no token
    /// in its header or query string.
    fn or_form(self, form: Result<Form<TokenField>, FormRejection>) -> Self {
        if self.0.is_some() {
            return self;
        }
        Self(form.ok().and_then(|Form(f)| f.token).map(Zeroizing::new))
    }
}

/// A `token` field in a query string or form body.
#[derive(Deserialize)]
struct TokenField {
    token: Option<String>,
}

fn bearer(headers: &HeaderMap) -> Option<Zeroizing<String>> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| Zeroizing::new(t.to_string()))
}

impl<S: Send + Sync> FromRequestParts<S> for Credential {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer(&parts.headers).or_else(|| {
            Query::<TokenField>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(f)| f.token)
                .map(Zeroizing::new)
        });
        Ok(Self(token))
    }
}

fn encode_data(data: Value) -> Result<SecretPayload, CustosError> {
    match data {
        Value::String(text) => Ok(SecretPayload::new(text.into_bytes())),
        other => serde_json::to_vec(&other)
            .map(SecretPayload::new)
            .map_err(|e| CustosError::InvalidRequest(format!("unencodable data: {e}"))),
    }
}

fn decode_data(payload: &SecretPayload) -> Value {
    match serde_json::from_slice::<Value>(payload.as_bytes()) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::String(String::from_utf8_lossy(payload.as_bytes()).into_owned()),
    }
}

/// Run a façade call on the blocking pool; state mutations do synchronous,
/// fsync'd file I/O.
async fn blocking<T, F>(state: AppState, f: F) -> Result<T, CustosError>
where
    T: Send + 'static,
    F: FnOnce(&Custos) -> Result<T, CustosError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| CustosError::Storage(format!("worker failed: {e}")))?
}

#[derive(Debug, Deserialize)]
pub struct StoreBody {
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct WipeBody {
    pub confirm: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/data/{id}", get(get_data).put(put_data))
        .route("/lock", post(lock))
        .route("/unlock", post(unlock))
        .route("/status/{device_id}", get(device_status))
        .route("/wipe", delete(wipe))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    Json(state.health()).into_response()
}

async fn get_data(
    State(state): State<AppState>,
    credential: Credential,
    Path(id): Path<String>,
) -> Result<Response, CustosError> {
    let payload = blocking(state, move |svc| svc.retrieve_secret(credential.as_deref(), &id)).await?;
    Ok((StatusCode::OK, Json(json!({ "data": decode_data(&payload) }))).into_response())
}

async fn put_data(
    State(state): State<AppState>,
    credential: Credential,
    Path(id): Path<String>,
    body: Result<Json<StoreBody>, JsonRejection>,
) -> Result<Response, CustosError> {
    let payload = body
        .ok()
        .and_then(|Json(b)| b.data)
        .map(encode_data)
        .transpose()?;
    blocking(state, move |svc| {
        svc.store_request(credential.as_deref(), &id, payload)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "stored" }))).into_response())
}

async fn lock(
    State(state): State<AppState>,
    credential: Credential,
    form: Result<Form<TokenField>, FormRejection>,
) -> Result<Response, CustosError> {
    let credential = credential.or_form(form);
    blocking(state, move |svc| svc.lock(credential.as_deref())).await?;
    Ok(Json(json!({
        "status": "locked",
        "note": "New data requests will be denied.",
    }))
    .into_response())
}

async fn unlock(
    State(state): State<AppState>,
    credential: Credential,
    form: Result<Form<TokenField>, FormRejection>,
) -> Result<Response, CustosError> {
    let credential = credential.or_form(form);
    blocking(state, move |svc| svc.unlock(credential.as_deref())).await?;
    Ok(Json(json!({
        "status": "unlocked",
        "note": "Data requests are now allowed.",
    }))
    .into_response())
}

async fn device_status(
    State(state): State<AppState>,
    credential: Credential,
    Path(device_id): Path<String>,
) -> Result<Response, CustosError> {
    let status =
        blocking(state, move |svc| svc.device_status(credential.as_deref(), &device_id)).await?;
    Ok(Json(status).into_response())
}

async fn wipe(
    State(state): State<AppState>,
    credential: Credential,
    body: Result<Json<WipeBody>, JsonRejection>,
) -> Result<Response, CustosError> {
    let confirm = body.ok().and_then(|Json(b)| b.confirm);
    blocking(state, move |svc| {
        svc.destroy_all(credential.as_deref(), confirm.as_deref())
    })
    .await?;
    Ok(Json(json!({ "status": "All data destroyed" })).into_response())
}

/// Bind `addr` and serve until Ctrl-C or SIGTERM.
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "custos listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
