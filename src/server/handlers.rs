//! Request handlers for the relay API.
//!
//! Handles POST /api/solve-captcha, POST /api/login-engie,
//! POST /api/download-invoice and GET /health.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;

use super::error::ApiError;
use crate::portal::Credentials;
use crate::portal::types::lenient_string;
use crate::relay::InvoiceRelay;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<InvoiceRelay>,
    /// Process start time for uptime reporting.
    pub started: Instant,
}

impl AppState {
    pub fn new(relay: Arc<InvoiceRelay>) -> Self {
        Self {
            relay,
            started: Instant::now(),
        }
    }
}

/// Request body for POST /api/solve-captcha.
#[derive(Debug, Default, Deserialize)]
pub struct SolveCaptchaRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub sitekey: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pageurl: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SolveCaptchaResponse {
    pub token: String,
}

/// Request body for POST /api/login-engie.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub captcha_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub place_of_consumption: Option<String>,
}

/// Request body for POST /api/download-invoice.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub download_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

/// Parse a JSON body without rejecting empty payloads; absent fields are
/// reported by the relay as missing.
fn parse_body<T>(body: &Bytes) -> Result<T, ApiError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        log::debug!("rejecting malformed request body: {err}");
        ApiError::bad_request("Invalid JSON body")
    })
}

/// POST /api/solve-captcha
pub async fn solve_captcha(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SolveCaptchaResponse>, ApiError> {
    let request: SolveCaptchaRequest = parse_body(&body)?;
    let solution = state
        .relay
        .solve_captcha(
            request.sitekey.as_deref().unwrap_or_default(),
            request.pageurl.as_deref().unwrap_or_default(),
        )
        .await?;

    Ok(Json(SolveCaptchaResponse {
        token: solution.token,
    }))
}

/// POST /api/login-engie
pub async fn login(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: LoginRequest = parse_body(&body)?;
    let credentials = Credentials::new(
        request.username.unwrap_or_default(),
        request.password.unwrap_or_default(),
        request.place_of_consumption.unwrap_or_default(),
    );
    let captcha_token = request.captcha_token.unwrap_or_default();

    let batch = state.relay.login(&credentials, &captcha_token).await?;
    log::info!("returning {} invoice groups", batch.entries().len());

    Ok(Json(json!({ "error": false, "data": [batch] })).into_response())
}

/// POST /api/download-invoice
///
/// Streams the document bytes back with the upstream content headers. A
/// missing `Content-Disposition` upstream stays missing.
pub async fn download_invoice(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: DownloadRequest = parse_body(&body)?;
    let document = state
        .relay
        .download(
            request.download_url.as_deref().unwrap_or_default(),
            request.token.as_deref().unwrap_or_default(),
        )
        .await?;

    let mut response = Response::new(Body::from(document.bytes));
    let headers = response.headers_mut();
    if let Some(value) = document.content_type.as_deref().and_then(header_value) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Some(value) = document
        .content_disposition
        .as_deref()
        .and_then(header_value)
    {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn header_value(raw: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(raw).ok()
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

/// CORS preflight on the browser-facing routes.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}
