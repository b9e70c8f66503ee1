//! Mapping from relay errors to HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use crate::external_deps::captcha::CaptchaError;
use crate::portal::{AuthError, DownloadError};
use crate::relay::{ErrorKind, RelayError};

/// Structured error body plus the status it is served with.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({
                "error": message.into(),
                "kind": kind.as_str(),
            }),
        }
    }

    /// Upstream payload forwarded as-is.
    fn passthrough(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.body {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequest, message)
    }

    pub fn method_not_allowed() -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            body: json!({ "error": "Method Not Allowed" }),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Captcha(err) => err.into(),
            RelayError::Auth(err) => err.into(),
            RelayError::Download(err) => err.into(),
            RelayError::InvalidRequest(message) => ApiError::bad_request(message),
            RelayError::Transport(err) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Unexpected,
                "Unexpected error",
            )
            .with("details", err.to_string()),
        }
    }
}

impl From<CaptchaError> for ApiError {
    fn from(err: CaptchaError) -> Self {
        let kind = err.kind();
        match err {
            CaptchaError::Configuration(message) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, kind, message)
            }
            CaptchaError::Submission(reason) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                kind,
                "Failed to send CAPTCHA request",
            )
            .with("details", reason),
            CaptchaError::Timeout { attempts, .. } => ApiError::new(
                StatusCode::GATEWAY_TIMEOUT,
                kind,
                "Timeout waiting for CAPTCHA result",
            )
            .with("attempts", attempts),
            CaptchaError::Unexpected(message) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, kind, "Unexpected error")
                    .with("details", message)
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let kind = err.kind();
        let step = err.step();
        let api = match err {
            AuthError::InvalidRequest(message) => ApiError::bad_request(message),
            AuthError::Authentication { status, details } => {
                ApiError::new(StatusCode::UNAUTHORIZED, kind, "Login failed")
                    .with("details", details)
                    .with("status", status)
            }
            AuthError::MissingToken { details } => {
                ApiError::new(StatusCode::BAD_REQUEST, kind, "No token in login response")
                    .with("details", details)
            }
            AuthError::ContractFetch { status, details } => {
                ApiError::new(upstream_status(status), kind, "Failed to fetch contracts")
                    .with("details", details)
                    .with("status", status)
            }
            AuthError::ContractNotFound { alias } => {
                ApiError::new(StatusCode::BAD_REQUEST, kind, "Place of consumption not found")
                    .with("details", format!("No contract found with alias: {alias}"))
            }
            AuthError::ContractData {
                has_pa,
                has_poc,
                details,
            } => ApiError::new(
                StatusCode::BAD_REQUEST,
                kind,
                "Missing required data from contract",
            )
            .with("data", json!({ "hasPa": has_pa, "hasPoc": has_poc }))
            .with("details", details),
            AuthError::InvoiceFetch { status, details } => {
                ApiError::new(upstream_status(status), kind, "Failed to fetch invoices")
                    .with("details", details)
                    .with("status", status)
            }
            AuthError::Unexpected { message, .. } => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, kind, "Unexpected error")
                    .with("message", message)
            }
        };

        match step {
            Some(step) => api.with("step", step.as_str()),
            None => api,
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        let kind = err.kind();
        match err {
            DownloadError::InvalidRequest(message) => ApiError::bad_request(message),
            DownloadError::Upstream { status, body } => {
                ApiError::passthrough(upstream_status(status), body)
            }
            DownloadError::Unexpected(message) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                kind,
                "Failed to download invoice",
            )
            .with("details", message),
        }
    }
}

/// Upstream error status, or 500 when the portal flagged an error on a
/// non-error status.
fn upstream_status(status: u16) -> StatusCode {
    match StatusCode::from_u16(status) {
        Ok(code) if code.is_client_error() || code.is_server_error() => code,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::PipelineStep;
    use std::time::Duration;

    #[test]
    fn authentication_failure_is_401_with_upstream_payload() {
        let api: ApiError = AuthError::Authentication {
            status: 403,
            details: json!({"error": true}),
        }
        .into();
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(api.body()["error"], "Login failed");
        assert_eq!(api.body()["kind"], "AuthenticationError");
        assert_eq!(api.body()["status"], 403);
        assert_eq!(api.body()["step"], "login");
        assert_eq!(api.body()["details"]["error"], true);
    }

    #[test]
    fn contract_fetch_mirrors_upstream_error_status() {
        let api: ApiError = AuthError::ContractFetch {
            status: 403,
            details: json!({}),
        }
        .into();
        assert_eq!(api.status(), StatusCode::FORBIDDEN);

        let api: ApiError = AuthError::ContractFetch {
            status: 200,
            details: json!({"error": true}),
        }
        .into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn contract_data_reports_flags() {
        let api: ApiError = AuthError::ContractData {
            has_pa: true,
            has_poc: false,
            details: json!({"alias": "Home"}),
        }
        .into();
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api.body()["data"], json!({"hasPa": true, "hasPoc": false}));
        assert_eq!(api.body()["step"], PipelineStep::Contracts.as_str());
    }

    #[test]
    fn captcha_timeout_is_504() {
        let api: ApiError = CaptchaError::Timeout {
            attempts: 20,
            waited: Duration::from_secs(100),
        }
        .into();
        assert_eq!(api.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(api.body()["kind"], "CaptchaTimeoutError");
    }

    #[test]
    fn download_upstream_body_is_forwarded_verbatim() {
        let body = json!({"message": "expired"});
        let api: ApiError = DownloadError::Upstream {
            status: 410,
            body: body.clone(),
        }
        .into();
        assert_eq!(api.status(), StatusCode::GONE);
        assert_eq!(api.body(), &body);
    }
}
