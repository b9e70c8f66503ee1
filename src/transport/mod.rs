//! Outbound HTTP seam shared by the captcha client and the portal calls.
//!
//! Every upstream exchange goes through [`HttpTransport`], which keeps the
//! request shapes testable without a network and gives one place to observe
//! traffic.

pub mod reqwest_client;

pub use reqwest_client::ReqwestTransport;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Contract that abstracts the concrete HTTP client.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Request payload understood by the transport.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` fields, in order.
    Form(Vec<(String, String)>),
}

/// Planned outbound request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl TransportRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_form<K, V, I>(url: Url, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Form(
                fields
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Attach `Authorization: Bearer <token>`.
    pub fn with_bearer(mut self, token: &str) -> Result<Self, TransportError> {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| TransportError::InvalidHeader(AUTHORIZATION.to_string()))?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    /// Value of a form field, if this is a form request.
    pub fn form_field(&self, name: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(fields) => fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            RequestBody::Empty => None,
        }
    }
}

/// Minimal response representation returned by the transport abstraction.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the buffered body as JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn header_str(&self, name: impl AsRef<str>) -> Option<&str> {
        HeaderName::from_bytes(name.as_ref().as_bytes())
            .ok()
            .and_then(|name| self.headers.get(name))
            .and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("failed to build http client: {0}")]
    Build(String),
    #[error("failed to convert header '{0}'")]
    InvalidHeader(String),
}

/// JavaScript-style truthiness of a payload's `error` member.
///
/// The portal reports failures as `{"error": true}`, an error string, or an
/// error object, while successful payloads carry `false`, `null`, or nothing.
pub fn is_error_flagged(payload: &Value) -> bool {
    payload.get("error").is_some_and(is_truthy)
}

/// JavaScript truthiness of a JSON value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
pub(crate) mod stub {
    //! Scripted transport used by unit tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued responses in order and records every request.
    #[derive(Default)]
    pub struct StubTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl StubTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_json(&self, status: u16, body: Value) -> &Self {
            let mut headers = HeaderMap::new();
            headers.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            self.push_raw(status, headers, Bytes::from(body.to_string()))
        }

        pub fn push_raw(&self, status: u16, headers: HeaderMap, body: Bytes) -> &Self {
            self.responses.lock().unwrap().push_back(Ok(TransportResponse {
                status,
                headers,
                body,
                url: Url::parse("https://stub.invalid/").unwrap(),
            }));
            self
        }

        pub fn push_error(&self, message: &str) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(TransportError::Transport(message.to_string())));
            self
        }

        pub fn requests(&self) -> Vec<TransportRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Transport("no more stub responses".into())))
        }
    }
}
