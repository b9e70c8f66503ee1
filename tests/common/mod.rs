//! Shared fixtures for router-level tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderValue;
use http::header::{CONTENT_TYPE, HeaderMap};
use invoice_relay::{
    CaptchaProvider, CaptchaResult, CaptchaSolution, CaptchaTask, EventDispatcher, HttpTransport,
    InvoiceRelay, RelayConfig, TransportError, TransportRequest, TransportResponse,
};
use serde_json::Value;
use url::Url;

/// Replays queued upstream responses and records what was sent.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<TransportResponse>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_json(&self, status: u16, body: Value) -> &Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.push_raw(status, headers, Bytes::from(body.to_string()))
    }

    pub fn push_raw(&self, status: u16, headers: HeaderMap, body: Bytes) -> &Self {
        self.responses.lock().unwrap().push_back(TransportResponse {
            status,
            headers,
            body,
            url: Url::parse("https://upstream.invalid/").unwrap(),
        });
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
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Transport("unscripted request".into()))
    }
}

/// Captcha provider that answers immediately.
pub struct InstantCaptcha {
    pub token: &'static str,
    pub tasks: Mutex<Vec<CaptchaTask>>,
}

impl InstantCaptcha {
    pub fn new(token: &'static str) -> Arc<Self> {
        Arc::new(Self {
            token,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CaptchaProvider for InstantCaptcha {
    fn name(&self) -> &'static str {
        "instant"
    }

    async fn solve(&self, task: &CaptchaTask) -> CaptchaResult {
        self.tasks.lock().unwrap().push(task.clone());
        Ok(CaptchaSolution::new(self.token))
    }
}

/// Relay wired to a scripted transport and, optionally, an instant captcha.
pub fn relay(
    transport: Arc<ScriptedTransport>,
    captcha: Option<Arc<InstantCaptcha>>,
    config: RelayConfig,
) -> Arc<InvoiceRelay> {
    let mut builder = InvoiceRelay::builder()
        .with_config(config)
        .with_transport(transport)
        .with_events(Arc::new(EventDispatcher::new()));
    if let Some(captcha) = captcha {
        builder = builder.with_captcha_provider(captcha);
    }
    Arc::new(builder.build().expect("relay should build"))
}
