use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use url::Url;

use super::{
    CaptchaConfig, CaptchaError, CaptchaProvider, CaptchaResult, CaptchaSolution, CaptchaTask,
};
use crate::config::DEFAULT_CAPTCHA_BASE_URL;
use crate::modules::events::{CaptchaPollEvent, EventDispatcher, RelayEvent};
use crate::transport::{HttpTransport, TransportRequest};

/// Google accepts a reCAPTCHA response for two minutes after it is issued.
const RECAPTCHA_TOKEN_TTL: Duration = Duration::from_secs(120);

static DEFAULT_BASE_URL: Lazy<Url> = Lazy::new(|| {
    Url::parse(DEFAULT_CAPTCHA_BASE_URL)
        .unwrap_or_else(|err| panic!("built-in 2captcha url: {err}"))
});

/// Adapter for the 2captcha `in.php` / `res.php` API.
pub struct TwoCaptchaProvider {
    api_key: String,
    base_url: Url,
    config: CaptchaConfig,
    transport: Arc<dyn HttpTransport>,
    events: Arc<EventDispatcher>,
}

/// Shape shared by the submit acknowledgement and the poll reply.
#[derive(Debug, Deserialize)]
struct VendorReply {
    #[serde(default)]
    status: Value,
    #[serde(default)]
    request: Value,
}

impl VendorReply {
    fn is_ok(&self) -> bool {
        match &self.status {
            Value::Number(n) => n.as_i64() == Some(1),
            Value::String(s) => s == "1",
            _ => false,
        }
    }

    fn request_text(&self) -> String {
        match &self.request {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl TwoCaptchaProvider {
    pub fn new(api_key: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_config(api_key, transport, CaptchaConfig::default())
    }

    pub fn with_config(
        api_key: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        config: CaptchaConfig,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.clone(),
            config,
            transport,
            events: Arc::new(EventDispatcher::new()),
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, CaptchaError> {
        self.base_url
            .join(path)
            .map_err(|err| CaptchaError::Configuration(format!("invalid captcha base url: {err}")))
    }

    async fn submit(&self, task: &CaptchaTask) -> Result<String, CaptchaError> {
        let request = TransportRequest::post_form(
            self.endpoint("in.php")?,
            [
                ("key", self.api_key.as_str()),
                ("method", "userrecaptcha"),
                ("googlekey", task.site_key.as_str()),
                ("pageurl", task.page_url.as_str()),
                ("json", "1"),
            ],
        );

        let reply = self.exchange(request).await?;
        if !reply.is_ok() {
            return Err(CaptchaError::Submission(reply.request_text()));
        }

        let job_id = reply.request_text();
        if job_id.is_empty() {
            return Err(CaptchaError::Submission("acknowledgement without job id".into()));
        }
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<VendorReply, CaptchaError> {
        let mut url = self.endpoint("res.php")?;
        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("action", "get")
            .append_pair("id", job_id)
            .append_pair("json", "1");

        self.exchange(TransportRequest::get(url)).await
    }

    async fn exchange(&self, request: TransportRequest) -> Result<VendorReply, CaptchaError> {
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|err| CaptchaError::Unexpected(err.to_string()))?;

        serde_json::from_slice(&response.body).map_err(|err| {
            CaptchaError::Unexpected(format!(
                "unreadable reply from captcha provider (status {}): {err}",
                response.status
            ))
        })
    }
}

#[async_trait]
impl CaptchaProvider for TwoCaptchaProvider {
    fn name(&self) -> &'static str {
        "twocaptcha"
    }

    async fn solve(&self, task: &CaptchaTask) -> CaptchaResult {
        if self.api_key.trim().is_empty() {
            return Err(CaptchaError::Configuration(
                "Missing CAPTCHA_API_KEY in environment".into(),
            ));
        }

        let job_id = self.submit(task).await?;
        log::info!(
            "captcha job {job_id} submitted for {}, polling every {:?}",
            task.page_url,
            self.config.poll_interval
        );

        for attempt in 1..=self.config.max_attempts {
            sleep(self.config.poll_interval).await;

            let reply = self.poll(&job_id).await?;
            let ready = reply.is_ok();
            let vendor_status = if ready {
                "ready".to_string()
            } else {
                reply.request_text()
            };

            self.events.dispatch(RelayEvent::CaptchaPoll(CaptchaPollEvent {
                job_id: job_id.clone(),
                attempt,
                max_attempts: self.config.max_attempts,
                ready,
                vendor_status,
                timestamp: Utc::now(),
            }));

            if ready {
                return Ok(CaptchaSolution::new(reply.request_text())
                    .with_expiry(RECAPTCHA_TOKEN_TTL)
                    .insert_metadata("job_id", job_id)
                    .insert_metadata("attempts", attempt.to_string()));
            }
        }

        Err(CaptchaError::Timeout {
            attempts: self.config.max_attempts,
            waited: self.config.ceiling(),
        })
    }
}
