//! Event system for the relay.
//!
//! Outbound calls, captcha polling, and pipeline steps report through a
//! dispatcher so logging stays in one place and secrets are scrubbed before
//! anything reaches the `log` facade.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Query parameters that carry credentials and must never be logged.
const SECRET_QUERY_PARAMS: &[&str] = &["key", "password", "token"];

const BODY_PREVIEW_LIMIT: usize = 2048;

/// Structured pre-request event.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub url: Url,
    pub method: Method,
    pub timestamp: DateTime<Utc>,
}

/// Structured upstream response event.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub url: Url,
    pub method: Method,
    pub status: u16,
    pub latency: Duration,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CaptchaPollEvent {
    pub job_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub ready: bool,
    pub vendor_status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StepEvent {
    pub step: &'static str,
    pub success: bool,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RelayEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
    CaptchaPoll(CaptchaPollEvent),
    Step(StepEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &RelayEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Dispatcher with a single [`LoggingHandler`] attached.
    pub fn with_logging(log_bodies: bool) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler::new(log_bodies)));
        dispatcher
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: RelayEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }

    pub fn step(&self, step: &'static str, success: bool, detail: impl Into<String>) {
        self.dispatch(RelayEvent::Step(StepEvent {
            step,
            success,
            detail: detail.into(),
            timestamp: Utc::now(),
        }));
    }
}

/// Logs events using the `log` crate.
///
/// Response bodies can hold bearer tokens, so they are only emitted when
/// `log_bodies` is set.
#[derive(Debug, Default)]
pub struct LoggingHandler {
    log_bodies: bool,
}

impl LoggingHandler {
    pub fn new(log_bodies: bool) -> Self {
        Self { log_bodies }
    }
}

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &RelayEvent) {
        match event {
            RelayEvent::Request(pre) => {
                log::debug!("-> {} {}", pre.method, redact_url(&pre.url));
            }
            RelayEvent::Response(post) => {
                log::debug!(
                    "<- {} {} -> {} ({:.2}s)",
                    post.method,
                    redact_url(&post.url),
                    post.status,
                    post.latency.as_secs_f64()
                );
                if self.log_bodies && is_textual(post.content_type.as_deref()) {
                    log::debug!("   body: {}", body_preview(&post.body));
                }
            }
            RelayEvent::CaptchaPoll(poll) => {
                log::info!(
                    "captcha {} poll {}/{} ready={} ({})",
                    poll.job_id,
                    poll.attempt,
                    poll.max_attempts,
                    poll.ready,
                    poll.vendor_status
                );
            }
            RelayEvent::Step(step) if step.success => {
                log::info!("step {} ok {}", step.step, step.detail);
            }
            RelayEvent::Step(step) => {
                log::warn!("step {} failed: {}", step.step, step.detail);
            }
        }
    }
}

/// Render a URL with credential-bearing query values masked.
pub fn redact_url(url: &Url) -> String {
    if url.query().is_none() {
        return url.to_string();
    }

    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            let value = if SECRET_QUERY_PARAMS.contains(&name.as_ref()) {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

fn is_textual(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.contains("json") || ct.starts_with("text/"))
        .unwrap_or(false)
}

fn body_preview(body: &Bytes) -> String {
    let end = body.len().min(BODY_PREVIEW_LIMIT);
    let mut preview = String::from_utf8_lossy(&body[..end]).into_owned();
    if body.len() > BODY_PREVIEW_LIMIT {
        preview.push_str("...");
    }
    preview
}
