//! Captcha provider integrations.
//!
//! The portal's login form is guarded by Google reCAPTCHA. Providers submit the
//! widget's site key and page URL to a solving vendor and wait for the
//! response token the login endpoint expects.

mod twocaptcha;

pub use twocaptcha::TwoCaptchaProvider;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Polling policy used while waiting for the vendor to solve a task.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl CaptchaConfig {
    /// Upper bound on time spent polling.
    pub fn ceiling(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// reCAPTCHA v2 widget to solve: its site key and the page hosting it.
#[derive(Debug, Clone)]
pub struct CaptchaTask {
    pub site_key: String,
    pub page_url: Url,
}

impl CaptchaTask {
    pub fn new(site_key: impl Into<String>, page_url: Url) -> Self {
        Self {
            site_key: site_key.into(),
            page_url,
        }
    }
}

/// Resolved captcha token and optional metadata.
///
/// `expires_in` counts from the moment the provider handed the token over.
#[derive(Debug, Clone)]
pub struct CaptchaSolution {
    pub token: String,
    pub expires_in: Option<Duration>,
    pub metadata: HashMap<String, String>,
}

impl CaptchaSolution {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_in: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_expiry(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn insert_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Common result type returned by captcha providers.
pub type CaptchaResult = Result<CaptchaSolution, CaptchaError>;

/// Shared interface implemented by captcha vendors.
#[async_trait]
pub trait CaptchaProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, task: &CaptchaTask) -> CaptchaResult;
}

/// Errors surfaced by captcha providers.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha provider misconfigured: {0}")]
    Configuration(String),
    #[error("captcha task rejected by provider: {0}")]
    Submission(String),
    #[error("captcha not solved after {attempts} polls ({waited:?})")]
    Timeout { attempts: u32, waited: Duration },
    #[error("captcha error: {0}")]
    Unexpected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_twenty_polls_five_seconds_apart() {
        let config = CaptchaConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 20);
        assert_eq!(config.ceiling(), Duration::from_secs(100));
    }
}
