//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Builder pattern
//! - Environment loading
//! - Captcha polling policy

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::external_deps::captcha::CaptchaConfig;
use crate::portal::DEFAULT_PORTAL_BASE_URL;

pub const DEFAULT_CAPTCHA_BASE_URL: &str = "https://2captcha.com";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
/// reCAPTCHA site key of the portal's login page.
pub const DEFAULT_SITE_KEY: &str = "6LeqYkkgAAAAAGa5Jl5qmTHK_Nl4_40-YfU4NN71";
pub const DEFAULT_LOGIN_PAGE: &str = "https://my.engie.ro/autentificare";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Runtime configuration for the relay.
#[derive(Clone)]
pub struct RelayConfig {
    /// 2captcha API key. Solving fails with a configuration error when unset.
    pub captcha_api_key: Option<String>,
    pub captcha_base_url: Url,
    pub captcha: CaptchaConfig,
    pub portal_base_url: Url,
    pub site_key: String,
    pub login_page_url: Url,
    pub bind_addr: SocketAddr,
    /// Log upstream payloads. They contain bearer tokens, so keep this off in
    /// production.
    pub debug_payloads: bool,
    /// Hosts the download proxy may contact. Empty means any host.
    pub allowed_download_hosts: Vec<String>,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field(
                "captcha_api_key",
                &self.captcha_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("captcha_base_url", &self.captcha_base_url.as_str())
            .field("captcha", &self.captcha)
            .field("portal_base_url", &self.portal_base_url.as_str())
            .field("site_key", &self.site_key)
            .field("login_page_url", &self.login_page_url.as_str())
            .field("bind_addr", &self.bind_addr)
            .field("debug_payloads", &self.debug_payloads)
            .field("allowed_download_hosts", &self.allowed_download_hosts)
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfigBuilder::new().build()
    }
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut builder = RelayConfigBuilder::new();

        if let Some(key) = get("CAPTCHA_API_KEY") {
            builder = builder.captcha_api_key(key);
        }
        if let Some(value) = get("CAPTCHA_BASE_URL") {
            builder = builder.captcha_base_url(parse_url("CAPTCHA_BASE_URL", &value)?);
        }
        if let Some(value) = get("PORTAL_BASE_URL") {
            builder = builder.portal_base_url(parse_url("PORTAL_BASE_URL", &value)?);
        }
        if let Some(value) = get("PORTAL_SITE_KEY") {
            builder = builder.site_key(value);
        }
        if let Some(value) = get("PORTAL_LOGIN_PAGE") {
            builder = builder.login_page_url(parse_url("PORTAL_LOGIN_PAGE", &value)?);
        }
        if let Some(value) = get("INVOICE_RELAY_BIND") {
            let addr = value
                .parse::<SocketAddr>()
                .map_err(|err| ConfigError::invalid("INVOICE_RELAY_BIND", &value, err))?;
            builder = builder.bind_addr(addr);
        }
        if let Some(value) = get("INVOICE_RELAY_DEBUG") {
            builder = builder.debug_payloads(parse_bool("INVOICE_RELAY_DEBUG", &value)?);
        }
        if let Some(value) = get("CAPTCHA_POLL_INTERVAL_SECS") {
            let secs = parse_positive("CAPTCHA_POLL_INTERVAL_SECS", &value)?;
            builder = builder.poll_interval(Duration::from_secs(secs));
        }
        if let Some(value) = get("CAPTCHA_MAX_ATTEMPTS") {
            let attempts = parse_positive("CAPTCHA_MAX_ATTEMPTS", &value)?;
            let attempts = u32::try_from(attempts)
                .map_err(|err| ConfigError::invalid("CAPTCHA_MAX_ATTEMPTS", &value, err))?;
            builder = builder.max_attempts(attempts);
        }
        if let Some(value) = get("INVOICE_RELAY_DOWNLOAD_HOSTS") {
            builder = builder.allowed_download_hosts(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|host| !host.is_empty())
                    .map(str::to_string),
            );
        }

        Ok(builder.build())
    }
}

/// Fluent builder for [`RelayConfig`].
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RelayConfig {
                captcha_api_key: None,
                captcha_base_url: static_url(DEFAULT_CAPTCHA_BASE_URL),
                captcha: CaptchaConfig::default(),
                portal_base_url: static_url(DEFAULT_PORTAL_BASE_URL),
                site_key: DEFAULT_SITE_KEY.to_string(),
                login_page_url: static_url(DEFAULT_LOGIN_PAGE),
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
                debug_payloads: false,
                allowed_download_hosts: Vec::new(),
            },
        }
    }

    pub fn captcha_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.captcha_api_key = Some(key.into());
        self
    }

    pub fn captcha_base_url(mut self, url: Url) -> Self {
        self.config.captcha_base_url = url;
        self
    }

    pub fn portal_base_url(mut self, url: Url) -> Self {
        self.config.portal_base_url = url;
        self
    }

    pub fn site_key(mut self, site_key: impl Into<String>) -> Self {
        self.config.site_key = site_key.into();
        self
    }

    pub fn login_page_url(mut self, url: Url) -> Self {
        self.config.login_page_url = url;
        self
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn debug_payloads(mut self, enabled: bool) -> Self {
        self.config.debug_payloads = enabled;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.captcha.poll_interval = interval;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.captcha.max_attempts = attempts.max(1);
        self
    }

    pub fn allowed_download_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_download_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> RelayConfig {
        self.config
    }
}

impl Default for RelayConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn static_url(raw: &'static str) -> Url {
    Url::parse(raw).unwrap_or_else(|err| panic!("built-in url {raw} is invalid: {err}"))
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|err| ConfigError::invalid(key, value, err))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected a boolean")),
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(0) => Err(ConfigError::invalid(key, value, "must be greater than zero")),
        Ok(parsed) => Ok(parsed),
        Err(err) => Err(ConfigError::invalid(key, value, err)),
    }
}
