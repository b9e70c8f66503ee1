//! High level relay orchestration.
//!
//! Wires the captcha provider, the authentication pipeline, and the download
//! proxy over a shared transport, and exposes the calls a front-end makes:
//! solve the login captcha, log in and list invoices, download one invoice.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::config::RelayConfig;
use crate::external_deps::captcha::{
    CaptchaError, CaptchaProvider, CaptchaSolution, CaptchaTask, TwoCaptchaProvider,
};
use crate::modules::events::EventDispatcher;
use crate::portal::{
    AuthError, AuthPipeline, Credentials, DownloadError, DownloadProxy, DownloadedDocument,
    InvoiceBatch,
};
use crate::transport::{HttpTransport, ReqwestTransport, TransportError};

/// Result alias used across the orchestration layer.
pub type RelayResult<T> = Result<T, RelayError>;

/// Stable classification of every failure the relay can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    CaptchaSubmission,
    CaptchaTimeout,
    Authentication,
    MissingToken,
    ContractFetch,
    ContractNotFound,
    ContractData,
    InvoiceFetch,
    InvalidRequest,
    Download,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::CaptchaSubmission => "CaptchaSubmissionError",
            ErrorKind::CaptchaTimeout => "CaptchaTimeoutError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::MissingToken => "MissingTokenError",
            ErrorKind::ContractFetch => "ContractFetchError",
            ErrorKind::ContractNotFound => "ContractNotFoundError",
            ErrorKind::ContractData => "ContractDataError",
            ErrorKind::InvoiceFetch => "InvoiceFetchError",
            ErrorKind::InvalidRequest => "InvalidRequestError",
            ErrorKind::Download => "DownloadError",
            ErrorKind::Unexpected => "UnexpectedError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CaptchaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptchaError::Configuration(_) => ErrorKind::Configuration,
            CaptchaError::Submission(_) => ErrorKind::CaptchaSubmission,
            CaptchaError::Timeout { .. } => ErrorKind::CaptchaTimeout,
            CaptchaError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            AuthError::Authentication { .. } => ErrorKind::Authentication,
            AuthError::MissingToken { .. } => ErrorKind::MissingToken,
            AuthError::ContractFetch { .. } => ErrorKind::ContractFetch,
            AuthError::ContractNotFound { .. } => ErrorKind::ContractNotFound,
            AuthError::ContractData { .. } => ErrorKind::ContractData,
            AuthError::InvoiceFetch { .. } => ErrorKind::InvoiceFetch,
            AuthError::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DownloadError::Upstream { .. } => ErrorKind::Download,
            DownloadError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

/// High-level error surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("captcha: {0}")]
    Captcha(#[from] CaptchaError),
    #[error("login: {0}")]
    Auth(#[from] AuthError),
    #[error("download: {0}")]
    Download(#[from] DownloadError),
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Captcha(err) => err.kind(),
            RelayError::Auth(err) => err.kind(),
            RelayError::Download(err) => err.kind(),
            RelayError::Transport(_) => ErrorKind::Unexpected,
            RelayError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }
}

/// Fluent builder for [`InvoiceRelay`].
pub struct InvoiceRelayBuilder {
    config: RelayConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    captcha_provider: Option<Arc<dyn CaptchaProvider>>,
    events: Option<Arc<EventDispatcher>>,
}

impl InvoiceRelayBuilder {
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            transport: None,
            captcha_provider: None,
            events: None,
        }
    }

    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the reqwest transport, e.g. with a scripted one in tests.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a different captcha vendor than 2captcha.
    pub fn with_captcha_provider(mut self, provider: Arc<dyn CaptchaProvider>) -> Self {
        self.captcha_provider = Some(provider);
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> RelayResult<InvoiceRelay> {
        let config = self.config;
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(EventDispatcher::with_logging(config.debug_payloads)));

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(events.clone())?),
        };

        let captcha_provider: Arc<dyn CaptchaProvider> = match self.captcha_provider {
            Some(provider) => provider,
            None => Arc::new(
                TwoCaptchaProvider::with_config(
                    config.captcha_api_key.clone().unwrap_or_default(),
                    transport.clone(),
                    config.captcha.clone(),
                )
                .with_base_url(config.captcha_base_url.clone())
                .with_events(events.clone()),
            ),
        };

        let auth = AuthPipeline::new(config.portal_base_url.clone(), transport.clone())
            .with_events(events.clone());
        let downloads = DownloadProxy::new(transport)
            .with_allowed_hosts(config.allowed_download_hosts.iter().cloned());

        Ok(InvoiceRelay {
            config,
            captcha_provider,
            auth,
            downloads,
        })
    }
}

impl Default for InvoiceRelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Main relay orchestrator. Holds no per-user state; every call carries
/// its own credentials or token.
pub struct InvoiceRelay {
    config: RelayConfig,
    captcha_provider: Arc<dyn CaptchaProvider>,
    auth: AuthPipeline,
    downloads: DownloadProxy,
}

impl InvoiceRelay {
    /// Construct a relay from configuration with the default transport.
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        InvoiceRelayBuilder::new().with_config(config).build()
    }

    /// Obtain a builder to customise the relay instance.
    pub fn builder() -> InvoiceRelayBuilder {
        InvoiceRelayBuilder::new()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Solve a reCAPTCHA v2 challenge. Blocks until solved or the polling
    /// ceiling is reached.
    pub async fn solve_captcha(
        &self,
        site_key: &str,
        page_url: &str,
    ) -> RelayResult<CaptchaSolution> {
        if site_key.is_empty() || page_url.is_empty() {
            return Err(RelayError::InvalidRequest(
                "Missing sitekey or pageurl".into(),
            ));
        }
        let page_url = Url::parse(page_url)
            .map_err(|err| RelayError::InvalidRequest(format!("invalid pageurl: {err}")))?;

        let task = CaptchaTask::new(site_key, page_url);
        Ok(self.captcha_provider.solve(&task).await?)
    }

    /// Log in and fetch the trailing year of invoices.
    pub async fn login(
        &self,
        credentials: &Credentials,
        captcha_token: &str,
    ) -> RelayResult<InvoiceBatch> {
        Ok(self.auth.login(credentials, captcha_token).await?)
    }

    /// Proxy one invoice document.
    pub async fn download(
        &self,
        download_url: &str,
        token: &str,
    ) -> RelayResult<DownloadedDocument> {
        Ok(self.downloads.download(download_url, token).await?)
    }

    /// Solve the login page captcha, then log in and list invoices.
    pub async fn fetch_invoices(&self, credentials: &Credentials) -> RelayResult<InvoiceBatch> {
        let missing = credentials.missing_fields();
        if !missing.is_empty() {
            return Err(RelayError::InvalidRequest(format!(
                "missing {}",
                missing.join(", ")
            )));
        }

        log::info!("solving login captcha");
        let solution = self
            .solve_captcha(&self.config.site_key, self.config.login_page_url.as_str())
            .await?;
        log::info!("captcha solved, logging in");
        self.login(credentials, &solution.token).await
    }
}
