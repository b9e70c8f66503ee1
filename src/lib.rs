//! # invoice-relay
//!
//! A small relay that lets a browser page pull invoices from a utility
//! provider's customer portal.
//!
//! The portal only accepts logins that carry a solved reCAPTCHA and only
//! serves documents to browser-shaped requests, so the relay does the work
//! the page cannot do on its own.
//!
//! ## Features
//!
//! - reCAPTCHA solving through 2captcha with a bounded poll
//! - Login, contract lookup and a trailing-year invoice history in one call
//! - Invoice PDF proxy that forwards the upstream content headers
//! - axum HTTP surface with wildcard CORS for the browser-facing routes
//!
//! ## Example
//!
//! ```no_run
//! use invoice_relay::{Credentials, InvoiceRelay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = InvoiceRelay::new(RelayConfig::from_env()?)?;
//!     let batch = relay
//!         .fetch_invoices(&Credentials::new("me@example.com", "secret", "Home"))
//!         .await?;
//!     for invoice in batch.rows() {
//!         println!("{:?} {:?}", invoice.invoice_number, invoice.total);
//!     }
//!     Ok(())
//! }
//! ```

mod relay;

pub mod config;
pub mod external_deps;
pub mod modules;
pub mod portal;
pub mod server;
pub mod transport;

pub use crate::relay::{
    ErrorKind,
    InvoiceRelay,
    InvoiceRelayBuilder,
    RelayError,
    RelayResult,
};

pub use crate::config::{ConfigError, RelayConfig, RelayConfigBuilder};

pub use crate::external_deps::captcha::{
    CaptchaConfig,
    CaptchaError,
    CaptchaProvider,
    CaptchaResult,
    CaptchaSolution,
    CaptchaTask,
    TwoCaptchaProvider,
};

pub use crate::modules::{EventDispatcher, EventHandler, LoggingHandler, RelayEvent};

pub use crate::portal::{
    AuthError,
    AuthPipeline,
    Credentials,
    DownloadError,
    DownloadProxy,
    DownloadedDocument,
    Invoice,
    InvoiceBatch,
    InvoiceWindow,
    PipelineStep,
};

pub use crate::transport::{
    HttpTransport,
    ReqwestTransport,
    TransportError,
    TransportRequest,
    TransportResponse,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
