//! Utility-portal client: authentication pipeline, invoice history, and
//! document downloads.

pub mod auth;
pub mod download;
pub mod headers;
pub mod types;
pub mod window;

pub use auth::{AuthError, AuthPipeline, DEFAULT_PORTAL_BASE_URL, PipelineStep};
pub use download::{DownloadError, DownloadProxy, DownloadedDocument};
pub use types::{Contract, Credentials, Invoice, InvoiceBatch};
pub use window::InvoiceWindow;
