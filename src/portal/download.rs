//! Invoice document download proxy.
//!
//! Fetches a document with the caller's bearer token and hands back the bytes
//! along with the upstream `Content-Type` and `Content-Disposition`, untouched.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use super::headers::download_headers;
use crate::transport::{HttpTransport, TransportRequest};

/// Document returned by the portal.
#[derive(Debug, Clone)]
pub struct DownloadedDocument {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub bytes: Bytes,
}

impl DownloadedDocument {
    /// File name announced in `Content-Disposition`, if any.
    pub fn file_name(&self) -> Option<&str> {
        let disposition = self.content_disposition.as_deref()?;
        disposition.split(';').map(str::trim).find_map(|part| {
            part.strip_prefix("filename=")
                .map(|name| name.trim_matches('"'))
                .filter(|name| !name.is_empty())
        })
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upstream returned status {status}")]
    Upstream { status: u16, body: Value },
    #[error("failed to download invoice: {0}")]
    Unexpected(String),
}

/// Proxies invoice downloads to the portal.
pub struct DownloadProxy {
    transport: Arc<dyn HttpTransport>,
    allowed_hosts: Vec<String>,
}

impl DownloadProxy {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            allowed_hosts: Vec::new(),
        }
    }

    /// Restrict downloads to these hosts. An empty list allows any host.
    pub fn with_allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_hosts = hosts
            .into_iter()
            .map(|host| host.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub async fn download(
        &self,
        download_url: &str,
        token: &str,
    ) -> Result<DownloadedDocument, DownloadError> {
        if download_url.is_empty() || token.is_empty() {
            return Err(DownloadError::InvalidRequest(
                "Missing required parameters".into(),
            ));
        }

        let url = Url::parse(download_url)
            .map_err(|err| DownloadError::InvalidRequest(format!("invalid downloadUrl: {err}")))?;
        self.check_host(&url)?;

        let request = TransportRequest::get(url)
            .with_headers(download_headers())
            .with_bearer(token)
            .map_err(|err| DownloadError::Unexpected(err.to_string()))?;

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|err| DownloadError::Unexpected(err.to_string()))?;

        if !response.is_success() {
            log::warn!("invoice download failed with status {}", response.status);
            let body = response.json().unwrap_or_else(|_| {
                json!({
                    "error": "Failed to download invoice",
                    "status": response.status,
                })
            });
            return Err(DownloadError::Upstream {
                status: response.status,
                body,
            });
        }

        Ok(DownloadedDocument {
            content_type: response.header_str(CONTENT_TYPE).map(str::to_string),
            content_disposition: response
                .header_str(CONTENT_DISPOSITION)
                .map(str::to_string),
            bytes: response.body,
        })
    }

    fn check_host(&self, url: &Url) -> Result<(), DownloadError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidRequest(format!(
                "unsupported downloadUrl scheme: {}",
                url.scheme()
            )));
        }
        if self.allowed_hosts.is_empty() {
            return Ok(());
        }

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if self.allowed_hosts.iter().any(|allowed| *allowed == host) {
            Ok(())
        } else {
            Err(DownloadError::InvalidRequest(format!(
                "downloadUrl host {host} is not allowed"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::StubTransport;
    use http::header::{AUTHORIZATION, HeaderMap, HeaderValue, ORIGIN};

    const URL: &str = "https://gwss.engie.ro/myservices/v1/invoices/F1/download";

    fn pdf_headers(disposition: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/pdf; charset=binary"));
        if let Some(value) = disposition {
            headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(value));
        }
        headers
    }

    #[tokio::test]
    async fn forwards_document_and_headers() {
        let transport = Arc::new(StubTransport::new());
        transport.push_raw(
            200,
            pdf_headers(Some("attachment; filename=\"F1.pdf\"")),
            Bytes::from_static(b"%PDF-1.7"),
        );

        let doc = DownloadProxy::new(transport.clone())
            .download(URL, "bearer-1")
            .await
            .expect("download should succeed");

        assert_eq!(doc.content_type.as_deref(), Some("application/pdf; charset=binary"));
        assert_eq!(doc.content_disposition.as_deref(), Some("attachment; filename=\"F1.pdf\""));
        assert_eq!(doc.file_name(), Some("F1.pdf"));
        assert_eq!(&doc.bytes[..], b"%PDF-1.7");

        let request = &transport.requests()[0];
        assert_eq!(request.url.as_str(), URL);
        assert_eq!(request.headers.get(AUTHORIZATION).unwrap(), "Bearer bearer-1");
        assert_eq!(request.headers.get(ORIGIN).unwrap(), "https://my.engie.ro");
    }

    #[tokio::test]
    async fn absent_disposition_stays_absent() {
        let transport = Arc::new(StubTransport::new());
        transport.push_raw(200, pdf_headers(None), Bytes::from_static(b"%PDF"));

        let doc = DownloadProxy::new(transport)
            .download(URL, "t")
            .await
            .expect("download should succeed");
        assert_eq!(doc.content_disposition, None);
        assert_eq!(doc.file_name(), None);
    }

    #[tokio::test]
    async fn upstream_json_error_is_forwarded() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(403, json!({"error": true, "message": "token expired"}));

        let err = DownloadProxy::new(transport)
            .download(URL, "t")
            .await
            .expect_err("download should fail");

        match err {
            DownloadError::Upstream { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body["message"], "token expired");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_is_synthesized() {
        let transport = Arc::new(StubTransport::new());
        transport.push_raw(404, HeaderMap::new(), Bytes::from_static(b"not found"));

        let err = DownloadProxy::new(transport)
            .download(URL, "t")
            .await
            .expect_err("download should fail");

        match err {
            DownloadError::Upstream { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, json!({"error": "Failed to download invoice", "status": 404}));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_inputs_make_no_calls() {
        let transport = Arc::new(StubTransport::new());
        let proxy = DownloadProxy::new(transport.clone());

        assert!(matches!(
            proxy.download(URL, "").await,
            Err(DownloadError::InvalidRequest(_))
        ));
        assert!(matches!(
            proxy.download("", "t").await,
            Err(DownloadError::InvalidRequest(_))
        ));
        assert!(matches!(
            proxy.download("not a url", "t").await,
            Err(DownloadError::InvalidRequest(_))
        ));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn allow_list_blocks_foreign_hosts() {
        let transport = Arc::new(StubTransport::new());
        let proxy = DownloadProxy::new(transport.clone()).with_allowed_hosts(["GWSS.engie.ro"]);

        let err = proxy
            .download("https://attacker.example/steal", "t")
            .await
            .expect_err("host should be rejected");
        assert!(matches!(err, DownloadError::InvalidRequest(_)));
        assert_eq!(transport.request_count(), 0);

        transport.push_raw(200, pdf_headers(None), Bytes::from_static(b"%PDF"));
        proxy.download(URL, "t").await.expect("allowed host");
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_unexpected() {
        let transport = Arc::new(StubTransport::new());
        transport.push_error("connection reset");

        let err = DownloadProxy::new(transport)
            .download(URL, "t")
            .await
            .expect_err("download should fail");
        assert!(matches!(err, DownloadError::Unexpected(_)));
    }
}
