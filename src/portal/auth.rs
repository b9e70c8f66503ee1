//! Login → contract resolution → invoice history.
//!
//! Each step feeds the next: the bearer token from the login call authorises
//! the contract lookup, and the resolved contract identifies the history to
//! fetch. The first failing step ends the run and is reported by name
//! together with the portal's status and payload.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use super::headers::{api_headers, login_headers};
use super::types::{Contract, Credentials, InvoiceBatch};
use super::window::InvoiceWindow;
use crate::modules::events::EventDispatcher;
use crate::transport::{
    HttpTransport, TransportRequest, TransportResponse, is_error_flagged, is_truthy,
};

pub const DEFAULT_PORTAL_BASE_URL: &str = "https://gwss.engie.ro/myservices/v1";

/// Stage of the pipeline an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Login,
    Contracts,
    Invoices,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Login => "login",
            PipelineStep::Contracts => "contracts",
            PipelineStep::Invoices => "invoices",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of the authentication pipeline.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("login rejected by portal (status {status})")]
    Authentication { status: u16, details: Value },
    #[error("login response did not contain a token")]
    MissingToken { details: Value },
    #[error("failed to fetch contracts (status {status})")]
    ContractFetch { status: u16, details: Value },
    #[error("no contract found with alias: {alias}")]
    ContractNotFound { alias: String },
    #[error("contract is missing pa or poc_number")]
    ContractData {
        has_pa: bool,
        has_poc: bool,
        details: Value,
    },
    #[error("failed to fetch invoices (status {status})")]
    InvoiceFetch { status: u16, details: Value },
    #[error("unexpected error during {step}: {message}")]
    Unexpected { step: PipelineStep, message: String },
}

impl AuthError {
    /// Pipeline stage that produced the error, if one was reached.
    pub fn step(&self) -> Option<PipelineStep> {
        match self {
            AuthError::InvalidRequest(_) => None,
            AuthError::Authentication { .. } | AuthError::MissingToken { .. } => {
                Some(PipelineStep::Login)
            }
            AuthError::ContractFetch { .. }
            | AuthError::ContractNotFound { .. }
            | AuthError::ContractData { .. } => Some(PipelineStep::Contracts),
            AuthError::InvoiceFetch { .. } => Some(PipelineStep::Invoices),
            AuthError::Unexpected { step, .. } => Some(*step),
        }
    }
}

/// Runs the three-step login flow against the portal API.
pub struct AuthPipeline {
    base_url: Url,
    transport: Arc<dyn HttpTransport>,
    events: Arc<EventDispatcher>,
    fixed_date: Option<NaiveDate>,
}

impl AuthPipeline {
    pub fn new(base_url: Url, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            base_url,
            transport,
            events: Arc::new(EventDispatcher::new()),
            fixed_date: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    /// Pin "today" for the history window instead of reading the clock.
    pub fn with_fixed_date(mut self, date: NaiveDate) -> Self {
        self.fixed_date = Some(date);
        self
    }

    /// Log in and return the trailing year of invoices for `credentials.site_alias`.
    pub async fn login(
        &self,
        credentials: &Credentials,
        captcha_token: &str,
    ) -> Result<InvoiceBatch, AuthError> {
        let mut missing = credentials.missing_fields();
        if captcha_token.is_empty() {
            missing.push("captchaToken");
        }
        if !missing.is_empty() {
            return Err(AuthError::InvalidRequest(format!(
                "Missing credentials, captchaToken, or place of consumption ({})",
                missing.join(", ")
            )));
        }

        let token = self
            .observe(PipelineStep::Login, self.authenticate(credentials, captcha_token).await)?;
        let contract = self.observe(
            PipelineStep::Contracts,
            self.resolve_contract(&token, &credentials.site_alias).await,
        )?;
        let invoices =
            self.observe(PipelineStep::Invoices, self.fetch_history(&token, &contract).await)?;

        Ok(InvoiceBatch::new(invoices, token))
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        captcha_token: &str,
    ) -> Result<String, AuthError> {
        let step = PipelineStep::Login;
        let request = TransportRequest::post_form(
            self.endpoint(step, &["login"])?,
            [
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
                ("g-recaptcha-response", captcha_token),
            ],
        )
        .with_headers(login_headers());

        let (response, payload) = self.exchange(step, request).await?;
        if !response.is_success() || is_error_flagged(&payload) {
            return Err(AuthError::Authentication {
                status: response.status,
                details: payload,
            });
        }

        match payload.pointer("/data/token").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => Err(AuthError::MissingToken { details: payload }),
        }
    }

    async fn resolve_contract(&self, token: &str, alias: &str) -> Result<Contract, AuthError> {
        let step = PipelineStep::Contracts;
        let request = self.authorized_get(step, self.endpoint(step, &["contracts"])?, token)?;

        let (response, payload) = self.exchange(step, request).await?;
        if !response.is_success() || is_error_flagged(&payload) {
            return Err(AuthError::ContractFetch {
                status: response.status,
                details: payload,
            });
        }

        let entries = payload
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut matches = entries
            .iter()
            .filter(|entry| entry.get("alias").and_then(Value::as_str) == Some(alias));

        let contract = matches.next().ok_or_else(|| AuthError::ContractNotFound {
            alias: alias.to_string(),
        })?;

        let duplicates = matches.count();
        if duplicates > 0 {
            log::warn!(
                "{} contracts share alias {alias:?}; using the first one",
                duplicates + 1
            );
        }

        let pa = identifier(contract.get("pa"));
        let poc = identifier(contract.get("poc_number"));
        match (pa, poc) {
            (Some(pa), Some(poc)) => Ok(Contract {
                alias: alias.to_string(),
                pa,
                poc,
            }),
            (pa, poc) => Err(AuthError::ContractData {
                has_pa: pa.is_some(),
                has_poc: poc.is_some(),
                details: contract.clone(),
            }),
        }
    }

    async fn fetch_history(
        &self,
        token: &str,
        contract: &Contract,
    ) -> Result<Value, AuthError> {
        let step = PipelineStep::Invoices;
        let window = match self.fixed_date {
            Some(today) => InvoiceWindow::trailing_year(today),
            None => InvoiceWindow::trailing_year_from_now(),
        };

        let mut url = self.endpoint(step, &["invoices", "history-only", contract.poc.as_str()])?;
        url.query_pairs_mut()
            .append_pair("startDate", &window.start_param())
            .append_pair("endDate", &window.end_param())
            .append_pair("pa", &contract.pa);

        let request = self.authorized_get(step, url, token)?;
        let (response, payload) = self.exchange(step, request).await?;
        if !response.is_success() || is_error_flagged(&payload) {
            return Err(AuthError::InvoiceFetch {
                status: response.status,
                details: payload,
            });
        }

        // Forwarded as-is; only a falsy or absent `data` becomes an empty list.
        Ok(match payload.get("data") {
            Some(data) if is_truthy(data) => data.clone(),
            _ => Value::Array(Vec::new()),
        })
    }

    fn endpoint(&self, step: PipelineStep, segments: &[&str]) -> Result<Url, AuthError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AuthError::Unexpected {
                step,
                message: format!("portal base url cannot have a path: {}", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized_get(
        &self,
        step: PipelineStep,
        url: Url,
        token: &str,
    ) -> Result<TransportRequest, AuthError> {
        TransportRequest::get(url)
            .with_headers(api_headers())
            .with_bearer(token)
            .map_err(|err| AuthError::Unexpected {
                step,
                message: err.to_string(),
            })
    }

    async fn exchange(
        &self,
        step: PipelineStep,
        request: TransportRequest,
    ) -> Result<(TransportResponse, Value), AuthError> {
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|err| AuthError::Unexpected {
                step,
                message: err.to_string(),
            })?;

        let payload = response.json().map_err(|err| AuthError::Unexpected {
            step,
            message: format!("portal returned a non-JSON body (status {}): {err}", response.status),
        })?;
        Ok((response, payload))
    }

    fn observe<T>(&self, step: PipelineStep, result: Result<T, AuthError>) -> Result<T, AuthError> {
        match &result {
            Ok(_) => self.events.step(step.as_str(), true, ""),
            Err(err) => self.events.step(step.as_str(), false, err.to_string()),
        }
        result
    }
}

/// Non-empty identifier from a string or numeric JSON value.
fn identifier(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) if number.as_f64() != Some(0.0) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::StubTransport;
    use http::header::AUTHORIZATION;
    use serde_json::json;

    const ALIAS: &str = "E Belvedere 11a 53";

    fn pipeline(transport: Arc<StubTransport>) -> AuthPipeline {
        AuthPipeline::new(Url::parse(DEFAULT_PORTAL_BASE_URL).unwrap(), transport)
            .with_fixed_date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
    }

    fn credentials() -> Credentials {
        Credentials::new("ana@example.com", "hunter2", ALIAS)
    }

    fn contracts() -> Value {
        json!({
            "error": false,
            "data": [
                {"alias": "Office", "pa": "999", "poc_number": "111"},
                {"alias": ALIAS, "pa": "123", "poc_number": "456"}
            ]
        })
    }

    #[tokio::test]
    async fn full_run_returns_invoices_and_login_token() {
        let transport = Arc::new(StubTransport::new());
        let history = json!([{"invoices": [{"invoice_number": "F1", "total": 12.5}]}]);
        transport
            .push_json(200, json!({"error": false, "data": {"token": "bearer-1"}}))
            .push_json(200, contracts())
            .push_json(200, json!({"error": false, "data": history.clone()}));

        let batch = pipeline(transport.clone())
            .login(&credentials(), "captcha-token")
            .await
            .expect("pipeline should succeed");

        assert_eq!(batch.token, "bearer-1");
        assert_eq!(batch.invoices, history);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);

        assert_eq!(requests[0].method, http::Method::POST);
        assert_eq!(requests[0].url.as_str(), "https://gwss.engie.ro/myservices/v1/login");
        assert_eq!(requests[0].form_field("username"), Some("ana@example.com"));
        assert_eq!(requests[0].form_field("g-recaptcha-response"), Some("captcha-token"));

        assert_eq!(requests[1].url.path(), "/myservices/v1/contracts");
        assert_eq!(requests[1].headers.get(AUTHORIZATION).unwrap(), "Bearer bearer-1");

        assert_eq!(
            requests[2].url.as_str(),
            "https://gwss.engie.ro/myservices/v1/invoices/history-only/456?startDate=2023-03-01&endDate=2024-03-01&pa=123"
        );
        assert_eq!(requests[2].headers.get(AUTHORIZATION).unwrap(), "Bearer bearer-1");
    }

    #[tokio::test]
    async fn rejected_login_short_circuits() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(401, json!({"error": true, "message": "bad credentials"}));

        let err = pipeline(transport.clone())
            .login(&credentials(), "captcha-token")
            .await
            .expect_err("login should fail");

        match &err {
            AuthError::Authentication { status, details } => {
                assert_eq!(*status, 401);
                assert_eq!(details["message"], "bad credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.step(), Some(PipelineStep::Login));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn error_flag_on_success_status_is_a_failure() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(200, json!({"error": "captcha invalid"}));

        let err = pipeline(transport)
            .login(&credentials(), "captcha-token")
            .await
            .expect_err("login should fail");
        assert!(matches!(err, AuthError::Authentication { status: 200, .. }));
    }

    #[tokio::test]
    async fn missing_token_is_distinguished() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(200, json!({"error": false, "data": {}}));

        let err = pipeline(transport.clone())
            .login(&credentials(), "captcha-token")
            .await
            .expect_err("login should fail");
        assert!(matches!(err, AuthError::MissingToken { .. }));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn alias_match_is_exact() {
        for alias in ["e belvedere 11a 53", "E Belvedere 11a 53 ", " E Belvedere 11a 53"] {
            let transport = Arc::new(StubTransport::new());
            transport
                .push_json(200, json!({"data": {"token": "t"}}))
                .push_json(200, contracts());

            let err = pipeline(transport.clone())
                .login(&Credentials::new("u", "p", alias), "c")
                .await
                .expect_err("alias should not match");

            match err {
                AuthError::ContractNotFound { alias: reported } => assert_eq!(reported, alias),
                other => panic!("unexpected error: {other:?}"),
            }
            assert_eq!(transport.request_count(), 2);
        }
    }

    #[tokio::test]
    async fn first_duplicate_alias_wins() {
        let transport = Arc::new(StubTransport::new());
        transport
            .push_json(200, json!({"data": {"token": "t"}}))
            .push_json(
                200,
                json!({"data": [
                    {"alias": "Home", "pa": "1", "poc_number": "10"},
                    {"alias": "Home", "pa": "2", "poc_number": "20"}
                ]}),
            )
            .push_json(200, json!({"data": []}));

        pipeline(transport.clone())
            .login(&Credentials::new("u", "p", "Home"), "c")
            .await
            .expect("pipeline should succeed");

        let history = &transport.requests()[2];
        assert!(history.url.path().ends_with("/history-only/10"));
        assert!(history.url.query().unwrap().ends_with("pa=1"));
    }

    #[tokio::test]
    async fn contract_without_poc_is_rejected() {
        let transport = Arc::new(StubTransport::new());
        transport
            .push_json(200, json!({"data": {"token": "t"}}))
            .push_json(200, json!({"data": [{"alias": "Home", "pa": 77, "poc_number": ""}]}));

        let err = pipeline(transport.clone())
            .login(&Credentials::new("u", "p", "Home"), "c")
            .await
            .expect_err("contract data should be rejected");

        match err {
            AuthError::ContractData {
                has_pa, has_poc, ..
            } => {
                assert!(has_pa);
                assert!(!has_poc);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn contract_fetch_failure_carries_upstream_payload() {
        let transport = Arc::new(StubTransport::new());
        transport
            .push_json(200, json!({"data": {"token": "t"}}))
            .push_json(403, json!({"error": true, "code": "FORBIDDEN"}));

        let err = pipeline(transport)
            .login(&credentials(), "c")
            .await
            .expect_err("contracts should fail");

        match err {
            AuthError::ContractFetch { status, details } => {
                assert_eq!(status, 403);
                assert_eq!(details["code"], "FORBIDDEN");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invoice_failure_reports_invoice_step() {
        let transport = Arc::new(StubTransport::new());
        transport
            .push_json(200, json!({"data": {"token": "t"}}))
            .push_json(200, contracts())
            .push_json(500, json!({"error": true}));

        let err = pipeline(transport)
            .login(&credentials(), "c")
            .await
            .expect_err("history should fail");
        assert!(matches!(err, AuthError::InvoiceFetch { status: 500, .. }));
        assert_eq!(err.step(), Some(PipelineStep::Invoices));
    }

    #[tokio::test]
    async fn missing_history_data_yields_empty_list() {
        let transport = Arc::new(StubTransport::new());
        transport
            .push_json(200, json!({"data": {"token": "t"}}))
            .push_json(200, contracts())
            .push_json(200, json!({"error": false}));

        let batch = pipeline(transport)
            .login(&credentials(), "c")
            .await
            .expect("pipeline should succeed");
        assert_eq!(batch.invoices, json!([]));
    }

    #[tokio::test]
    async fn object_history_data_is_forwarded_unchanged() {
        let transport = Arc::new(StubTransport::new());
        let history = json!({"invoices": [{"invoice_number": "F9"}]});
        transport
            .push_json(200, json!({"data": {"token": "t"}}))
            .push_json(200, contracts())
            .push_json(200, json!({"error": false, "data": history.clone()}));

        let batch = pipeline(transport)
            .login(&credentials(), "c")
            .await
            .expect("pipeline should succeed");
        assert_eq!(batch.invoices, history);
        assert_eq!(batch.rows().len(), 1);
    }

    #[tokio::test]
    async fn empty_fields_make_no_calls() {
        let transport = Arc::new(StubTransport::new());
        let err = pipeline(transport.clone())
            .login(&Credentials::new("", "p", ALIAS), "c")
            .await
            .expect_err("should be rejected");
        assert!(matches!(err, AuthError::InvalidRequest(_)));

        let err = pipeline(transport.clone())
            .login(&credentials(), "")
            .await
            .expect_err("should be rejected");
        assert!(matches!(err, AuthError::InvalidRequest(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn non_json_login_reply_is_unexpected() {
        let transport = Arc::new(StubTransport::new());
        transport.push_raw(
            502,
            http::HeaderMap::new(),
            bytes::Bytes::from_static(b"<html>bad gateway</html>"),
        );

        let err = pipeline(transport)
            .login(&credentials(), "c")
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            AuthError::Unexpected {
                step: PipelineStep::Login,
                ..
            }
        ));
    }
}
