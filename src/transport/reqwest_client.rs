//! Reqwest-based implementation of the `HttpTransport` trait.
//!
//! Provides a thin adapter around `reqwest::Client` that buffers the whole
//! upstream body and reports each exchange to the event dispatcher.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use http::header::CONTENT_TYPE;
use reqwest::{Client, redirect::Policy};

use super::{HttpTransport, RequestBody, TransportError, TransportRequest, TransportResponse};
use crate::modules::events::{EventDispatcher, RelayEvent, RequestEvent, ResponseEvent};

/// Reqwest-backed transport used for every upstream call.
pub struct ReqwestTransport {
    client: Client,
    events: Arc<EventDispatcher>,
}

impl ReqwestTransport {
    /// Creates a transport that follows redirects, as the portal API expects.
    pub fn new(events: Arc<EventDispatcher>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .redirect(Policy::limited(10))
            .build()
            .map_err(|err| TransportError::Build(err.to_string()))?;

        Ok(Self { client, events })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let TransportRequest {
            method,
            url,
            headers,
            body,
        } = request;

        self.events.dispatch(RelayEvent::Request(RequestEvent {
            url: url.clone(),
            method: method.clone(),
            timestamp: Utc::now(),
        }));

        let mut builder = self
            .client
            .request(method.clone(), url.as_str())
            .headers(headers);

        if let RequestBody::Form(fields) = &body {
            builder = builder.form(fields);
        }

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::Transport(err.without_url().to_string()))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Transport(err.without_url().to_string()))?;
        let latency = started.elapsed();

        self.events.dispatch(RelayEvent::Response(ResponseEvent {
            url: final_url.clone(),
            method,
            status,
            latency,
            content_type: headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            body: body.clone(),
            timestamp: Utc::now(),
        }));

        Ok(TransportResponse {
            status,
            headers,
            body,
            url: final_url,
        })
    }
}
