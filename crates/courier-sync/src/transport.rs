//! # HTTP Transport
//!
//! Thin wrapper over `reqwest` that reduces every request to a
//! [`TransportOutcome`] for the response classifier.
//!
//! ## Request Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ExchangeClient / RecordClient                                          │
//! │       │  post_json(url, body) / post_form(url, params)                 │
//! │       ▼                                                                 │
//! │  HttpTransport ── reqwest::Client (timeout, user agent) ──► network     │
//! │       │                                                                 │
//! │       ├── connect error  → Failed(NotConnected)                         │
//! │       ├── other error    → Failed(Other)                                │
//! │       └── response       → Response { status, body }                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  courier_core::classify::classify(site, &outcome)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no retry here. Retrying is the coordinator's decision and it
//! only happens on the next external trigger.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use tracing::debug;

use courier_core::classify::{TransportFailure, TransportOutcome};

use crate::error::SyncResult;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Builds a transport with the given request timeout.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("courier/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// POSTs a JSON body.
    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> TransportOutcome {
        self.execute(self.client.post(url).json(body)).await
    }

    /// POSTs an `application/x-www-form-urlencoded` body.
    pub async fn post_form(&self, url: &str, params: &[(&str, String)]) -> TransportOutcome {
        self.execute(self.client.post(url).form(params)).await
    }

    async fn execute(&self, request: RequestBuilder) -> TransportOutcome {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return TransportOutcome::Failed(map_error(&err)),
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => {
                debug!(status, bytes = body.len(), "HTTP response received");
                TransportOutcome::Response {
                    status,
                    body: body.to_vec(),
                }
            }
            Err(err) => TransportOutcome::Failed(map_error(&err)),
        }
    }
}

fn map_error(err: &reqwest::Error) -> TransportFailure {
    if err.is_connect() {
        TransportFailure::NotConnected(err.to_string())
    } else {
        TransportFailure::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, body_string_contains, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_json_response_is_captured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({ "token": "abc" })))
            .respond_with(ResponseTemplate::new(403).set_body_string("nope"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = transport()
            .post_json(&server.uri(), &serde_json::json!({ "token": "abc" }))
            .await;

        assert_eq!(
            outcome,
            TransportOutcome::Response {
                status: 403,
                body: b"nope".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_form_body_is_urlencoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("content=record"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = transport()
            .post_form(&server.uri(), &[("content", "record".to_string())])
            .await;

        assert!(matches!(outcome, TransportOutcome::Response { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_refused_connection_is_not_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = transport()
            .post_json(&format!("http://{}", addr), &serde_json::json!({}))
            .await;

        assert!(matches!(
            outcome,
            TransportOutcome::Failed(TransportFailure::NotConnected(_))
        ));
    }
}
