//! # Credential Lifecycle
//!
//! Client for the credential-exchange service. Turns a one-time
//! redemption token into [`Credentials`], refreshes them, and confirms a
//! redemption.
//!
//! ## Token Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   POST {base}/studies/{id}/redeem_token   {token: <one-time token>}    │
//! │   POST {base}/studies/{id}/refresh_token  {token: <issued token>}      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   200 {token: <issued token>}                                          │
//! │        │                                                                │
//! │        ▼  decode claims (signature not checked, same-party issuer)     │
//! │   {api_token, record_id}                                               │
//! │        │                                                                │
//! │        ├── envelope key configured? ── open_envelope(api_token)        │
//! │        ▼                                                                │
//! │   Credentials { api_token, record_id, refresh_token: <issued token> }  │
//! │                                                                         │
//! │   POST {base}/studies/{id}/mark_token_redeemed  {token}                │
//! │        └── 200 {redeemed: true}  (anything else is a failure)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The issued token doubles as the refresh token. Nothing here mutates
//! shared state; the coordinator decides what to do with the result.

use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use courier_core::classify::{classify_json, CallSite};
use courier_core::{ClientError, ClientResult, Credentials};

use crate::envelope::{open_envelope, EnvelopeKey};
use crate::transport::HttpTransport;

// =============================================================================
// Trait
// =============================================================================

/// Credential-exchange operations the coordinator depends on.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Redeems a one-time token for credentials.
    async fn redeem(&self, token: &str) -> ClientResult<Credentials>;

    /// Trades a refresh token for new credentials.
    ///
    /// `InvalidCredential` means the refresh token itself is dead.
    async fn refresh(&self, refresh_token: &str) -> ClientResult<Credentials>;

    /// Confirms that a redemption was used. Succeeds only on an explicit
    /// `redeemed: true` acknowledgment.
    async fn mark_redeemed(&self, token: &str) -> ClientResult<()>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct RedeemedResponse {
    redeemed: bool,
}

#[derive(Debug, Deserialize)]
struct IssuedClaims {
    api_token: String,
    record_id: String,
}

// =============================================================================
// Exchange Client
// =============================================================================

/// HTTP client for the credential-exchange service.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    transport: HttpTransport,
    base_url: String,
    study_id: String,
    envelope_key: Option<EnvelopeKey>,
}

impl ExchangeClient {
    pub fn new(
        transport: HttpTransport,
        base_url: impl Into<String>,
        study_id: impl Into<String>,
        envelope_key: Option<EnvelopeKey>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            study_id: study_id.into(),
            envelope_key,
        }
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/studies/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.study_id,
            action
        )
    }

    async fn exchange(&self, site: CallSite, action: &str, token: &str) -> ClientResult<Credentials> {
        let outcome = self
            .transport
            .post_json(&self.endpoint(action), &TokenRequest { token })
            .await;

        let response: TokenResponse = classify_json(site, &outcome).map_err(|e| {
            warn!(call = site.as_str(), kind = e.kind(), error = %e, "Credential exchange failed");
            e
        })?;

        let credentials = credentials_from_issued_token(&response.token, self.envelope_key.as_ref())?;
        debug!(
            call = site.as_str(),
            record_id = %credentials.record_id(),
            "Credentials issued"
        );
        Ok(credentials)
    }
}

#[async_trait]
impl TokenExchange for ExchangeClient {
    async fn redeem(&self, token: &str) -> ClientResult<Credentials> {
        self.exchange(CallSite::Redeem, "redeem_token", token).await
    }

    async fn refresh(&self, refresh_token: &str) -> ClientResult<Credentials> {
        self.exchange(CallSite::Refresh, "refresh_token", refresh_token)
            .await
    }

    async fn mark_redeemed(&self, token: &str) -> ClientResult<()> {
        let outcome = self
            .transport
            .post_json(&self.endpoint("mark_token_redeemed"), &TokenRequest { token })
            .await;

        let response: RedeemedResponse = classify_json(CallSite::MarkRedeemed, &outcome)?;
        if !response.redeemed {
            return Err(ClientError::MalformedResponse(
                "mark_redeemed acknowledged with redeemed=false".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Token Decoding
// =============================================================================

/// Builds credentials from an issued token.
///
/// The token's signature is not checked: it comes straight from the
/// exchange over the same connection that authenticated the redemption.
pub fn credentials_from_issued_token(
    issued: &str,
    envelope_key: Option<&EnvelopeKey>,
) -> ClientResult<Credentials> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let claims = decode::<IssuedClaims>(issued, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| ClientError::MalformedResponse(format!("issued token: {e}")))?
        .claims;

    let api_token = match envelope_key {
        Some(key) => open_envelope(&claims.api_token, key)?,
        None => claims.api_token,
    };

    Ok(Credentials::new(
        api_token,
        claims.record_id,
        Some(issued.to_string()),
    ))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::envelope::{seal_envelope, ENVELOPE_CIPHER};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Issues a token the way the exchange does (issuer secret unknown to us).
    pub(crate) fn issue_token(api_token: &str, record_id: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &json!({ "api_token": api_token, "record_id": record_id }),
            &EncodingKey::from_secret(b"issuer-secret"),
        )
        .unwrap()
    }

    fn client(server: &MockServer, key: Option<EnvelopeKey>) -> ExchangeClient {
        ExchangeClient::new(
            HttpTransport::new(Duration::from_secs(5)).unwrap(),
            server.uri(),
            "study-7",
            key,
        )
    }

    #[tokio::test]
    async fn test_redeem_decodes_issued_token() {
        let server = MockServer::start().await;
        let issued = issue_token("api-1", "rec-1");
        Mock::given(method("POST"))
            .and(path("/studies/study-7/redeem_token"))
            .and(body_json(json!({ "token": "one-time" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": issued })))
            .expect(1)
            .mount(&server)
            .await;

        let creds = client(&server, None).redeem("one-time").await.unwrap();
        assert_eq!(creds.api_token(), "api-1");
        assert_eq!(creds.record_id(), "rec-1");
        assert_eq!(creds.refresh_token(), Some(issued.as_str()));
    }

    #[tokio::test]
    async fn test_redeem_opens_envelope() {
        let server = MockServer::start().await;
        let key = EnvelopeKey::from_bytes([3u8; 32]);
        let sealed = seal_envelope("plain-api", &key, [5u8; 12], ENVELOPE_CIPHER);
        Mock::given(method("POST"))
            .and(path("/studies/study-7/redeem_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "token": issue_token(&sealed, "rec-2") })),
            )
            .mount(&server)
            .await;

        let creds = client(&server, Some(key)).redeem("one-time").await.unwrap();
        assert_eq!(creds.api_token(), "plain-api");
        assert_eq!(creds.record_id(), "rec-2");
    }

    #[tokio::test]
    async fn test_redeem_with_key_but_plain_token_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "token": issue_token("not-an-envelope", "rec") })),
            )
            .mount(&server)
            .await;

        let err = client(&server, Some(EnvelopeKey::from_bytes([3u8; 32])))
            .redeem("one-time")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_status_mapping_on_exchange_paths() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/studies/study-7/redeem_token"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/studies/study-7/refresh_token"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/studies/study-7/mark_token_redeemed"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = client(&server, None);
        assert_eq!(
            client.redeem("t").await.unwrap_err(),
            ClientError::InvalidCredential
        );
        assert!(matches!(
            client.refresh("t").await.unwrap_err(),
            ClientError::MalformedResponse(_)
        ));
        assert_eq!(
            client.mark_redeemed("t").await.unwrap_err(),
            ClientError::BadGateway
        );
    }

    #[tokio::test]
    async fn test_refresh_rejected_token_is_invalid_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/studies/study-7/refresh_token"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client(&server, None).refresh("dead").await.unwrap_err();
        assert!(err.is_credential_rejection());
    }

    #[tokio::test]
    async fn test_missing_claims_are_malformed() {
        let server = MockServer::start().await;
        let token = encode(
            &Header::new(Algorithm::HS256),
            &json!({ "api_token": "only-half" }),
            &EncodingKey::from_secret(b"issuer-secret"),
        )
        .unwrap();
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
            .mount(&server)
            .await;

        let err = client(&server, None).refresh("t").await.unwrap_err();
        assert!(matches!(err, ClientError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_mark_redeemed_requires_explicit_ack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/studies/study-7/mark_token_redeemed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "redeemed": false })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/studies/study-7/mark_token_redeemed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "redeemed": true })))
            .mount(&server)
            .await;

        let client = client(&server, None);
        assert!(matches!(
            client.mark_redeemed("t").await,
            Err(ClientError::MalformedResponse(_))
        ));
        assert!(client.mark_redeemed("t").await.is_ok());
    }
}
