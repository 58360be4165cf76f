//! # Response Classifier
//!
//! Maps the outcome of a remote call onto the [`ClientError`] taxonomy.
//!
//! ## Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Transport outcome → Result                          │
//! │                                                                         │
//! │  Failed(NotConnected)  ─────────────────────────────►  Unreachable      │
//! │  Failed(Other)         ─────────────────────────────►  Other            │
//! │                                                                         │
//! │  Response 200          ─────────────────────────────►  Ok(body)         │
//! │  Response 502          ─────────────────────────────►  BadGateway       │
//! │  Response 400          ──┬── Redeem/MarkRedeemed/Refresh ► Malformed    │
//! │                          └── Submit ──────────────────►  InvalidRecord  │
//! │  Response 403 / 404    ─────────────────────────────►  InvalidCredential│
//! │  Response (anything else) ─────────────────────────►  Other            │
//! │                                                                         │
//! │  Body shape checks (after Ok) ──── failure ─────────►  MalformedResponse│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the 400 mapping depends on the call site. The classifier is total:
//! every status code and every transport failure lands on exactly one arm.

use serde::de::DeserializeOwned;

use crate::error::{ClientError, ClientResult};

// =============================================================================
// Inputs
// =============================================================================

/// Which remote call produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallSite {
    /// Credential exchange: redeem a one-time token.
    Redeem,
    /// Credential exchange: confirm a redemption.
    MarkRedeemed,
    /// Credential exchange: trade a refresh token for new credentials.
    Refresh,
    /// Record service: submit one instrument instance.
    Submit,
}

impl CallSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallSite::Redeem => "redeem",
            CallSite::MarkRedeemed => "mark_redeemed",
            CallSite::Refresh => "refresh",
            CallSite::Submit => "submit",
        }
    }

    /// Returns true for calls against the credential-exchange service.
    pub fn is_exchange(&self) -> bool {
        !matches!(self, CallSite::Submit)
    }
}

/// Transport-level failure, before any HTTP status exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// No network path (connection refused, DNS failure, offline).
    NotConnected(String),
    /// Anything else (timeout, TLS, protocol).
    Other(String),
}

/// What the transport observed for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    Response { status: u16, body: Vec<u8> },
    Failed(TransportFailure),
}

// =============================================================================
// Classification
// =============================================================================

/// Classifies a transport outcome for the given call site.
///
/// On success the raw body is handed back for shape validation with
/// [`parse_body`].
pub fn classify(site: CallSite, outcome: &TransportOutcome) -> ClientResult<&[u8]> {
    match outcome {
        TransportOutcome::Failed(TransportFailure::NotConnected(detail)) => {
            Err(ClientError::Unreachable(detail.clone()))
        }
        TransportOutcome::Failed(TransportFailure::Other(detail)) => {
            Err(ClientError::Other(detail.clone()))
        }
        TransportOutcome::Response { status, body } => classify_status(site, *status, body),
    }
}

fn classify_status(site: CallSite, status: u16, body: &[u8]) -> ClientResult<&[u8]> {
    match status {
        200 => Ok(body),
        502 => Err(ClientError::BadGateway),
        400 => Err(match site {
            CallSite::Submit => ClientError::InvalidRecord(body_excerpt(body)),
            _ => ClientError::MalformedResponse(format!(
                "{} rejected request with 400: {}",
                site.as_str(),
                body_excerpt(body)
            )),
        }),
        403 | 404 => Err(ClientError::InvalidCredential),
        other => Err(ClientError::Other(format!(
            "{} returned unexpected status {}",
            site.as_str(),
            other
        ))),
    }
}

/// Parses a successful body into `T`.
///
/// Any shape mismatch (invalid JSON, missing field, wrong type) is a
/// contract violation by the server.
pub fn parse_body<T: DeserializeOwned>(site: CallSite, body: &[u8]) -> ClientResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        ClientError::MalformedResponse(format!("{} response body: {}", site.as_str(), e))
    })
}

/// Classifies and parses in one step.
pub fn classify_json<T: DeserializeOwned>(
    site: CallSite,
    outcome: &TransportOutcome,
) -> ClientResult<T> {
    let body = classify(site, outcome)?;
    parse_body(site, body)
}

/// Short printable prefix of a response body for diagnostics.
fn body_excerpt(body: &[u8]) -> String {
    const MAX: usize = 200;
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
