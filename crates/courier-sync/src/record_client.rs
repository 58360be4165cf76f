//! # Record Client
//!
//! Submits one instrument instance to the record service.
//!
//! The request is a form POST to the configured endpoint carrying a single
//! flat record (see [`courier_core::record`]). 200 with a JSON body is an
//! acknowledgment; everything else goes through the classifier with the
//! submission call site, so 400 means the record itself is unacceptable
//! and 403/404 mean the API token was rejected.

use async_trait::async_trait;
use tracing::{debug, warn};

use courier_core::classify::{classify, parse_body, CallSite};
use courier_core::record::{build_record, submission_params};
use courier_core::{ClientResult, Credentials, InstrumentInstance, SequenceNumber};

use crate::transport::HttpTransport;

/// Record-service operations the coordinator depends on.
#[async_trait]
pub trait RecordApi: Send + Sync {
    /// Submits `instance` as repeat `sequence_number` of its instrument for
    /// the participant identified by `credentials`.
    async fn submit(
        &self,
        credentials: &Credentials,
        sequence_number: SequenceNumber,
        instance: &InstrumentInstance,
    ) -> ClientResult<()>;
}

/// HTTP client for the record service.
#[derive(Debug, Clone)]
pub struct RecordClient {
    transport: HttpTransport,
    endpoint: String,
}

impl RecordClient {
    pub fn new(transport: HttpTransport, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl RecordApi for RecordClient {
    async fn submit(
        &self,
        credentials: &Credentials,
        sequence_number: SequenceNumber,
        instance: &InstrumentInstance,
    ) -> ClientResult<()> {
        let record = build_record(credentials.record_id(), sequence_number, instance);
        let params = submission_params(credentials.api_token(), record);

        debug!(
            instance_id = %instance.identifier,
            instrument = %instance.instrument,
            sequence_number,
            "Submitting record"
        );

        let outcome = self.transport.post_form(&self.endpoint, &params).await;
        let result = classify(CallSite::Submit, &outcome)
            .and_then(|body| parse_body::<serde_json::Value>(CallSite::Submit, body));

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    instance_id = %instance.identifier,
                    kind = e.kind(),
                    error = %e,
                    "Record submission failed"
                );
                Err(e)
            }
        }
    }
}
