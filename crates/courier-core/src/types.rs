//! # Domain Types
//!
//! Core domain types used throughout Courier.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐   ┌─────────────────────┐                     │
//! │  │    Credentials      │   │ InstrumentInstance  │                     │
//! │  │  ─────────────────  │   │  ─────────────────  │                     │
//! │  │  api_token          │   │  identifier (UUID)  │                     │
//! │  │  record_id          │   │  instrument         │                     │
//! │  │  refresh_token?     │   │  instrument_version │                     │
//! │  └─────────────────────┘   │  sequence_number?   │  (write-once)       │
//! │                            │  created_at         │                     │
//! │  ┌─────────────────────┐   │  fields (ordered)   │                     │
//! │  │   IdentifierMap     │   └─────────────────────┘                     │
//! │  │  instrument → next  │                                                │
//! │  └─────────────────────┘   ┌─────────────────────┐                     │
//! │                            │  JoinedInstrument   │  membership record  │
//! │                            └─────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycles
//! - `Credentials` live from sign-in to sign-out and are replaced wholesale
//!   on refresh.
//! - `InstrumentInstance` lives from creation until the record service
//!   acknowledges it or rejects it permanently.
//! - `IdentifierMap` entries live for the installation, reset on sign-out.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Per-instrument repeat counter used by the record service.
pub type SequenceNumber = u64;

/// Durable mapping `instrument → next sequence number to hand out`.
///
/// A missing key means the next number is
/// [`INITIAL_SEQUENCE_NUMBER`](crate::INITIAL_SEQUENCE_NUMBER).
pub type IdentifierMap = BTreeMap<String, SequenceNumber>;

/// Ordered field mapping of an instrument instance.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Credentials
// =============================================================================

/// Credentials for the record service.
///
/// Immutable value. The API token and record ID are always set together;
/// a missing refresh token disables refresh-on-expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    api_token: String,
    record_id: String,
    refresh_token: Option<String>,
}

impl Credentials {
    pub fn new(
        api_token: impl Into<String>,
        record_id: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            api_token: api_token.into(),
            record_id: record_id.into(),
            refresh_token,
        }
    }

    #[inline]
    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    #[inline]
    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    #[inline]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns true if these credentials can be refreshed on expiry.
    #[inline]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_token", &"[REDACTED]")
            .field("record_id", &self.record_id)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

// =============================================================================
// Instrument Instance
// =============================================================================

/// One filled-in occurrence of an instrument.
///
/// The sequence number is unset until the first submission attempt and
/// never changes afterwards, so resubmitting the same instance reuses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInstance {
    pub identifier: Uuid,
    pub instrument: String,
    pub instrument_version: String,
    sequence_number: Option<SequenceNumber>,
    pub created_at: DateTime<Utc>,
    pub fields: FieldMap,
}

impl InstrumentInstance {
    /// Creates a new instance with a fresh identifier and no sequence number.
    pub fn new(
        instrument: impl Into<String>,
        instrument_version: impl Into<String>,
        fields: FieldMap,
    ) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            instrument: instrument.into(),
            instrument_version: instrument_version.into(),
            sequence_number: None,
            created_at: Utc::now(),
            fields,
        }
    }

    /// Wraps an arbitrary serializable document as an instance whose only
    /// field is `<instrument>_json`, holding the document as a JSON string.
    pub fn from_json_document<T: Serialize>(
        instrument: impl Into<String>,
        instrument_version: impl Into<String>,
        document: &T,
    ) -> CoreResult<Self> {
        let instrument = instrument.into();
        let encoded =
            serde_json::to_string(document).map_err(|e| CoreError::Conversion(e.to_string()))?;

        let mut fields = FieldMap::new();
        fields.insert(
            format!("{instrument}_json"),
            serde_json::Value::String(encoded),
        );
        Ok(Self::new(instrument, instrument_version, fields))
    }

    #[inline]
    pub fn sequence_number(&self) -> Option<SequenceNumber> {
        self.sequence_number
    }

    /// Assigns the sequence number. Fails if one is already set.
    pub fn assign_sequence_number(&mut self, sequence_number: SequenceNumber) -> CoreResult<()> {
        if let Some(existing) = self.sequence_number {
            return Err(CoreError::SequenceAlreadyAssigned {
                instance_id: self.identifier.to_string(),
                existing,
            });
        }
        self.sequence_number = Some(sequence_number);
        Ok(())
    }

    /// Builder-style variant used for records with a fixed sequence number.
    pub fn with_sequence_number(mut self, sequence_number: SequenceNumber) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }
}

// =============================================================================
// Conversion
// =============================================================================

/// Application data that can be delivered as an instrument instance.
pub trait IntoInstrumentInstance {
    fn into_instrument_instance(self) -> CoreResult<InstrumentInstance>;
}

impl IntoInstrumentInstance for InstrumentInstance {
    fn into_instrument_instance(self) -> CoreResult<InstrumentInstance> {
        Ok(self)
    }
}

// =============================================================================
// Joined Instrument
// =============================================================================

/// Membership record submitted once when a participant joins a study.
///
/// It is the first record the service sees for a record ID, so its
/// sequence number is fixed and never comes from the allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinedInstrument;

impl JoinedInstrument {
    pub const INSTRUMENT: &'static str = "joined";
    pub const VERSION: &'static str = "1.0.0";
    pub const SEQUENCE_NUMBER: SequenceNumber = 1;
}

impl IntoInstrumentInstance for JoinedInstrument {
    fn into_instrument_instance(self) -> CoreResult<InstrumentInstance> {
        let mut fields = FieldMap::new();
        fields.insert("joined_value".to_string(), serde_json::Value::Bool(true));
        Ok(
            InstrumentInstance::new(Self::INSTRUMENT, Self::VERSION, fields)
                .with_sequence_number(Self::SEQUENCE_NUMBER),
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
