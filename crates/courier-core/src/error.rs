//! # Error Types
//!
//! Domain-specific error types for courier-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  courier-core errors (this file)                                       │
//! │  ├── ClientError      - Classified outcome of a remote call            │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Instance validation failures                   │
//! │                                                                         │
//! │  courier-db errors (separate crate)                                    │
//! │  └── DbError          - Queue / map persistence failures               │
//! │                                                                         │
//! │  courier-sync errors (separate crate)                                  │
//! │  └── SyncError        - What the host application sees                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Client Error (classifier taxonomy)
// =============================================================================

/// Classified failure of a remote call.
///
/// Every remote call in the system resolves to `Ok(..)` or exactly one of
/// these kinds. The upload coordinator drives its state machine off the
/// kind alone; the strings are diagnostics for logs.
///
/// ## Handling Strategy
/// ```text
/// Unreachable        → keep data, wait for the next trigger
/// BadGateway / Other → keep data, wait for the next trigger
/// MalformedResponse  → keep data, log the contract violation, wait
/// InvalidCredential  → refresh credentials, or sign out
/// InvalidRecord      → drop the offending record, continue the queue
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No network path to the remote service.
    #[error("Remote service unreachable: {0}")]
    Unreachable(String),

    /// The credential presented was rejected.
    #[error("Credential rejected by remote service")]
    InvalidCredential,

    /// The record can never be accepted by the remote service.
    #[error("Record rejected by remote service: {0}")]
    InvalidRecord(String),

    /// Remote service answered 502.
    #[error("Bad gateway")]
    BadGateway,

    /// The remote service broke the response contract.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Any other transport or status failure.
    #[error("Request failed: {0}")]
    Other(String),
}

impl ClientError {
    /// Returns true if the failure is transient and the data must be kept
    /// for a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Unreachable(_)
                | ClientError::BadGateway
                | ClientError::MalformedResponse(_)
                | ClientError::Other(_)
        )
    }

    /// Returns true if the remote service rejected the credential (or, on the
    /// refresh path, the refresh token itself).
    pub fn is_credential_rejection(&self) -> bool {
        matches!(self, ClientError::InvalidCredential)
    }

    /// Short machine-friendly name of the kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Unreachable(_) => "unreachable",
            ClientError::InvalidCredential => "invalid_credential",
            ClientError::InvalidRecord(_) => "invalid_record",
            ClientError::BadGateway => "bad_gateway",
            ClientError::MalformedResponse(_) => "malformed_response",
            ClientError::Other(_) => "other",
        }
    }
}

/// Result type for remote calls.
pub type ClientResult<T> = Result<T, ClientError>;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A sequence number was assigned to an instance that already has one.
    ///
    /// ## When This Occurs
    /// - A retry path tried to allocate again for the same queue element
    ///
    /// Sequence numbers are write-once so that resubmission is idempotent.
    #[error("Instance {instance_id} already has sequence number {existing}")]
    SequenceAlreadyAssigned { instance_id: String, existing: u64 },

    /// Application data could not be converted into an instrument instance.
    #[error("Conversion to instrument instance failed: {0}")]
    Conversion(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Instance validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::SequenceAlreadyAssigned {
            instance_id: "abc".to_string(),
            existing: 4,
        };
        assert_eq!(err.to_string(), "Instance abc already has sequence number 4");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "instrument".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ClientError::Unreachable("offline".into()).is_transient());
        assert!(ClientError::BadGateway.is_transient());
        assert!(ClientError::MalformedResponse("no token".into()).is_transient());
        assert!(ClientError::Other("timeout".into()).is_transient());

        assert!(!ClientError::InvalidCredential.is_transient());
        assert!(!ClientError::InvalidRecord("bad field".into()).is_transient());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ClientError::InvalidCredential.kind(), "invalid_credential");
        assert_eq!(ClientError::BadGateway.kind(), "bad_gateway");
        assert!(ClientError::InvalidCredential.is_credential_rejection());
        assert!(!ClientError::BadGateway.is_credential_rejection());
    }
}
