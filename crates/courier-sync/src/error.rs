//! # Sync Error Types
//!
//! Errors surfaced by courier-sync to the host application.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Session       │  │     Remote              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  AlreadySignedIn│  │  Client(ClientError)    │ │
//! │  │  InvalidUrl     │  │  NotSignedIn    │  │   Unreachable           │ │
//! │  │  ConfigLoad...  │  │  JoinInProgress │  │   InvalidCredential ... │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Storage      │  │   Allocation    │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Storage        │  │  Identifier-    │  │  ChannelError           │ │
//! │  │  InvalidRecord- │  │  Allocation     │  │  ShuttingDown           │ │
//! │  │  Input          │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use courier_core::{ClientError, CoreError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all failures the host can observe.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configured URL does not parse or is not http(s).
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// Joining was requested while credentials are already held.
    #[error("Already signed in")]
    AlreadySignedIn,

    /// The operation needs credentials and none are held.
    #[error("Not signed in")]
    NotSignedIn,

    /// Another join is already waiting on the record service.
    #[error("A join is already in progress")]
    JoinInProgress,

    /// Enrollment is impossible because no credential exchange is configured.
    #[error("Credential exchange is not configured")]
    ExchangeNotConfigured,

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Classified failure of a remote call.
    #[error(transparent)]
    Client(#[from] ClientError),

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// The identifier allocator could not durably hand out a number.
    #[error("Identifier allocation failed: {0}")]
    IdentifierAllocation(String),

    /// Record queue or other local storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The instance was rejected before it was queued.
    #[error("Invalid instance: {0}")]
    InvalidInstance(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Actor is shutting down.
    #[error("Coordinator is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<courier_db::DbError> for SyncError {
    fn from(err: courier_db::DbError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::InvalidInstance(err.to_string())
    }
}

impl From<courier_core::ValidationError> for SyncError {
    fn from(err: courier_core::ValidationError) -> Self {
        SyncError::InvalidInstance(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::InvalidConfig(format!("HTTP client: {err}"))
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if waiting for the next trigger may make the operation
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Client(e) => e.is_transient(),
            SyncError::Storage(_) | SyncError::IdentifierAllocation(_) => true,
            _ => false,
        }
    }

    /// Returns true if credentials were rejected or are missing.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            SyncError::Client(ClientError::InvalidCredential) | SyncError::NotSignedIn
        )
    }

    /// Returns true if repeating the same operation can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncError::Client(ClientError::InvalidRecord(_))
                | SyncError::InvalidInstance(_)
                | SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::ExchangeNotConfigured
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Client(ClientError::Unreachable("offline".into())).is_retryable());
        assert!(SyncError::Client(ClientError::BadGateway).is_retryable());
        assert!(SyncError::IdentifierAllocation("disk full".into()).is_retryable());

        assert!(!SyncError::Client(ClientError::InvalidCredential).is_retryable());
        assert!(!SyncError::AlreadySignedIn.is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert!(SyncError::Client(ClientError::InvalidCredential).is_credential_error());
        assert!(SyncError::NotSignedIn.is_credential_error());
        assert!(SyncError::Client(ClientError::InvalidRecord("x".into())).is_permanent());
        assert!(!SyncError::Client(ClientError::Other("x".into())).is_permanent());
        assert!(SyncError::ExchangeNotConfigured.is_config_error());
    }

    #[test]
    fn test_client_error_is_transparent() {
        let err: SyncError = ClientError::BadGateway.into();
        assert_eq!(err.to_string(), "Bad gateway");
    }
}
