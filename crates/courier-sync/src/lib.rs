//! # courier-sync: Upload Engine for Courier
//!
//! Delivers instrument instances recorded on the device to the record
//! service, surviving lost connectivity, expiring credentials and restarts.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Upload Architecture                             │
//! │                                                                         │
//! │   host ── enroll / enqueue / sign_out ──► CoordinatorHandle             │
//! │                                                │ (mpsc)                 │
//! │                                                ▼                        │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 Coordinator actor (one task)                     │  │
//! │  │  SignedOut / Idle / Uploading / Refreshing                       │  │
//! │  └───────┬──────────────┬───────────────┬───────────────┬──────────┘  │
//! │          ▼              ▼               ▼               ▼              │
//! │  ┌────────────┐ ┌──────────────┐ ┌──────────────┐ ┌────────────────┐   │
//! │  │ RecordQueue│ │ Allocator    │ │ Credential-  │ │ RecordClient / │   │
//! │  │ SQLite FIFO│ │ actor,       │ │ Vault        │ │ ExchangeClient │   │
//! │  │ + in-memory│ │ atomic map   │ │ memory +     │ │ (reqwest)      │   │
//! │  │ mirror     │ │ file         │ │ secure store │ │                │   │
//! │  └────────────┘ └──────────────┘ └──────────────┘ └────────────────┘   │
//! │                                                                         │
//! │   ConnectivityMonitor ── reachable again ──► Trigger                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`coordinator`] - Upload state machine and its handle
//! - [`enrollment`] - Redeem → join → confirm flow
//! - [`allocator`] - Durable per-instrument sequence numbers
//! - [`credentials`] - Credential-exchange client and token decoding
//! - [`envelope`] - AES-256-GCM API token envelopes
//! - [`record_client`] - Record submission client
//! - [`queue`] - Record queue seam and implementations
//! - [`vault`] - In-memory credentials mirrored to the secure store
//! - [`connectivity`] - Reachability reports from the host
//! - [`transport`] - Shared HTTP client
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier_sync::{CoordinatorBuilder, CourierConfig, MemorySecureStore};
//!
//! courier_sync::init_tracing(None);
//! let config = CourierConfig::load_or_default(None);
//!
//! let coordinator = CoordinatorBuilder::from_config(&config, Arc::new(MemorySecureStore::new()))
//!     .await?
//!     .spawn();
//!
//! coordinator.enroll(&scanned_token).await?;
//! coordinator.enqueue(instance).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocator;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod credentials;
pub mod enrollment;
pub mod envelope;
pub mod error;
pub mod queue;
pub mod record_client;
pub mod transport;
pub mod vault;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use allocator::{AllocatorHandle, IdentifierAllocator};
pub use config::{CourierConfig, ExchangeSettings, RecordApiSettings, StorageSettings};
pub use connectivity::ConnectivityMonitor;
pub use coordinator::{
    CoordinatorBuilder, CoordinatorDelegate, CoordinatorHandle, CoordinatorState,
    CoordinatorStatus, Trigger,
};
pub use credentials::{ExchangeClient, TokenExchange};
pub use enrollment::{Enrollment, EnrollmentStage};
pub use envelope::EnvelopeKey;
pub use error::{SyncError, SyncResult};
pub use queue::{MemoryRecordQueue, QueueElement, RecordQueue, SqliteRecordQueue};
pub use record_client::{RecordApi, RecordClient};
pub use transport::HttpTransport;
pub use vault::{CredentialVault, MemorySecureStore, SecureStore};

// =============================================================================
// Logging
// =============================================================================

/// Default filter when neither `filter` nor `RUST_LOG` is given.
pub const DEFAULT_LOG_FILTER: &str = "courier=info";

/// Installs a `tracing` subscriber for hosts that do not bring their own.
///
/// `filter` wins over `RUST_LOG`. Does nothing if a global subscriber is
/// already installed.
pub fn init_tracing(filter: Option<&str>) {
    use tracing_subscriber::EnvFilter;

    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
