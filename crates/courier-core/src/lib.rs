//! # courier-core: Pure Domain Logic for Courier
//!
//! This crate holds the value types that flow through the record-delivery
//! engine and the policy that turns remote responses into typed outcomes.
//! Nothing in here touches a disk or a socket.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Courier Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Host application (survey / scan UI)             │   │
//! │  │        redeem token ──► post join ──► add instrument instances  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                courier-sync (coordinator, clients)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ courier-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌──────────┐ │   │
//! │  │   │   types    │  │  classify  │  │   record   │  │validation│ │   │
//! │  │   │ Instrument │  │  status →  │  │  payload   │  │  rules   │ │   │
//! │  │   │ Credentials│  │ ClientError│  │  shaping   │  │          │ │   │
//! │  │   └────────────┘  └────────────┘  └────────────┘  └──────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (InstrumentInstance, Credentials, ...)
//! - [`classify`] - Response classifier (transport outcome → result)
//! - [`record`] - Shapes an instance into the remote record layout
//! - [`error`] - Domain error types
//! - [`validation`] - Instance validation
//!
//! ## Example Usage
//!
//! ```rust
//! use courier_core::classify::{classify, CallSite, TransportOutcome};
//! use courier_core::ClientError;
//!
//! let outcome = TransportOutcome::Response { status: 403, body: Vec::new() };
//! assert_eq!(
//!     classify(CallSite::Submit, &outcome).unwrap_err(),
//!     ClientError::InvalidCredential
//! );
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod classify;
pub mod error;
pub mod record;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{ClientError, ClientResult, CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// First sequence number handed out for any instrument.
pub const INITIAL_SEQUENCE_NUMBER: SequenceNumber = 1;

/// Maximum length of an instrument identifier.
///
/// The record service uses the identifier as a field-name prefix
/// (`<instrument>_created`), so it is bounded like a field name.
pub const MAX_INSTRUMENT_NAME_LEN: usize = 64;
