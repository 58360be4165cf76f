//! # Validation Module
//!
//! Checks applied to an instrument instance before it is accepted into the
//! delivery queue.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Host application                                             │
//! │  └── Builds the instance / IntoInstrumentInstance conversion           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Coordinator enqueue                                          │
//! │  └── THIS MODULE: structural rules the record service depends on       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Record service                                               │
//! │  └── Field-level rules (surface as InvalidRecord → element dropped)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Catching a malformed instance here means it is never queued at all,
//! instead of being dropped later after a round trip.
//!
//! ## Usage
//! ```rust
//! use courier_core::validation::validate_instrument_name;
//!
//! assert!(validate_instrument_name("daily_survey").is_ok());
//! assert!(validate_instrument_name("Daily Survey").is_err());
//! ```

use crate::error::ValidationError;
use crate::types::{InstrumentInstance, SequenceNumber};
use crate::MAX_INSTRUMENT_NAME_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an instrument identifier.
///
/// ## Rules
/// - Must not be empty
/// - At most [`MAX_INSTRUMENT_NAME_LEN`] characters
/// - Lowercase ASCII letters, digits and underscores only
///
/// The identifier becomes a field-name prefix on the record service, which
/// only accepts that alphabet.
pub fn validate_instrument_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "instrument".to_string(),
        });
    }

    if name.len() > MAX_INSTRUMENT_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "instrument".to_string(),
            max: MAX_INSTRUMENT_NAME_LEN,
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "instrument".to_string(),
            reason: "must contain only lowercase letters, digits, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates an instrument version string (non-empty after trimming).
pub fn validate_instrument_version(version: &str) -> ValidationResult<()> {
    if version.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "instrument_version".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a sequence number. The record service counts repeats from 1.
pub fn validate_sequence_number(sequence_number: SequenceNumber) -> ValidationResult<()> {
    if sequence_number == 0 {
        return Err(ValidationError::MustBePositive {
            field: "sequence_number".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Instance Validator
// =============================================================================

/// Validates a whole instance before it is queued.
pub fn validate_instance(instance: &InstrumentInstance) -> ValidationResult<()> {
    validate_instrument_name(&instance.instrument)?;
    validate_instrument_version(&instance.instrument_version)?;

    if let Some(sequence_number) = instance.sequence_number() {
        validate_sequence_number(sequence_number)?;
    }

    if instance.fields.keys().any(|k| k.is_empty()) {
        return Err(ValidationError::InvalidFormat {
            field: "fields".to_string(),
            reason: "field names must not be empty".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
