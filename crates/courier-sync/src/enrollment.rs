//! # Enrollment
//!
//! Turns a scanned one-time redemption token into a signed-in session.
//!
//! ```text
//!   Redeeming ──ok──► Joining ──ok──► MarkingRedeemed ──ok──► Enrolled
//!       │                │                  │
//!       │ err            │ err              │ err
//!       ▼                ▼                  ▼
//!     Failed           Failed        sign_out ──► Failed
//!  (nothing kept)  (not signed in)
//! ```
//!
//! Marking the token redeemed is the last step: a session whose token was
//! never confirmed is torn down again, so the token stays usable.

use std::sync::Arc;

use tracing::{debug, info, warn};

use courier_core::Credentials;

use crate::coordinator::CoordinatorHandle;
use crate::credentials::TokenExchange;
use crate::error::{SyncError, SyncResult};

/// Steps of one enrollment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStage {
    Redeeming,
    Joining,
    MarkingRedeemed,
    Enrolled,
    Failed,
}

impl EnrollmentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStage::Redeeming => "redeeming",
            EnrollmentStage::Joining => "joining",
            EnrollmentStage::MarkingRedeemed => "marking_redeemed",
            EnrollmentStage::Enrolled => "enrolled",
            EnrollmentStage::Failed => "failed",
        }
    }
}

/// One enrollment attempt.
pub struct Enrollment {
    exchange: Arc<dyn TokenExchange>,
    coordinator: CoordinatorHandle,
    stage: EnrollmentStage,
}

impl Enrollment {
    pub fn new(exchange: Arc<dyn TokenExchange>, coordinator: CoordinatorHandle) -> Self {
        Self {
            exchange,
            coordinator,
            stage: EnrollmentStage::Redeeming,
        }
    }

    pub fn stage(&self) -> EnrollmentStage {
        self.stage
    }

    /// Runs every stage for `token`, stopping at the first failure.
    pub async fn run(&mut self, token: &str) -> SyncResult<Credentials> {
        if self.coordinator.is_signed_in().await {
            self.advance(EnrollmentStage::Failed);
            return Err(SyncError::AlreadySignedIn);
        }

        let credentials = match self.exchange.redeem(token).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Token redemption failed");
                self.advance(EnrollmentStage::Failed);
                return Err(e.into());
            }
        };

        self.advance(EnrollmentStage::Joining);
        if let Err(e) = self.coordinator.post_join(credentials.clone()).await {
            warn!(error = %e, "Join failed");
            self.advance(EnrollmentStage::Failed);
            return Err(e);
        }

        self.advance(EnrollmentStage::MarkingRedeemed);
        if let Err(e) = self.exchange.mark_redeemed(token).await {
            warn!(kind = e.kind(), error = %e, "Could not confirm redemption, signing out");
            if let Err(sign_out) = self.coordinator.sign_out().await {
                warn!(error = %sign_out, "Sign-out after failed confirmation was incomplete");
            }
            self.advance(EnrollmentStage::Failed);
            return Err(e.into());
        }

        self.advance(EnrollmentStage::Enrolled);
        info!(record_id = %credentials.record_id(), "Enrolled");
        Ok(credentials)
    }

    fn advance(&mut self, next: EnrollmentStage) {
        debug!(from = self.stage.as_str(), to = next.as_str(), "Enrollment stage");
        self.stage = next;
    }
}

impl CoordinatorHandle {
    /// Enrolls with the configured credential exchange.
    pub async fn enroll(&self, token: &str) -> SyncResult<Credentials> {
        let exchange = self
            .exchange
            .clone()
            .ok_or(SyncError::ExchangeNotConfigured)?;
        Enrollment::new(exchange, self.clone()).run(token).await
    }
}
