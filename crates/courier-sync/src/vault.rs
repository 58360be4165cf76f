//! # Credential Vault
//!
//! Guards the in-memory [`Credentials`] and mirrors every change to the
//! host's secure key-value store.
//!
//! ```text
//! set(creds) ──► lock ──► memory = creds ──► enqueue write ──► unlock
//!                                               │
//!                                               ▼ (ordered worker)
//!                              SecureStore::set(rc_api_token, ...)
//!                              SecureStore::set(rc_record_id, ...)
//!                              SecureStore::set(rcis_jwt, ...)
//! ```
//!
//! Writes to the secure store are fire-and-forget: callers never wait on
//! them and their failures are only logged. The worker applies them in the
//! order they were enqueued, so the store converges to the latest value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use courier_core::Credentials;

use crate::error::{SyncError, SyncResult};

/// Secure-store key for the API token.
pub const API_TOKEN_KEY: &str = "rc_api_token";
/// Secure-store key for the record ID.
pub const RECORD_ID_KEY: &str = "rc_record_id";
/// Secure-store key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "rcis_jwt";

// =============================================================================
// Secure Store
// =============================================================================

/// Host-provided encrypted key-value store (keychain, keystore, ...).
///
/// Calls may block; the vault only invokes them off the async executor.
pub trait SecureStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value`, or deletes the key when `value` is `None`.
    fn set(&self, key: &str, value: Option<&str>) -> SyncResult<()>;
}

/// In-process [`SecureStore`] for tests and hosts without a keychain.
#[derive(Debug, Default)]
pub struct MemorySecureStore {
    entries: StdMutex<HashMap<String, String>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemorySecureStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<&str>) -> SyncResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SyncError::Storage("secure store lock poisoned".into()))?;
        match value {
            Some(value) => entries.insert(key.to_string(), value.to_string()),
            None => entries.remove(key),
        };
        Ok(())
    }
}

// =============================================================================
// Vault
// =============================================================================

enum PersistOp {
    Write(Option<Credentials>),
    Flush(oneshot::Sender<()>),
}

/// In-memory credential cell mirrored to a [`SecureStore`].
#[derive(Clone)]
pub struct CredentialVault {
    current: Arc<Mutex<Option<Credentials>>>,
    persist_tx: mpsc::UnboundedSender<PersistOp>,
}

impl CredentialVault {
    /// Opens the vault, restoring any credentials already in `store`.
    ///
    /// Restores only when both the API token and the record ID are present;
    /// a missing refresh token restores with refresh disabled.
    pub fn open(store: Arc<dyn SecureStore>) -> Self {
        let restored = match (store.get(API_TOKEN_KEY), store.get(RECORD_ID_KEY)) {
            (Some(api_token), Some(record_id)) => Some(Credentials::new(
                api_token,
                record_id,
                store.get(REFRESH_TOKEN_KEY),
            )),
            _ => None,
        };

        if let Some(ref creds) = restored {
            debug!(record_id = %creds.record_id(), "Restored credentials from secure store");
        }

        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_worker(store, persist_rx));

        Self {
            current: Arc::new(Mutex::new(restored)),
            persist_tx,
        }
    }

    /// Current credentials, if signed in.
    pub async fn get(&self) -> Option<Credentials> {
        self.current.lock().await.clone()
    }

    pub async fn is_signed_in(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Replaces the credentials (`None` clears them) and schedules the
    /// secure-store write.
    pub async fn set(&self, credentials: Option<Credentials>) {
        let mut current = self.current.lock().await;
        *current = credentials.clone();
        if self.persist_tx.send(PersistOp::Write(credentials)).is_err() {
            warn!("Credential persistence worker is gone, change kept in memory only");
        }
    }

    /// Waits until every write scheduled so far has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.persist_tx.send(PersistOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn persist_worker(store: Arc<dyn SecureStore>, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            PersistOp::Write(credentials) => {
                let store = store.clone();
                let result =
                    tokio::task::spawn_blocking(move || write_credentials(&*store, credentials.as_ref()))
                        .await;
                match result {
                    Ok(Ok(())) => debug!("Credentials persisted"),
                    Ok(Err(e)) => warn!(error = %e, "Failed to persist credentials"),
                    Err(e) => warn!(error = %e, "Credential persistence task panicked"),
                }
            }
            PersistOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn write_credentials(store: &dyn SecureStore, credentials: Option<&Credentials>) -> SyncResult<()> {
    store.set(API_TOKEN_KEY, credentials.map(|c| c.api_token()))?;
    store.set(RECORD_ID_KEY, credentials.map(|c| c.record_id()))?;
    store.set(REFRESH_TOKEN_KEY, credentials.and_then(|c| c.refresh_token()))?;
    Ok(())
}
