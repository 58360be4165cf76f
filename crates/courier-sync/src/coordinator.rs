//! # Upload Coordinator
//!
//! Owns the signed-in session and drains the record queue one element at a
//! time. Everything that mutates the session runs inside a single actor
//! task; network calls run in spawned tasks and report back as commands.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   SignedOut ──post_join ok──► Idle ◄───────────────────────────┐       │
//! │       ▲                        │                               │       │
//! │       │          enqueue / reconnect / start_uploading         │       │
//! │       │                        ▼                               │       │
//! │       │                    Uploading ──ok / InvalidRecord──────┤       │
//! │       │                        │     (remove, pump next)       │       │
//! │       │                        │                               │       │
//! │       │                        ├──Unreachable / BadGateway /───┤       │
//! │       │                        │  Malformed / Other (wait)     │       │
//! │       │                        │                               │       │
//! │       │        InvalidCredential (retry flag still set)        │       │
//! │       │                        ▼                               │       │
//! │       │                   Refreshing ──ok──► Uploading (retry flag     │
//! │       │                        │             cleared: one retry only)  │
//! │       │                        │                                       │
//! │       └── delegate agrees ─────┘ refresh token rejected                │
//! │                                                                         │
//! │   sign_out() from any state: stop connectivity watch, clear queue,     │
//! │   clear credentials, clear identifier map                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sessions
//! Every sign-out starts a new session. A completion that arrives from an
//! earlier session is logged and dropped, so a request that was in flight
//! during sign-out can never remove, retry or refresh anything.
//!
//! Retrying is event-driven only. After a transient failure the coordinator
//! sits in `Idle` until the next enqueue, reconnect, protected-data or
//! explicit `start_uploading` trigger.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use courier_core::validation::validate_instance;
use courier_core::{
    ClientError, ClientResult, Credentials, InstrumentInstance, IntoInstrumentInstance,
    JoinedInstrument, SequenceNumber,
};
use courier_db::{Database, DbConfig, IdentifierMapFile};

use crate::allocator::{AllocatorHandle, IdentifierAllocator};
use crate::config::CourierConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::credentials::{ExchangeClient, TokenExchange};
use crate::error::{SyncError, SyncResult};
use crate::queue::{QueueElement, RecordQueue, SqliteRecordQueue};
use crate::record_client::{RecordApi, RecordClient};
use crate::transport::HttpTransport;
use crate::vault::{CredentialVault, SecureStore};

const COMMAND_BUFFER: usize = 64;

// =============================================================================
// Public Types
// =============================================================================

/// Coordinator session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    SignedOut,
    Idle,
    Uploading,
    Refreshing,
}

impl CoordinatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::SignedOut => "signed_out",
            CoordinatorState::Idle => "idle",
            CoordinatorState::Uploading => "uploading",
            CoordinatorState::Refreshing => "refreshing",
        }
    }

    pub fn is_signed_in(&self) -> bool {
        !matches!(self, CoordinatorState::SignedOut)
    }
}

/// Snapshot of the coordinator, published after every command.
#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    /// Elements still in the queue.
    pub pending: usize,
    /// Most recent failure that left records in the queue.
    pub last_error: Option<SyncError>,
    /// Records acknowledged since start.
    pub uploaded: u64,
    pub observing_connectivity: bool,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        CoordinatorStatus {
            state: CoordinatorState::SignedOut,
            pending: 0,
            last_error: None,
            uploaded: 0,
            observing_connectivity: false,
        }
    }
}

/// External events that re-enter the upload loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ConnectivityRegained,
    ProtectedDataAvailable,
    Foregrounded,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::ConnectivityRegained => "connectivity_regained",
            Trigger::ProtectedDataAvailable => "protected_data_available",
            Trigger::Foregrounded => "foregrounded",
        }
    }
}

/// Host callbacks.
#[async_trait]
pub trait CoordinatorDelegate: Send + Sync {
    /// Called when the refresh token itself was rejected. Returning `true`
    /// signs out.
    async fn on_invalid_token(&self) -> bool {
        true
    }

    /// Called after the service acknowledged a record.
    async fn on_uploaded(&self, _instance_id: Uuid) {}
}

struct SignOutByDefault;

impl CoordinatorDelegate for SignOutByDefault {}

// =============================================================================
// Commands
// =============================================================================

enum Command {
    PostJoin {
        credentials: Credentials,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Enqueue {
        instance: InstrumentInstance,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    StartUploading {
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Trigger(Trigger),
    SignOut {
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Status {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
    Shutdown,

    // Completions of spawned network calls.
    JoinFinished {
        session: u64,
        credentials: Credentials,
        result: ClientResult<()>,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    SubmitFinished {
        session: u64,
        element: QueueElement,
        retry_upload: bool,
        result: ClientResult<()>,
    },
    RefreshFinished {
        session: u64,
        element: QueueElement,
        result: ClientResult<Credentials>,
    },
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to the coordinator actor. Cheap to clone.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<CoordinatorStatus>,
    allocator: AllocatorHandle,
    vault: CredentialVault,
    pub(crate) exchange: Option<Arc<dyn TokenExchange>>,
}

impl CoordinatorHandle {
    /// Submits the joined record with `credentials` and, once the service
    /// accepts it, signs in with them.
    pub async fn post_join(&self, credentials: Credentials) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::PostJoin { credentials, reply }).await?;
        Self::recv(rx).await?
    }

    /// Queues an instance for upload.
    ///
    /// The sequence number is allocated here, before the instance reaches
    /// the queue. If allocation fails the instance is not queued.
    pub async fn enqueue(&self, mut instance: InstrumentInstance) -> SyncResult<()> {
        validate_instance(&instance)?;
        if !self.vault.is_signed_in().await {
            return Err(SyncError::NotSignedIn);
        }

        if instance.sequence_number().is_none() {
            let sequence_number = self
                .allocator
                .allocate_and_advance(&instance.instrument)
                .await?;
            instance.assign_sequence_number(sequence_number)?;
        }

        let (reply, rx) = oneshot::channel();
        self.send(Command::Enqueue { instance, reply }).await?;
        Self::recv(rx).await?
    }

    /// Converts `item` and queues it.
    pub async fn add_convertible<T: IntoInstrumentInstance>(&self, item: T) -> SyncResult<()> {
        self.enqueue(item.into_instrument_instance()?).await
    }

    /// Starts draining the queue if nothing is in flight.
    pub async fn start_uploading(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartUploading { reply }).await?;
        Self::recv(rx).await?
    }

    /// Reports an external event that may let queued records through.
    pub async fn notify(&self, trigger: Trigger) -> SyncResult<()> {
        self.send(Command::Trigger(trigger)).await
    }

    /// Protected storage was unlocked.
    pub async fn protected_data_available(&self) -> SyncResult<()> {
        self.notify(Trigger::ProtectedDataAvailable).await
    }

    pub async fn sign_out(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SignOut { reply }).await?;
        Self::recv(rx).await?
    }

    pub async fn status(&self) -> SyncResult<CoordinatorStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        Self::recv(rx).await
    }

    /// Receiver of every published status.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status_rx.clone()
    }

    /// Waits until a published status satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&CoordinatorStatus) -> bool,
    ) -> SyncResult<CoordinatorStatus> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|status| predicate(status))
            .await
            .map_err(|_| SyncError::ShuttingDown)?
            .clone();
        Ok(status)
    }

    pub async fn is_signed_in(&self) -> bool {
        self.vault.is_signed_in().await
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        self.vault.get().await
    }

    /// Stops the coordinator after the commands already queued.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> SyncResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    async fn recv<T>(rx: oneshot::Receiver<T>) -> SyncResult<T> {
        rx.await
            .map_err(|_| SyncError::ChannelError("Coordinator dropped reply".into()))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a coordinator from its collaborators.
pub struct CoordinatorBuilder {
    api: Arc<dyn RecordApi>,
    queue: Arc<dyn RecordQueue>,
    allocator: AllocatorHandle,
    secure_store: Arc<dyn SecureStore>,
    exchange: Option<Arc<dyn TokenExchange>>,
    connectivity: Option<ConnectivityMonitor>,
    delegate: Option<Arc<dyn CoordinatorDelegate>>,
}

impl CoordinatorBuilder {
    pub fn new(
        api: Arc<dyn RecordApi>,
        queue: Arc<dyn RecordQueue>,
        allocator: AllocatorHandle,
        secure_store: Arc<dyn SecureStore>,
    ) -> Self {
        Self {
            api,
            queue,
            allocator,
            secure_store,
            exchange: None,
            connectivity: None,
            delegate: None,
        }
    }

    /// Wires up the HTTP clients and on-device storage described by `config`.
    pub async fn from_config(
        config: &CourierConfig,
        secure_store: Arc<dyn SecureStore>,
    ) -> SyncResult<Self> {
        config.validate()?;
        create_data_dir(&config.storage.data_dir).await?;

        let transport = HttpTransport::new(config.request_timeout())?;
        let api = RecordClient::new(transport.clone(), config.record_api.base_url.clone());

        let db = Database::new(DbConfig::new(config.queue_db_path())).await?;
        let queue = SqliteRecordQueue::open(db.record_queue()).await?;

        let allocator =
            IdentifierAllocator::spawn(IdentifierMapFile::new(config.identifier_map_path()))
                .await?;

        let mut builder = Self::new(Arc::new(api), Arc::new(queue), allocator, secure_store);

        if let Some(exchange) = &config.exchange {
            builder = builder.with_exchange(Arc::new(ExchangeClient::new(
                transport,
                exchange.base_url.clone(),
                exchange.study_id.clone(),
                exchange.envelope_key()?,
            )));
        }

        Ok(builder)
    }

    pub fn with_exchange(mut self, exchange: Arc<dyn TokenExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn with_connectivity(mut self, monitor: ConnectivityMonitor) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn CoordinatorDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Restores any persisted credentials and spawns the actor.
    pub fn spawn(self) -> CoordinatorHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(CoordinatorStatus::default());
        let vault = CredentialVault::open(self.secure_store);

        let actor = Coordinator {
            api: self.api,
            exchange: self.exchange.clone(),
            queue: self.queue,
            allocator: self.allocator.clone(),
            vault: vault.clone(),
            connectivity: self.connectivity,
            delegate: self.delegate.unwrap_or_else(|| Arc::new(SignOutByDefault)),
            rx,
            self_tx: tx.downgrade(),
            status_tx,
            state: CoordinatorState::SignedOut,
            session: 0,
            joining: false,
            observer: None,
            uploaded: 0,
            last_error: None,
            assigned: HashMap::new(),
        };
        tokio::spawn(actor.run());

        CoordinatorHandle {
            tx,
            status_rx,
            allocator: self.allocator,
            vault,
            exchange: self.exchange,
        }
    }
}

async fn create_data_dir(dir: &Path) -> SyncResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| SyncError::Storage(format!("{}: {e}", dir.display())))
}

// =============================================================================
// Actor
// =============================================================================

struct Coordinator {
    api: Arc<dyn RecordApi>,
    exchange: Option<Arc<dyn TokenExchange>>,
    queue: Arc<dyn RecordQueue>,
    allocator: AllocatorHandle,
    vault: CredentialVault,
    connectivity: Option<ConnectivityMonitor>,
    delegate: Arc<dyn CoordinatorDelegate>,

    rx: mpsc::Receiver<Command>,
    /// Weak so that dropping every handle stops the actor.
    self_tx: mpsc::WeakSender<Command>,
    status_tx: watch::Sender<CoordinatorStatus>,

    state: CoordinatorState,
    session: u64,
    joining: bool,
    observer: Option<JoinHandle<()>>,
    uploaded: u64,
    last_error: Option<SyncError>,
    /// Numbers allocated for queue keys whose write-back has not reached
    /// durable storage yet.
    assigned: HashMap<String, SequenceNumber>,
}

impl Coordinator {
    async fn run(mut self) {
        if let Some(credentials) = self.vault.get().await {
            info!(record_id = %credentials.record_id(), "Resuming signed-in session");
            self.set_state(CoordinatorState::Idle);
            self.start_observer();
            self.pump().await;
        }
        self.publish().await;

        while let Some(command) = self.rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command).await;
            self.publish().await;
        }

        self.stop_observer();
        info!("Upload coordinator stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::PostJoin { credentials, reply } => self.post_join(credentials, reply).await,
            Command::Enqueue { instance, reply } => {
                let result = self.enqueue(instance).await;
                self.respond(reply, result).await;
            }
            Command::StartUploading { reply } => {
                let result = if self.state.is_signed_in() {
                    self.pump().await;
                    Ok(())
                } else {
                    Err(SyncError::NotSignedIn)
                };
                self.respond(reply, result).await;
            }
            Command::Trigger(trigger) => {
                debug!(trigger = trigger.as_str(), state = self.state.as_str(), "Upload trigger");
                if self.state.is_signed_in() {
                    self.pump().await;
                }
            }
            Command::SignOut { reply } => {
                let result = self.sign_out().await;
                self.respond(reply, result).await;
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status().await);
            }
            Command::Shutdown => {}
            Command::JoinFinished {
                session,
                credentials,
                result,
                reply,
            } => self.join_finished(session, credentials, result, reply).await,
            Command::SubmitFinished {
                session,
                element,
                retry_upload,
                result,
            } => self.submit_finished(session, element, retry_upload, result).await,
            Command::RefreshFinished {
                session,
                element,
                result,
            } => self.refresh_finished(session, element, result).await,
        }
    }

    // =========================================================================
    // Joining
    // =========================================================================

    async fn post_join(&mut self, credentials: Credentials, reply: oneshot::Sender<SyncResult<()>>) {
        if self.state.is_signed_in() {
            self.respond(reply, Err(SyncError::AlreadySignedIn)).await;
            return;
        }
        if self.joining {
            self.respond(reply, Err(SyncError::JoinInProgress)).await;
            return;
        }

        let instance = match JoinedInstrument.into_instrument_instance() {
            Ok(instance) => instance,
            Err(e) => {
                self.respond(reply, Err(e.into())).await;
                return;
            }
        };

        info!(record_id = %credentials.record_id(), "Posting joined record");
        self.joining = true;

        let api = self.api.clone();
        let target = self.self_tx.clone();
        let session = self.session;
        tokio::spawn(async move {
            let result = api
                .submit(&credentials, JoinedInstrument::SEQUENCE_NUMBER, &instance)
                .await;
            if let Some(tx) = target.upgrade() {
                let _ = tx
                    .send(Command::JoinFinished {
                        session,
                        credentials,
                        result,
                        reply,
                    })
                    .await;
            }
        });
    }

    async fn join_finished(
        &mut self,
        session: u64,
        credentials: Credentials,
        result: ClientResult<()>,
        reply: oneshot::Sender<SyncResult<()>>,
    ) {
        if session != self.session {
            debug!("Join completed after sign-out, discarding");
            self.respond(reply, Err(SyncError::NotSignedIn)).await;
            return;
        }
        self.joining = false;

        match result {
            Ok(()) => {
                info!(record_id = %credentials.record_id(), "Joined, signed in");
                self.vault.set(Some(credentials)).await;
                self.last_error = None;
                self.set_state(CoordinatorState::Idle);
                self.start_observer();
                self.pump().await;
                self.respond(reply, Ok(())).await;
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Joined record rejected, staying signed out");
                self.respond(reply, Err(e.into())).await;
            }
        }
    }

    // =========================================================================
    // Upload Loop
    // =========================================================================

    async fn enqueue(&mut self, instance: InstrumentInstance) -> SyncResult<()> {
        if !self.state.is_signed_in() {
            return Err(SyncError::NotSignedIn);
        }

        let element = self.queue.add(instance).await?;
        debug!(
            instance_id = %element.instance().identifier,
            instrument = %element.instance().instrument,
            sequence_number = ?element.instance().sequence_number(),
            "Record queued"
        );

        self.pump().await;
        Ok(())
    }

    /// Starts one submission if idle and the queue has something.
    async fn pump(&mut self) {
        if self.state != CoordinatorState::Idle {
            return;
        }
        let Some(credentials) = self.vault.get().await else {
            return;
        };
        if self.queue.is_empty().await {
            return;
        }

        let element = match self.queue.first().await {
            Ok(Some(element)) => element,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Queue storage unavailable, using in-memory view");
                match self.queue.first_in_memory().await {
                    Some(element) => element,
                    None => return,
                }
            }
        };

        self.begin_submit(element, credentials, true).await;
    }

    async fn begin_submit(
        &mut self,
        mut element: QueueElement,
        credentials: Credentials,
        retry_upload: bool,
    ) {
        let sequence_number = match element.instance().sequence_number() {
            Some(sequence_number) => sequence_number,
            None => match self.assign_sequence_number(&mut element).await {
                Ok(sequence_number) => sequence_number,
                Err(e) => {
                    warn!(
                        instance_id = %element.instance().identifier,
                        error = %e,
                        "Could not assign sequence number"
                    );
                    self.fail(e);
                    return;
                }
            },
        };

        self.set_state(CoordinatorState::Uploading);

        let api = self.api.clone();
        let target = self.self_tx.clone();
        let session = self.session;
        tokio::spawn(async move {
            let result = api
                .submit(&credentials, sequence_number, element.instance())
                .await;
            if let Some(tx) = target.upgrade() {
                let _ = tx
                    .send(Command::SubmitFinished {
                        session,
                        element,
                        retry_upload,
                        result,
                    })
                    .await;
            }
        });
    }

    /// Gives the element its number, allocating only if this key never got
    /// one. A failed write-back is logged and the number is kept, so the
    /// element is still submitted with it.
    async fn assign_sequence_number(
        &mut self,
        element: &mut QueueElement,
    ) -> SyncResult<SequenceNumber> {
        let sequence_number = match self.assigned.get(element.key()) {
            Some(&sequence_number) => sequence_number,
            None => {
                let sequence_number = self
                    .allocator
                    .allocate_and_advance(&element.instance().instrument)
                    .await?;
                self.assigned
                    .insert(element.key().to_owned(), sequence_number);
                debug!(
                    instance_id = %element.instance().identifier,
                    sequence_number,
                    "Sequence number assigned"
                );
                sequence_number
            }
        };
        element
            .instance_mut()
            .assign_sequence_number(sequence_number)?;

        match self.queue.update(element).await {
            Ok(()) => {
                self.assigned.remove(element.key());
            }
            Err(e) => {
                warn!(
                    instance_id = %element.instance().identifier,
                    sequence_number,
                    error = %e,
                    "Could not persist sequence number, submitting with it anyway"
                );
            }
        }
        Ok(sequence_number)
    }

    async fn submit_finished(
        &mut self,
        session: u64,
        element: QueueElement,
        retry_upload: bool,
        result: ClientResult<()>,
    ) {
        let instance_id = element.instance().identifier;
        if session != self.session {
            debug!(instance_id = %instance_id, "Submission completed after sign-out, ignoring");
            return;
        }

        match result {
            Ok(()) => {
                info!(instance_id = %instance_id, "Record uploaded");
                self.uploaded += 1;
                self.last_error = None;
                let removed = self.remove(&element).await;
                self.delegate.on_uploaded(instance_id).await;
                self.set_state(CoordinatorState::Idle);
                if removed {
                    self.pump().await;
                }
            }
            Err(ClientError::InvalidRecord(reason)) => {
                warn!(instance_id = %instance_id, reason = %reason, "Record rejected, dropping it");
                let removed = self.remove(&element).await;
                self.last_error = Some(ClientError::InvalidRecord(reason).into());
                self.set_state(CoordinatorState::Idle);
                if removed {
                    self.pump().await;
                }
            }
            Err(ClientError::InvalidCredential) if retry_upload => {
                info!(instance_id = %instance_id, "API token rejected, refreshing");
                self.begin_refresh(element).await;
            }
            Err(e) => {
                warn!(
                    instance_id = %instance_id,
                    kind = e.kind(),
                    error = %e,
                    "Upload failed, waiting for next trigger"
                );
                self.fail(e.into());
            }
        }
    }

    async fn remove(&mut self, element: &QueueElement) -> bool {
        match self.queue.remove(element).await {
            Ok(_) => {
                self.assigned.remove(element.key());
                true
            }
            Err(e) => {
                error!(key = %element.key(), error = %e, "Failed to remove queue element");
                self.last_error = Some(e);
                false
            }
        }
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    async fn begin_refresh(&mut self, element: QueueElement) {
        let refresh_token = self
            .vault
            .get()
            .await
            .and_then(|c| c.refresh_token().map(str::to_owned));

        let (Some(exchange), Some(refresh_token)) = (self.exchange.clone(), refresh_token) else {
            warn!("API token rejected and it cannot be refreshed");
            self.credentials_dead(ClientError::InvalidCredential).await;
            return;
        };

        self.set_state(CoordinatorState::Refreshing);

        let target = self.self_tx.clone();
        let session = self.session;
        tokio::spawn(async move {
            let result = exchange.refresh(&refresh_token).await;
            if let Some(tx) = target.upgrade() {
                let _ = tx
                    .send(Command::RefreshFinished {
                        session,
                        element,
                        result,
                    })
                    .await;
            }
        });
    }

    async fn refresh_finished(
        &mut self,
        session: u64,
        element: QueueElement,
        result: ClientResult<Credentials>,
    ) {
        if session != self.session {
            debug!("Refresh completed after sign-out, ignoring");
            return;
        }

        match result {
            Ok(credentials) => {
                info!(record_id = %credentials.record_id(), "Credentials refreshed, retrying once");
                self.vault.set(Some(credentials.clone())).await;
                self.set_state(CoordinatorState::Idle);
                self.begin_submit(element, credentials, false).await;
            }
            Err(e @ (ClientError::InvalidCredential | ClientError::InvalidRecord(_))) => {
                warn!(kind = e.kind(), "Refresh token rejected");
                self.credentials_dead(e).await;
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Refresh failed, waiting for next trigger");
                self.fail(e.into());
            }
        }
    }

    async fn credentials_dead(&mut self, cause: ClientError) {
        if self.delegate.on_invalid_token().await {
            warn!("Signing out after credential rejection");
            if let Err(e) = self.sign_out().await {
                error!(error = %e, "Sign-out after credential rejection was incomplete");
            }
            self.last_error = Some(cause.into());
        } else {
            info!("Host kept the rejected credentials");
            self.fail(cause.into());
        }
    }

    // =========================================================================
    // Sign-out
    // =========================================================================

    async fn sign_out(&mut self) -> SyncResult<()> {
        self.session += 1;
        self.joining = false;
        self.assigned.clear();
        self.stop_observer();
        self.vault.set(None).await;
        self.last_error = None;
        self.set_state(CoordinatorState::SignedOut);

        let queue_result = self.queue.clear().await;
        if let Err(ref e) = queue_result {
            error!(error = %e, "Failed to clear record queue");
        }
        let allocator_result = self.allocator.clear().await;
        if let Err(ref e) = allocator_result {
            error!(error = %e, "Failed to clear identifier map");
        }

        info!("Signed out");
        queue_result.and(allocator_result)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn set_state(&mut self, next: CoordinatorState) {
        if self.state != next {
            debug!(from = self.state.as_str(), to = next.as_str(), "Coordinator state change");
            self.state = next;
        }
    }

    fn fail(&mut self, error: SyncError) {
        self.last_error = Some(error);
        self.set_state(CoordinatorState::Idle);
    }

    fn start_observer(&mut self) {
        if self.observer.is_some() {
            return;
        }
        if let Some(monitor) = &self.connectivity {
            self.observer = Some(
                monitor.observe(self.self_tx.clone(), || {
                    Command::Trigger(Trigger::ConnectivityRegained)
                }),
            );
            debug!("Connectivity observation started");
        }
    }

    fn stop_observer(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.abort();
            debug!("Connectivity observation stopped");
        }
    }

    async fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            state: self.state,
            pending: self.queue.len().await,
            last_error: self.last_error.clone(),
            uploaded: self.uploaded,
            observing_connectivity: self.observer.is_some(),
        }
    }

    async fn publish(&self) {
        self.status_tx.send_replace(self.status().await);
    }

    /// Publishes the status before replying, so a caller that awaited the
    /// reply never observes an older status.
    async fn respond<T>(&self, reply: oneshot::Sender<T>, value: T) {
        self.publish().await;
        let _ = reply.send(value);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
