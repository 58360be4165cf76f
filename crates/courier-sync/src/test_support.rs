//! Stub collaborators and a harness for coordinator and enrollment tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use uuid::Uuid;

use courier_core::{
    ClientError, ClientResult, Credentials, FieldMap, InstrumentInstance, JoinedInstrument,
    SequenceNumber,
};
use courier_db::IdentifierMapFile;

use crate::allocator::{AllocatorHandle, IdentifierAllocator};
use crate::connectivity::ConnectivityMonitor;
use crate::coordinator::{
    CoordinatorBuilder, CoordinatorDelegate, CoordinatorHandle, CoordinatorStatus,
};
use crate::credentials::TokenExchange;
use crate::queue::MemoryRecordQueue;
use crate::record_client::RecordApi;
use crate::vault::MemorySecureStore;

pub(crate) fn joined_credentials() -> Credentials {
    Credentials::new("api-1", "rec-1", Some("refresh-1".into()))
}

fn refreshed_credentials() -> Credentials {
    Credentials::new("api-2", "rec-1", Some("refresh-2".into()))
}

// =============================================================================
// Record API
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct SubmitCall {
    pub api_token: String,
    pub instrument: String,
    pub sequence_number: SequenceNumber,
    pub instance_id: Uuid,
    pub fields: FieldMap,
    pub succeeded: bool,
}

/// Answers submissions from a script, then with `Ok`. While offline every
/// call fails with `Unreachable` without consuming the script.
pub(crate) struct StubRecordApi {
    script: Mutex<VecDeque<ClientResult<()>>>,
    calls: Mutex<Vec<SubmitCall>>,
    online: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    held: AtomicBool,
    release: Notify,
}

impl Default for StubRecordApi {
    fn default() -> Self {
        Self::scripted([])
    }
}

impl StubRecordApi {
    pub fn scripted(responses: impl IntoIterator<Item = ClientResult<()>>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            held: AtomicBool::new(false),
            release: Notify::new(),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Record submissions block until [`release`](Self::release).
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub fn calls(&self) -> Vec<SubmitCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than the joined record.
    pub fn record_calls(&self) -> Vec<SubmitCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.instrument != JoinedInstrument::INSTRUMENT)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordApi for StubRecordApi {
    async fn submit(
        &self,
        credentials: &Credentials,
        sequence_number: SequenceNumber,
        instance: &InstrumentInstance,
    ) -> ClientResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;

        if instance.instrument != JoinedInstrument::INSTRUMENT {
            let released = self.release.notified();
            if self.held.load(Ordering::SeqCst) {
                released.await;
            }
        }

        let result = if self.online.load(Ordering::SeqCst) {
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        } else {
            Err(ClientError::Unreachable("offline".into()))
        };

        self.calls.lock().unwrap().push(SubmitCall {
            api_token: credentials.api_token().to_string(),
            instrument: instance.instrument.clone(),
            sequence_number,
            instance_id: instance.identifier,
            fields: instance.fields.clone(),
            succeeded: result.is_ok(),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// =============================================================================
// Token Exchange
// =============================================================================

pub(crate) struct StubExchange {
    redeem: Mutex<ClientResult<Credentials>>,
    refresh: Mutex<VecDeque<ClientResult<Credentials>>>,
    mark_redeemed: Mutex<ClientResult<()>>,
    refresh_calls: Mutex<Vec<String>>,
    redeem_calls: AtomicUsize,
    mark_calls: AtomicUsize,
    held: AtomicBool,
    release: Notify,
}

impl Default for StubExchange {
    fn default() -> Self {
        Self {
            redeem: Mutex::new(Ok(joined_credentials())),
            refresh: Mutex::new(VecDeque::new()),
            mark_redeemed: Mutex::new(Ok(())),
            refresh_calls: Mutex::new(Vec::new()),
            redeem_calls: AtomicUsize::new(0),
            mark_calls: AtomicUsize::new(0),
            held: AtomicBool::new(false),
            release: Notify::new(),
        }
    }
}

impl StubExchange {
    /// Refresh answers in order; once used up, refresh succeeds.
    pub fn with_refresh(self, results: impl IntoIterator<Item = ClientResult<Credentials>>) -> Self {
        *self.refresh.lock().unwrap() = results.into_iter().collect();
        self
    }

    pub fn with_redeem(self, result: ClientResult<Credentials>) -> Self {
        *self.redeem.lock().unwrap() = result;
        self
    }

    pub fn with_mark_redeemed(self, result: ClientResult<()>) -> Self {
        *self.mark_redeemed.lock().unwrap() = result;
        self
    }

    /// Refreshes block until [`release`](Self::release).
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub fn refresh_calls(&self) -> Vec<String> {
        self.refresh_calls.lock().unwrap().clone()
    }

    pub fn redeem_calls(&self) -> usize {
        self.redeem_calls.load(Ordering::SeqCst)
    }

    pub fn mark_calls(&self) -> usize {
        self.mark_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenExchange for StubExchange {
    async fn redeem(&self, _token: &str) -> ClientResult<Credentials> {
        self.redeem_calls.fetch_add(1, Ordering::SeqCst);
        self.redeem.lock().unwrap().clone()
    }

    async fn refresh(&self, refresh_token: &str) -> ClientResult<Credentials> {
        self.refresh_calls
            .lock()
            .unwrap()
            .push(refresh_token.to_string());

        let released = self.release.notified();
        if self.held.load(Ordering::SeqCst) {
            released.await;
        }

        self.refresh
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(refreshed_credentials()))
    }

    async fn mark_redeemed(&self, _token: &str) -> ClientResult<()> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        self.mark_redeemed.lock().unwrap().clone()
    }
}

// =============================================================================
// Delegate
// =============================================================================

pub(crate) struct RecordingDelegate {
    sign_out: bool,
    invalid_token_calls: AtomicUsize,
    uploaded: Mutex<Vec<Uuid>>,
}

impl Default for RecordingDelegate {
    fn default() -> Self {
        Self {
            sign_out: true,
            invalid_token_calls: AtomicUsize::new(0),
            uploaded: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingDelegate {
    pub fn keeping_credentials() -> Self {
        Self {
            sign_out: false,
            ..Self::default()
        }
    }

    pub fn invalid_token_calls(&self) -> usize {
        self.invalid_token_calls.load(Ordering::SeqCst)
    }

    pub fn uploaded(&self) -> Vec<Uuid> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl CoordinatorDelegate for RecordingDelegate {
    async fn on_invalid_token(&self) -> bool {
        self.invalid_token_calls.fetch_add(1, Ordering::SeqCst);
        self.sign_out
    }

    async fn on_uploaded(&self, instance_id: Uuid) {
        self.uploaded.lock().unwrap().push(instance_id);
    }
}

// =============================================================================
// Harness
// =============================================================================

pub(crate) struct Setup {
    pub api: StubRecordApi,
    pub exchange: StubExchange,
    pub delegate: RecordingDelegate,
    pub store: Arc<MemorySecureStore>,
    pub queue: Arc<MemoryRecordQueue>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            api: StubRecordApi::default(),
            exchange: StubExchange::default(),
            delegate: RecordingDelegate::default(),
            store: Arc::new(MemorySecureStore::new()),
            queue: Arc::new(MemoryRecordQueue::new()),
        }
    }
}

pub(crate) struct Harness {
    pub handle: CoordinatorHandle,
    pub api: Arc<StubRecordApi>,
    pub exchange: Arc<StubExchange>,
    pub delegate: Arc<RecordingDelegate>,
    pub store: Arc<MemorySecureStore>,
    pub queue: Arc<MemoryRecordQueue>,
    pub allocator: AllocatorHandle,
    pub connectivity: ConnectivityMonitor,
    dir: TempDir,
}

impl Harness {
    pub async fn start(setup: Setup) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let allocator = IdentifierAllocator::spawn(IdentifierMapFile::new(
            dir.path().join("identifiers.json"),
        ))
        .await
        .unwrap();

        let api = Arc::new(setup.api);
        let exchange = Arc::new(setup.exchange);
        let delegate = Arc::new(setup.delegate);
        let connectivity = ConnectivityMonitor::new(true);

        let handle = CoordinatorBuilder::new(
            api.clone(),
            setup.queue.clone(),
            allocator.clone(),
            setup.store.clone(),
        )
        .with_exchange(exchange.clone())
        .with_connectivity(connectivity.clone())
        .with_delegate(delegate.clone())
        .spawn();

        Self {
            handle,
            api,
            exchange,
            delegate,
            store: setup.store,
            queue: setup.queue,
            allocator,
            connectivity,
            dir,
        }
    }

    pub async fn sign_in(&self) {
        self.handle.post_join(joined_credentials()).await.unwrap();
    }

    pub fn map_path(&self) -> PathBuf {
        self.dir.path().join("identifiers.json")
    }

    /// Waits (bounded) for a status matching `predicate`.
    pub async fn settle(
        &self,
        predicate: impl FnMut(&CoordinatorStatus) -> bool,
    ) -> CoordinatorStatus {
        tokio::time::timeout(Duration::from_secs(5), self.handle.wait_for(predicate))
            .await
            .expect("coordinator did not settle")
            .unwrap()
    }
}
