//! # Record Queue
//!
//! The durable queue the coordinator drains, behind the [`RecordQueue`]
//! seam so hosts can plug in their own encrypted storage.
//!
//! ```text
//! ┌──────────────────────────── SqliteRecordQueue ───────────────────────────┐
//! │                                                                          │
//! │   add ──► RecordQueueRepository::push ──► mirror.push_back               │
//! │                                                                          │
//! │   first            ──► SELECT ... LIMIT 1   (durable path, may fail)     │
//! │   first_in_memory  ──► mirror.front()       (fallback, never touches db) │
//! │                                                                          │
//! │   update ──► mirror first, then repository                               │
//! │   remove / clear ──► repository first, then mirror                       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The mirror is loaded from the table at open time, so it also covers
//! records left over from a previous run.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use courier_core::InstrumentInstance;
use courier_db::{QueuedRecord, RecordQueueRepository};

use crate::error::SyncResult;

// =============================================================================
// Queue Element
// =============================================================================

/// Handle to one queued instance.
///
/// The key belongs to the queue; the coordinator only reads the instance
/// and hands the element back for `update` or `remove`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueElement {
    key: String,
    instance: InstrumentInstance,
}

impl QueueElement {
    pub fn new(key: impl Into<String>, instance: InstrumentInstance) -> Self {
        Self {
            key: key.into(),
            instance,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn instance(&self) -> &InstrumentInstance {
        &self.instance
    }

    pub(crate) fn instance_mut(&mut self) -> &mut InstrumentInstance {
        &mut self.instance
    }
}

impl From<QueuedRecord> for QueueElement {
    fn from(record: QueuedRecord) -> Self {
        QueueElement::new(record.key, record.instance)
    }
}

// =============================================================================
// Trait
// =============================================================================

/// Durable FIFO of instances awaiting upload.
#[async_trait]
pub trait RecordQueue: Send + Sync {
    async fn is_empty(&self) -> bool;

    async fn len(&self) -> usize;

    /// Oldest element, read from durable storage.
    async fn first(&self) -> SyncResult<Option<QueueElement>>;

    /// Oldest element from the in-memory view, used when durable storage
    /// is unavailable.
    async fn first_in_memory(&self) -> Option<QueueElement>;

    async fn add(&self, instance: InstrumentInstance) -> SyncResult<QueueElement>;

    /// Persists the element's current instance (its sequence number).
    async fn update(&self, element: &QueueElement) -> SyncResult<()>;

    /// Returns false if the element was already gone.
    async fn remove(&self, element: &QueueElement) -> SyncResult<bool>;

    async fn clear(&self) -> SyncResult<()>;
}

// =============================================================================
// SQLite Queue
// =============================================================================

/// [`RecordQueue`] backed by the SQLite record table.
pub struct SqliteRecordQueue {
    repo: RecordQueueRepository,
    mirror: Mutex<VecDeque<QueueElement>>,
}

impl SqliteRecordQueue {
    /// Opens the queue and loads the in-memory mirror.
    pub async fn open(repo: RecordQueueRepository) -> SyncResult<Self> {
        let mirror: VecDeque<QueueElement> = repo
            .all()
            .await?
            .into_iter()
            .map(QueueElement::from)
            .collect();

        info!(pending = mirror.len(), "Record queue opened");

        Ok(Self {
            repo,
            mirror: Mutex::new(mirror),
        })
    }
}

#[async_trait]
impl RecordQueue for SqliteRecordQueue {
    async fn is_empty(&self) -> bool {
        self.mirror.lock().await.is_empty()
    }

    async fn len(&self) -> usize {
        self.mirror.lock().await.len()
    }

    async fn first(&self) -> SyncResult<Option<QueueElement>> {
        Ok(self.repo.first().await?.map(QueueElement::from))
    }

    async fn first_in_memory(&self) -> Option<QueueElement> {
        self.mirror.lock().await.front().cloned()
    }

    async fn add(&self, instance: InstrumentInstance) -> SyncResult<QueueElement> {
        let mut mirror = self.mirror.lock().await;
        let element = QueueElement::from(self.repo.push(&instance).await?);
        mirror.push_back(element.clone());
        Ok(element)
    }

    /// The mirror takes the instance first, so a number assigned while the
    /// table is unwritable still reaches the in-memory view.
    async fn update(&self, element: &QueueElement) -> SyncResult<()> {
        let mut mirror = self.mirror.lock().await;
        if let Some(slot) = mirror.iter_mut().find(|e| e.key == element.key) {
            slot.instance = element.instance.clone();
        }
        self.repo
            .update_instance(element.key(), element.instance())
            .await?;
        Ok(())
    }

    async fn remove(&self, element: &QueueElement) -> SyncResult<bool> {
        let mut mirror = self.mirror.lock().await;
        let removed = self.repo.remove(element.key()).await?;
        mirror.retain(|e| e.key != element.key);
        debug!(key = %element.key, removed, "Queue element removed");
        Ok(removed)
    }

    async fn clear(&self) -> SyncResult<()> {
        let mut mirror = self.mirror.lock().await;
        let cleared = self.repo.clear().await?;
        mirror.clear();
        info!(cleared, "Record queue cleared");
        Ok(())
    }
}

// =============================================================================
// In-Memory Queue
// =============================================================================

/// Non-durable [`RecordQueue`] for hosts that bring no storage and for tests.
#[derive(Default)]
pub struct MemoryRecordQueue {
    elements: Mutex<VecDeque<QueueElement>>,
    #[cfg(test)]
    storage_locked: std::sync::atomic::AtomicBool,
}

impl MemoryRecordQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes durable reads and updates fail, like protected storage that is
    /// locked while the device is.
    #[cfg(test)]
    pub(crate) fn set_storage_locked(&self, locked: bool) {
        self.storage_locked
            .store(locked, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn check_storage(&self) -> SyncResult<()> {
        if self.storage_locked.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::SyncError::Storage(
                "protected storage unavailable".into(),
            ));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_storage(&self) -> SyncResult<()> {
        Ok(())
    }
}

#[async_trait]
impl RecordQueue for MemoryRecordQueue {
    async fn is_empty(&self) -> bool {
        self.elements.lock().await.is_empty()
    }

    async fn len(&self) -> usize {
        self.elements.lock().await.len()
    }

    async fn first(&self) -> SyncResult<Option<QueueElement>> {
        self.check_storage()?;
        Ok(self.elements.lock().await.front().cloned())
    }

    async fn first_in_memory(&self) -> Option<QueueElement> {
        self.elements.lock().await.front().cloned()
    }

    async fn add(&self, instance: InstrumentInstance) -> SyncResult<QueueElement> {
        let element = QueueElement::new(uuid::Uuid::new_v4().to_string(), instance);
        self.elements.lock().await.push_back(element.clone());
        Ok(element)
    }

    async fn update(&self, element: &QueueElement) -> SyncResult<()> {
        self.check_storage()?;
        let mut elements = self.elements.lock().await;
        if let Some(slot) = elements.iter_mut().find(|e| e.key == element.key) {
            slot.instance = element.instance.clone();
        }
        Ok(())
    }

    async fn remove(&self, element: &QueueElement) -> SyncResult<bool> {
        let mut elements = self.elements.lock().await;
        let before = elements.len();
        elements.retain(|e| e.key != element.key);
        Ok(elements.len() < before)
    }

    async fn clear(&self) -> SyncResult<()> {
        self.elements.lock().await.clear();
        Ok(())
    }
}
