//! # Instance Identifier Allocator
//!
//! Hands out per-instrument sequence numbers. Runs as its own actor so that
//! allocations made while a record is being created never wait behind the
//! upload loop, and vice versa.
//!
//! ## Allocation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  AllocatorHandle::allocate_and_advance("survey")                        │
//! │       │  (mpsc, processed strictly one at a time)                       │
//! │       ▼                                                                 │
//! │  current = map["survey"] ?? 1                                          │
//! │  map'    = map + { "survey": current + 1 }                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  IdentifierMapFile::save(map')  ── write tmp, fsync, rename            │
//! │       │                                                                 │
//! │       ├── Ok  → map = map'; reply Ok(current)                          │
//! │       └── Err → map unchanged; reply Err (no number handed out)        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Persist-before-return means a crash at any point either loses nothing or
//! burns exactly one number. A number is never handed out twice.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use courier_core::{IdentifierMap, SequenceNumber, INITIAL_SEQUENCE_NUMBER};
use courier_db::IdentifierMapFile;

use crate::error::{SyncError, SyncResult};

const COMMAND_BUFFER: usize = 64;

// =============================================================================
// Commands
// =============================================================================

enum AllocatorCommand {
    AllocateAndAdvance {
        instrument: String,
        reply: oneshot::Sender<SyncResult<SequenceNumber>>,
    },
    Clear {
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<IdentifierMap>,
    },
    Shutdown,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to the allocator actor. Cheap to clone.
#[derive(Clone)]
pub struct AllocatorHandle {
    tx: mpsc::Sender<AllocatorCommand>,
}

impl AllocatorHandle {
    /// Returns the next sequence number for `instrument` and durably
    /// advances the counter.
    pub async fn allocate_and_advance(&self, instrument: &str) -> SyncResult<SequenceNumber> {
        let (reply, rx) = oneshot::channel();
        self.send(AllocatorCommand::AllocateAndAdvance {
            instrument: instrument.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| SyncError::ChannelError("Allocator dropped reply".into()))?
    }

    /// Resets every counter. Goes through the same durable write.
    pub async fn clear(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(AllocatorCommand::Clear { reply }).await?;
        rx.await
            .map_err(|_| SyncError::ChannelError("Allocator dropped reply".into()))?
    }

    /// Copy of the in-memory map.
    pub async fn snapshot(&self) -> SyncResult<IdentifierMap> {
        let (reply, rx) = oneshot::channel();
        self.send(AllocatorCommand::Snapshot { reply }).await?;
        rx.await
            .map_err(|_| SyncError::ChannelError("Allocator dropped reply".into()))
    }

    /// Next number `instrument` would receive, without consuming it.
    pub async fn peek(&self, instrument: &str) -> SyncResult<SequenceNumber> {
        Ok(self
            .snapshot()
            .await?
            .get(instrument)
            .copied()
            .unwrap_or(INITIAL_SEQUENCE_NUMBER))
    }

    /// Stops the actor after the commands already queued.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(AllocatorCommand::Shutdown).await
    }

    async fn send(&self, command: AllocatorCommand) -> SyncResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Allocator actor state.
pub struct IdentifierAllocator {
    file: IdentifierMapFile,
    map: IdentifierMap,
    rx: mpsc::Receiver<AllocatorCommand>,
}

impl IdentifierAllocator {
    /// Loads the map (resetting an unreadable file) and spawns the actor.
    pub async fn spawn(file: IdentifierMapFile) -> SyncResult<AllocatorHandle> {
        let map = file.load_or_reset().await?;
        info!(
            path = %file.path().display(),
            instruments = map.len(),
            "Identifier allocator starting"
        );

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = IdentifierAllocator { file, map, rx };
        tokio::spawn(actor.run());

        Ok(AllocatorHandle { tx })
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                AllocatorCommand::AllocateAndAdvance { instrument, reply } => {
                    let result = self.allocate_and_advance(&instrument).await;
                    let _ = reply.send(result);
                }
                AllocatorCommand::Clear { reply } => {
                    let result = self.clear().await;
                    let _ = reply.send(result);
                }
                AllocatorCommand::Snapshot { reply } => {
                    let _ = reply.send(self.map.clone());
                }
                AllocatorCommand::Shutdown => break,
            }
        }
        debug!("Identifier allocator stopped");
    }

    async fn allocate_and_advance(&mut self, instrument: &str) -> SyncResult<SequenceNumber> {
        let current = self
            .map
            .get(instrument)
            .copied()
            .unwrap_or(INITIAL_SEQUENCE_NUMBER);

        let mut next = self.map.clone();
        next.insert(instrument.to_string(), current + 1);

        if let Err(e) = self.file.save(&next).await {
            error!(instrument = %instrument, error = %e, "Failed to persist identifier map");
            return Err(SyncError::IdentifierAllocation(e.to_string()));
        }

        self.map = next;
        debug!(instrument = %instrument, sequence_number = current, "Sequence number allocated");
        Ok(current)
    }

    async fn clear(&mut self) -> SyncResult<()> {
        let empty = IdentifierMap::new();
        if let Err(e) = self.file.save(&empty).await {
            warn!(error = %e, "Failed to persist cleared identifier map");
            return Err(SyncError::IdentifierAllocation(e.to_string()));
        }
        self.map = empty;
        info!("Identifier map cleared");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::Path;

    async fn spawn_at(path: &Path) -> AllocatorHandle {
        IdentifierAllocator::spawn(IdentifierMapFile::new(path))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sequential_allocation_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = spawn_at(&dir.path().join("ids.json")).await;

        assert_eq!(alloc.allocate_and_advance("survey").await.unwrap(), 1);
        assert_eq!(alloc.allocate_and_advance("survey").await.unwrap(), 2);
        assert_eq!(alloc.allocate_and_advance("scan").await.unwrap(), 1);
        assert_eq!(alloc.allocate_and_advance("survey").await.unwrap(), 3);
        assert_eq!(alloc.peek("survey").await.unwrap(), 4);
        assert_eq!(alloc.peek("never").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_get_contiguous_values() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = spawn_at(&dir.path().join("ids.json")).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let alloc = alloc.clone();
            tasks.push(tokio::spawn(async move {
                let mut got = Vec::new();
                for _ in 0..10 {
                    got.push(alloc.allocate_and_advance("survey").await.unwrap());
                }
                got
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            let got = task.await.unwrap();
            // Each caller observes strictly increasing values.
            assert!(got.windows(2).all(|w| w[0] < w[1]));
            all.extend(got);
        }

        let unique: BTreeSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), 80);
        assert_eq!(unique, (1..=80).collect::<BTreeSet<_>>());
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");

        let alloc = spawn_at(&path).await;
        for expected in 1..=5 {
            assert_eq!(alloc.allocate_and_advance("survey").await.unwrap(), expected);
        }
        alloc.shutdown().await.unwrap();
        drop(alloc);

        let alloc = spawn_at(&path).await;
        assert_eq!(alloc.allocate_and_advance("survey").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_crash_after_persist_before_return_burns_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");

        let alloc = spawn_at(&path).await;
        assert_eq!(alloc.allocate_and_advance("survey").await.unwrap(), 1);
        alloc.shutdown().await.unwrap();

        // The process persisted {survey: 3} for an allocation of 2 and died
        // before the caller saw the value.
        let mut persisted = IdentifierMap::new();
        persisted.insert("survey".into(), 3);
        IdentifierMapFile::new(&path).save(&persisted).await.unwrap();

        let alloc = spawn_at(&path).await;
        assert_eq!(alloc.allocate_and_advance("survey").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_clear_resets_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        let alloc = spawn_at(&path).await;

        alloc.allocate_and_advance("survey").await.unwrap();
        alloc.allocate_and_advance("survey").await.unwrap();
        alloc.clear().await.unwrap();

        assert!(alloc.snapshot().await.unwrap().is_empty());
        assert!(IdentifierMapFile::new(&path).load().await.unwrap().is_empty());
        assert_eq!(alloc.allocate_and_advance("survey").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_hands_out_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        let alloc = spawn_at(&path).await;
        assert_eq!(alloc.allocate_and_advance("survey").await.unwrap(), 1);

        let blocker = path.with_extension("tmp");
        tokio::fs::create_dir(&blocker).await.unwrap();
        let err = alloc.allocate_and_advance("survey").await.unwrap_err();
        assert!(matches!(err, SyncError::IdentifierAllocation(_)));
        assert_eq!(alloc.peek("survey").await.unwrap(), 2);

        tokio::fs::remove_dir(&blocker).await.unwrap();
        assert_eq!(alloc.allocate_and_advance("survey").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = spawn_at(&dir.path().join("ids.json")).await;
        alloc.shutdown().await.unwrap();

        // Queued behind Shutdown, so it is never processed.
        assert!(alloc.allocate_and_advance("survey").await.is_err());
    }
}
