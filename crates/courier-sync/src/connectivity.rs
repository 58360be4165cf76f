//! # Connectivity Monitor
//!
//! The host reports network reachability here; the coordinator watches it
//! and re-enters the upload loop on every offline → online edge.
//!
//! ```text
//! host: report(true/false) ──► watch<bool> ──► observer task ──► Trigger
//!                                                  ▲
//!                      started on sign-in, aborted on sign-out
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Shared reachability flag. Cheap to clone.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_reachable: bool) -> Self {
        let (tx, _) = watch::channel(initially_reachable);
        Self { tx: Arc::new(tx) }
    }

    /// Records the current reachability. Repeated reports of the same value
    /// are ignored.
    pub fn report(&self, reachable: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            debug!(reachable, "Connectivity changed");
        }
    }

    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    /// Spawns a task that sends `event` through `target` each time the
    /// network becomes reachable. Stops when the receiver side is gone.
    pub(crate) fn observe<T>(&self, target: mpsc::WeakSender<T>, event: impl Fn() -> T + Send + 'static) -> JoinHandle<()>
    where
        T: Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                if !*rx.borrow_and_update() {
                    continue;
                }
                let Some(target) = target.upgrade() else {
                    break;
                };
                if target.send(event()).await.is_err() {
                    break;
                }
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_observer_fires_on_reconnect_only() {
        let monitor = ConnectivityMonitor::new(false);
        let (tx, mut rx) = mpsc::channel::<&'static str>(8);
        let observer = monitor.observe(tx.downgrade(), || "online");

        monitor.report(false);
        monitor.report(true);
        assert_eq!(rx.recv().await, Some("online"));

        monitor.report(true);
        monitor.report(false);
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err());

        observer.abort();
        monitor.report(true);
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err());
        assert!(monitor.is_reachable());
    }
}
