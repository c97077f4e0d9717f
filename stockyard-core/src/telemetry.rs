use std::sync::Arc;

use chrono::Utc;
use stockyard_model::{GridDims, TelemetryReport, TelemetrySnapshot};
use tokio::sync::watch;

/// Holds the latest device snapshot and notifies waiters when it changes.
///
/// Each report replaces the snapshot wholesale; readers never observe a
/// half-applied update.
#[derive(Debug)]
pub struct TelemetryStore {
    dims: GridDims,
    sender: watch::Sender<Arc<TelemetrySnapshot>>,
}

impl TelemetryStore {
    pub fn new(dims: GridDims) -> Self {
        let (sender, _) = watch::channel(Arc::new(TelemetrySnapshot::initial(dims)));
        Self { dims, sender }
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn snapshot(&self) -> Arc<TelemetrySnapshot> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<TelemetrySnapshot>> {
        self.sender.subscribe()
    }

    /// Normalise a raw report, stamp it with the arrival time and publish it.
    pub fn ingest(&self, report: TelemetryReport) -> Arc<TelemetrySnapshot> {
        self.replace(report.into_snapshot(self.dims, Utc::now()))
    }

    /// Publish a snapshot as the next arrival. Every arrival is counted
    /// here, including ones a waiter never gets to observe.
    pub fn replace(&self, snapshot: TelemetrySnapshot) -> Arc<TelemetrySnapshot> {
        let mut next = Arc::new(snapshot);
        self.sender.send_modify(|current| {
            let stamped = Arc::make_mut(&mut next);
            stamped.sequence = current.sequence.saturating_add(1);
            stamped.operation_changes = if stamped.operation == current.operation {
                current.operation_changes
            } else {
                current.operation_changes.saturating_add(1)
            };
            *current = Arc::clone(&next);
        });
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ingest_notifies_subscribers() {
        let store = TelemetryStore::new(GridDims::default());
        let mut rx = store.subscribe();
        assert!(store.snapshot().received_at.is_none());

        store.ingest(TelemetryReport {
            current_operation: Some("HOME_COMPLETE".into()),
            ..TelemetryReport::default()
        });

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().operation, "HOME_COMPLETE");
        assert!(store.snapshot().received_at.is_some());
    }

    #[test]
    fn every_arrival_advances_the_sequence() {
        let store = TelemetryStore::new(GridDims::default());
        assert_eq!(store.snapshot().sequence, 0);
        let first = store.ingest(TelemetryReport::default());
        let second = store.ingest(TelemetryReport::default());
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(store.snapshot().sequence, 2);
    }

    #[test]
    fn operation_changes_count_tag_transitions() {
        let store = TelemetryStore::new(GridDims::default());
        let op = |tag: &str| TelemetryReport {
            current_operation: Some(tag.into()),
            ..TelemetryReport::default()
        };
        assert_eq!(store.ingest(op("X_DONE")).operation_changes, 1);
        assert_eq!(store.ingest(op("X_DONE")).operation_changes, 1);
        assert_eq!(store.ingest(op("BUSY")).operation_changes, 2);
        assert_eq!(store.ingest(op("X_DONE")).operation_changes, 3);
    }
}
