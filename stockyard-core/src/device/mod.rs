//! Command channel and progress rendezvous with the embedded controller.
//!
//! Commands are fire-and-forget: an acknowledgement only means the
//! controller received the text. Progress is observed exclusively through
//! telemetry, so every wait compares the current operation tag against a
//! baseline captured before the command went out. A tag left over from a
//! previous command can therefore never satisfy a new wait.

mod http;
mod sim;

pub use http::HttpDeviceTransport;
pub use sim::{SimulatedDevice, SimulatedDeviceBuilder};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stockyard_model::TelemetrySnapshot;
use tokio::time::Instant;

use crate::config::DeviceTimings;
use crate::error::{EngineError, Result};
use crate::telemetry::TelemetryStore;

/// Delivers a text command to the controller and returns its acknowledgement.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send(&self, command: &str) -> Result<String>;
}

/// Operation tag and time captured just before issuing a command.
#[derive(Clone, Debug)]
pub struct Baseline {
    pub tag: String,
    pub at: DateTime<Utc>,
    /// Arrival time of the snapshot the tag came from.
    pub snapshot_at: Option<DateTime<Utc>>,
    /// Arrival counter of that snapshot.
    pub sequence: u64,
    /// Tag-change counter of that snapshot.
    pub operation_changes: u64,
}

pub struct DeviceLink {
    transport: Arc<dyn DeviceTransport>,
    telemetry: Arc<TelemetryStore>,
    timings: DeviceTimings,
}

impl fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLink")
            .field(
                "transport_type",
                &std::any::type_name_of_val(self.transport.as_ref()),
            )
            .field("timings", &self.timings)
            .finish()
    }
}

impl DeviceLink {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        telemetry: Arc<TelemetryStore>,
        timings: DeviceTimings,
    ) -> Self {
        Self {
            transport,
            telemetry,
            timings,
        }
    }

    pub fn timings(&self) -> &DeviceTimings {
        &self.timings
    }

    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    pub fn baseline(&self) -> Baseline {
        let snapshot = self.telemetry.snapshot();
        Baseline {
            tag: snapshot.operation.clone(),
            at: Utc::now(),
            snapshot_at: snapshot.received_at,
            sequence: snapshot.sequence,
            operation_changes: snapshot.operation_changes,
        }
    }

    /// Send a command. The controller gives no delivery guarantee beyond the
    /// acknowledgement, and nothing is retried.
    pub async fn issue(&self, command: &str) -> Result<String> {
        tracing::debug!(command, "issuing device command");
        match tokio::time::timeout(self.timings.command_timeout(), self.transport.send(command))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::DeviceUnreachable(format!(
                "no acknowledgement for `{command}` within {} ms",
                self.timings.command_timeout_ms
            ))),
        }
    }

    /// Send a command whose failure must not fail the caller.
    pub async fn issue_best_effort(&self, command: &str) {
        if let Err(err) = self.issue(command).await {
            tracing::warn!(command, error = %err, "best-effort device command failed");
        }
    }

    /// Wait until a report newer than the baseline carries an operation tag
    /// containing `marker`, and the tag has changed at least once since the
    /// baseline. A marker equal to the baseline tag is accepted once the tag
    /// has moved away and come back.
    pub async fn wait_for_fresh_event(
        &self,
        marker: &str,
        baseline: &Baseline,
        timeout: Duration,
    ) -> Result<String> {
        let snapshot = self
            .wait_for_fresh_any(&[marker], baseline, timeout)
            .await?;
        Ok(snapshot.operation.clone())
    }

    /// Like [`Self::wait_for_fresh_event`] but accepts any of `markers` and
    /// returns the matching snapshot.
    pub async fn wait_for_fresh_any(
        &self,
        markers: &[&str],
        baseline: &Baseline,
        timeout: Duration,
    ) -> Result<Arc<TelemetrySnapshot>> {
        let tolerance = self.timings.freshness_tolerance();
        let result = self
            .wait_until(timeout, |snapshot| {
                is_fresh(snapshot, markers, baseline, tolerance)
            })
            .await;
        result.ok_or_else(|| EngineError::EventTimeout {
            marker: markers.join("|"),
            timeout_ms: millis(timeout),
        })
    }

    /// Wait until the arm reports a ready or idle status.
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<()> {
        self.wait_until(timeout, |snapshot| snapshot.arm_ready())
            .await
            .map(|_| ())
            .ok_or(EngineError::ReadyTimeout {
                timeout_ms: millis(timeout),
            })
    }

    /// Wait for a report that arrived after `baseline` and shows the arm
    /// ready. A ready status left over from before the command is ignored.
    pub async fn wait_for_fresh_ready(&self, baseline: &Baseline, timeout: Duration) -> Result<()> {
        self.wait_until(timeout, |snapshot| {
            snapshot.arm_ready() && snapshot.sequence > baseline.sequence
        })
        .await
        .map(|_| ())
        .ok_or(EngineError::ReadyTimeout {
            timeout_ms: millis(timeout),
        })
    }

    /// Capture a baseline, issue `command`, then wait for a fresh `marker`.
    pub async fn issue_and_wait_fresh(
        &self,
        command: &str,
        marker: &str,
        timeout: Duration,
    ) -> Result<String> {
        let baseline = self.baseline();
        self.issue(command).await?;
        self.wait_for_fresh_event(marker, &baseline, timeout).await
    }

    async fn wait_until<F>(&self, timeout: Duration, mut accept: F) -> Option<Arc<TelemetrySnapshot>>
    where
        F: FnMut(&TelemetrySnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut rx = self.telemetry.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if accept(&current) {
                return Some(current);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = tokio::time::sleep(self.timings.poll_interval()) => {}
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }
}

fn is_fresh(
    snapshot: &TelemetrySnapshot,
    markers: &[&str],
    baseline: &Baseline,
    tolerance: chrono::Duration,
) -> bool {
    let op = snapshot.operation.as_str();
    snapshot.sequence > baseline.sequence
        && snapshot.operation_changes > baseline.operation_changes
        && !op.is_empty()
        && markers.iter().any(|marker| op.contains(marker))
        && snapshot
            .received_at
            .is_some_and(|at| at >= baseline.at - tolerance)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockyard_model::{GridDims, TelemetryReport};
    use tokio::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeviceTransport for RecordingTransport {
        async fn send(&self, command: &str) -> Result<String> {
            self.sent.lock().await.push(command.to_string());
            Ok("OK".into())
        }
    }

    fn report(op: &str, arm: &str) -> TelemetryReport {
        TelemetryReport {
            current_operation: Some(op.into()),
            arm_status: Some(arm.into()),
            ..TelemetryReport::default()
        }
    }

    fn link() -> (DeviceLink, Arc<TelemetryStore>, Arc<RecordingTransport>) {
        let store = Arc::new(TelemetryStore::new(GridDims::default()));
        let transport = Arc::new(RecordingTransport::default());
        let link = DeviceLink::new(transport.clone(), store.clone(), DeviceTimings::default());
        (link, store, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn stale_marker_does_not_satisfy_wait() {
        let (link, store, _) = link();
        store.ingest(report("PICK_FROM_CELL_DONE", "READY"));

        let baseline = link.baseline();
        let err = link
            .wait_for_fresh_event("PICK_FROM_CELL_DONE", &baseline, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EventTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn new_report_with_marker_completes_wait() {
        let (link, store, _) = link();
        store.ingest(report("PLACE_COMPLETE", "READY"));
        let baseline = link.baseline();

        let feeder = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            feeder.ingest(report("TAKE_STARTED", "BUSY"));
            tokio::time::sleep(Duration::from_millis(300)).await;
            feeder.ingest(report("PICK_FROM_CELL_DONE", "READY"));
        });

        let op = link
            .wait_for_fresh_event("PICK_FROM_CELL_DONE", &baseline, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(op, "PICK_FROM_CELL_DONE");
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_marker_completes_after_tag_moves_away() {
        let (link, store, _) = link();
        store.ingest(report("MOVE_TO_LOADING_COMPLETE", "READY"));
        let baseline = link.baseline();

        let feeder = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            feeder.ingest(report("MOVE_TO_LOADING_COMPLETE", "READY"));
            tokio::time::sleep(Duration::from_millis(200)).await;
            feeder.ingest(report("MOVING_TO_LOADING", "BUSY"));
            tokio::time::sleep(Duration::from_millis(200)).await;
            feeder.ingest(report("MOVE_TO_LOADING_COMPLETE", "READY"));
        });

        let op = link
            .wait_for_fresh_event("MOVE_TO_LOADING_COMPLETE", &baseline, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(op, "MOVE_TO_LOADING_COMPLETE");
        assert_eq!(store.snapshot().sequence, baseline.sequence + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn tag_change_counts_even_when_the_busy_report_is_never_observed() {
        let (link, store, _) = link();
        store.ingest(report("LOAD_RETURN_COMPLETE", "READY"));
        let baseline = link.baseline();

        store.ingest(report("LOAD_RETURNING", "BUSY"));
        store.ingest(report("LOAD_RETURN_COMPLETE", "READY"));

        link.wait_for_fresh_event("LOAD_RETURN_COMPLETE", &baseline, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ready_wait_times_out_while_busy() {
        let (link, store, _) = link();
        store.ingest(report("MOVING", "BUSY"));
        let err = link.wait_for_ready(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, EngineError::ReadyTimeout { timeout_ms: 2_000 }));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_ready_ignores_ready_from_before_baseline() {
        let (link, store, _) = link();
        store.ingest(report("PLACE_COMPLETE", "READY"));
        let baseline = link.baseline();
        let err = link
            .wait_for_fresh_ready(&baseline, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ReadyTimeout { .. }));

        let baseline = link.baseline();
        let feeder = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            feeder.ingest(report("HOMING", "BUSY"));
            tokio::time::sleep(Duration::from_millis(100)).await;
            feeder.ingest(report("HOME_COMPLETE", "READY"));
        });
        link.wait_for_fresh_ready(&baseline, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(store.snapshot().operation, "HOME_COMPLETE");
    }

    #[tokio::test(start_paused = true)]
    async fn issue_and_wait_sends_before_waiting() {
        let (link, store, transport) = link();
        let feeder = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            feeder.ingest(report("HOME_COMPLETE", "READY"));
        });

        link.issue_and_wait_fresh("HOME", "HOME_COMPLETE", Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(transport.sent.lock().await.as_slice(), ["HOME".to_string()]);
    }
}
