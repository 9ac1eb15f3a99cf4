//! Reconciliation loop.
//!
//! Every poll interval the loop snapshots the registry, scans the origin
//! store once, and walks each pending operation through its state machine:
//!
//! ```text
//! Pending --exact key found------------------------------> Resolved
//! Pending --elapsed >= fallback_at, fallback not yet run--> broadened search
//!         --broadened search found exactly one candidate--> Resolved
//! Pending --elapsed >= timeout----------------------------> Error
//! ```
//!
//! Failures never leave this module as errors. They end up as sentinel values
//! in the destination, entries in the [`TickReport`], and log lines.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Timing;
use crate::destination::WriteOutcome;
use crate::origin::{OriginHit, OriginReader, OriginSnapshot};
use crate::registry::PendingRegistry;
use crate::sink::ResultSink;
use crate::types::{
    Destination, FailureReason, OperationState, OriginKey, PendingOperation, ERROR_SENTINEL,
};

/// An operation that found its code this tick.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedOperation {
    pub key: OriginKey,
    pub destination: Destination,
    /// Shard the code was found in.
    pub shard: String,
    /// Device name the origin store filed the code under.
    pub origin_device: String,
    pub via_fallback: bool,
    pub cleaned_up: bool,
    pub state: OperationState,
}

/// An operation that ended in the error state this tick.
#[derive(Debug, Clone, Serialize)]
pub struct FailedOperation {
    pub key: OriginKey,
    pub destination: Destination,
    #[serde(flatten)]
    pub reason: FailureReason,
    pub state: OperationState,
}

/// Report from a single reconciliation tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Shards read by this tick's scan. Zero when nothing was pending.
    pub shards_scanned: usize,
    pub resolved: Vec<ResolvedOperation>,
    pub failed: Vec<FailedOperation>,
    /// Broadened searches run this tick.
    pub fallback_runs: usize,
    /// Operations whose destination had been deleted.
    pub discarded: Vec<OriginKey>,
    /// Destination writes that errored and will be retried.
    pub write_errors: usize,
    /// Operations still pending after the tick.
    pub still_pending: usize,
}

impl TickReport {
    /// Whether anything changed state this tick.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.resolved.is_empty()
            && self.failed.is_empty()
            && self.discarded.is_empty()
            && self.fallback_runs == 0
            && self.write_errors == 0
    }
}

enum Step {
    Resolve { hit: OriginHit, via_fallback: bool },
    Fail(FailureReason),
    Wait,
}

/// Background reconciler over a registry, origin reader and result sink.
#[derive(Clone)]
pub struct Reconciler {
    registry: PendingRegistry,
    reader: OriginReader,
    sink: Arc<dyn ResultSink>,
    timing: Timing,
}

impl Reconciler {
    pub fn new(
        registry: PendingRegistry,
        reader: OriginReader,
        sink: Arc<dyn ResultSink>,
        timing: Timing,
    ) -> Self {
        Self {
            registry,
            reader,
            sink,
            timing,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    /// Run ticks until `shutdown` completes.
    ///
    /// Ticks never overlap; a slow tick delays the next one. Operations still
    /// pending at shutdown are dropped without writing a sentinel.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            poll_interval_secs = self.timing.poll_interval.as_secs_f64(),
            fallback_at_secs = self.timing.fallback_at.as_secs(),
            timeout_secs = self.timing.timeout.as_secs(),
            "Reconciliation loop started"
        );

        loop {
            let report = self.tick().await;
            if !report.is_quiet() {
                info!(
                    resolved = report.resolved.len(),
                    failed = report.failed.len(),
                    discarded = report.discarded.len(),
                    fallback_runs = report.fallback_runs,
                    still_pending = report.still_pending,
                    "Reconciliation tick complete"
                );
            }

            tokio::select! {
                () = &mut shutdown => break,
                () = sleep(self.timing.poll_interval) => {}
            }
        }

        let dropped = self.registry.len();
        if dropped > 0 {
            warn!(dropped, "Reconciliation loop stopped with operations still pending");
        } else {
            info!("Reconciliation loop stopped");
        }
    }

    /// Run a single reconciliation pass.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let ops = self.registry.snapshot();
        if ops.is_empty() {
            return report;
        }

        let snapshot = self.reader.scan().await;
        report.shards_scanned = snapshot.shard_count();
        debug!(
            pending = ops.len(),
            shards = snapshot.shard_count(),
            commands = snapshot.command_count(),
            "Origin scan complete"
        );

        let now = Instant::now();
        for mut op in ops {
            // Replaced by a newer submission since the snapshot was taken.
            if !self.registry.is_current(&op.origin_key, op.id) {
                continue;
            }

            match self.evaluate(&mut op, &snapshot, now, &mut report) {
                Step::Resolve { hit, via_fallback } => {
                    self.complete(op, hit, via_fallback, now, &mut report).await;
                }
                Step::Fail(reason) => self.fail(op, reason, &mut report).await,
                Step::Wait => {}
            }
        }

        report.still_pending = self.registry.len();
        report
    }

    fn evaluate(
        &self,
        op: &mut PendingOperation,
        snapshot: &OriginSnapshot,
        now: Instant,
        report: &mut TickReport,
    ) -> Step {
        let shard = op.shard.as_deref();

        if let Some(hit) = snapshot.find_exact(&op.origin_key, shard) {
            return Step::Resolve {
                hit,
                via_fallback: false,
            };
        }

        let elapsed = op.elapsed(now);

        if elapsed >= self.timing.fallback_at && !op.fallback_attempted {
            let mut hits = snapshot.find_by_command(&op.origin_key.command_name, shard);
            op.fallback_attempted = true;
            op.fallback_candidates = Some(hits.len());
            report.fallback_runs += 1;

            if hits.len() == 1 {
                // Not recorded in the registry: if the write fails the search
                // runs again next tick.
                let hit = hits.remove(0);
                info!(
                    key = %op.origin_key,
                    origin_device = %hit.device_name,
                    shard = %hit.shard,
                    "Fallback search matched a differently named device"
                );
                return Step::Resolve {
                    hit,
                    via_fallback: true,
                };
            }

            self.registry
                .mark_fallback_attempted(&op.origin_key, op.id, hits.len());
            if hits.is_empty() {
                debug!(key = %op.origin_key, "Fallback search found no candidates");
            } else {
                warn!(
                    key = %op.origin_key,
                    candidates = hits.len(),
                    "Fallback search is ambiguous, not resolving"
                );
            }
        }

        if elapsed >= self.timing.timeout {
            let reason = match op.fallback_candidates {
                Some(n) if n > 1 => FailureReason::AmbiguousMatch { candidates: n },
                _ => FailureReason::NotFoundTimeout,
            };
            return Step::Fail(reason);
        }

        Step::Wait
    }

    async fn complete(
        &self,
        mut op: PendingOperation,
        hit: OriginHit,
        via_fallback: bool,
        now: Instant,
        report: &mut TickReport,
    ) {
        let key = op.origin_key.clone();

        let outcome = self
            .sink
            .write(&op.destination, &key.command_name, &hit.value, op.kind)
            .await;

        match outcome {
            Ok(WriteOutcome::Written) => {
                let cleaned_up = self.cleanup(&op, &hit).await;
                op.finish(OperationState::Resolved);
                info!(
                    key = %key,
                    destination = %op.destination,
                    shard = %hit.shard,
                    via_fallback,
                    cleaned_up,
                    "Learned code stored"
                );
                report.resolved.push(ResolvedOperation {
                    key: key.clone(),
                    destination: op.destination.clone(),
                    shard: hit.shard,
                    origin_device: hit.device_name,
                    via_fallback,
                    cleaned_up,
                    state: op.state,
                });
            }
            Ok(WriteOutcome::DestinationGone) => {
                op.finish(OperationState::Resolved);
                warn!(
                    key = %key,
                    destination = %op.destination,
                    "Destination was deleted while learning, discarding code"
                );
                report.discarded.push(key.clone());
            }
            Err(e) => {
                report.write_errors += 1;
                if op.elapsed(now) < self.timing.timeout {
                    warn!(key = %key, error = %e, "Destination write failed, retrying next tick");
                } else {
                    error!(key = %key, error = %e, "Destination write failed past timeout, giving up");
                    self.fail(op, FailureReason::WriteFailed, report).await;
                }
                return;
            }
        }

        self.registry.remove(&key, op.id);
    }

    /// Delete the origin copy if requested. Failures are logged only.
    async fn cleanup(&self, op: &PendingOperation, hit: &OriginHit) -> bool {
        let Some(target) = &op.cleanup_target else {
            return false;
        };
        let shard = target.shard.as_deref().unwrap_or(&hit.shard);

        match self
            .sink
            .delete_origin(shard, &hit.device_name, &op.origin_key.command_name)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                debug!(key = %op.origin_key, shard = %shard, "Origin copy already gone");
                false
            }
            Err(e) => {
                warn!(key = %op.origin_key, shard = %shard, error = %e, "Origin cleanup failed");
                false
            }
        }
    }

    async fn fail(&self, mut op: PendingOperation, reason: FailureReason, report: &mut TickReport) {
        let key = op.origin_key.clone();

        match self
            .sink
            .write(&op.destination, &key.command_name, ERROR_SENTINEL, op.kind)
            .await
        {
            Ok(WriteOutcome::Written) => {
                info!(key = %key, destination = %op.destination, %reason, "Learning failed");
            }
            Ok(WriteOutcome::DestinationGone) => {
                warn!(key = %key, %reason, "Learning failed and destination was deleted");
                report.discarded.push(key.clone());
            }
            Err(e) => {
                error!(key = %key, %reason, error = %e, "Failed to write error sentinel");
                report.write_errors += 1;
            }
        }

        op.finish(OperationState::Error);
        report.failed.push(FailedOperation {
            key: key.clone(),
            destination: op.destination.clone(),
            reason,
            state: op.state,
        });
        self.registry.remove(&key, op.id);
    }
}
