//! Background projection of queued events.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::application::error::ErrorReport;
use crate::application::projector::ForumProjector;
use crate::application::queue::EventQueue;
use crate::cache::ApplyOutcome;

/// Tally of one consumption pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumeReport {
    pub applied: usize,
    pub stale: usize,
    pub uncached: usize,
    pub failed: usize,
}

impl ConsumeReport {
    pub fn total(&self) -> usize {
        self.applied + self.stale + self.uncached + self.failed
    }

    pub fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::SkippedStale { .. } => self.stale += 1,
            ApplyOutcome::SkippedUncached => self.uncached += 1,
        }
    }

    pub fn merge(&mut self, other: ConsumeReport) {
        self.applied += other.applied;
        self.stale += other.stale;
        self.uncached += other.uncached;
        self.failed += other.failed;
    }
}

/// Drains the queue and projects each event.
///
/// Failed events are logged and dropped; at-least-once delivery upstream
/// brings them back.
pub struct EventConsumer {
    projector: ForumProjector,
    queue: Arc<EventQueue>,
    batch_limit: usize,
}

impl EventConsumer {
    pub fn new(projector: ForumProjector, queue: Arc<EventQueue>, batch_limit: usize) -> Self {
        Self {
            projector,
            queue,
            batch_limit: batch_limit.max(1),
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Project up to one batch of pending events.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> ConsumeReport {
        let events = self.queue.drain(self.batch_limit);
        let mut report = ConsumeReport::default();
        if events.is_empty() {
            return report;
        }

        for event in &events {
            match self.projector.apply(event).await {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    report.failed += 1;
                    let details = ErrorReport::from_error("application::consumer", &err);
                    warn!(
                        event_id = %event.event_id,
                        retryable = err.is_retryable(),
                        error = %details.joined(),
                        "Dropping event after projection failure"
                    );
                }
            }
        }

        info!(
            events = events.len(),
            applied = report.applied,
            stale = report.stale,
            uncached = report.uncached,
            failed = report.failed,
            "Event batch consumed"
        );
        report
    }

    /// Consume until the queue is empty.
    pub async fn consume_all(&self) -> ConsumeReport {
        let mut report = ConsumeReport::default();
        loop {
            let batch = self.consume().await;
            if batch.total() == 0 {
                return report;
            }
            report.merge(batch);
        }
    }

    /// Consume on a fixed cadence until `shutdown` resolves, then flush.
    pub async fn run<F>(&self, interval: Duration, shutdown: F) -> ConsumeReport
    where
        F: Future<Output = ()>,
    {
        let mut report = ConsumeReport::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => report.merge(self.consume().await),
            }
        }

        report.merge(self.consume_all().await);
        info!(
            applied = report.applied,
            failed = report.failed,
            "Event consumer stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tallies_outcomes() {
        let mut report = ConsumeReport::default();
        report.record(ApplyOutcome::Applied);
        report.record(ApplyOutcome::SkippedStale {
            last_applied_ts: 5,
        });
        report.record(ApplyOutcome::SkippedUncached);
        report.failed += 1;

        assert_eq!(report.total(), 4);
        let mut sum = ConsumeReport::default();
        sum.merge(report);
        sum.merge(report);
        assert_eq!(sum.applied, 2);
        assert_eq!(sum.failed, 2);
    }
}
