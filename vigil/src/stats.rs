//! Pipeline counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated from the frame source, analysis lane and
/// publisher.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_received: AtomicU64,
    frames_submitted: AtomicU64,
    frames_dropped_busy: AtomicU64,
    frames_rejected_inactive: AtomicU64,
    frames_skipped_unsubscribed: AtomicU64,
    detection_failures: AtomicU64,
    release_failures: AtomicU64,
    batches_published: AtomicU64,
    batches_discarded: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_submitted: u64,
    pub frames_dropped_busy: u64,
    pub frames_rejected_inactive: u64,
    pub frames_skipped_unsubscribed: u64,
    pub detection_failures: u64,
    pub release_failures: u64,
    pub batches_published: u64,
    pub batches_discarded: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_busy(&self) {
        self.frames_dropped_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_inactive(&self) {
        self.frames_rejected_inactive.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_unsubscribed(&self) {
        self.frames_skipped_unsubscribed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_detection_failure(&self) {
        self.detection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release_failure(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.batches_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self) {
        self.batches_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_dropped_busy: self.frames_dropped_busy.load(Ordering::Relaxed),
            frames_rejected_inactive: self.frames_rejected_inactive.load(Ordering::Relaxed),
            frames_skipped_unsubscribed: self.frames_skipped_unsubscribed.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
            batches_discarded: self.batches_discarded.load(Ordering::Relaxed),
        }
    }
}
