//! Ingestion counters.
//!
//! Every failure class of the pipeline is non-fatal and only visible here and in the
//! logs. One [`IngestMetrics`] is shared (behind an `Arc`) between the producer handle,
//! the dispatcher task and whoever wants a [`Snapshot`].
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IngestMetrics {
    enqueued: AtomicU64,
    queue_overflow: AtomicU64,
    validation_failures: AtomicU64,
    skipped: AtomicU64,
    duplicates: AtomicU64,
    stored: AtomicU64,
    store_retries: AtomicU64,
    store_failures: AtomicU64,
    discarded_on_shutdown: AtomicU64,
    range_corrections: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_queue_overflow(&self) {
        self.queue_overflow.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_validation_failures(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_store_retries(&self) {
        self.store_retries.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_store_failures(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }
    pub fn add_discarded_on_shutdown(&self, n: u64) {
        self.discarded_on_shutdown.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_range_corrections(&self, n: u64) {
        self.range_corrections.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            queue_overflow: self.queue_overflow.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            discarded_on_shutdown: self.discarded_on_shutdown.load(Ordering::Relaxed),
            range_corrections: self.range_corrections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub enqueued: u64,
    pub queue_overflow: u64,
    pub validation_failures: u64,
    pub skipped: u64,
    pub duplicates: u64,
    /// Items whose dispatch step completed (all writes succeeded).
    pub stored: u64,
    pub store_retries: u64,
    pub store_failures: u64,
    pub discarded_on_shutdown: u64,
    pub range_corrections: u64,
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "enqueued={} stored={} overflow={} invalid={} skipped={} duplicates={} retries={} store_failures={} discarded={} clamped={}",
            self.enqueued,
            self.stored,
            self.queue_overflow,
            self.validation_failures,
            self.skipped,
            self.duplicates,
            self.store_retries,
            self.store_failures,
            self.discarded_on_shutdown,
            self.range_corrections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let m = IngestMetrics::new();
        m.inc_enqueued();
        m.inc_enqueued();
        m.inc_queue_overflow();
        m.add_discarded_on_shutdown(2);
        let snap = m.snapshot();
        assert_eq!(snap.enqueued, 2);
        assert_eq!(snap.queue_overflow, 1);
        assert_eq!(snap.discarded_on_shutdown, 2);
        assert_eq!(snap.stored, 0);
        assert!(snap.to_string().contains("overflow=1"));
    }
}
