//! Single consumer of the ingest queue.
//!
//! One task pulls envelopes in FIFO order, normalizes them and writes the resulting
//! record to the store. A dispatch step for one item finishes before the next item is
//! received, which is what keeps store writes in enqueue order.
//!
//! State machine (observable via [`DispatcherHandle::state`]):
//!
//! ```text
//! Idle --recv--> Processing --step done--> Idle
//!   \                 \
//!    shutdown          shutdown (in-flight step finishes, bounded by drain_timeout)
//!     \                 \
//!      +-----> Draining <+ --queued items discarded--> Stopped
//! ```
//!
//! When every producer handle is dropped the queue runs dry and the task stops on its
//! own after the last item, without discarding anything.
//!
//! Failure policy:
//! * Validation failures and skips are counted and logged, never retried.
//! * Each store write is retried once right away. A second failure drops the rest of
//!   the item. A retry repeats only the failed write, never the ones before it.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::ingest::normalize::{normalize, Normalized};
use crate::ingest::queue::IngestQueue;
use crate::logutil::{escape_log, TARGET_DATA};
use crate::meshtastic::Envelope;
use crate::metrics::{IngestMetrics, Snapshot};
use crate::nodes::NodeTracker;
use crate::record::Record;
use crate::storage::{KeyValueStore, Keyspace, StoreError, StoreWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Processing,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on waiting for the in-flight step during shutdown.
    pub drain_timeout: Duration,
    /// Recently dispatched `(station_id, packet id)` pairs to remember; 0 disables.
    pub dedup_window: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_millis(5_000),
            dedup_window: 256,
        }
    }
}

/// Control side of a running dispatcher.
pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<DispatcherState>,
    metrics: Arc<IngestMetrics>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl DispatcherHandle {
    pub fn state(&self) -> DispatcherState {
        *self.state_rx.borrow()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.metrics.snapshot()
    }

    /// Wait until the dispatcher reports `state`.
    pub async fn wait_for(&self, state: DispatcherState) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|s| *s == state).await;
    }

    /// Stop the dispatcher: close the queue, let the in-flight step finish (bounded by
    /// the drain timeout) and discard what is still queued. Safe to call more than once
    /// or after the dispatcher already stopped.
    pub async fn shutdown(&self) -> Snapshot {
        let _ = self.shutdown_tx.send(true);
        self.join_task().await;
        self.metrics.snapshot()
    }

    /// Wait for the dispatcher to stop on its own (all producers gone, queue empty).
    pub async fn finished(&self) -> Snapshot {
        self.join_task().await;
        self.metrics.snapshot()
    }

    async fn join_task(&self) {
        let join = self
            .join
            .lock()
            .expect("dispatcher join mutex poisoned")
            .take();
        if let Some(join) = join {
            if let Err(e) = join.await {
                log::error!("dispatcher task ended abnormally: {}", e);
            }
        } else {
            self.wait_for(DispatcherState::Stopped).await;
        }
    }
}

/// Spawn the dispatcher task on the current runtime.
pub fn start_dispatcher(
    queue: IngestQueue,
    store: Arc<dyn KeyValueStore>,
    metrics: Arc<IngestMetrics>,
    cfg: DispatcherConfig,
) -> DispatcherHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(DispatcherState::Idle);
    let worker = Worker {
        store,
        metrics: metrics.clone(),
        recent: RecentPackets::new(cfg.dedup_window),
    };
    log::debug!("dispatcher starting (queue {} slots)", queue.capacity());
    let join = tokio::spawn(run(queue.rx, worker, shutdown_rx, state_tx, cfg.drain_timeout));
    DispatcherHandle {
        shutdown_tx,
        state_rx,
        metrics,
        join: Mutex::new(Some(join)),
    }
}

async fn run(
    mut rx: mpsc::Receiver<Envelope>,
    mut worker: Worker,
    mut shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<DispatcherState>,
    drain_timeout: Duration,
) {
    let metrics = worker.metrics.clone();
    let set_state = |s: DispatcherState| {
        state_tx.send_replace(s);
    };
    loop {
        set_state(DispatcherState::Idle);
        let envelope = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break,
            item = rx.recv() => match item {
                Some(env) => env,
                None => {
                    log::debug!("ingest queue closed by producers; dispatcher stopping");
                    set_state(DispatcherState::Stopped);
                    return;
                }
            },
        };

        set_state(DispatcherState::Processing);
        let step = worker.dispatch(envelope);
        tokio::pin!(step);
        let interrupted = tokio::select! {
            _ = &mut step => false,
            _ = shutdown_requested(&mut shutdown_rx) => true,
        };
        if interrupted {
            set_state(DispatcherState::Draining);
            rx.close();
            if tokio::time::timeout(drain_timeout, &mut step).await.is_err() {
                log::warn!(
                    "in-flight item abandoned after {} ms drain timeout",
                    drain_timeout.as_millis()
                );
                metrics.add_discarded_on_shutdown(1);
            }
            break;
        }
    }

    set_state(DispatcherState::Draining);
    rx.close();
    let mut discarded = 0u64;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        metrics.add_discarded_on_shutdown(discarded);
        log::warn!("shutdown discarded {} queued packets", discarded);
    }
    log::info!("dispatcher stopped: {}", metrics.snapshot());
    set_state(DispatcherState::Stopped);
}

// Resolves once shutdown was signaled. A dropped handle is not a shutdown signal.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

struct Worker {
    store: Arc<dyn KeyValueStore>,
    metrics: Arc<IngestMetrics>,
    recent: RecentPackets,
}

impl Worker {
    async fn dispatch(&mut self, envelope: Envelope) {
        let (record, corrections) = match normalize(&envelope) {
            Normalized::Record {
                record,
                corrections,
            } => (record, corrections),
            Normalized::Skip(reason) => {
                self.metrics.inc_skipped();
                log::debug!("skipped packet ({}): {}", reason, envelope.packet.summary());
                return;
            }
            Normalized::Fail(err) => {
                self.metrics.inc_validation_failures();
                log::warn!("dropped invalid packet ({}): {}", err, envelope.packet.summary());
                return;
            }
        };

        if !corrections.is_empty() {
            self.metrics.add_range_corrections(corrections.len() as u64);
            for c in &corrections {
                log::debug!(target: TARGET_DATA, "{} from {}: {}", record.kind(), record.station_id(), c);
            }
        }

        let dedup_key = envelope
            .packet
            .id
            .filter(|id| *id != 0)
            .map(|id| (record.station_id().to_string(), id));
        if let Some(key) = &dedup_key {
            if self.recent.contains(key) {
                self.metrics.inc_duplicates();
                log::debug!("duplicate packet {} from {} ignored", key.1, key.0);
                return;
            }
        }

        let writes = match plan_writes(&record) {
            Ok(writes) => writes,
            Err(e) => {
                self.metrics.inc_store_failures();
                log::error!("could not serialize {} from {}: {}", record.kind(), record.station_id(), e);
                return;
            }
        };
        if let Some(StoreWrite::Append { value, .. }) = writes.first() {
            log::debug!(
                target: TARGET_DATA,
                "{} at {}: {}",
                record.kind(),
                record.timestamp(),
                escape_log(value)
            );
        }

        for write in writes {
            if let Err(e) = self.write_with_retry(write).await {
                self.metrics.inc_store_failures();
                log::error!(
                    "dropping {} from {} after failed retry: {}",
                    record.kind(),
                    record.station_id(),
                    e
                );
                return;
            }
        }

        self.metrics.inc_stored();
        if let Some(key) = dedup_key {
            self.recent.remember(key);
        }
    }

    async fn write_with_retry(&self, write: StoreWrite) -> Result<(), StoreError> {
        match self.write_once(write.clone()).await {
            Ok(()) => Ok(()),
            Err(first) => {
                self.metrics.inc_store_retries();
                log::warn!("write to {} failed, retrying once: {}", write.keyspace(), first);
                self.write_once(write).await
            }
        }
    }

    async fn write_once(&self, write: StoreWrite) -> Result<(), StoreError> {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || write.apply(store.as_ref())).await {
            Ok(result) => result,
            Err(join) => Err(StoreError::Unavailable(format!("store call panicked: {}", join))),
        }
    }
}

/// Every write a record needs, in the order they must happen.
pub fn plan_writes(record: &Record) -> Result<Vec<StoreWrite>, serde_json::Error> {
    let mut writes = vec![StoreWrite::Append {
        keyspace: Keyspace::for_record(record.kind()),
        value: record.to_json()?,
    }];
    if let Record::NodeInfo(info) = record {
        writes.extend(NodeTracker::writes(
            &info.station_id,
            &info.display_name,
            &info.last_seen,
        ));
    }
    Ok(writes)
}

/// Bounded memory of recently stored packet ids.
struct RecentPackets {
    capacity: usize,
    order: VecDeque<(String, u32)>,
    seen: HashSet<(String, u32)>,
}

impl RecentPackets {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(4096)),
            seen: HashSet::new(),
        }
    }

    fn contains(&self, key: &(String, u32)) -> bool {
        self.capacity > 0 && self.seen.contains(key)
    }

    fn remember(&mut self, key: (String, u32)) {
        if self.capacity == 0 || self.seen.contains(&key) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NodeInfo;

    #[test]
    fn node_info_plan_is_log_then_name_then_timestamp() {
        let record = Record::NodeInfo(NodeInfo {
            station_id: "!1".into(),
            display_name: "Base".into(),
            last_seen: "2024-01-01T00:00:00Z".into(),
        });
        let keyspaces: Vec<_> = plan_writes(&record)
            .unwrap()
            .iter()
            .map(StoreWrite::keyspace)
            .collect();
        assert_eq!(
            keyspaces,
            vec![Keyspace::NodeLog, Keyspace::Nodes, Keyspace::NodeTimestamps]
        );
    }

    #[test]
    fn recent_packets_evicts_oldest() {
        let mut recent = RecentPackets::new(2);
        recent.remember(("!1".into(), 1));
        recent.remember(("!1".into(), 2));
        recent.remember(("!1".into(), 3));
        assert!(!recent.contains(&("!1".into(), 1)));
        assert!(recent.contains(&("!1".into(), 3)));
    }

    #[test]
    fn zero_window_disables_dedup() {
        let mut recent = RecentPackets::new(0);
        recent.remember(("!1".into(), 1));
        assert!(!recent.contains(&("!1".into(), 1)));
    }
}
