//! # Ingestion Pipeline
//!
//! ```text
//! device callback --submit--> IngestQueue --recv--> dispatcher --normalize--> store
//!   (any thread)   (bounded, sheds newest)   (one task)                (spawn_blocking)
//! ```
//!
//! [`start`] wires a queue to a dispatcher and hands back both ends: the cloneable
//! [`IngestHandle`] for producers and the [`DispatcherHandle`] for shutdown and state.

pub mod dispatcher;
pub mod normalize;
pub mod queue;

use std::sync::Arc;

pub use dispatcher::{start_dispatcher, DispatcherConfig, DispatcherHandle, DispatcherState};
pub use normalize::{normalize, NormalizeError, Normalized, RangeCorrection, SkipReason};
pub use queue::{channel, Enqueue, IngestHandle, IngestQueue, PacketCallback};

use crate::metrics::IngestMetrics;
use crate::storage::KeyValueStore;

/// Start a dispatcher over a fresh queue of `capacity` slots. Must run inside a tokio runtime.
pub fn start(
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    cfg: DispatcherConfig,
) -> (IngestHandle, DispatcherHandle) {
    let metrics = Arc::new(IngestMetrics::new());
    let (handle, queue) = channel(capacity, metrics.clone());
    let dispatcher = start_dispatcher(queue, store, metrics, cfg);
    (handle, dispatcher)
}
