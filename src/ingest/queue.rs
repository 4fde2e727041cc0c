//! Bounded hand-off between device callbacks and the dispatcher.
//!
//! Producers never block: a full queue sheds the item being offered (the newest), so
//! whatever is already queued keeps its place and FIFO order is preserved. Producers
//! may be plain OS threads; [`IngestHandle::submit`] needs no runtime context.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::logutil::TARGET_PACKET;
use crate::meshtastic::{Envelope, RawPacket};
use crate::metrics::IngestMetrics;

/// Result of offering one packet to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Accepted,
    /// Queue full; the offered packet was dropped.
    Shed,
    /// Dispatcher draining or gone; the packet was dropped.
    Closed,
}

/// Closure-style registration for device drivers that want a plain callback.
pub type PacketCallback = Box<dyn Fn(RawPacket) -> Enqueue + Send + Sync + 'static>;

/// Producer side. Cheap to clone; the queue closes once every handle is dropped.
#[derive(Clone, Debug)]
pub struct IngestHandle {
    tx: mpsc::Sender<Envelope>,
    metrics: Arc<IngestMetrics>,
}

/// Consumer side, owned by the dispatcher.
#[derive(Debug)]
pub struct IngestQueue {
    pub(crate) rx: mpsc::Receiver<Envelope>,
    capacity: usize,
}

/// Largest queue the ingest channel will allocate slots for.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;

/// Create a queue holding `capacity` packets, clamped to `1..=MAX_QUEUE_CAPACITY`.
pub fn channel(capacity: usize, metrics: Arc<IngestMetrics>) -> (IngestHandle, IngestQueue) {
    let capacity = capacity.clamp(1, MAX_QUEUE_CAPACITY);
    let (tx, rx) = mpsc::channel(capacity);
    (IngestHandle { tx, metrics }, IngestQueue { rx, capacity })
}

impl IngestHandle {
    /// Stamp `packet` with the current time and offer it to the queue.
    pub fn submit(&self, packet: RawPacket) -> Enqueue {
        self.submit_envelope(Envelope::new(packet))
    }

    pub fn submit_envelope(&self, envelope: Envelope) -> Enqueue {
        log::debug!(target: TARGET_PACKET, "{}", envelope.packet.summary());
        match self.tx.try_send(envelope) {
            Ok(()) => {
                self.metrics.inc_enqueued();
                Enqueue::Accepted
            }
            Err(mpsc::error::TrySendError::Full(env)) => {
                self.metrics.inc_queue_overflow();
                log::warn!(
                    "ingest queue full ({} slots): shed packet {}",
                    self.tx.max_capacity(),
                    env.packet.summary()
                );
                Enqueue::Shed
            }
            Err(mpsc::error::TrySendError::Closed(env)) => {
                log::debug!("ingest queue closed: dropped packet {}", env.packet.summary());
                Enqueue::Closed
            }
        }
    }

    /// Wrap this handle as a device-driver callback.
    pub fn callback(&self) -> PacketCallback {
        let handle = self.clone();
        Box::new(move |packet| handle.submit(packet))
    }

    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl IngestQueue {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_sheds_newest() {
        let metrics = Arc::new(IngestMetrics::new());
        let (handle, mut queue) = channel(2, metrics.clone());
        for text in ["one", "two"] {
            assert_eq!(
                handle.submit(RawPacket::text_message("!1", "^all", text)),
                Enqueue::Accepted
            );
        }
        assert_eq!(
            handle.submit(RawPacket::text_message("!1", "^all", "three")),
            Enqueue::Shed
        );
        assert_eq!(metrics.snapshot().queue_overflow, 1);
        assert_eq!(metrics.snapshot().enqueued, 2);

        let first = queue.rx.try_recv().unwrap();
        let second = queue.rx.try_recv().unwrap();
        let text = |e: &Envelope| e.packet.decoded.as_ref().and_then(|d| d.text.clone());
        assert_eq!(text(&first).as_deref(), Some("one"));
        assert_eq!(text(&second).as_deref(), Some("two"));
        assert!(queue.is_empty());
    }

    #[test]
    fn capacity_is_clamped_to_sane_bounds() {
        let metrics = Arc::new(IngestMetrics::new());
        let (_h, queue) = channel(0, metrics.clone());
        assert_eq!(queue.capacity(), 1);
        let (_h, queue) = channel(usize::MAX, metrics);
        assert_eq!(queue.capacity(), MAX_QUEUE_CAPACITY);
    }

    #[test]
    fn closed_queue_reports_closed() {
        let (handle, mut queue) = channel(4, Arc::new(IngestMetrics::new()));
        queue.rx.close();
        let cb = handle.callback();
        assert_eq!(cb(RawPacket::text_message("!1", "^all", "late")), Enqueue::Closed);
        assert!(handle.is_closed());
    }
}
