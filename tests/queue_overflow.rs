use std::sync::Arc;

use meshstation::ingest::{channel, start_dispatcher, DispatcherConfig, Enqueue};
use meshstation::meshtastic::RawPacket;
use meshstation::metrics::IngestMetrics;
use meshstation::storage::{KeyValueStore, Keyspace, MemoryStore};

#[tokio::test]
async fn overflow_keeps_oldest_items() {
    let metrics = Arc::new(IngestMetrics::new());
    let (handle, queue) = channel(3, metrics.clone());

    // Dispatcher not started yet, so the queue fills up.
    let results: Vec<Enqueue> = (0..4)
        .map(|i| handle.submit(RawPacket::text_message("!00000001", "^all", &format!("p{i}"))))
        .collect();
    assert_eq!(
        results,
        vec![Enqueue::Accepted, Enqueue::Accepted, Enqueue::Accepted, Enqueue::Shed]
    );
    assert_eq!(metrics.snapshot().queue_overflow, 1);

    let store = Arc::new(MemoryStore::new());
    let dispatcher = start_dispatcher(queue, store.clone(), metrics.clone(), DispatcherConfig::default());
    drop(handle);
    let stats = dispatcher.finished().await;
    assert_eq!(stats.stored, 3);

    // Newest first on read.
    let texts: Vec<String> = store
        .read_all(Keyspace::Messages)
        .unwrap()
        .iter()
        .map(|e| serde_json::from_str::<serde_json::Value>(e).unwrap()["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["p2", "p1", "p0"]);
}

#[test]
fn submit_works_from_plain_threads() {
    let metrics = Arc::new(IngestMetrics::new());
    let (handle, _queue) = channel(100, metrics.clone());
    let workers: Vec<_> = (0..4)
        .map(|t| {
            let cb = handle.callback();
            std::thread::spawn(move || {
                for i in 0..10 {
                    cb(RawPacket::text_message("!00000001", "^all", &format!("{t}-{i}")));
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(metrics.snapshot().enqueued, 40);
    assert_eq!(metrics.snapshot().queue_overflow, 0);
}
