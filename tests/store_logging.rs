use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};
use meshstation::logutil::{LogSelection, TARGET_STORE};
use meshstation::storage::{KeyValueStore, Keyspace, SledStore};
use tempfile::TempDir;

static RECORDS: Mutex<Vec<(Level, String, String)>> = Mutex::new(Vec::new());

struct Capture;

impl Log for Capture {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        RECORDS.lock().unwrap().push((
            record.level(),
            record.target().to_string(),
            record.args().to_string(),
        ));
    }

    fn flush(&self) {}
}

static LOGGER: Capture = Capture;

#[test]
fn sled_operations_log_under_the_store_category() {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(LevelFilter::Trace);

    let dir = TempDir::new().unwrap();
    let store = SledStore::open(dir.path()).unwrap();
    store.append(Keyspace::Messages, "{}").unwrap();
    store.upsert_field(Keyspace::Nodes, "!00000001", "Alpha").unwrap();

    let records = RECORDS.lock().unwrap().clone();
    let ours: Vec<_> = records
        .iter()
        .filter(|(_, _, msg)| msg.starts_with("append ") || msg.starts_with("hset "))
        .collect();
    assert_eq!(ours.len(), 2, "records: {:?}", records);

    // Only the store category selected, nothing else.
    let selection = LogSelection::parse("store", false).unwrap();
    for (level, target, msg) in ours {
        assert_eq!(target, TARGET_STORE, "{}", msg);
        assert!(selection.allows(*level, target));
    }
}
