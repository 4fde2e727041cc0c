use meshstation::config::Config;
use tempfile::TempDir;

#[tokio::test]
async fn partial_file_fills_in_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meshstation.toml");
    std::fs::write(
        &path,
        r#"
data_retention_days = 7

[store]
path = "/var/lib/meshstation"

[ingest]
queue_capacity = 250
"#,
    )
    .unwrap();

    let config = Config::load(path.to_str().unwrap()).await.unwrap();
    assert_eq!(config.data_retention_days, 7);
    assert_eq!(config.store.path, "/var/lib/meshstation");
    assert_eq!(config.store.key_prefix, "meshtastic");
    assert_eq!(config.ingest.queue_capacity, 250);
    assert_eq!(config.ingest.drain_timeout_ms, 5000);
    assert_eq!(config.display.max_messages, 50);
}

#[tokio::test]
async fn missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let mut config = Config::load_or_default(path.to_str().unwrap()).await.unwrap();
    // Process environment may carry overrides; compare with those applied to defaults.
    let mut expected = Config::default();
    expected.apply_env(|key| std::env::var(key).ok()).unwrap();
    config.apply_env(|_| None).unwrap();
    assert_eq!(config, expected);
}

#[tokio::test]
async fn default_file_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meshstation.toml");
    let path = path.to_str().unwrap();
    Config::create_default(path).await.unwrap();
    let loaded = Config::load(path).await.unwrap();
    assert_eq!(loaded, Config::default());
}

#[tokio::test]
async fn invalid_toml_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[store\npath = ").unwrap();
    let err = Config::load(path.to_str().unwrap()).await.unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[tokio::test]
async fn zero_queue_capacity_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meshstation.toml");
    std::fs::write(&path, "[ingest]\nqueue_capacity = 0\n").unwrap();
    assert!(Config::load_or_default(path.to_str().unwrap()).await.is_err());
}
