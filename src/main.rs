//! Binary entrypoint for the meshstation CLI.
//!
//! Commands:
//! - `run [--source <path|->] [--store <path>] [--show-previous]` - ingest packets until ctrl-c or end of feed
//! - `show [--nodes] [--node-log] [--messages] [--telemetry] [--limit N]` - print stored data as tables
//! - `cleanup [--days N] [--corrupted]` - retention and corrupted-entry cleanup
//! - `status` - keyspace sizes
//! - `init` - write a starter `meshstation.toml`
//!
//! See the library crate docs for module-level details: `meshstation::`.
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use meshstation::config::Config;
use meshstation::display;
use meshstation::ingest;
use meshstation::logutil::{Category, LogSelection};
use meshstation::maintenance;
use meshstation::meshtastic::source::{spawn_source, JsonLinesSource};
use meshstation::nodes::NodeTracker;
use meshstation::query::QueryService;
use meshstation::storage::{KeyValueStore, MemoryStore, SledStoreBuilder};

#[derive(Parser)]
#[command(name = "meshstation")]
#[command(about = "Meshtastic base station: ingest mesh traffic and telemetry into a key-value store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "meshstation.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Comma list of log levels and categories (packet, data, store), e.g. "info,packet"
    #[arg(long, global = true)]
    log: Option<String>,

    /// Show everything at or above the most verbose listed level
    #[arg(long, global = true)]
    threshold: bool,

    /// Do not write the log file even if one is configured
    #[arg(long, global = true)]
    no_file_logging: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest packets from the device feed
    Run {
        /// JSON-lines packet feed, "-" for stdin
        #[arg(short, long)]
        source: Option<String>,

        /// Store directory, or ":memory:" for a throwaway run
        #[arg(long)]
        store: Option<String>,

        /// Print stored nodes, messages and telemetry before starting
        #[arg(long)]
        show_previous: bool,
    },
    /// Print stored data
    Show {
        #[arg(long)]
        nodes: bool,
        /// Node announcement history
        #[arg(long)]
        node_log: bool,
        #[arg(long)]
        messages: bool,
        #[arg(long)]
        telemetry: bool,
        /// Row limit for every table (overrides the [display] section)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Remove old or corrupted entries
    Cleanup {
        /// Remove entries older than this many days (default: data_retention_days)
        #[arg(long)]
        days: Option<u32>,
        /// Remove entries that no longer decode
        #[arg(long)]
        corrupted: bool,
    },
    /// Show keyspace sizes
    Status,
    /// Write a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        if Path::new(&cli.config).exists() {
            bail!("{} already exists; refusing to overwrite", cli.config);
        }
        Config::create_default(&cli.config).await?;
        println!("Wrote default configuration to {}", cli.config);
        return Ok(());
    }

    let mut config = Config::load_or_default(&cli.config).await?;
    if let Some(level) = &cli.log {
        config.logging.level = level.clone();
    }
    if cli.threshold {
        config.logging.threshold = true;
    }
    if cli.no_file_logging {
        config.logging.file = None;
    }
    if let Commands::Run { source, store, .. } = &cli.command {
        if let Some(s) = source {
            config.device.source = s.clone();
        }
        if let Some(p) = store {
            config.store.path = p.clone();
        }
    }
    config.validate()?;

    let selection = LogSelection::parse(&config.logging.level, config.logging.threshold)?
        .with_verbosity(cli.verbose);
    init_logging(&config, selection);

    let store = open_store(&config)?;

    match cli.command {
        Commands::Run { show_previous, .. } => run(config, store, show_previous).await,
        Commands::Show {
            nodes,
            node_log,
            messages,
            telemetry,
            limit,
        } => {
            let all = !(nodes || node_log || messages || telemetry);
            let q = QueryService::new(store);
            let mut limits = config.display_limits();
            if let Some(n) = limit {
                limits.messages = n;
                limits.device_telemetry = n;
                limits.network_telemetry = n;
                limits.environment_telemetry = n;
            }
            if all || nodes {
                print!("{}", display::nodes(&q)?);
            }
            if node_log {
                print!("{}", display::node_log(&q, limits.messages)?);
            }
            if all || messages {
                print!("{}", display::messages(&q, limits.messages)?);
            }
            if all || telemetry {
                print!("{}", display::telemetry(&q, &limits)?);
            }
            Ok(())
        }
        Commands::Cleanup { days, corrupted } => {
            if days.is_some() || !corrupted {
                let days = days.unwrap_or(config.data_retention_days);
                let report =
                    maintenance::cleanup_older_than(store.as_ref(), days, chrono::Utc::now())?;
                println!("Removed {} entries older than {} days", report.total(), days);
                for (ks, n) in &report.removed {
                    println!("  {:<24} {}", ks.key(&config.store.key_prefix), n);
                }
            }
            if corrupted {
                let report = maintenance::cleanup_corrupted(store.as_ref())?;
                println!("Removed {} corrupted entries", report.total());
                for (ks, n) in &report.removed {
                    println!("  {:<24} {}", ks.key(&config.store.key_prefix), n);
                }
            }
            store.flush()?;
            Ok(())
        }
        Commands::Status => {
            println!("Meshstation v{}", env!("CARGO_PKG_VERSION"));
            println!("Store: {}", config.store.path);
            for (ks, n) in QueryService::new(store).sizes()? {
                println!("  {:<36} {:>8}", ks.key(&config.store.key_prefix), n);
            }
            Ok(())
        }
        Commands::Init => Ok(()),
    }
}

async fn run(config: Config, store: Arc<dyn KeyValueStore>, show_previous: bool) -> Result<()> {
    info!("Starting meshstation v{}", env!("CARGO_PKG_VERSION"));
    let now = chrono::Utc::now();
    let tracker = NodeTracker::new(store.clone());
    tracker.seed_broadcast(now)?;
    if let Some(id) = &config.device.station_id {
        tracker.seed_local(id, &config.device.station_name, now)?;
        info!("Local station {} ({})", config.device.station_name, id);
    }

    if show_previous {
        let q = QueryService::new(store.clone());
        let limits = config.display_limits();
        print!("{}", display::nodes(&q)?);
        print!("{}", display::messages(&q, limits.messages)?);
        print!("{}", display::telemetry(&q, &limits)?);
    }

    let source = JsonLinesSource::open(&config.device.source)?;
    let (handle, dispatcher) =
        ingest::start(store.clone(), config.ingest.queue_capacity, config.dispatcher());
    let source_thread =
        spawn_source(Box::new(source), handle).context("starting packet source thread")?;
    info!(
        "Ingesting from {} into {} (queue {} slots)",
        config.device.source, config.store.path, config.ingest.queue_capacity
    );

    let stats = tokio::select! {
        stats = dispatcher.finished() => {
            info!("Packet feed ended");
            stats
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("ctrl-c handler failed: {}", e);
            }
            info!("Shutdown requested");
            dispatcher.shutdown().await
        }
    };

    // A reader blocked on stdin cannot be interrupted; only join threads that are done.
    if source_thread.is_finished() {
        match source_thread.join() {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("packet source ended with error: {:#}", e),
            Err(_) => warn!("packet source thread panicked"),
        }
    }
    if let Err(e) = store.flush() {
        warn!("final store flush failed: {}", e);
    }
    info!("Ingest summary: {}", stats);
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    if config.store.path == ":memory:" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SledStoreBuilder::new(&config.store.path)
        .key_prefix(config.store.key_prefix.clone())
        .open()
        .with_context(|| format!("opening store at {}", config.store.path))?;
    Ok(Arc::new(store))
}

fn level_label(record: &log::Record) -> String {
    match [Category::Packet, Category::Data, Category::Store]
        .into_iter()
        .find(|c| c.target() == record.target())
    {
        Some(c) => c.target().to_ascii_uppercase(),
        None => record.level().to_string(),
    }
}

fn init_logging(config: &Config, selection: LogSelection) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    builder.filter_level(selection.max_level());
    // sled logs its own internals at debug; keep them out of the category views.
    builder.filter_module("sled", log::LevelFilter::Warn);

    let file = config.logging.file.as_ref().and_then(|path| {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(Arc::new(std::sync::Mutex::new(f))),
            Err(e) => {
                eprintln!("cannot open log file {}: {}", path, e);
                None
            }
        }
    });

    // Check if stdout is a terminal (TTY) - if so, write to both file and console
    let is_tty = atty::is(atty::Stream::Stdout);

    builder.format(move |fmt, record| {
        if !selection.allows_record(record) {
            return Ok(());
        }
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let line = format!("{} [{}] {}", ts, level_label(record), record.args());

        if let Some(file) = &file {
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if !is_tty {
                return Ok(());
            }
        }
        writeln!(fmt, "{}", line)
    });
    let _ = builder.try_init();
}
