//! # NMAS - CLI Entry Point
//!
//! Command-line interface for the Network Monitoring & Alert System.
//!
//! Commands:
//! - `init-config` - Generate a default configuration file
//! - `listen`      - Receive syslog datagrams into the event store
//! - `detect`      - Run one detection pass and notify new alerts
//! - `start`       - Listener plus a detection pass every `eval_interval_secs`
//! - `simulate`    - Inject synthetic failed logins or a port scan
//! - `status`      - Show event/alert counts and the effective configuration

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nmas::ingest::{self, IngestListener};
use nmas::pipeline::{self, PassReport};
use nmas::simulate;
use nmas::store::EventStore;
use nmas::{format_ts, now_utc, NmasConfig, NmasError, NmasResult};

/// NMAS - Network Monitoring & Alert System.
///
/// Collects syslog over UDP, detects failed-login bursts and port scans,
/// and notifies by log file, JSON export, mail and webhook.
#[derive(Parser, Debug)]
#[command(name = "nmas")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "nmas.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    InitConfig,

    /// Run the UDP syslog listener until Ctrl-C.
    Listen,

    /// Run one detection pass now and notify new alerts.
    Detect,

    /// Run the listener and the periodic detection schedule together.
    Start,

    /// Inject synthetic events into the store.
    Simulate {
        #[command(subcommand)]
        kind: SimulateKind,
    },

    /// Show store counts and the effective configuration.
    Status,
}

#[derive(Subcommand, Debug)]
enum SimulateKind {
    /// Failed-password events for one user from one source.
    FailedLogin {
        #[arg(long, default_value = simulate::DEFAULT_LOGIN_SOURCE)]
        source: String,

        #[arg(long, default_value = simulate::DEFAULT_USERNAME)]
        username: String,

        /// Number of events (1-50).
        #[arg(long, default_value_t = simulate::DEFAULT_LOGIN_COUNT)]
        count: u32,
    },

    /// Connection attempts on consecutive ports from one source.
    PortScan {
        #[arg(long, default_value = simulate::DEFAULT_SCAN_SOURCE)]
        source: String,

        /// First port probed (1-65535).
        #[arg(long, default_value_t = simulate::DEFAULT_START_PORT)]
        start_port: u32,

        /// Number of ports (1-60).
        #[arg(long, default_value_t = simulate::DEFAULT_SCAN_PORTS)]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::InitConfig => cmd_init_config(&cli.config),
        Commands::Listen => cmd_listen(&cli.config).await,
        Commands::Detect => cmd_detect(&cli.config),
        Commands::Start => cmd_start(&cli.config).await,
        Commands::Simulate { kind } => cmd_simulate(&cli.config, kind),
        Commands::Status => cmd_status(&cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Cooperative shutdown flag set by Ctrl-C.
fn install_shutdown_flag() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not install signal handler: {}. Use kill to stop.", e);
    }
    shutdown
}

/// Bind the listener on its own store handle and log where devices should send.
fn open_listener(config: &NmasConfig, shutdown: Arc<AtomicBool>) -> NmasResult<IngestListener> {
    let store = EventStore::open(&config.database_path())?;
    let listener = IngestListener::bind(&config.listener, store, shutdown)?;
    info!(
        "[LISTENER] Tell devices to send syslog here: {}:{}",
        ingest::primary_ip(),
        listener.local_addr()?.port(),
    );
    Ok(listener)
}

async fn cmd_listen(config_path: &Path) -> NmasResult<()> {
    let config = NmasConfig::load_or_default(config_path)?;
    let shutdown = install_shutdown_flag();
    let listener = open_listener(&config, shutdown)?;

    match tokio::task::spawn_blocking(move || listener.run()).await {
        Ok(stats) => {
            info!(
                "Listener stopped. {} datagram(s) received, {} stored.",
                stats.received, stats.stored
            );
            Ok(())
        }
        Err(e) => Err(NmasError::Storage(format!("listener task failed: {}", e))),
    }
}

fn cmd_detect(config_path: &Path) -> NmasResult<()> {
    let config = NmasConfig::load_or_default(config_path)?;
    let store = EventStore::open(&config.database_path())?;
    let now = now_utc();

    let report = pipeline::run_detection_pass(&store, &config, now)?;
    println!(
        "Detection run @ {} -> {} new alerts",
        format_ts(&now),
        report.new_alert_count()
    );
    print_pass(&report);
    Ok(())
}

fn print_pass(report: &PassReport) {
    for alert in &report.run.inserted {
        println!("  {}", alert.summary_line());
    }
    if report.new_alert_count() > 0 {
        println!("  Delivery: {}", report.delivery);
    }
}

/// Run the listener and the detection schedule until Ctrl-C.
///
/// The listener blocks on a worker thread with its own store handle. Each
/// detection pass runs on the blocking pool with a second handle, so a slow
/// SMTP relay delays the next pass but never the listener.
async fn cmd_start(config_path: &Path) -> NmasResult<()> {
    info!("NMAS starting...");
    let config = NmasConfig::load_or_default(config_path)?;
    std::fs::create_dir_all(&config.general.data_dir)?;

    let shutdown = install_shutdown_flag();
    let listener = open_listener(&config, shutdown.clone())?;
    let detect_store = Arc::new(EventStore::open(&config.database_path())?);
    let config = Arc::new(config);

    let listener_task = tokio::task::spawn_blocking(move || listener.run());

    let interval_secs = config.general.eval_interval_secs.max(1);
    info!(
        "[DETECT] Scheduled every {}s (login {}s/{}, scan {}s/{})",
        interval_secs,
        config.detection.login_window_secs,
        config.detection.login_threshold,
        config.detection.scan_window_secs,
        config.detection.scan_threshold,
    );

    let mut eval = tokio::time::interval(Duration::from_secs(interval_secs));
    let mut poll = tokio::time::interval(Duration::from_millis(250));
    let mut passes: u64 = 0;

    loop {
        tokio::select! {
            _ = eval.tick() => {
                let store = detect_store.clone();
                let cfg = config.clone();
                let pass = tokio::task::spawn_blocking(move || {
                    pipeline::run_detection_pass(&store, &cfg, now_utc())
                })
                .await;

                passes += 1;
                match pass {
                    Ok(Ok(report)) if report.new_alert_count() > 0 => {
                        info!(
                            "Detection pass {}: {} new alert(s), {}",
                            passes,
                            report.new_alert_count(),
                            report.delivery,
                        );
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Detection pass {} failed: {}", passes, e),
                    Err(e) => error!("Detection task {} panicked: {}", passes, e),
                }
            }
            _ = poll.tick() => {
                if shutdown.load(Ordering::SeqCst) {
                    info!("Shutdown signal received. Stopping gracefully...");
                    break;
                }
            }
        }
    }

    match listener_task.await {
        Ok(stats) => info!(
            "NMAS stopped. {} datagram(s) received, {} stored, {} detection pass(es).",
            stats.received, stats.stored, passes,
        ),
        Err(e) => error!("Listener task failed: {}", e),
    }
    Ok(())
}

fn cmd_simulate(config_path: &Path, kind: SimulateKind) -> NmasResult<()> {
    let config = NmasConfig::load_or_default(config_path)?;
    let store = EventStore::open(&config.database_path())?;
    let now = now_utc();

    let inserted = match kind {
        SimulateKind::FailedLogin {
            source,
            username,
            count,
        } => simulate::inject_failed_logins(&store, &config.simulate, &source, &username, count, now)?,
        SimulateKind::PortScan {
            source,
            start_port,
            count,
        } => simulate::inject_port_scan(&store, &config.simulate, &source, start_port, count, now)?,
    };

    println!("Inserted {} synthetic event(s) @ {}", inserted, format_ts(&now));
    println!("Run 'nmas detect' to evaluate them now.");
    Ok(())
}

fn cmd_status(config_path: &Path) -> NmasResult<()> {
    let config = NmasConfig::load_or_default(config_path)?;
    let db = config.database_path();

    if db.exists() {
        let store = EventStore::open(&db)?;
        println!("Database: {}", db.display());
        println!("  Events: {}", store.count_events()?);
        println!("  Alerts: {}", store.count_alerts()?);
    } else {
        println!("No database at {}. Run 'nmas listen' or 'nmas simulate' first.", db.display());
    }

    let alert_log = config.alert_log_path();
    if alert_log.exists() {
        let metadata = std::fs::metadata(&alert_log)?;
        println!(
            "Alert log: {} ({} bytes)",
            alert_log.display(),
            metadata.len()
        );
    }

    println!();
    println!("Configuration:");
    println!(
        "  Listener: udp://{} (devices send to {}:{})",
        config.listener.bind_address(),
        ingest::primary_ip(),
        config.listener.port,
    );
    println!("  Eval interval: {}s", config.general.eval_interval_secs);
    println!(
        "  Failed logins: >= {} within {}s",
        config.detection.login_threshold, config.detection.login_window_secs
    );
    println!(
        "  Port scan: >= {} distinct ports within {}s",
        config.detection.scan_threshold, config.detection.scan_window_secs
    );
    println!("  Alert files enabled: {}", config.logging.enabled);
    println!(
        "  Email enabled: {} ({}:{})",
        config.email.enabled, config.email.host, config.email.port
    );
    println!(
        "  Webhook enabled: {} ({})",
        config.webhook.enabled,
        config.webhook.url.as_deref().unwrap_or("no url")
    );
    println!("  Simulation enabled: {}", config.simulate.enabled);

    Ok(())
}

/// Generate a default configuration file.
fn cmd_init_config(config_path: &Path) -> NmasResult<()> {
    if config_path.exists() {
        return Err(NmasError::Config(format!(
            "Configuration file already exists: {}. Remove it first or use a different path.",
            config_path.display()
        )));
    }

    NmasConfig::write_default(config_path)?;
    println!("Default configuration written to: {}", config_path.display());
    println!();
    println!("Key settings to configure:");
    println!("  [listener]  - UDP bind_host/port (default 0.0.0.0:5514)");
    println!("  [detection] - Window lengths and thresholds");
    println!("  [email]     - Enable and point at your SMTP relay");
    println!("  [webhook]   - Enable and set url for chat notifications");

    Ok(())
}
