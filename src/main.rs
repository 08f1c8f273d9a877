//! cbsa-telemetry CLI
//!
//! Runs the behavioral telemetry agent against a configured backend.

use anyhow::{Context, Result};
use cbsa_telemetry::{
    agent::TelemetryAgent,
    collector::SyntheticMotionSource,
    config::Config,
    transparency::{create_shared_log_with_persistence, TransparencyStats},
    PRIVACY_DECLARATION, VERSION,
};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cbsa-telemetry")]
#[command(version = VERSION)]
#[command(about = "Behavioral telemetry agent: windowed feature vectors, signed and streamed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and stream telemetry until Ctrl+C
    Run {
        /// User id stamped on every message
        #[arg(long)]
        user: String,

        /// Override the window length in seconds
        #[arg(long)]
        window_secs: Option<u64>,

        /// Interval between synthetic motion samples, in milliseconds
        #[arg(long, default_value = "50")]
        motion_interval_ms: u64,

        /// Seconds between status lines
        #[arg(long, default_value = "10")]
        report_every: u64,
    },

    /// Set the backend address
    SetBackend {
        /// IPv4 address or hostname
        #[arg(long)]
        host: String,

        #[arg(long)]
        port: u16,
    },

    /// Show configuration
    Config,

    /// Show cumulative collection statistics
    Status,

    /// Display privacy declaration
    Privacy,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            user,
            window_secs,
            motion_interval_ms,
            report_every,
        } => cmd_run(user, window_secs, motion_interval_ms, report_every).await,
        Commands::SetBackend { host, port } => cmd_set_backend(&host, port),
        Commands::Config => cmd_config(),
        Commands::Status => cmd_status(),
        Commands::Privacy => {
            println!("{PRIVACY_DECLARATION}");
            Ok(())
        }
    }
}

async fn cmd_run(
    user: String,
    window_secs: Option<u64>,
    motion_interval_ms: u64,
    report_every: u64,
) -> Result<()> {
    let mut config = Config::load().context("Could not load configuration")?;
    if let Some(secs) = window_secs {
        config.window_duration = Duration::from_secs(secs.max(1));
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("cbsa-telemetry v{VERSION}");
    println!();
    println!("  Backend: {}", config.ws_url());
    println!("  Window duration: {}s", config.window_duration.as_secs());
    println!("  Event type: {}", config.event_type);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let log = create_shared_log_with_persistence(config.transparency_path());
    let motion = SyntheticMotionSource::new(Duration::from_millis(motion_interval_ms.max(1)));
    let mut agent = TelemetryAgent::with_log(config, log.clone()).with_source(Arc::new(motion));

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    agent.login(user).await;
    println!("Session: {}", agent.transport().session_id());

    let report_interval = Duration::from_secs(report_every.max(1));
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;

        if last_report.elapsed() >= report_interval {
            let status = agent.status();
            println!(
                "[{}] windows: {} | sent: {} | queued: {} | connection: {}",
                chrono::Local::now().format("%H:%M:%S"),
                status.stats.windows_completed,
                status.stats.envelopes_sent,
                status.queued_messages,
                status.connection
            );
            last_report = Instant::now();
        }
    }

    println!();
    println!("Stopping...");
    agent.logout();

    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save transparency stats: {e}");
    }
    println!();
    println!("{}", log.summary());
    Ok(())
}

fn cmd_set_backend(host: &str, port: u16) -> Result<()> {
    let mut config = Config::load().context("Could not load configuration")?;
    config.set_backend(host, port)?;
    config.save().context("Error saving config")?;
    println!("Backend set to {}", config.ws_url());
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().context("Could not load configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!("WebSocket endpoint: {}", config.ws_url());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = Config::load().context("Could not load configuration")?;

    println!("cbsa-telemetry Status");
    println!("=====================");
    println!();
    println!("Configuration:");
    println!("  Backend: {}", config.ws_url());
    println!("  Window duration: {}s", config.window_duration.as_secs());
    println!(
        "  Reconnect: {}ms base, {} attempts max",
        config.transport.reconnect_delay_ms, config.transport.max_reconnect_attempts
    );
    println!("  Queue size: {}", config.transport.queue_size);
    println!();

    let stats_path = config.transparency_path();
    if !stats_path.exists() {
        println!("No previous session data found.");
        return Ok(());
    }

    let log = create_shared_log_with_persistence(stats_path);
    print_stats(&log.stats());
    Ok(())
}

fn print_stats(stats: &TransparencyStats) {
    println!("Cumulative Statistics:");
    println!("  Touch events: {}", stats.touch_events);
    println!("  Scroll events: {}", stats.scroll_events);
    println!("  Keystrokes: {}", stats.key_events);
    println!("  Motion samples: {}", stats.motion_samples);
    println!("  Dropped samples: {}", stats.dropped_events);
    println!("  Windows completed: {}", stats.windows_completed);
    println!("  Envelopes sent: {}", stats.envelopes_sent);
    println!("  Envelopes queued: {}", stats.envelopes_queued);
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
