//! RTSP Client - adaptive stream player
//!
//! Connects to an RTSP server, sends the scheduled control requests, plays
//! received frames at the server's frame period and reports loss.

use anyhow::Context;
use clap::Parser;
use crossbeam::channel;
use rtsp_cli::config::{ClientSection, Config, ScheduleEntry};
use rtsp_cli::stats::{client_summary, display_client_report, display_compact};
use rtsp_io::ClientHost;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Delay between SETUP and PLAY in the default schedule
const DEFAULT_PLAY_DELAY_MS: u64 = 100;

#[derive(Parser, Debug)]
#[command(name = "rtsp-client")]
#[command(about = "Adaptive RTSP streaming client", long_about = None)]
struct Args {
    /// Configuration file (TOML, [client] section)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address
    #[arg(short, long)]
    server: Option<Ipv4Addr>,

    /// Server control (TCP) port
    #[arg(long)]
    control_port: Option<u16>,

    /// Server feedback (UDP) port
    #[arg(long)]
    feedback_port: Option<u16>,

    /// Local data (UDP) port
    #[arg(long)]
    data_port: Option<u16>,

    /// Stream to request
    #[arg(short, long)]
    file: Option<String>,

    /// Play for this many seconds when no schedule is configured
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,
}

impl Args {
    fn apply(&self, section: &mut ClientSection) {
        if let Some(server) = self.server {
            section.server = server;
        }
        if let Some(port) = self.control_port {
            section.control_port = port;
        }
        if let Some(port) = self.feedback_port {
            section.feedback_port = port;
        }
        if let Some(port) = self.data_port {
            section.data_port = port;
        }
        if let Some(file) = &self.file {
            section.file = file.clone();
        }
        if let Some(stats) = self.stats {
            section.stats_interval_secs = stats;
        }
        if section.schedule.is_empty() {
            section.schedule = default_schedule(Duration::from_secs(self.duration));
        }
    }
}

/// SETUP, PLAY shortly after, TEARDOWN once `play_for` has elapsed
fn default_schedule(play_for: Duration) -> Vec<ScheduleEntry> {
    let teardown_ms = DEFAULT_PLAY_DELAY_MS + play_for.as_millis() as u64;
    [(0, "SETUP"), (DEFAULT_PLAY_DELAY_MS, "PLAY"), (teardown_ms, "TEARDOWN")]
        .into_iter()
        .map(|(at_ms, method)| ScheduleEntry {
            at_ms,
            method: method.to_string(),
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if args.example_config {
        print!("{}", toml::to_string_pretty(&Config::example_client())?);
        return Ok(());
    }

    let mut section = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .client
            .unwrap_or_default(),
        None => ClientSection::default(),
    };
    args.apply(&mut section);

    let mut host = ClientHost::connect(section.to_host_config()?)
        .with_context(|| format!("failed to connect to {}:{}", section.server, section.control_port))?;
    tracing::info!("Requesting {} on data port {}", section.file, host.data_addr()?);

    let start = Instant::now();
    let stats_interval = section.stats_interval();
    if !stats_interval.is_zero() {
        let stats = host.stats_handle();
        thread::spawn(move || loop {
            thread::sleep(stats_interval);
            let snapshot = *stats.read();
            display_compact(&client_summary(&snapshot, start.elapsed()));
        });
    }

    let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
    let stats = host.run(shutdown_rx)?;
    drop(shutdown_tx);

    display_client_report(&stats, start.elapsed());
    Ok(())
}
