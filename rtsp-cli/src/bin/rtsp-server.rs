//! RTSP Server - adaptive frame streaming server
//!
//! Streams frame-size files from a media directory to one client at a time,
//! scaling frames down when the client reports loss.

use anyhow::Context;
use clap::Parser;
use crossbeam::channel;
use rtsp_cli::config::{Config, ServerSection};
use rtsp_cli::stats::{display_compact, server_summary};
use rtsp_io::{FileSourceProvider, ServerHost};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rtsp-server")]
#[command(about = "Adaptive RTSP streaming server", long_about = None)]
struct Args {
    /// Configuration file (TOML, [server] section)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(short, long)]
    bind: Option<Ipv4Addr>,

    /// Control (TCP) port
    #[arg(long)]
    control_port: Option<u16>,

    /// Feedback (UDP) port
    #[arg(long)]
    feedback_port: Option<u16>,

    /// Port clients receive data on
    #[arg(long)]
    client_data_port: Option<u16>,

    /// Directory holding frame-size files
    #[arg(short, long)]
    media_dir: Option<PathBuf>,

    /// Frame period in milliseconds
    #[arg(long)]
    frame_period_ms: Option<u64>,

    /// Starting congestion level
    #[arg(long)]
    initial_level: Option<u32>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,
}

impl Args {
    fn apply(&self, section: &mut ServerSection) {
        if let Some(bind) = self.bind {
            section.bind = bind;
        }
        if let Some(port) = self.control_port {
            section.control_port = port;
        }
        if let Some(port) = self.feedback_port {
            section.feedback_port = port;
        }
        if let Some(port) = self.client_data_port {
            section.client_data_port = port;
        }
        if let Some(dir) = &self.media_dir {
            section.media_dir = dir.clone();
        }
        if let Some(period) = self.frame_period_ms {
            section.frame_period_ms = period;
            section.send_delay_ms = period;
        }
        if let Some(level) = self.initial_level {
            section.congestion.initial_level = level;
        }
        if let Some(stats) = self.stats {
            section.stats_interval_secs = stats;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if args.example_config {
        print!("{}", toml::to_string_pretty(&Config::example_server())?);
        return Ok(());
    }

    let mut section = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .server
            .unwrap_or_default(),
        None => ServerSection::default(),
    };
    args.apply(&mut section);

    let provider = FileSourceProvider::new(&section.media_dir);
    let host = ServerHost::bind(section.to_host_config()?, provider)?;
    tracing::info!(
        "RTSP server serving {} on {}",
        section.media_dir.display(),
        host.control_addr()?
    );

    let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
    if let Some(secs) = args.duration {
        let shutdown_tx = shutdown_tx.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            shutdown_tx.send(()).ok();
        });
    }

    let stats_interval = section.stats_interval();
    if !stats_interval.is_zero() {
        let stats = host.stats_handle();
        let start = Instant::now();
        thread::spawn(move || loop {
            thread::sleep(stats_interval);
            let snapshot = *stats.read();
            display_compact(&server_summary(&snapshot, start.elapsed()));
        });
    }

    host.run(shutdown_rx)?;
    drop(shutdown_tx);
    Ok(())
}
