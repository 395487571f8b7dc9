//! Statistics display and formatting

use rtsp_protocol::client::ClientStats;
use rtsp_protocol::server::ServerStats;
use std::io::Write;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Format a loss fraction as a percentage
pub fn format_loss(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

fn throughput_bps(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 * 8.0 / secs) as u64
    } else {
        0
    }
}

/// One-line server summary
pub fn server_summary(stats: &ServerStats, elapsed: Duration) -> String {
    let floor = stats
        .threshold_floor
        .map_or_else(|| "-".to_string(), |floor| floor.to_string());
    format!(
        "[{:8}] Level: {:2} (floor {}) | Frames: {} | Sent: {} | Rate: {} | Reports: {}",
        format_duration(elapsed),
        stats.level,
        floor,
        stats.frames_sent,
        format_bytes(stats.bytes_sent),
        format_bandwidth(throughput_bps(stats.bytes_sent, elapsed)),
        stats.feedback_reports
    )
}

/// One-line client summary
pub fn client_summary(stats: &ClientStats, elapsed: Duration) -> String {
    format!(
        "[{:8}] Played: {} | Lost: {} | Skipped: {} | Late: {} | Recv: {} | Rate: {} | Loss: {}",
        format_duration(elapsed),
        stats.frames_played,
        stats.frames_lost,
        stats.frames_skipped,
        stats.late_frames,
        format_bytes(stats.bytes_received),
        format_bandwidth(throughput_bps(stats.bytes_received, elapsed)),
        format_loss(stats.fraction_lost)
    )
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact(line: &str) {
    print!("\r{}        ", line);
    // Progress output only
    std::io::stdout().flush().ok();
}

/// Display the final client report
pub fn display_client_report(stats: &ClientStats, elapsed: Duration) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ SESSION STATISTICS                                          │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Duration:   {}", format_duration(elapsed));
    println!(
        "│ Received:   {} in {} packets",
        format_bytes(stats.bytes_received),
        stats.packets_received
    );
    println!(
        "│ Playout:    {} played / {} lost / {} skipped",
        stats.frames_played, stats.frames_lost, stats.frames_skipped
    );
    println!(
        "│ Dropped:    {} late / {} duplicate",
        stats.late_frames, stats.duplicate_frames
    );
    println!(
        "│ Feedback:   {} reports, last loss {}",
        stats.feedback_sent,
        format_loss(stats.fraction_lost)
    );
    println!("└─────────────────────────────────────────────────────────────┘");
}
