//! RTSP CLI Library
//!
//! Shared functionality for the RTSP command-line tools.

pub mod config;
pub mod stats;

pub use config::{ClientSection, Config, ConfigError, CongestionSection, ServerSection};
pub use stats::{client_summary, format_bandwidth, format_bytes, format_duration, server_summary};
