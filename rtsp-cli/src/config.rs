//! Configuration file support for the RTSP tools

use rtsp_io::{
    ClientHostConfig, ServerHostConfig, DEFAULT_CONTROL_PORT, DEFAULT_DATA_PORT,
    DEFAULT_FEEDBACK_PORT,
};
use rtsp_protocol::client::{ClientConfig, DEFAULT_FILE_NAME, INITIAL_BUFFERING_PERIODS};
use rtsp_protocol::congestion::{CongestionConfig, StreakPolicy};
use rtsp_protocol::message::Method;
use rtsp_protocol::server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Low-loss streak required before the level is halved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakSetting {
    /// Fixed number of reports
    Fixed(u32),
    /// `max_level + 2 - level` reports
    LevelHeadroom,
}

impl From<StreakSetting> for StreakPolicy {
    fn from(setting: StreakSetting) -> Self {
        match setting {
            StreakSetting::Fixed(n) => StreakPolicy::Fixed(n),
            StreakSetting::LevelHeadroom => StreakPolicy::LevelHeadroom,
        }
    }
}

/// Congestion controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionSection {
    #[serde(default = "default_min_level")]
    pub min_level: u32,
    #[serde(default = "default_max_level")]
    pub max_level: u32,
    #[serde(default = "default_max_level")]
    pub initial_level: u32,
    #[serde(default = "default_low_loss")]
    pub low_loss_threshold: f64,
    #[serde(default = "default_high_loss")]
    pub high_loss_threshold: f64,
    #[serde(default = "default_streak")]
    pub streak: StreakSetting,
    #[serde(default = "default_true")]
    pub use_threshold_floor: bool,
}

fn default_min_level() -> u32 {
    1
}

fn default_max_level() -> u32 {
    16
}

fn default_low_loss() -> f64 {
    0.05
}

fn default_high_loss() -> f64 {
    0.2
}

fn default_streak() -> StreakSetting {
    StreakSetting::Fixed(2)
}

fn default_true() -> bool {
    true
}

impl Default for CongestionSection {
    fn default() -> Self {
        CongestionSection {
            min_level: default_min_level(),
            max_level: default_max_level(),
            initial_level: default_max_level(),
            low_loss_threshold: default_low_loss(),
            high_loss_threshold: default_high_loss(),
            streak: default_streak(),
            use_threshold_floor: true,
        }
    }
}

impl CongestionSection {
    pub fn to_congestion_config(&self) -> Result<CongestionConfig, ConfigError> {
        if self.min_level == 0 || self.min_level > self.max_level {
            return Err(ConfigError::Invalid(format!(
                "congestion levels must satisfy 1 <= min_level <= max_level (got {}..{})",
                self.min_level, self.max_level
            )));
        }
        if !(0.0..=1.0).contains(&self.low_loss_threshold)
            || !(0.0..=1.0).contains(&self.high_loss_threshold)
            || self.low_loss_threshold > self.high_loss_threshold
        {
            return Err(ConfigError::Invalid(format!(
                "loss thresholds must satisfy 0 <= low <= high <= 1 (got {} / {})",
                self.low_loss_threshold, self.high_loss_threshold
            )));
        }

        Ok(CongestionConfig {
            min_level: self.min_level,
            max_level: self.max_level,
            initial_level: self.initial_level,
            low_loss_threshold: self.low_loss_threshold,
            high_loss_threshold: self.high_loss_threshold,
            streak: self.streak.into(),
            use_threshold_floor: self.use_threshold_floor,
        })
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: Ipv4Addr,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_feedback_port")]
    pub feedback_port: u16,
    /// Port clients receive data on
    #[serde(default = "default_data_port")]
    pub client_data_port: u16,
    /// Directory holding the frame-size files
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    #[serde(default = "default_frame_period")]
    pub frame_period_ms: u64,
    #[serde(default = "default_frame_period")]
    pub send_delay_ms: u64,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub congestion: CongestionSection,
}

fn default_bind() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_feedback_port() -> u16 {
    DEFAULT_FEEDBACK_PORT
}

fn default_data_port() -> u16 {
    DEFAULT_DATA_PORT
}

fn default_media_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_frame_period() -> u64 {
    32
}

fn default_stats_interval() -> u64 {
    1
}

impl ServerSection {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn to_host_config(&self) -> Result<ServerHostConfig, ConfigError> {
        if self.frame_period_ms == 0 || self.send_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "frame_period_ms and send_delay_ms must be positive".to_string(),
            ));
        }

        Ok(ServerHostConfig {
            control_addr: SocketAddr::from((self.bind, self.control_port)),
            feedback_addr: SocketAddr::from((self.bind, self.feedback_port)),
            client_data_port: self.client_data_port,
            session: ServerConfig {
                frame_period: Duration::from_millis(self.frame_period_ms),
                send_delay: Duration::from_millis(self.send_delay_ms),
                congestion: self.congestion.to_congestion_config()?,
            },
            ..ServerHostConfig::default()
        })
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            bind: default_bind(),
            control_port: DEFAULT_CONTROL_PORT,
            feedback_port: DEFAULT_FEEDBACK_PORT,
            client_data_port: DEFAULT_DATA_PORT,
            media_dir: default_media_dir(),
            frame_period_ms: default_frame_period(),
            send_delay_ms: default_frame_period(),
            stats_interval_secs: default_stats_interval(),
            congestion: CongestionSection::default(),
        }
    }
}

/// One scheduled control request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Offset from session start
    pub at_ms: u64,
    /// SETUP, PLAY, PAUSE, TEARDOWN, MODIFY or DESCRIBE
    pub method: String,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_server")]
    pub server: Ipv4Addr,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_feedback_port")]
    pub feedback_port: u16,
    #[serde(default = "default_data_port")]
    pub data_port: u16,
    /// Stream requested by SETUP
    #[serde(default = "default_file")]
    pub file: String,
    #[serde(default = "default_feedback_period")]
    pub feedback_period_ms: u64,
    #[serde(default = "default_buffering_periods")]
    pub buffering_periods: u32,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
}

fn default_server() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

fn default_file() -> String {
    DEFAULT_FILE_NAME.to_string()
}

fn default_feedback_period() -> u64 {
    400
}

fn default_buffering_periods() -> u32 {
    INITIAL_BUFFERING_PERIODS
}

impl ClientSection {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Parse the schedule into session requests
    pub fn schedule(&self) -> Result<Vec<(Duration, Method)>, ConfigError> {
        self.schedule
            .iter()
            .map(|entry| {
                let method = entry.method.parse::<Method>().map_err(|_| {
                    ConfigError::Invalid(format!("unknown method in schedule: {}", entry.method))
                })?;
                Ok((Duration::from_millis(entry.at_ms), method))
            })
            .collect()
    }

    pub fn to_host_config(&self) -> Result<ClientHostConfig, ConfigError> {
        if self.feedback_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "feedback_period_ms must be positive".to_string(),
            ));
        }

        Ok(ClientHostConfig {
            server_control: SocketAddr::from((self.server, self.control_port)),
            server_feedback: SocketAddr::from((self.server, self.feedback_port)),
            data_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.data_port)),
            session: ClientConfig {
                file_name: self.file.clone(),
                feedback_period: Duration::from_millis(self.feedback_period_ms),
                buffering_periods: self.buffering_periods,
                ..ClientConfig::default()
            },
            schedule: self.schedule()?,
            ..ClientHostConfig::default()
        })
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        ClientSection {
            server: default_server(),
            control_port: DEFAULT_CONTROL_PORT,
            feedback_port: DEFAULT_FEEDBACK_PORT,
            data_port: DEFAULT_DATA_PORT,
            file: default_file(),
            feedback_period_ms: default_feedback_period(),
            buffering_periods: default_buffering_periods(),
            stats_interval_secs: default_stats_interval(),
            schedule: Vec::new(),
        }
    }
}

/// Combined configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Option<ServerSection>,
    pub client: Option<ClientSection>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example server configuration
    pub fn example_server() -> Self {
        Config {
            server: Some(ServerSection {
                media_dir: PathBuf::from("media"),
                ..ServerSection::default()
            }),
            client: None,
        }
    }

    /// Create example client configuration: a full session with a pause
    pub fn example_client() -> Self {
        let entry = |at_ms, method: &str| ScheduleEntry {
            at_ms,
            method: method.to_string(),
        };
        Config {
            server: None,
            client: Some(ClientSection {
                file: "clip.dat".to_string(),
                schedule: vec![
                    entry(0, "SETUP"),
                    entry(500, "PLAY"),
                    entry(5_000, "PAUSE"),
                    entry(6_000, "PLAY"),
                    entry(15_000, "TEARDOWN"),
                ],
                ..ClientSection::default()
            }),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_configs() {
        let server = Config::example_server();
        assert!(server.server.is_some());

        let client = Config::example_client();
        let schedule = client.client.unwrap().schedule().unwrap();
        assert_eq!(schedule.len(), 5);
        assert_eq!(schedule[0], (Duration::ZERO, Method::Setup));
        assert_eq!(schedule[4].1, Method::Teardown);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = Config::example_client();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        let client = parsed.client.unwrap();
        assert_eq!(client.file, "clip.dat");
        assert_eq!(client.schedule.len(), 5);
    }

    #[test]
    fn test_defaults_from_minimal_file() {
        let config: Config = toml::from_str(
            r#"
            [server]
            media_dir = "/srv/media"

            [server.congestion]
            streak = "level_headroom"
            "#,
        )
        .unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.control_port, 5540);
        assert_eq!(server.frame_period_ms, 32);

        let host = server.to_host_config().unwrap();
        assert_eq!(host.session.frame_period, Duration::from_millis(32));
        assert_eq!(host.session.congestion.initial_level, 16);
        assert_eq!(host.session.congestion.streak, StreakPolicy::LevelHeadroom);
    }

    #[test]
    fn test_fixed_streak_table() {
        let config: Config = toml::from_str(
            r#"
            [server.congestion]
            streak = { fixed = 3 }
            "#,
        )
        .unwrap();
        let congestion = config.server.unwrap().congestion;
        assert_eq!(congestion.streak, StreakSetting::Fixed(3));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut section = ServerSection::default();
        section.congestion.low_loss_threshold = 0.5;
        assert!(section.to_host_config().is_err());

        let mut section = ServerSection::default();
        section.frame_period_ms = 0;
        assert!(section.to_host_config().is_err());

        let client = ClientSection {
            schedule: vec![ScheduleEntry {
                at_ms: 0,
                method: "RECORD".to_string(),
            }],
            ..ClientSection::default()
        };
        assert!(matches!(client.schedule(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_client_host_config() {
        let client = Config::example_client().client.unwrap();
        let host = client.to_host_config().unwrap();
        assert_eq!(host.server_control, "127.0.0.1:5540".parse::<SocketAddr>().unwrap());
        assert_eq!(host.server_feedback, "127.0.0.1:5541".parse::<SocketAddr>().unwrap());
        assert_eq!(host.session.file_name, "clip.dat");
        assert_eq!(host.session.feedback_period, Duration::from_millis(400));
    }
}
