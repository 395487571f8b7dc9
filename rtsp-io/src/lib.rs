//! RTSP I/O and Platform Abstraction
//!
//! This crate runs the sans-I/O sessions from `rtsp-protocol` over real
//! sockets: a TCP control channel, UDP data and feedback channels, a timer
//! queue on a monotonic clock, and file-backed frame sources.

pub mod control;
pub mod host;
pub mod socket;
pub mod source;
pub mod time;

pub use control::{ControlError, ControlListener, ControlStream};
pub use host::{
    ClientHost, ClientHostConfig, HostError, ServerHost, ServerHostConfig, DEFAULT_CONTROL_PORT,
    DEFAULT_DATA_PORT, DEFAULT_FEEDBACK_PORT,
};
pub use socket::{DatagramSocket, SocketError};
pub use source::FileSourceProvider;
pub use time::{Clock, TimerQueue};
