//! RTSP - Adaptive Streaming
//!
//! High-level Rust API for adaptive RTSP/RTP streaming with loss-driven
//! congestion control.

pub use rtsp_io as io;
pub use rtsp_protocol as protocol;

// Re-export commonly used types
pub use io::{ClientHost, ClientHostConfig, FileSourceProvider, ServerHost, ServerHostConfig};
pub use protocol::{
    ClientConfig, ClientSession, CongestionConfig, CongestionController, Method, SeqNumber,
    ServerConfig, ServerSession, SessionContext, SessionState,
};
