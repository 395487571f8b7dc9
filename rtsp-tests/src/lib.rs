//! Test support for the RTSP workspace
//!
//! [`sim`] wires a [`ClientSession`](rtsp_protocol::ClientSession) and a
//! [`ServerSession`](rtsp_protocol::ServerSession) together on a virtual
//! clock so whole sessions can be run deterministically.

pub mod sim;

pub use sim::{Side, Simulation, DEFAULT_LATENCY};
