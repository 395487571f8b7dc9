//! Adaptive RTSP Streaming Core
//!
//! This crate implements the protocol side of an adaptive media stream:
//! the RTSP-like control codec and session state machine, the RTP pacer on
//! the server, the client playout buffer, RTCP loss feedback, and the
//! congestion controller that scales frame sizes from the reported loss.
//!
//! Sessions do no I/O of their own. A host drives them through
//! [`SessionContext`], which supplies the clock, timers and transports.

pub mod buffer;
pub mod client;
pub mod congestion;
pub mod context;
pub mod loss;
pub mod message;
pub mod packet;
pub mod sequence;
pub mod server;
pub mod session;
pub mod source;

pub use buffer::{BufferError, InsertOutcome, PlayedFrame, Playout, PlayoutBuffer};
pub use client::{ClientConfig, ClientSession, ClientStats, ClientTimer};
pub use congestion::{
    CongestionConfig, CongestionController, CongestionStats, LevelChange, StreakPolicy,
};
pub use context::{SessionContext, SessionEvent, TimerId, TransportError};
pub use loss::LossAccounting;
pub use message::{ControlRequest, ControlResponse, MessageError, Method, StatusCode};
pub use packet::{DataHeader, DataPacket, FeedbackReport, PacketError};
pub use sequence::SeqNumber;
pub use server::{ServerConfig, ServerSession, ServerStats, ServerTimer};
pub use session::{SessionError, SessionState};
pub use source::{
    ConstantProvider, ConstantSource, FrameSizeList, FrameSource, SourceCatalog, SourceError,
    SourceProvider,
};
