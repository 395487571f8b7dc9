//! RTSP session states and transitions
//!
//! Both ends share the same three-state machine:
//!
//! ```text
//!          SETUP           PLAY
//!   Init ────────► Ready ────────► Playing
//!    ▲              ▲  ◄──────────    │
//!    │              │     PAUSE       │
//!    └──────────────┴─────────────────┘
//!                TEARDOWN
//! ```
//!
//! MODIFY and DESCRIBE never change state.

use crate::buffer::BufferError;
use crate::context::{SessionContext, TimerId, TransportError};
use crate::message::{MessageError, Method};
use crate::packet::PacketError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No stream set up
    #[default]
    Init,
    /// Stream set up, not playing
    Ready,
    /// Frames are flowing
    Playing,
}

impl SessionState {
    /// State after handling `method`, or `None` if the method is not valid
    /// in this state
    pub fn after(self, method: Method) -> Option<SessionState> {
        use SessionState::*;
        match (method, self) {
            (Method::Setup, _) => Some(Ready),
            (Method::Play, Ready | Playing) => Some(Playing),
            (Method::Pause, Ready | Playing) => Some(Ready),
            (Method::Play | Method::Pause, Init) => None,
            (Method::Teardown, _) => Some(Init),
            (Method::Modify | Method::Describe, state) => Some(state),
        }
    }

    pub fn is_playing(self) -> bool {
        self == SessionState::Playing
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "INIT",
            SessionState::Ready => "READY",
            SessionState::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}

/// Session errors
///
/// None of these are fatal: the session logs them, drops the offending
/// input and keeps its state.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Malformed control message: {0}")]
    Message(#[from] MessageError),

    #[error("Malformed datagram: {0}")]
    Packet(#[from] PacketError),

    #[error("Playout buffer: {0}")]
    Buffer(#[from] BufferError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{method} failed with status {status}")]
    Status { method: Method, status: u16 },

    #[error("{0} request is missing its argument")]
    MissingArgument(Method),

    #[error("{0} response is missing its parameter")]
    MissingParameter(Method),

    #[error("Session has not been set up")]
    NotSetUp,
}

/// One armed timer owned by a session
///
/// A fire is only honored if its id matches the armed one, so a timer that
/// was cancelled or replaced can never run its callback.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot(Option<TimerId>);

impl TimerSlot {
    pub(crate) fn arm<C: SessionContext>(&mut self, ctx: &mut C, delay: Duration, timer: C::Timer) {
        self.cancel(ctx);
        self.0 = Some(ctx.schedule(delay, timer));
    }

    pub(crate) fn cancel<C: SessionContext>(&mut self, ctx: &mut C) {
        if let Some(id) = self.0.take() {
            ctx.cancel(id);
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.0.is_some()
    }

    /// Accept a fire for `id`, disarming the slot
    pub(crate) fn fire(&mut self, id: TimerId) -> bool {
        if self.0 == Some(id) {
            self.0 = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_transitions() {
        assert_eq!(Init.after(Method::Setup), Some(Ready));
        assert_eq!(Ready.after(Method::Play), Some(Playing));
        assert_eq!(Playing.after(Method::Pause), Some(Ready));
        assert_eq!(Playing.after(Method::Teardown), Some(Init));
        assert_eq!(Ready.after(Method::Teardown), Some(Init));
        assert_eq!(Playing.after(Method::Setup), Some(Ready));
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(Init.after(Method::Play), None);
        assert_eq!(Init.after(Method::Pause), None);
    }

    #[test]
    fn test_modify_keeps_state() {
        for state in [Init, Ready, Playing] {
            assert_eq!(state.after(Method::Modify), Some(state));
            assert_eq!(state.after(Method::Describe), Some(state));
        }
    }
}
