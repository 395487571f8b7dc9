//! Host interface for sessions
//!
//! Sessions never own sockets or clocks. Every hook receives a
//! [`SessionContext`] through which it reads the time, arms and cancels
//! one-shot timers, and hands bytes to the transport. Recurring timers are
//! one-shot timers the session re-arms from its own callback.

use crate::message::Method;
use crate::sequence::SeqNumber;
use crate::session::SessionState;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Handle to an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub const fn new(raw: u64) -> Self {
        TimerId(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Transport failures reported by the host
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Channel is not connected")]
    NotConnected,

    #[error("Channel is closed")]
    Closed,

    #[error("Datagram too large: {0} bytes")]
    TooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Observable session events
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    RequestSent {
        method: Method,
    },
    ResponseReceived {
        method: Method,
        status: u16,
    },
    FrameSent {
        seq: SeqNumber,
        size: usize,
        level: u32,
    },
    FrameReceived {
        seq: SeqNumber,
        size: usize,
    },
    FramePlayed {
        seq: SeqNumber,
        size: usize,
    },
    FrameMissing {
        seq: SeqNumber,
    },
    FrameSkipped {
        seq: SeqNumber,
    },
    FeedbackSent {
        fraction_lost: f64,
    },
    FeedbackReceived {
        fraction_lost: f64,
    },
    CongestionChanged {
        from: u32,
        to: u32,
    },
}

/// Everything a session needs from its host
pub trait SessionContext {
    /// Timer token handed back to the session when a timer fires
    type Timer;

    /// Time elapsed on the host clock
    fn now(&self) -> Duration;

    /// Arm a one-shot timer
    fn schedule(&mut self, delay: Duration, timer: Self::Timer) -> TimerId;

    /// Cancel an armed timer; it must not fire afterwards
    fn cancel(&mut self, id: TimerId);

    /// Write a message on the reliable control channel
    fn send_control(&mut self, message: Bytes) -> Result<(), TransportError>;

    /// Send a datagram on the session's unreliable channel (data for the
    /// server, feedback for the client)
    fn send_datagram(&mut self, datagram: Bytes) -> Result<(), TransportError>;

    /// Observe a session event
    fn emit(&mut self, _event: SessionEvent) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Context that records everything a session does
    pub(crate) struct RecordingContext<T> {
        pub now: Duration,
        pub next_id: u64,
        pub timers: Vec<(TimerId, Duration, T)>,
        pub control: Vec<Bytes>,
        pub datagrams: Vec<Bytes>,
        pub events: Vec<SessionEvent>,
    }

    impl<T: Clone> RecordingContext<T> {
        pub fn new() -> Self {
            RecordingContext {
                now: Duration::ZERO,
                next_id: 0,
                timers: Vec::new(),
                control: Vec::new(),
                datagrams: Vec::new(),
                events: Vec::new(),
            }
        }

        /// Remove and return the earliest armed timer
        pub fn pop_timer(&mut self) -> Option<(TimerId, T)> {
            let index = (0..self.timers.len()).min_by_key(|&i| (self.timers[i].1, self.timers[i].0))?;
            let (id, at, timer) = self.timers.remove(index);
            self.now = self.now.max(at);
            Some((id, timer))
        }

        pub fn armed(&self) -> usize {
            self.timers.len()
        }
    }

    impl<T: Clone> SessionContext for RecordingContext<T> {
        type Timer = T;

        fn now(&self) -> Duration {
            self.now
        }

        fn schedule(&mut self, delay: Duration, timer: T) -> TimerId {
            self.next_id += 1;
            let id = TimerId::new(self.next_id);
            self.timers.push((id, self.now + delay, timer));
            id
        }

        fn cancel(&mut self, id: TimerId) {
            self.timers.retain(|(armed, _, _)| *armed != id);
        }

        fn send_control(&mut self, message: Bytes) -> Result<(), TransportError> {
            self.control.push(message);
            Ok(())
        }

        fn send_datagram(&mut self, datagram: Bytes) -> Result<(), TransportError> {
            self.datagrams.push(datagram);
            Ok(())
        }

        fn emit(&mut self, event: SessionEvent) {
            self.events.push(event);
        }
    }
}
