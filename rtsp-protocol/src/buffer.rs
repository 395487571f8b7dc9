//! Client playout buffer
//!
//! Frames arrive on the data channel in any order and are held by sequence
//! number until the consumption timer asks for the next one. A frame that is
//! missing at consumption time is reported once and given one more cycle; if
//! it is still missing on the following tick it is skipped.

use crate::sequence::SeqNumber;
use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;

/// Default number of frames the buffer may hold ahead of playout
pub const DEFAULT_CAPACITY: usize = 8192;

/// Buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Sequence number {seq} is {distance} frames ahead of playout (capacity {capacity})")]
    OutOfRange {
        seq: SeqNumber,
        distance: i32,
        capacity: usize,
    },
}

/// Outcome of inserting a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored for playout
    Buffered,
    /// Replaced a not-yet-consumed copy of the same frame
    Duplicate,
    /// Older than the next frame to play; dropped
    Late,
}

/// A frame handed to playout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedFrame {
    pub seq: SeqNumber,
    pub payload: Bytes,
}

/// Outcome of one consumption tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playout {
    /// The expected frame was present and is now playing
    Played {
        frame: PlayedFrame,
        /// Frame given up on before this one was served
        skipped: Option<SeqNumber>,
    },
    /// The expected frame is missing; this counts as a loss event
    Missing {
        seq: SeqNumber,
        skipped: Option<SeqNumber>,
    },
}

impl Playout {
    pub fn is_loss(&self) -> bool {
        matches!(self, Playout::Missing { .. })
    }

    pub fn skipped(&self) -> Option<SeqNumber> {
        match self {
            Playout::Played { skipped, .. } | Playout::Missing { skipped, .. } => *skipped,
        }
    }
}

/// Playout buffer keyed by sequence number
///
/// Invariant: never holds a frame older than `next_expected`.
#[derive(Debug)]
pub struct PlayoutBuffer {
    frames: BTreeMap<u32, Bytes>,
    next_expected: SeqNumber,
    /// Frame that already missed one tick
    grace: Option<SeqNumber>,
    playing: Option<SeqNumber>,
    capacity: usize,
}

impl PlayoutBuffer {
    pub fn new(capacity: usize) -> Self {
        PlayoutBuffer {
            frames: BTreeMap::new(),
            next_expected: SeqNumber::ZERO,
            grace: None,
            playing: None,
            capacity: capacity.max(1),
        }
    }

    /// Store a received frame
    pub fn insert(&mut self, seq: SeqNumber, payload: Bytes) -> Result<InsertOutcome, BufferError> {
        if seq.lt(self.next_expected) {
            return Ok(InsertOutcome::Late);
        }

        let distance = self.next_expected.distance_to(seq);
        if distance as usize >= self.capacity {
            return Err(BufferError::OutOfRange {
                seq,
                distance,
                capacity: self.capacity,
            });
        }

        match self.frames.insert(seq.as_raw(), payload) {
            Some(_) => Ok(InsertOutcome::Duplicate),
            None => Ok(InsertOutcome::Buffered),
        }
    }

    /// Run one consumption tick
    pub fn consume(&mut self) -> Playout {
        let mut skipped = None;

        if self.grace == Some(self.next_expected) && !self.contains(self.next_expected) {
            // Second consecutive miss: give up on this frame
            skipped = Some(self.next_expected);
            self.advance();
        }

        let seq = self.next_expected;
        match self.frames.remove(&seq.as_raw()) {
            Some(payload) => {
                self.playing = Some(seq);
                self.advance();
                Playout::Played {
                    frame: PlayedFrame { seq, payload },
                    skipped,
                }
            }
            None => {
                self.grace = Some(seq);
                Playout::Missing { seq, skipped }
            }
        }
    }

    fn advance(&mut self) {
        self.next_expected = self.next_expected.next();
        self.grace = None;
    }

    pub fn contains(&self, seq: SeqNumber) -> bool {
        self.frames.contains_key(&seq.as_raw())
    }

    /// Next sequence number playout will ask for
    pub fn next_expected(&self) -> SeqNumber {
        self.next_expected
    }

    /// Sequence number of the frame currently playing
    pub fn playing(&self) -> Option<SeqNumber> {
        self.playing
    }

    /// Number of frames waiting for playout
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PlayoutBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
