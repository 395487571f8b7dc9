//! RTP and RTCP Datagram Formats
//!
//! Data datagrams (server → client) carry an 8-byte header followed by the
//! frame payload:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Timestamp (milliseconds)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Payload                            |
//! ```
//!
//! Feedback datagrams (client → server) carry one loss fraction encoded as a
//! 4-byte unsigned value scaled against `u32::MAX`.

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the data packet header in bytes
pub const HEADER_SIZE: usize = 8;

/// Largest UDP payload we attempt to send (IPv4)
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Largest frame payload that fits in a single datagram
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

/// Size of a feedback report in bytes
pub const FEEDBACK_SIZE: usize = 4;

/// Packet parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid feedback report length: {0} bytes")]
    InvalidFeedbackLength(usize),
}

/// Data packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub seq: SeqNumber,
    /// Send time in milliseconds since the server session started
    pub timestamp: u32,
}

impl DataHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        Ok(DataHeader {
            seq: SeqNumber::new(buf.get_u32()),
            timestamp: buf.get_u32(),
        })
    }

    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u32(self.seq.as_raw());
        buf.put_u32(self.timestamp);
    }
}

/// One media frame on the data channel
#[derive(Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub header: DataHeader,
    pub payload: Bytes,
}

impl DataPacket {
    pub fn new(seq: SeqNumber, timestamp: u32, payload: Bytes) -> Self {
        DataPacket {
            header: DataHeader { seq, timestamp },
            payload,
        }
    }

    /// Frame of `size` zero bytes, standing in for encoded media
    pub fn synthetic(seq: SeqNumber, timestamp: u32, size: usize) -> Self {
        Self::new(seq, timestamp, Bytes::from(vec![0u8; size]))
    }

    #[inline]
    pub fn seq_number(&self) -> SeqNumber {
        self.header.seq
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = DataHeader::from_bytes(bytes)?;
        Ok(DataPacket {
            header,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }

    /// Parse from an owned buffer without copying the payload
    pub fn from_shared(mut bytes: Bytes) -> Result<Self, PacketError> {
        let header = DataHeader::from_bytes(&bytes)?;
        bytes.advance(HEADER_SIZE);
        Ok(DataPacket {
            header,
            payload: bytes,
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes, PacketError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(PacketError::PayloadTooLarge(self.payload.len()));
        }
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }
}

impl fmt::Debug for DataPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPacket")
            .field("seq", &self.header.seq)
            .field("timestamp", &self.header.timestamp)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Loss report sent on the feedback channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackReport {
    /// Smoothed fraction of frames lost, in `[0, 1]`
    pub fraction_lost: f64,
}

impl FeedbackReport {
    pub fn new(fraction_lost: f64) -> Self {
        FeedbackReport { fraction_lost }
    }

    /// Encode as `round(fraction * u32::MAX)`, clamping to `[0, 1]`
    pub fn to_bytes(&self) -> Bytes {
        let clamped = if self.fraction_lost.is_nan() {
            0.0
        } else {
            self.fraction_lost.clamp(0.0, 1.0)
        };
        let scaled = (clamped * u32::MAX as f64).round() as u32;

        let mut buf = BytesMut::with_capacity(FEEDBACK_SIZE);
        buf.put_u32(scaled);
        buf.freeze()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() != FEEDBACK_SIZE {
            return Err(PacketError::InvalidFeedbackLength(bytes.len()));
        }
        let mut buf = bytes;
        let scaled = buf.get_u32();
        Ok(FeedbackReport {
            fraction_lost: scaled as f64 / u32::MAX as f64,
        })
    }
}
