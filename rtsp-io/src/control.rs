//! TCP control channel
//!
//! Control messages travel on a reliable stream, each framed with a 4-byte
//! big-endian length prefix. Streams are non-blocking: writes are queued
//! and flushed when the host polls, reads are buffered until a whole frame
//! has arrived.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rtsp_protocol::message::MAX_MESSAGE_SIZE;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Length prefix size
pub const FRAME_HEADER_SIZE: usize = 4;

/// Control channel errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Control frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Control channel closed by peer")]
    Closed,

    #[error("IPv6 is not supported: {0}")]
    Ipv6Unsupported(SocketAddr),
}

/// Append one length-prefixed frame to `buf`
pub fn encode_frame(message: &[u8], buf: &mut BytesMut) -> Result<(), ControlError> {
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(ControlError::FrameTooLarge {
            size: message.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    buf.reserve(FRAME_HEADER_SIZE + message.len());
    buf.put_u32(message.len() as u32);
    buf.put_slice(message);
    Ok(())
}

/// Split one complete frame off the front of `buf`
///
/// Returns `Ok(None)` until the whole frame has been buffered.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, ControlError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ControlError::FrameTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    if buf.len() < FRAME_HEADER_SIZE + len {
        return Ok(None);
    }
    buf.advance(FRAME_HEADER_SIZE);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Listening end of the control channel (server)
pub struct ControlListener {
    inner: TcpListener,
}

impl ControlListener {
    pub fn bind(addr: SocketAddr) -> Result<Self, ControlError> {
        if addr.is_ipv6() {
            return Err(ControlError::Ipv6Unsupported(addr));
        }

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(8)?;
        socket.set_nonblocking(true)?;

        Ok(ControlListener {
            inner: socket.into(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControlError> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept a pending connection, if any
    pub fn accept(&self) -> Result<Option<ControlStream>, ControlError> {
        match self.inner.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "Control connection accepted");
                Ok(Some(ControlStream::from_stream(stream)?))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// One end of an established control channel
pub struct ControlStream {
    stream: TcpStream,
    peer: SocketAddr,
    read_buf: BytesMut,
    write_buf: BytesMut,
    closed: bool,
}

impl ControlStream {
    /// Connect to a listening server
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, ControlError> {
        if addr.is_ipv6() {
            return Err(ControlError::Ipv6Unsupported(addr));
        }
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        Self::from_stream(stream)
    }

    fn from_stream(stream: TcpStream) -> Result<Self, ControlError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(ControlStream {
            stream,
            peer,
            read_buf: BytesMut::with_capacity(MAX_MESSAGE_SIZE),
            write_buf: BytesMut::new(),
            closed: false,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControlError> {
        Ok(self.stream.local_addr()?)
    }

    /// Bytes queued but not yet written
    pub fn pending_bytes(&self) -> usize {
        self.write_buf.len()
    }

    /// Queue one message for sending
    pub fn queue(&mut self, message: &[u8]) -> Result<(), ControlError> {
        if self.closed {
            return Err(ControlError::Closed);
        }
        encode_frame(message, &mut self.write_buf)
    }

    /// Write as much of the queue as the socket accepts
    pub fn flush(&mut self) -> Result<(), ControlError> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    self.closed = true;
                    return Err(ControlError::Closed);
                }
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read whatever is available and return the complete messages
    ///
    /// Once the peer has closed the stream and every buffered message has
    /// been returned, this yields [`ControlError::Closed`].
    pub fn poll_messages(&mut self) -> Result<Vec<Bytes>, ControlError> {
        let mut chunk = [0u8; 2048];
        while !self.closed {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(peer = %self.peer, "Control connection closed by peer");
                    self.closed = true;
                }
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut messages = Vec::new();
        while let Some(message) = decode_frame(&mut self.read_buf)? {
            messages.push(message);
        }

        if messages.is_empty() && self.closed {
            return Err(ControlError::Closed);
        }
        Ok(messages)
    }
}
