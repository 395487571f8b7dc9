//! UDP socket wrapper for the data and feedback channels
//!
//! Sockets are created through `socket2` so buffer sizes and address reuse
//! can be set before binding, then handed to `std` for I/O. Only IPv4 is
//! supported.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use thiserror::Error;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("IPv6 is not supported: {0}")]
    Ipv6Unsupported(SocketAddr),
}

/// Non-blocking UDP socket
pub struct DatagramSocket {
    inner: UdpSocket,
}

impl DatagramSocket {
    /// Bind a socket to the given IPv4 address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        if addr.is_ipv6() {
            return Err(SocketError::Ipv6Unsupported(addr));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        Ok(DatagramSocket {
            inner: socket.into(),
        })
    }

    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_send_buffer_size(size)?;
        Ok(())
    }

    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_recv_buffer_size(size)?;
        Ok(())
    }

    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Send one datagram
    ///
    /// Returns `Ok(None)` if the send would block; the datagram is dropped.
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<Option<usize>, SocketError> {
        if target.is_ipv6() {
            return Err(SocketError::Ipv6Unsupported(target));
        }
        match self.inner.send_to(buf, target) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    /// Receive one datagram
    ///
    /// Returns `Ok(None)` if nothing is waiting.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(DatagramSocket {
            inner: self.inner.try_clone()?,
        })
    }
}
