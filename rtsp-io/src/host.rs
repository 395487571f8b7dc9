//! Real-socket hosts for client and server sessions
//!
//! Each host owns the sockets for one session and runs a single-threaded
//! poll loop: drain the control stream and the datagram socket, fire due
//! timers, flush queued control messages, then sleep until the next
//! deadline. All session callbacks therefore run on one thread.

use crate::control::{ControlError, ControlListener, ControlStream};
use crate::socket::{DatagramSocket, SocketError};
use crate::time::{Clock, TimerQueue};
use bytes::Bytes;
use crossbeam::channel::{Receiver, TryRecvError};
use parking_lot::RwLock;
use rtsp_protocol::client::{ClientConfig, ClientSession, ClientStats, ClientTimer};
use rtsp_protocol::context::{SessionContext, SessionEvent, TimerId, TransportError};
use rtsp_protocol::message::Method;
use rtsp_protocol::server::{ServerConfig, ServerSession, ServerStats, ServerTimer};
use rtsp_protocol::session::SessionState;
use rtsp_protocol::source::SourceProvider;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_CONTROL_PORT: u16 = 5540;
pub const DEFAULT_FEEDBACK_PORT: u16 = 5541;
pub const DEFAULT_DATA_PORT: u16 = 5542;

const RECV_BUFFER_SIZE: usize = 65_536;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Host errors
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Control channel error: {0}")]
    Control(#[from] ControlError),
}

impl From<ControlError> for TransportError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::Io(e) => TransportError::Io(e),
            ControlError::FrameTooLarge { size, .. } => TransportError::TooLarge(size),
            ControlError::Closed => TransportError::Closed,
            ControlError::Ipv6Unsupported(_) => TransportError::NotConnected,
        }
    }
}

impl From<SocketError> for TransportError {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::Io(e) => TransportError::Io(e),
            SocketError::Ipv6Unsupported(_) => TransportError::NotConnected,
        }
    }
}

/// Context handed to a session for one batch of callbacks
struct HostContext<'a, T> {
    now: Duration,
    timers: &'a mut TimerQueue<T>,
    control: &'a mut ControlStream,
    socket: &'a DatagramSocket,
    peer: SocketAddr,
}

impl<'a, T> SessionContext for HostContext<'a, T> {
    type Timer = T;

    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, delay: Duration, timer: T) -> TimerId {
        self.timers.schedule_at(self.now + delay, timer)
    }

    fn cancel(&mut self, id: TimerId) {
        self.timers.cancel(id);
    }

    fn send_control(&mut self, message: Bytes) -> Result<(), TransportError> {
        Ok(self.control.queue(&message)?)
    }

    fn send_datagram(&mut self, datagram: Bytes) -> Result<(), TransportError> {
        if self.socket.send_to(&datagram, self.peer)?.is_none() {
            debug!(len = datagram.len(), peer = %self.peer, "Datagram dropped: socket busy");
        }
        Ok(())
    }

    fn emit(&mut self, event: SessionEvent) {
        trace!(?event, "Session event");
    }
}

fn shutdown_requested(shutdown: &Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

/// Hand every queued datagram to `handle`
///
/// Stops at the first receive error. Datagrams read before it have already
/// been handled.
fn drain_datagrams<R, H>(mut recv: R, buf: &mut [u8], mut handle: H) -> Result<usize, SocketError>
where
    R: FnMut(&mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError>,
    H: FnMut(&[u8], SocketAddr),
{
    let mut count = 0;
    while let Some((n, from)) = recv(&mut *buf)? {
        handle(&buf[..n], from);
        count += 1;
    }
    Ok(count)
}

/// Why a served connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServeOutcome {
    ClientGone,
    Shutdown,
}

/// Sleep until the next timer is due, at most `poll_interval`
fn wait<T>(clock: &Clock, timers: &mut TimerQueue<T>, poll_interval: Duration) {
    let wait = timers
        .next_deadline()
        .map(|at| at.saturating_sub(clock.now()))
        .unwrap_or(poll_interval)
        .min(poll_interval);
    if !wait.is_zero() {
        thread::sleep(wait);
    }
}

/// Server host configuration
#[derive(Debug, Clone)]
pub struct ServerHostConfig {
    pub control_addr: SocketAddr,
    pub feedback_addr: SocketAddr,
    /// Port the client receives data on
    pub client_data_port: u16,
    pub poll_interval: Duration,
    pub session: ServerConfig,
}

impl Default for ServerHostConfig {
    fn default() -> Self {
        ServerHostConfig {
            control_addr: (Ipv4Addr::UNSPECIFIED, DEFAULT_CONTROL_PORT).into(),
            feedback_addr: (Ipv4Addr::UNSPECIFIED, DEFAULT_FEEDBACK_PORT).into(),
            client_data_port: DEFAULT_DATA_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            session: ServerConfig::default(),
        }
    }
}

/// Serves one client connection at a time
pub struct ServerHost<P> {
    config: ServerHostConfig,
    provider: P,
    listener: ControlListener,
    feedback: DatagramSocket,
    data: DatagramSocket,
    stats: Arc<RwLock<ServerStats>>,
}

impl<P: SourceProvider + Clone> ServerHost<P> {
    pub fn bind(config: ServerHostConfig, provider: P) -> Result<Self, HostError> {
        let listener = ControlListener::bind(config.control_addr)?;
        let feedback = DatagramSocket::bind(config.feedback_addr)?;
        feedback.set_recv_buffer_size(RECV_BUFFER_SIZE)?;
        let data = DatagramSocket::bind((Ipv4Addr::UNSPECIFIED, 0).into())?;

        info!(
            control = %listener.local_addr()?,
            feedback = %feedback.local_addr()?,
            "Server listening"
        );

        Ok(ServerHost {
            config,
            provider,
            listener,
            feedback,
            data,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    pub fn control_addr(&self) -> Result<SocketAddr, HostError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn feedback_addr(&self) -> Result<SocketAddr, HostError> {
        Ok(self.feedback.local_addr()?)
    }

    /// Shared view of the current session's statistics
    pub fn stats_handle(&self) -> Arc<RwLock<ServerStats>> {
        Arc::clone(&self.stats)
    }

    /// Accept and serve clients until `shutdown` fires or is dropped
    pub fn run(&self, shutdown: Receiver<()>) -> Result<(), HostError> {
        let clock = Clock::new();
        while !shutdown_requested(&shutdown) {
            match self.listener.accept()? {
                Some(stream) => {
                    if self.serve(stream, &clock, &shutdown) == ServeOutcome::Shutdown {
                        break;
                    }
                }
                None => thread::sleep(self.config.poll_interval),
            }
        }
        info!("Server shutting down");
        Ok(())
    }

    /// Run one client's session until it goes away or shutdown is requested
    fn serve(
        &self,
        mut control: ControlStream,
        clock: &Clock,
        shutdown: &Receiver<()>,
    ) -> ServeOutcome {
        let peer = SocketAddr::new(control.peer_addr().ip(), self.config.client_data_port);
        info!(control = %control.peer_addr(), data = %peer, "Client connected");

        let mut session = ServerSession::new(self.config.session.clone(), self.provider.clone());
        let mut timers: TimerQueue<ServerTimer> = TimerQueue::new();
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        session.start(&mut HostContext {
            now: clock.now(),
            timers: &mut timers,
            control: &mut control,
            socket: &self.data,
            peer,
        });

        let mut outcome = ServeOutcome::ClientGone;
        loop {
            if shutdown_requested(shutdown) {
                outcome = ServeOutcome::Shutdown;
                break;
            }

            let messages = match control.poll_messages() {
                Ok(messages) => messages,
                Err(ControlError::Closed) => {
                    info!(%peer, "Client disconnected");
                    break;
                }
                Err(e) => {
                    warn!("Control channel error: {}", e);
                    break;
                }
            };

            let now = clock.now();
            let mut ctx = HostContext {
                now,
                timers: &mut timers,
                control: &mut control,
                socket: &self.data,
                peer,
            };

            for message in messages {
                if let Err(e) = session.on_control(&mut ctx, &message) {
                    debug!("Control message not handled: {}", e);
                }
            }

            let drained = drain_datagrams(
                |buf| self.feedback.recv_from(buf),
                &mut buf,
                |datagram, from| {
                    if let Err(e) = session.on_feedback(&mut ctx, datagram) {
                        debug!(%from, "Feedback not handled: {}", e);
                    }
                },
            );
            if let Err(e) = drained {
                warn!("Feedback socket error: {}", e);
                break;
            }

            while let Some((at, id, timer)) = ctx.timers.pop_due(now) {
                ctx.now = at;
                if let Err(e) = session.on_timer(&mut ctx, id, timer) {
                    warn!("Pacer error: {}", e);
                }
            }

            if let Err(e) = control.flush() {
                warn!("Control channel error: {}", e);
                break;
            }
            *self.stats.write() = session.stats();

            wait(clock, &mut timers, self.config.poll_interval);
        }

        session.stop(&mut HostContext {
            now: clock.now(),
            timers: &mut timers,
            control: &mut control,
            socket: &self.data,
            peer,
        });
        // Best effort: the peer may already be gone
        control.flush().ok();
        *self.stats.write() = session.stats();
        outcome
    }
}

/// Client host configuration
#[derive(Debug, Clone)]
pub struct ClientHostConfig {
    pub server_control: SocketAddr,
    pub server_feedback: SocketAddr,
    /// Local address data is received on
    pub data_addr: SocketAddr,
    pub connect_timeout: Duration,
    /// How long a finished session waits for outstanding responses
    pub response_timeout: Duration,
    pub poll_interval: Duration,
    pub session: ClientConfig,
    /// Requests to send, as offsets from session start
    pub schedule: Vec<(Duration, Method)>,
}

impl Default for ClientHostConfig {
    fn default() -> Self {
        ClientHostConfig {
            server_control: (Ipv4Addr::LOCALHOST, DEFAULT_CONTROL_PORT).into(),
            server_feedback: (Ipv4Addr::LOCALHOST, DEFAULT_FEEDBACK_PORT).into(),
            data_addr: (Ipv4Addr::UNSPECIFIED, DEFAULT_DATA_PORT).into(),
            connect_timeout: Duration::from_secs(5),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            session: ClientConfig::default(),
            schedule: Vec::new(),
        }
    }
}

/// Drives one client session against a remote server
pub struct ClientHost {
    config: ClientHostConfig,
    control: ControlStream,
    data: DatagramSocket,
    stats: Arc<RwLock<ClientStats>>,
}

impl ClientHost {
    pub fn connect(config: ClientHostConfig) -> Result<Self, HostError> {
        let data = DatagramSocket::bind(config.data_addr)?;
        data.set_recv_buffer_size(RECV_BUFFER_SIZE)?;
        let control = ControlStream::connect(config.server_control, config.connect_timeout)?;

        info!(
            server = %config.server_control,
            data = %data.local_addr()?,
            "Connected to server"
        );

        Ok(ClientHost {
            config,
            control,
            data,
            stats: Arc::new(RwLock::new(ClientStats::default())),
        })
    }

    pub fn data_addr(&self) -> Result<SocketAddr, HostError> {
        Ok(self.data.local_addr()?)
    }

    pub fn stats_handle(&self) -> Arc<RwLock<ClientStats>> {
        Arc::clone(&self.stats)
    }

    /// Run the scheduled session until it is torn down, the server hangs
    /// up, or `shutdown` fires
    pub fn run(&mut self, shutdown: Receiver<()>) -> Result<ClientStats, HostError> {
        let clock = Clock::new();
        let mut session = ClientSession::new(self.config.session.clone());
        for &(at, method) in &self.config.schedule {
            session.schedule_message(at, method);
        }

        let mut timers: TimerQueue<ClientTimer> = TimerQueue::new();
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let peer = self.config.server_feedback;
        let mut finished_at: Option<Duration> = None;

        session.start(&mut HostContext {
            now: clock.now(),
            timers: &mut timers,
            control: &mut self.control,
            socket: &self.data,
            peer,
        });

        while !shutdown_requested(&shutdown) {
            let messages = match self.control.poll_messages() {
                Ok(messages) => messages,
                Err(ControlError::Closed) => {
                    info!("Server closed the control connection");
                    break;
                }
                Err(e) => {
                    warn!("Control channel error: {}", e);
                    break;
                }
            };

            let now = clock.now();
            let mut ctx = HostContext {
                now,
                timers: &mut timers,
                control: &mut self.control,
                socket: &self.data,
                peer,
            };

            for message in messages {
                if let Err(e) = session.on_control(&mut ctx, &message) {
                    debug!("Response not handled: {}", e);
                }
            }

            let drained = drain_datagrams(
                |buf| self.data.recv_from(buf),
                &mut buf,
                |datagram, _| {
                    if let Err(e) = session.on_data(&mut ctx, Bytes::copy_from_slice(datagram)) {
                        debug!("Datagram not handled: {}", e);
                    }
                },
            );
            if let Err(e) = drained {
                warn!("Data socket error: {}", e);
                break;
            }

            while let Some((at, id, timer)) = ctx.timers.pop_due(now) {
                ctx.now = at;
                if let Err(e) = session.on_timer(&mut ctx, id, timer) {
                    warn!("Timer error: {}", e);
                }
            }

            if let Err(e) = self.control.flush() {
                warn!("Control channel error: {}", e);
                break;
            }
            let stats = session.stats();
            *self.stats.write() = stats;

            if session.state() == SessionState::Init
                && session.pending_requests() == 0
                && timers.is_empty()
            {
                // Linger until the last responses are in, e.g. TEARDOWN's 200
                let answered = stats.responses_received >= stats.requests_sent
                    && self.control.pending_bytes() == 0;
                let deadline = *finished_at.get_or_insert(now + self.config.response_timeout);
                if answered || clock.now() >= deadline {
                    info!(
                        unanswered = stats.requests_sent.saturating_sub(stats.responses_received),
                        "Session complete"
                    );
                    break;
                }
            } else {
                finished_at = None;
            }

            wait(&clock, &mut timers, self.config.poll_interval);
        }

        session.stop(&mut HostContext {
            now: clock.now(),
            timers: &mut timers,
            control: &mut self.control,
            socket: &self.data,
            peer,
        });
        self.control.flush().ok();

        let stats = session.stats();
        *self.stats.write() = stats;
        Ok(stats)
    }
}
