//! Client side of an RTSP session
//!
//! The client sends scheduled control requests, plays received frames out
//! of a [`PlayoutBuffer`] at the frame period announced by the server, and
//! reports a smoothed loss fraction on the feedback channel.

use crate::buffer::{InsertOutcome, Playout, PlayoutBuffer, DEFAULT_CAPACITY};
use crate::context::{SessionContext, SessionEvent, TimerId};
use crate::loss::LossAccounting;
use crate::message::{ControlRequest, ControlResponse, Method};
use crate::packet::{DataPacket, FeedbackReport};
use crate::session::{SessionError, SessionState, TimerSlot};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default feedback report interval
pub const DEFAULT_FEEDBACK_PERIOD: Duration = Duration::from_millis(400);

/// Frame source requested when SETUP carries no explicit name
pub const DEFAULT_FILE_NAME: &str = "sample.txt";

/// Frame periods to wait after PLAY before the first consumption tick
pub const INITIAL_BUFFERING_PERIODS: u32 = 2;

/// Client session configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub file_name: String,
    pub feedback_period: Duration,
    pub buffering_periods: u32,
    pub buffer_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            file_name: DEFAULT_FILE_NAME.to_string(),
            feedback_period: DEFAULT_FEEDBACK_PERIOD,
            buffering_periods: INITIAL_BUFFERING_PERIODS,
            buffer_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Timers armed by the client session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTimer {
    /// Scheduled control request, keyed by its schedule entry
    Request(u64),
    Playout,
    Feedback,
}

/// Client session statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClientStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub frames_played: u64,
    pub frames_lost: u64,
    pub frames_skipped: u64,
    pub late_frames: u64,
    pub duplicate_frames: u64,
    pub feedback_sent: u64,
    pub fraction_lost: f64,
}

#[derive(Debug)]
struct ScheduledRequest {
    at: Duration,
    method: Method,
    timer: Option<TimerId>,
}

/// Client session
pub struct ClientSession {
    config: ClientConfig,
    state: SessionState,
    schedule: BTreeMap<u64, ScheduledRequest>,
    next_request: u64,
    frame_period: Option<Duration>,
    buffer: PlayoutBuffer,
    loss: LossAccounting,
    playout: TimerSlot,
    feedback: TimerSlot,
    stats: ClientStats,
}

impl ClientSession {
    pub fn new(config: ClientConfig) -> Self {
        let buffer = PlayoutBuffer::new(config.buffer_capacity);
        ClientSession {
            config,
            state: SessionState::Init,
            schedule: BTreeMap::new(),
            next_request: 0,
            frame_period: None,
            buffer,
            loss: LossAccounting::new(),
            playout: TimerSlot::default(),
            feedback: TimerSlot::default(),
            stats: ClientStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Frame period announced by the server, once SETUP succeeded
    pub fn frame_period(&self) -> Option<Duration> {
        self.frame_period
    }

    pub fn buffer(&self) -> &PlayoutBuffer {
        &self.buffer
    }

    pub fn loss(&self) -> &LossAccounting {
        &self.loss
    }

    /// Total bytes received on the data channel
    pub fn rx_bytes(&self) -> u64 {
        self.stats.bytes_received
    }

    /// Most recent smoothed loss fraction
    pub fn fraction_lost(&self) -> f64 {
        self.loss.current_fraction_lost
    }

    /// Requests queued but not yet sent
    pub fn pending_requests(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_playout_running(&self) -> bool {
        self.playout.is_armed()
    }

    pub fn is_feedback_running(&self) -> bool {
        self.feedback.is_armed()
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            frames_lost: self.loss.cumulative_lost as u64,
            fraction_lost: self.loss.current_fraction_lost,
            ..self.stats
        }
    }

    /// Queue `method` to be sent at `at` on the session clock
    ///
    /// Requests queued after [`start`](Self::start) are armed by the next
    /// call to `start`.
    pub fn schedule_message(&mut self, at: Duration, method: Method) {
        let key = self.next_request;
        self.next_request += 1;
        self.schedule.insert(
            key,
            ScheduledRequest {
                at,
                method,
                timer: None,
            },
        );
    }

    /// Arm every queued request
    pub fn start<C: SessionContext<Timer = ClientTimer>>(&mut self, ctx: &mut C) {
        let now = ctx.now();
        let mut armed = 0;
        for (&key, request) in self.schedule.iter_mut() {
            if request.timer.is_none() {
                let delay = request.at.saturating_sub(now);
                request.timer = Some(ctx.schedule(delay, ClientTimer::Request(key)));
                armed += 1;
            }
        }
        info!(armed, file = %self.config.file_name, "Client session started");
    }

    /// Dispose of the session: cancel every timer and pending request
    pub fn stop<C: SessionContext<Timer = ClientTimer>>(&mut self, ctx: &mut C) {
        self.cancel_all(ctx);
        self.set_state(ctx, SessionState::Init);
        info!("Client session stopped");
    }

    fn cancel_all<C: SessionContext<Timer = ClientTimer>>(&mut self, ctx: &mut C) {
        for (_, request) in std::mem::take(&mut self.schedule) {
            if let Some(id) = request.timer {
                ctx.cancel(id);
            }
        }
        self.playout.cancel(ctx);
        self.feedback.cancel(ctx);
    }

    /// Send a control request now
    ///
    /// The state change is applied without waiting for the response, as
    /// long as it is legal from the current state.
    pub fn send_request<C: SessionContext<Timer = ClientTimer>>(
        &mut self,
        ctx: &mut C,
        method: Method,
        argument: Option<String>,
    ) -> Result<(), SessionError> {
        let request = match (method, argument) {
            (Method::Setup, argument) => {
                ControlRequest::setup(argument.unwrap_or_else(|| self.config.file_name.clone()))?
            }
            (_, Some(argument)) => ControlRequest::with_argument(method, argument)?,
            (_, None) => ControlRequest::new(method),
        };

        ctx.send_control(request.to_bytes())?;
        self.stats.requests_sent += 1;
        info!(%request, "Client RTSP request");
        ctx.emit(SessionEvent::RequestSent { method });

        match self.state.after(method) {
            Some(next) => self.set_state(ctx, next),
            None => warn!(%method, state = %self.state, "Request not valid in current state"),
        }

        if method == Method::Teardown {
            self.cancel_all(ctx);
        }
        Ok(())
    }

    /// Handle one control response from the server
    pub fn on_control<C: SessionContext<Timer = ClientTimer>>(
        &mut self,
        ctx: &mut C,
        bytes: &[u8],
    ) -> Result<(), SessionError> {
        let response = ControlResponse::from_bytes(bytes).map_err(|e| {
            warn!("Client RTSP: dropping malformed response: {}", e);
            e
        })?;
        let method = response.method;
        let status = response.status.as_u16();
        self.stats.responses_received += 1;
        ctx.emit(SessionEvent::ResponseReceived { method, status });

        if !response.status.is_success() {
            error!(%method, status, "Client RTSP: protocol error");
            return Err(SessionError::Status { method, status });
        }

        match method {
            Method::Setup => {
                let Some(period) = response.period_parameter() else {
                    error!(parameter = ?response.parameter, "Client RTSP: SETUP response without frame period");
                    return Err(SessionError::MissingParameter(method));
                };
                self.frame_period = Some(period);
                self.feedback.arm(ctx, self.config.feedback_period, ClientTimer::Feedback);
                info!(frame_period_ms = period.as_millis() as u64, "Client RTSP: session set up");
            }
            Method::Play => {
                if !self.playout.is_armed() {
                    let period = self.frame_period.ok_or(SessionError::NotSetUp)?;
                    let delay = period * self.config.buffering_periods;
                    self.playout.arm(ctx, delay, ClientTimer::Playout);
                    debug!(delay_ms = delay.as_millis() as u64, "Playout scheduled");
                }
            }
            Method::Teardown => {
                self.playout.cancel(ctx);
                self.feedback.cancel(ctx);
                info!("Client RTSP: session torn down");
            }
            Method::Describe => {
                info!(source = ?response.parameter, "Client RTSP: stream description");
            }
            Method::Pause | Method::Modify => {}
        }
        Ok(())
    }

    /// Handle one datagram from the data channel
    pub fn on_data<C: SessionContext<Timer = ClientTimer>>(
        &mut self,
        ctx: &mut C,
        datagram: Bytes,
    ) -> Result<(), SessionError> {
        let len = datagram.len();
        let packet = DataPacket::from_shared(datagram).map_err(|e| {
            warn!("Client RTP: dropping malformed datagram: {}", e);
            e
        })?;
        let seq = packet.seq_number();
        let size = packet.payload_size();

        self.stats.packets_received += 1;
        self.stats.bytes_received += len as u64;
        ctx.emit(SessionEvent::FrameReceived { seq, size });

        match self.buffer.insert(seq, packet.payload)? {
            InsertOutcome::Buffered => debug!("Client RTP recv: {} bytes in {}", size, seq),
            InsertOutcome::Duplicate => {
                self.stats.duplicate_frames += 1;
                debug!(%seq, "Duplicate frame");
            }
            InsertOutcome::Late => {
                self.stats.late_frames += 1;
                debug!(%seq, next = %self.buffer.next_expected(), "Late frame dropped");
            }
        }
        Ok(())
    }

    /// Playout, feedback and scheduled-request timers
    pub fn on_timer<C: SessionContext<Timer = ClientTimer>>(
        &mut self,
        ctx: &mut C,
        id: TimerId,
        timer: ClientTimer,
    ) -> Result<(), SessionError> {
        match timer {
            ClientTimer::Request(key) => {
                let due = self
                    .schedule
                    .get(&key)
                    .map_or(false, |request| request.timer == Some(id));
                match due.then(|| self.schedule.remove(&key)).flatten() {
                    Some(request) => {
                        debug!(method = %request.method, at_ms = request.at.as_millis() as u64, "Scheduled request due");
                        self.send_request(ctx, request.method, None)
                    }
                    None => {
                        debug!(%id, "Ignoring stale request timer");
                        Ok(())
                    }
                }
            }
            ClientTimer::Playout => {
                if self.playout.fire(id) {
                    self.play_next(ctx);
                } else {
                    debug!(%id, "Ignoring stale playout timer");
                }
                Ok(())
            }
            ClientTimer::Feedback => {
                if self.feedback.fire(id) {
                    self.send_feedback(ctx)
                } else {
                    debug!(%id, "Ignoring stale feedback timer");
                    Ok(())
                }
            }
        }
    }

    fn play_next<C: SessionContext<Timer = ClientTimer>>(&mut self, ctx: &mut C) {
        let Some(period) = self.frame_period else {
            return;
        };
        self.playout.arm(ctx, period, ClientTimer::Playout);

        if !self.state.is_playing() {
            return;
        }

        let playout = self.buffer.consume();
        if let Some(seq) = playout.skipped() {
            self.stats.frames_skipped += 1;
            debug!(%seq, "Frame skipped after grace period");
            ctx.emit(SessionEvent::FrameSkipped { seq });
        }

        match playout {
            Playout::Played { frame, .. } => {
                self.loss.record_hit();
                self.stats.frames_played += 1;
                let size = frame.payload.len();
                debug!("Client playout: {} bytes in {}", size, frame.seq);
                ctx.emit(SessionEvent::FramePlayed {
                    seq: frame.seq,
                    size,
                });
            }
            Playout::Missing { seq, .. } => {
                self.loss.record_miss();
                debug!(%seq, lost = self.loss.cumulative_lost, "Client playout: frame missing");
                ctx.emit(SessionEvent::FrameMissing { seq });
            }
        }
    }

    fn send_feedback<C: SessionContext<Timer = ClientTimer>>(
        &mut self,
        ctx: &mut C,
    ) -> Result<(), SessionError> {
        self.feedback.arm(ctx, self.config.feedback_period, ClientTimer::Feedback);

        let fraction_lost = self.loss.report(self.state.is_playing());
        ctx.send_datagram(FeedbackReport::new(fraction_lost).to_bytes())?;

        self.stats.feedback_sent += 1;
        debug!(fraction_lost, "Client RTCP report");
        ctx.emit(SessionEvent::FeedbackSent { fraction_lost });
        Ok(())
    }

    fn set_state<C: SessionContext<Timer = ClientTimer>>(&mut self, ctx: &mut C, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Client state changed");
            ctx.emit(SessionEvent::StateChanged {
                from: self.state,
                to: next,
            });
            self.state = next;
        }
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}
