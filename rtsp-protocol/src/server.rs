//! Server side of an RTSP session
//!
//! The server answers control requests, paces frames to the client while
//! playing, and adapts the congestion level from the client's loss reports.

use crate::congestion::{CongestionConfig, CongestionController, LevelChange};
use crate::context::{SessionContext, SessionEvent, TimerId};
use crate::message::{ControlRequest, ControlResponse, Method, StatusCode};
use crate::packet::{DataPacket, FeedbackReport, MAX_PAYLOAD_SIZE};
use crate::sequence::SeqNumber;
use crate::session::{SessionError, SessionState, TimerSlot};
use crate::source::{FrameSource, SourceProvider};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default interval between frames (about 30 fps)
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(32);

/// Server session configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Frame period advertised in the SETUP response
    pub frame_period: Duration,
    /// Interval between paced frames
    pub send_delay: Duration,
    pub congestion: CongestionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            frame_period: DEFAULT_FRAME_PERIOD,
            send_delay: DEFAULT_FRAME_PERIOD,
            congestion: CongestionConfig::default(),
        }
    }
}

/// Timers armed by the server session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerTimer {
    Pacer,
}

/// Server session statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub requests_handled: u64,
    pub malformed_requests: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub feedback_reports: u64,
    pub level: u32,
    pub threshold_floor: Option<u32>,
}

/// Server session
pub struct ServerSession<P> {
    config: ServerConfig,
    provider: P,
    state: SessionState,
    source: Option<Box<dyn FrameSource>>,
    source_name: Option<String>,
    congestion: CongestionController,
    next_seq: SeqNumber,
    pacer: TimerSlot,
    stats: ServerStats,
}

impl<P: SourceProvider> ServerSession<P> {
    pub fn new(config: ServerConfig, provider: P) -> Self {
        let congestion = CongestionController::new(config.congestion);
        ServerSession {
            config,
            provider,
            state: SessionState::Init,
            source: None,
            source_name: None,
            congestion,
            next_seq: SeqNumber::ZERO,
            pacer: TimerSlot::default(),
            stats: ServerStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    /// Current congestion level
    pub fn level(&self) -> u32 {
        self.congestion.level()
    }

    /// Sequence number the next frame will carry
    pub fn next_seq(&self) -> SeqNumber {
        self.next_seq
    }

    /// Whether the pacer timer is armed
    pub fn is_pacing(&self) -> bool {
        self.pacer.is_armed()
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            level: self.congestion.level(),
            threshold_floor: self.congestion.threshold_floor(),
            ..self.stats
        }
    }

    pub fn start<C: SessionContext<Timer = ServerTimer>>(&mut self, ctx: &mut C) {
        info!(
            frame_period_ms = self.config.frame_period.as_millis() as u64,
            level = self.congestion.level(),
            "Server session started"
        );
        self.set_state(ctx, SessionState::Init);
    }

    /// Dispose of the session: cancel the pacer and release the source
    pub fn stop<C: SessionContext<Timer = ServerTimer>>(&mut self, ctx: &mut C) {
        self.pacer.cancel(ctx);
        self.release_source();
        self.set_state(ctx, SessionState::Init);
        info!("Server session stopped");
    }

    /// Handle one control request from the client
    ///
    /// Malformed requests are logged and dropped without a response.
    pub fn on_control<C: SessionContext<Timer = ServerTimer>>(
        &mut self,
        ctx: &mut C,
        bytes: &[u8],
    ) -> Result<(), SessionError> {
        let request = match ControlRequest::from_bytes(bytes) {
            Ok(request) => request,
            Err(e) => {
                warn!("Server RTSP: dropping malformed request: {}", e);
                self.stats.malformed_requests += 1;
                return Err(e.into());
            }
        };
        debug!(%request, "Server RTSP request");

        let response = match self.handle_request(ctx, &request) {
            Ok(response) => response,
            Err(e) => {
                warn!("Server RTSP: dropping request {}: {}", request.method, e);
                self.stats.malformed_requests += 1;
                return Err(e);
            }
        };
        self.stats.requests_handled += 1;

        ctx.send_control(response.to_bytes())?;
        Ok(())
    }

    fn handle_request<C: SessionContext<Timer = ServerTimer>>(
        &mut self,
        ctx: &mut C,
        request: &ControlRequest,
    ) -> Result<ControlResponse, SessionError> {
        let method = request.method;
        let Some(next) = self.state.after(method) else {
            warn!(%method, state = %self.state, "Request not valid in current state");
            return Ok(ControlResponse::error(
                method,
                StatusCode::METHOD_NOT_VALID_IN_STATE,
            ));
        };

        let response = match method {
            Method::Setup => {
                let name = request
                    .argument
                    .as_deref()
                    .ok_or(SessionError::MissingArgument(Method::Setup))?;
                self.open_source(name);
                self.set_state(ctx, next);
                ControlResponse::setup_ok(self.config.frame_period)
            }
            Method::Play => {
                self.set_state(ctx, next);
                if !self.pacer.is_armed() {
                    self.pacer.arm(ctx, Duration::ZERO, ServerTimer::Pacer);
                }
                ControlResponse::ok(method)
            }
            Method::Pause => {
                self.set_state(ctx, next);
                ControlResponse::ok(method)
            }
            Method::Teardown => {
                self.pacer.cancel(ctx);
                self.release_source();
                self.set_state(ctx, next);
                ControlResponse::ok(method)
            }
            Method::Modify => {
                let change = self.congestion.request_reduction();
                self.report_level_change(ctx, change);
                ControlResponse::ok(method)
            }
            Method::Describe => match &self.source_name {
                Some(name) => ControlResponse::ok_with(method, name.clone())?,
                None => ControlResponse::ok(method),
            },
        };
        Ok(response)
    }

    /// Pacer tick
    pub fn on_timer<C: SessionContext<Timer = ServerTimer>>(
        &mut self,
        ctx: &mut C,
        id: TimerId,
        timer: ServerTimer,
    ) -> Result<(), SessionError> {
        match timer {
            ServerTimer::Pacer => {
                if !self.pacer.fire(id) {
                    debug!(%id, "Ignoring stale pacer timer");
                    return Ok(());
                }
                self.send_next_frame(ctx)
            }
        }
    }

    fn send_next_frame<C: SessionContext<Timer = ServerTimer>>(
        &mut self,
        ctx: &mut C,
    ) -> Result<(), SessionError> {
        if !self.state.is_playing() {
            debug!(state = %self.state, "Pacer idle");
            return Ok(());
        }
        let Some(base_size) = self.source.as_mut().and_then(|s| s.next_frame_size()) else {
            debug!("Pacer idle: no frames left");
            return Ok(());
        };

        let mut size = self.congestion.scale(base_size) as usize;
        if size > MAX_PAYLOAD_SIZE {
            warn!(size, "Frame exceeds datagram limit, truncating");
            size = MAX_PAYLOAD_SIZE;
        }

        let seq = self.next_seq;
        self.next_seq.increment();
        let timestamp = ctx.now().as_millis() as u32;
        let datagram = DataPacket::synthetic(seq, timestamp, size).to_bytes()?;

        self.pacer.arm(ctx, self.config.send_delay, ServerTimer::Pacer);

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += datagram.len() as u64;
        let level = self.congestion.level();
        debug!("Server RTP send: {} bytes in {} (level {})", size, seq, level);
        ctx.emit(SessionEvent::FrameSent { seq, size, level });

        ctx.send_datagram(datagram)?;
        Ok(())
    }

    /// Handle one loss report from the client
    pub fn on_feedback<C: SessionContext<Timer = ServerTimer>>(
        &mut self,
        ctx: &mut C,
        bytes: &[u8],
    ) -> Result<(), SessionError> {
        let report = FeedbackReport::from_bytes(bytes).map_err(|e| {
            warn!("Server RTCP: dropping malformed report: {}", e);
            e
        })?;
        self.stats.feedback_reports += 1;
        ctx.emit(SessionEvent::FeedbackReceived {
            fraction_lost: report.fraction_lost,
        });

        if self.state.is_playing() {
            let change = self.congestion.on_report(report.fraction_lost);
            self.report_level_change(ctx, change);
        }

        debug!(
            fraction_lost = report.fraction_lost,
            level = self.congestion.level(),
            "Server RTCP report"
        );
        Ok(())
    }

    fn open_source(&mut self, name: &str) {
        self.release_source();
        match self.provider.open(name) {
            Ok(source) => {
                info!(name, remaining = ?source.remaining(), "Frame source opened");
                self.source = Some(source);
            }
            Err(e) => {
                // Keep going: the pacer simply has nothing to send
                warn!(name, "Failed to open frame source: {}", e);
            }
        }
        self.source_name = Some(name.to_string());
    }

    fn release_source(&mut self) {
        if self.source.take().is_some() {
            debug!(name = ?self.source_name, "Frame source released");
        }
        self.source_name = None;
    }

    fn report_level_change<C: SessionContext<Timer = ServerTimer>>(
        &mut self,
        ctx: &mut C,
        change: LevelChange,
    ) {
        if let LevelChange::Lowered { from, to } | LevelChange::Raised { from, to } = change {
            info!(from, to, floor = ?self.congestion.threshold_floor(), "Congestion level changed");
            ctx.emit(SessionEvent::CongestionChanged { from, to });
        }
    }

    fn set_state<C: SessionContext<Timer = ServerTimer>>(&mut self, ctx: &mut C, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Server state changed");
            ctx.emit(SessionEvent::StateChanged {
                from: self.state,
                to: next,
            });
            self.state = next;
        }
    }
}
