//! Deterministic session simulation
//!
//! Both sessions share one virtual clock and one event queue ordered by
//! `(time, insertion)`. Control messages, data and feedback cross a link with
//! a fixed one-way latency, so the control channel stays in order. Data
//! datagrams can be dropped by sequence number to simulate loss.

use bytes::Bytes;
use rtsp_protocol::{
    ClientConfig, ClientSession, ClientTimer, DataHeader, Method, SeqNumber, ServerConfig,
    ServerSession, ServerTimer, SessionContext, SessionError, SessionEvent, SessionState,
    SourceProvider, TimerId, TransportError,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, trace};

/// Default one-way link latency
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(5);

/// Which end of the session pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

#[derive(Debug)]
enum Event {
    ClientTimer(TimerId, ClientTimer),
    ServerTimer(TimerId, ServerTimer),
    /// Control message arriving at the server
    ServerControl(Bytes),
    /// Control message arriving at the client
    ClientControl(Bytes),
    /// Feedback datagram arriving at the server
    Feedback(Bytes),
    /// Data datagram arriving at the client
    Data(Bytes),
}

type EventKey = (Duration, u64);

type DropPredicate = Box<dyn FnMut(SeqNumber) -> bool>;

/// Clock, event queue and link shared by both sides
struct Network {
    now: Duration,
    next_order: u64,
    next_timer: u64,
    queue: BTreeMap<EventKey, Event>,
    timers: HashMap<TimerId, (EventKey, Side)>,
    latency: Duration,
    drop_data: Option<DropPredicate>,
    dropped: Vec<SeqNumber>,
    client_events: Vec<(Duration, SessionEvent)>,
    server_events: Vec<(Duration, SessionEvent)>,
    errors: Vec<(Side, SessionError)>,
}

impl Network {
    fn new() -> Self {
        Network {
            now: Duration::ZERO,
            next_order: 0,
            next_timer: 0,
            queue: BTreeMap::new(),
            timers: HashMap::new(),
            latency: DEFAULT_LATENCY,
            drop_data: None,
            dropped: Vec::new(),
            client_events: Vec::new(),
            server_events: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn push(&mut self, delay: Duration, event: Event) -> EventKey {
        let key = (self.now + delay, self.next_order);
        self.next_order += 1;
        self.queue.insert(key, event);
        key
    }

    fn deliver(&mut self, event: Event) {
        let latency = self.latency;
        self.push(latency, event);
    }

    fn arm(&mut self, side: Side, delay: Duration, make: impl FnOnce(TimerId) -> Event) -> TimerId {
        self.next_timer += 1;
        let id = TimerId::new(self.next_timer);
        let key = self.push(delay, make(id));
        self.timers.insert(id, (key, side));
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some((key, _)) = self.timers.remove(&id) {
            self.queue.remove(&key);
        }
    }

    fn send_data(&mut self, datagram: Bytes) {
        if let (Some(should_drop), Ok(header)) =
            (self.drop_data.as_mut(), DataHeader::from_bytes(&datagram))
        {
            if should_drop(header.seq) {
                debug!(seq = %header.seq, "Link dropped data datagram");
                self.dropped.push(header.seq);
                return;
            }
        }
        self.deliver(Event::Data(datagram));
    }
}

struct ClientSide<'a>(&'a mut Network);

impl SessionContext for ClientSide<'_> {
    type Timer = ClientTimer;

    fn now(&self) -> Duration {
        self.0.now
    }

    fn schedule(&mut self, delay: Duration, timer: ClientTimer) -> TimerId {
        self.0
            .arm(Side::Client, delay, |id| Event::ClientTimer(id, timer))
    }

    fn cancel(&mut self, id: TimerId) {
        self.0.cancel(id);
    }

    fn send_control(&mut self, message: Bytes) -> Result<(), TransportError> {
        self.0.deliver(Event::ServerControl(message));
        Ok(())
    }

    fn send_datagram(&mut self, datagram: Bytes) -> Result<(), TransportError> {
        self.0.deliver(Event::Feedback(datagram));
        Ok(())
    }

    fn emit(&mut self, event: SessionEvent) {
        let now = self.0.now;
        self.0.client_events.push((now, event));
    }
}

struct ServerSide<'a>(&'a mut Network);

impl SessionContext for ServerSide<'_> {
    type Timer = ServerTimer;

    fn now(&self) -> Duration {
        self.0.now
    }

    fn schedule(&mut self, delay: Duration, timer: ServerTimer) -> TimerId {
        self.0
            .arm(Side::Server, delay, |id| Event::ServerTimer(id, timer))
    }

    fn cancel(&mut self, id: TimerId) {
        self.0.cancel(id);
    }

    fn send_control(&mut self, message: Bytes) -> Result<(), TransportError> {
        self.0.deliver(Event::ClientControl(message));
        Ok(())
    }

    fn send_datagram(&mut self, datagram: Bytes) -> Result<(), TransportError> {
        self.0.send_data(datagram);
        Ok(())
    }

    fn emit(&mut self, event: SessionEvent) {
        let now = self.0.now;
        self.0.server_events.push((now, event));
    }
}

/// A client and a server session on one virtual timeline
pub struct Simulation<P> {
    net: Network,
    client: ClientSession,
    server: ServerSession<P>,
}

impl<P: SourceProvider> Simulation<P> {
    pub fn new(client: ClientConfig, server: ServerConfig, provider: P) -> Self {
        Simulation {
            net: Network::new(),
            client: ClientSession::new(client),
            server: ServerSession::new(server, provider),
        }
    }

    /// Set the one-way latency of every channel
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.net.latency = latency;
        self
    }

    /// Drop data datagrams whose sequence number matches `predicate`
    pub fn drop_data_where(mut self, predicate: impl FnMut(SeqNumber) -> bool + 'static) -> Self {
        self.net.drop_data = Some(Box::new(predicate));
        self
    }

    /// Queue a client request at `at` on the virtual clock
    pub fn schedule(&mut self, at: Duration, method: Method) -> &mut Self {
        self.client.schedule_message(at, method);
        self
    }

    /// Start both sessions, arming the client's queued requests
    pub fn start(&mut self) {
        self.server.start(&mut ServerSide(&mut self.net));
        self.client.start(&mut ClientSide(&mut self.net));
    }

    /// Dispose of both sessions
    pub fn stop(&mut self) {
        self.client.stop(&mut ClientSide(&mut self.net));
        self.server.stop(&mut ServerSide(&mut self.net));
    }

    /// Have the client send a request right now
    pub fn send_request(
        &mut self,
        method: Method,
        argument: Option<String>,
    ) -> Result<(), SessionError> {
        self.client
            .send_request(&mut ClientSide(&mut self.net), method, argument)
    }

    /// Put raw bytes on the control channel toward the server
    pub fn inject_server_control(&mut self, bytes: &[u8]) {
        self.net
            .deliver(Event::ServerControl(Bytes::copy_from_slice(bytes)));
    }

    /// Put raw bytes on the feedback channel toward the server
    pub fn inject_feedback(&mut self, bytes: &[u8]) {
        self.net.deliver(Event::Feedback(Bytes::copy_from_slice(bytes)));
    }

    /// Process the earliest queued event; `false` once the queue is empty
    pub fn step(&mut self) -> bool {
        let Some(((at, _), event)) = self.net.queue.pop_first() else {
            return false;
        };
        self.net.now = at;
        trace!(at_ms = at.as_millis() as u64, ?event, "Simulation step");

        let (side, result) = match event {
            Event::ClientTimer(id, timer) => {
                self.net.timers.remove(&id);
                let result = self
                    .client
                    .on_timer(&mut ClientSide(&mut self.net), id, timer);
                (Side::Client, result)
            }
            Event::ServerTimer(id, timer) => {
                self.net.timers.remove(&id);
                let result = self
                    .server
                    .on_timer(&mut ServerSide(&mut self.net), id, timer);
                (Side::Server, result)
            }
            Event::ServerControl(bytes) => {
                let result = self.server.on_control(&mut ServerSide(&mut self.net), &bytes);
                (Side::Server, result)
            }
            Event::ClientControl(bytes) => {
                let result = self.client.on_control(&mut ClientSide(&mut self.net), &bytes);
                (Side::Client, result)
            }
            Event::Feedback(bytes) => {
                let result = self.server.on_feedback(&mut ServerSide(&mut self.net), &bytes);
                (Side::Server, result)
            }
            Event::Data(bytes) => {
                let result = self.client.on_data(&mut ClientSide(&mut self.net), bytes);
                (Side::Client, result)
            }
        };

        if let Err(e) = result {
            debug!(?side, "Session rejected input: {}", e);
            self.net.errors.push((side, e));
        }
        true
    }

    /// Process every event due at or before `deadline`, then move the clock
    /// to `deadline`
    pub fn run_until(&mut self, deadline: Duration) {
        while self
            .net
            .queue
            .first_key_value()
            .map_or(false, |(&(at, _), _)| at <= deadline)
        {
            self.step();
        }
        self.net.now = self.net.now.max(deadline);
    }

    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.net.now + duration;
        self.run_until(deadline);
    }

    /// Run until nothing is queued; `false` if `max_steps` ran out first
    pub fn run_until_idle(&mut self, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            if !self.step() {
                return true;
            }
        }
        self.net.queue.is_empty()
    }

    pub fn now(&self) -> Duration {
        self.net.now
    }

    pub fn client(&self) -> &ClientSession {
        &self.client
    }

    pub fn server(&self) -> &ServerSession<P> {
        &self.server
    }

    /// Events queued but not yet processed, timers included
    pub fn pending_events(&self) -> usize {
        self.net.queue.len()
    }

    /// Timers currently armed by `side`
    pub fn armed_timers(&self, side: Side) -> usize {
        self.net
            .timers
            .values()
            .filter(|(_, owner)| *owner == side)
            .count()
    }

    pub fn client_events(&self) -> &[(Duration, SessionEvent)] {
        &self.net.client_events
    }

    pub fn server_events(&self) -> &[(Duration, SessionEvent)] {
        &self.net.server_events
    }

    /// Data datagrams the link dropped
    pub fn dropped(&self) -> &[SeqNumber] {
        &self.net.dropped
    }

    /// Inputs a session rejected, in order
    pub fn errors(&self) -> &[(Side, SessionError)] {
        &self.net.errors
    }

    /// Frames the server sent: `(seq, payload size, level)`
    pub fn sent_frames(&self) -> Vec<(SeqNumber, usize, u32)> {
        self.server_events()
            .iter()
            .filter_map(|(_, event)| match event {
                SessionEvent::FrameSent { seq, size, level } => Some((*seq, *size, *level)),
                _ => None,
            })
            .collect()
    }

    /// Frames the client received: `(seq, payload size)`
    pub fn received_frames(&self) -> Vec<(SeqNumber, usize)> {
        self.client_events()
            .iter()
            .filter_map(|(_, event)| match event {
                SessionEvent::FrameReceived { seq, size } => Some((*seq, *size)),
                _ => None,
            })
            .collect()
    }

    /// Frames the client played: `(seq, payload size)`
    pub fn played_frames(&self) -> Vec<(SeqNumber, usize)> {
        self.client_events()
            .iter()
            .filter_map(|(_, event)| match event {
                SessionEvent::FramePlayed { seq, size } => Some((*seq, *size)),
                _ => None,
            })
            .collect()
    }

    /// Congestion level changes on the server: `(from, to)`
    pub fn level_changes(&self) -> Vec<(u32, u32)> {
        self.server_events()
            .iter()
            .filter_map(|(_, event)| match event {
                SessionEvent::CongestionChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// States `side` moved through, in order
    pub fn state_history(&self, side: Side) -> Vec<SessionState> {
        let events = match side {
            Side::Client => self.client_events(),
            Side::Server => self.server_events(),
        };
        events
            .iter()
            .filter_map(|(_, event)| match event {
                SessionEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtsp_protocol::SourceCatalog;

    fn sim() -> Simulation<SourceCatalog> {
        Simulation::new(
            ClientConfig::default(),
            ServerConfig::default(),
            SourceCatalog::new(),
        )
    }

    #[test]
    fn test_cancelled_timer_leaves_queue() {
        let mut sim = sim();
        let id = ClientSide(&mut sim.net).schedule(Duration::from_millis(10), ClientTimer::Playout);
        assert_eq!(sim.pending_events(), 1);
        assert_eq!(sim.armed_timers(Side::Client), 1);

        ClientSide(&mut sim.net).cancel(id);
        assert_eq!(sim.pending_events(), 0);
        assert_eq!(sim.armed_timers(Side::Client), 0);
        assert!(!sim.step());
    }

    #[test]
    fn test_events_ordered_by_time_then_insertion() {
        let mut sim = sim().with_latency(Duration::from_millis(1));
        sim.inject_server_control(b"DESCRIBE");
        sim.inject_server_control(b"BOGUS");

        sim.run_until(Duration::from_millis(1));
        assert_eq!(sim.now(), Duration::from_millis(1));
        // DESCRIBE was answered, BOGUS was rejected after it
        assert_eq!(sim.errors().len(), 1);
        assert_eq!(sim.errors()[0].0, Side::Server);
        assert_eq!(sim.pending_events(), 1);
    }

    #[test]
    fn test_run_until_advances_idle_clock() {
        let mut sim = sim();
        sim.run_until(Duration::from_secs(3));
        assert_eq!(sim.now(), Duration::from_secs(3));
        assert!(sim.run_until_idle(1));
    }
}
