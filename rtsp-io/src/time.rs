//! Clock and timer queue for session hosts
//!
//! Session time is measured as a [`Duration`] since the host started. The
//! [`TimerQueue`] keeps one-shot deadlines on that clock.

use rtsp_protocol::context::TimerId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// Monotonic session clock
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            origin: Instant::now(),
        }
    }

    /// Time since the clock started
    #[inline]
    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot timers ordered by deadline
///
/// Timers with equal deadlines fire in the order they were scheduled.
/// Cancelled timers are removed lazily and never returned.
#[derive(Debug)]
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<(Duration, u64)>>,
    pending: HashMap<u64, T>,
    next_id: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        TimerQueue {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    /// Arm a timer for the absolute session time `at`
    pub fn schedule_at(&mut self, at: Duration, timer: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse((at, id)));
        self.pending.insert(id, timer);
        TimerId::new(id)
    }

    /// Cancel a timer, returning its token if it was still armed
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.pending.remove(&id.as_raw())
    }

    /// Remove and return the earliest timer due at or before `now`, with
    /// its deadline
    pub fn pop_due(&mut self, now: Duration) -> Option<(Duration, TimerId, T)> {
        while let Some(&Reverse((at, id))) = self.heap.peek() {
            if !self.pending.contains_key(&id) {
                self.heap.pop();
                continue;
            }
            if at > now {
                return None;
            }
            self.heap.pop();
            return self.pending.remove(&id).map(|timer| (at, TimerId::new(id), timer));
        }
        None
    }

    /// Deadline of the earliest armed timer
    pub fn next_deadline(&mut self) -> Option<Duration> {
        while let Some(&Reverse((at, id))) = self.heap.peek() {
            if self.pending.contains_key(&id) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    /// Number of armed timers
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
