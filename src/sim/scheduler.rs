//! Discrete-event scheduler.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::SimTime;

/// Handle of a scheduled event, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

/// Time-ordered event queue.
///
/// Events scheduled for the same instant run in scheduling order.
#[derive(Debug)]
pub struct Simulator<E> {
    now: SimTime,
    next_seq: u64,
    queue: BinaryHeap<Reverse<(SimTime, u64)>>,
    /// Payloads of events that are neither executed nor cancelled.
    pending: HashMap<u64, E>,
    executed: u64,
}

impl<E> Default for Simulator<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Simulator<E> {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
            pending: HashMap::new(),
            executed: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `event` at absolute time `at`.
    pub fn schedule(&mut self, at: SimTime, event: E) -> Result<EventId> {
        if at < self.now {
            return Err(Error::EventInPast { now: self.now, at });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse((at, seq)));
        self.pending.insert(seq, event);
        Ok(EventId(seq))
    }

    /// Schedule `event` after `delay`.
    pub fn schedule_in(&mut self, delay: Duration, event: E) -> EventId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse((self.now + delay, seq)));
        self.pending.insert(seq, event);
        EventId(seq)
    }

    /// Cancel a pending event. Returns `false` if it already ran or was cancelled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        self.pending.remove(&id.0).is_some()
    }

    pub fn is_pending(&self, id: EventId) -> bool {
        self.pending.contains_key(&id.0)
    }

    /// Time of the next live event.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        while let Some(Reverse((at, seq))) = self.queue.peek().copied() {
            if self.pending.contains_key(&seq) {
                return Some(at);
            }
            // Cancelled
            self.queue.pop();
        }
        None
    }

    /// Remove the next event and advance the clock to it.
    pub fn pop(&mut self) -> Option<(SimTime, E)> {
        while let Some(Reverse((at, seq))) = self.queue.pop() {
            if let Some(event) = self.pending.remove(&seq) {
                self.now = at;
                self.executed += 1;
                return Some((at, event));
            }
        }
        None
    }

    /// Like [`pop`](Self::pop), but only for events at or before `deadline`.
    pub fn pop_until(&mut self, deadline: SimTime) -> Option<(SimTime, E)> {
        match self.peek_time() {
            Some(at) if at <= deadline => self.pop(),
            _ => None,
        }
    }

    /// Move the clock forward without running anything.
    pub fn advance_to(&mut self, at: SimTime) {
        if at > self.now {
            self.now = at;
        }
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Events executed so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Drop every pending event.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }
}
