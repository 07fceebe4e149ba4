//! Events consumed by the controller, and the queue delivering them in time order.

use std::{cmp::Reverse, collections::BinaryHeap, time::Duration};

use crate::flow::HeaderFields;

/// Why a switch removed a flow rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowRemovedReason {
    /// The rule was idle for longer than its idle timeout.
    IdleTimeout,
    /// The rule reached its hard timeout.
    HardTimeout,
    /// The rule was deleted by the controller.
    Delete,
    /// The group of the rule was deleted.
    GroupDelete,
    /// The meter of the rule was deleted.
    MeterDelete,
}

/// An event handled by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A switch finished its handshake.
    SwitchConnected {
        /// Datapath id of the switch
        dpid: u64,
    },
    /// A switch had no rule for a packet.
    PacketIn {
        /// Datapath id of the reporting switch
        dpid: u64,
        /// Match fields of the packet
        fields: HeaderFields,
        /// Port the packet arrived on
        in_port: u32,
    },
    /// A switch removed a flow rule.
    FlowRemoved {
        /// Datapath id of the reporting switch
        dpid: u64,
        /// Match fields of the removed rule
        fields: HeaderFields,
        /// Why the rule was removed
        reason: FlowRemovedReason,
    },
    /// Periodic energy poll.
    PollEnergy,
    /// Periodic rebalance pass.
    Rebalance,
}

#[derive(Debug)]
struct Scheduled {
    time: Duration,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// Queue of future events. Events are popped in time order, and events scheduled for the same time
/// in the order they were pushed.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
    now: Duration,
}

impl EventQueue {
    /// Create an empty queue at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the last popped event.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of pending events
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if no event is pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedule an event at an absolute time. Events in the past are delivered at the current time.
    pub fn push(&mut self, time: Duration, event: Event) {
        let time = time.max(self.now);
        self.heap.push(Reverse(Scheduled {
            time,
            seq: self.seq,
            event,
        }));
        self.seq += 1;
    }

    /// Schedule an event `delay` after the current time.
    pub fn schedule(&mut self, delay: Duration, event: Event) {
        self.push(self.now + delay, event);
    }

    /// Time of the next event.
    #[inline]
    pub fn next_time(&self) -> Option<Duration> {
        self.heap.peek().map(|s| s.0.time)
    }

    /// Pop the next event and advance the current time to it.
    pub fn pop(&mut self) -> Option<(Duration, Event)> {
        let Reverse(s) = self.heap.pop()?;
        self.now = s.time;
        Some((s.time, s.event))
    }

    /// Pop the next event if it is due no later than `until`.
    pub fn pop_until(&mut self, until: Duration) -> Option<(Duration, Event)> {
        match self.next_time() {
            Some(t) if t <= until => self.pop(),
            _ => None,
        }
    }
}
