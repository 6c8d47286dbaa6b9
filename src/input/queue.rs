//! Bounded interrupt → event-loop queue of raw pin transitions.
//!
//! The GPIO handlers are the only producers and the event loop is the only
//! consumer. Pushing never blocks: when the queue is full the oldest edge is
//! discarded and an overflow counter is bumped. Dropping from the head on
//! the producer side needs exclusive access to both ends, so the deque sits
//! behind a short critical section rather than a lock-free ring.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;

use super::{ButtonId, Edge, RawEvent};
use embassy_time::Instant;

struct Inner<const N: usize> {
    events: Deque<RawEvent, N>,
    overflows: u32,
}

/// FIFO of [`RawEvent`]s, safe to share as a `static`.
pub struct EventQueue<const N: usize> {
    inner: Mutex<RefCell<Inner<N>>>,
}

impl<const N: usize> EventQueue<N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                events: Deque::new(),
                overflows: 0,
            })),
        }
    }

    /// Record a pin transition. Callable from interrupt context.
    pub fn on_pin_transition(&self, button: ButtonId, edge: Edge, timestamp: Instant) {
        self.push(RawEvent {
            button,
            edge,
            timestamp,
        });
    }

    pub fn push(&self, event: RawEvent) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.events.is_full() {
                inner.events.pop_front();
                inner.overflows = inner.overflows.wrapping_add(1);
            }
            // Cannot fail: a slot was freed above if needed.
            let _ = inner.events.push_back(event);
        });
    }

    /// Oldest pending edge, if any.
    pub fn pop(&self) -> Option<RawEvent> {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).events.pop_front())
    }

    /// Edges dropped because the consumer fell behind.
    pub fn overflow_count(&self) -> u32 {
        critical_section::with(|cs| self.inner.borrow_ref(cs).overflows)
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow_ref(cs).events.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
