//! Idle-connection queue: a bounded, lock-free FIFO plus an
//! [`event_listener::Event`] for waking waiting borrowers, the same shape
//! `sqlx_core::pool::idle` uses for its idle connection list.

use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use event_listener::Event;

use crate::connection::Managed;
use crate::driver::RawConnection;

pub(crate) struct AvailableQueue<C: RawConnection> {
    queue: ArrayQueue<Managed<C>>,
    event: Event,
}

impl<C: RawConnection> AvailableQueue<C> {
    pub fn new(capacity: usize) -> Self {
        AvailableQueue { queue: ArrayQueue::new(capacity.max(1)), event: Event::new() }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Push a connection back onto the queue and wake one waiter, if any.
    pub fn push(&self, conn: Managed<C>) {
        if self.queue.push(conn).is_err() {
            // Can only happen if `total_count` ever exceeds `max_connections`,
            // which `PoolInner` is responsible for preventing.
            log::warn!("available queue overflow, dropping a connection slot");
        }
        self.event.notify(1);
    }

    pub fn try_pop(&self) -> Option<Managed<C>> {
        self.queue.pop()
    }

    /// Spec §4.2.a: poll immediately, then wait up to `timeout` for a push.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Managed<C>> {
        if let Some(c) = self.try_pop() {
            return Some(c);
        }

        let deadline = Instant::now() + timeout;
        loop {
            // Register before the second check to avoid a lost wakeup between
            // the first `try_pop` and starting to listen.
            let listener = self.event.listen();
            if let Some(c) = self.try_pop() {
                return Some(c);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            if tokio::time::timeout(remaining, listener).await.is_err() {
                return None;
            }
            if let Some(c) = self.try_pop() {
                return Some(c);
            }
        }
    }
}
