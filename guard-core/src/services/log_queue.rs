//! The Log Queue (C3): a bounded, drop-on-full FIFO between the many
//! per-node stream subscribers (producers) and the single check-service
//! consumer.
//!
//! Backed by `crossbeam-channel`, which gives us a non-blocking `offer`
//! (`try_send`) on the producer side and a blocking `take` (`recv`) on
//! the consumer side without needing a runtime — the consumer lives on
//! a plain `std::thread`, not a Tokio task.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use guard_types::UserObservation;

/// Queue capacity. Fixed, not configurable: a larger queue just delays
/// the drop-on-full backpressure the design relies on.
pub const LOG_QUEUE_CAPACITY: usize = 1000;

/// The producer half, cloned into every per-node stream task.
#[derive(Clone)]
pub struct LogQueueSender(Sender<UserObservation>);

/// The single consumer half, owned by the check service's worker thread.
pub struct LogQueueReceiver(Receiver<UserObservation>);

/// Creates a bounded log queue with [`LOG_QUEUE_CAPACITY`] capacity.
pub fn log_queue() -> (LogQueueSender, LogQueueReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(LOG_QUEUE_CAPACITY);
    (LogQueueSender(tx), LogQueueReceiver(rx))
}

impl LogQueueSender {
    /// Non-blocking enqueue. Returns `false` ("full", treated as a drop
    /// by the caller) if the queue has no room; never blocks the reader
    /// that's offering.
    pub fn offer(&self, obs: UserObservation) -> bool {
        match self.0.try_send(obs) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl LogQueueReceiver {
    /// Blocks until an observation is available or every sender has been
    /// dropped, in which case it returns `None`.
    pub fn take(&self) -> Option<UserObservation> {
        self.0.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(ip: &str) -> UserObservation {
        UserObservation {
            name: "alice".to_string(),
            ip: ip.to_string(),
            node: "n1".to_string(),
            inbound: "in1".to_string(),
            accepted: None,
        }
    }

    #[test]
    fn never_exceeds_capacity_and_reports_full() {
        let (tx, _rx) = log_queue();
        for i in 0..LOG_QUEUE_CAPACITY {
            assert!(tx.offer(obs(&i.to_string())), "slot {i} should have room");
        }
        assert!(!tx.offer(obs("overflow")), "queue should report full");
    }

    #[test]
    fn take_drains_in_fifo_order() {
        let (tx, rx) = log_queue();
        tx.offer(obs("1.1.1.1"));
        tx.offer(obs("2.2.2.2"));
        assert_eq!(rx.take().unwrap().ip, "1.1.1.1");
        assert_eq!(rx.take().unwrap().ip, "2.2.2.2");
    }
}
