//! Keep-alive scheduling and liveness deadline tracking.
//!
//! The connection driver asks this scheduler for two instants: when the next
//! outbound ping is due and when the liveness deadline expires. The deadline
//! resets every time a KEEPALIVE frame arrives; if it ever fires, the driver
//! closes the connection with a keep-alive timeout.

use std::time::Duration;

use tokio::time::Instant;

/// Timer state for one connection's keep-alive protocol.
#[derive(Debug)]
pub(crate) struct KeepAliveScheduler {
    interval: Duration,
    max_lifetime: Duration,
    next_ping: Instant,
    deadline: Instant,
}

impl KeepAliveScheduler {
    /// Scheduler for the negotiated `interval` and `max_lifetime`, starting
    /// the clock at `now`.
    pub(crate) fn new(interval: Duration, max_lifetime: Duration, now: Instant) -> Self {
        Self {
            interval,
            max_lifetime,
            next_ping: now + interval,
            deadline: now + max_lifetime,
        }
    }

    /// When the next outbound KEEPALIVE is due.
    pub(crate) fn next_ping(&self) -> Instant { self.next_ping }

    /// When the connection dies unless a KEEPALIVE arrives first.
    pub(crate) fn deadline(&self) -> Instant { self.deadline }

    /// Record an outbound ping and schedule the next one.
    pub(crate) fn on_ping_sent(&mut self, now: Instant) { self.next_ping = now + self.interval; }

    /// Record an inbound KEEPALIVE, pushing the liveness deadline out.
    pub(crate) fn observe_inbound(&mut self, now: Instant) {
        self.deadline = now + self.max_lifetime;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_extends_on_inbound_keepalive() {
        let start = Instant::now();
        let mut scheduler = KeepAliveScheduler::new(
            Duration::from_millis(500),
            Duration::from_secs(2),
            start,
        );
        assert_eq!(scheduler.deadline(), start + Duration::from_secs(2));

        let later = start + Duration::from_millis(800);
        scheduler.observe_inbound(later);
        assert_eq!(scheduler.deadline(), later + Duration::from_secs(2));
    }

    #[test]
    fn pings_reschedule_from_send_time() {
        let start = Instant::now();
        let mut scheduler = KeepAliveScheduler::new(
            Duration::from_millis(500),
            Duration::from_secs(2),
            start,
        );
        assert_eq!(scheduler.next_ping(), start + Duration::from_millis(500));

        let sent = start + Duration::from_millis(520);
        scheduler.on_ping_sent(sent);
        assert_eq!(scheduler.next_ping(), sent + Duration::from_millis(500));
    }
}
