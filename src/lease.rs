//! Requester-side lease accounting.
//!
//! When a connection negotiates leases, every request consumes one slot of
//! the most recent LEASE grant. An expired or exhausted lease rejects the
//! request locally with REJECTED; the peer is never bothered. Connections
//! without lease semantics pay nothing here.

use std::{
    sync::Mutex,
    time::Duration,
};

use tokio::time::Instant;

use crate::error::RSocketError;

#[derive(Debug)]
struct ActiveLease {
    remaining: u32,
    expires_at: Instant,
}

/// Gate applied to outgoing requests when leases are negotiated.
#[derive(Debug)]
pub(crate) struct LeaseGate {
    enabled: bool,
    active: Mutex<Option<ActiveLease>>,
}

impl LeaseGate {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            active: Mutex::new(None),
        }
    }

    /// Record a LEASE grant received from the peer.
    ///
    /// A new grant replaces the previous one entirely; unused slots do not
    /// carry over.
    pub(crate) fn grant(&self, ttl_millis: u32, number_of_requests: u32) {
        if !self.enabled {
            log::debug!("LEASE frame on a connection without lease semantics");
            return;
        }
        let lease = ActiveLease {
            remaining: number_of_requests,
            expires_at: Instant::now() + Duration::from_millis(u64::from(ttl_millis)),
        };
        *self.active.lock().expect("lease mutex poisoned") = Some(lease);
    }

    /// Consume one lease slot, or reject when none are available.
    pub(crate) fn use_one(&self) -> Result<(), RSocketError> {
        if !self.enabled {
            return Ok(());
        }
        let mut active = self.active.lock().expect("lease mutex poisoned");
        match active.as_mut() {
            None => Err(RSocketError::rejected("no lease received")),
            Some(lease) if lease.expires_at <= Instant::now() => {
                *active = None;
                Err(RSocketError::rejected("lease expired"))
            }
            Some(lease) if lease.remaining == 0 => {
                Err(RSocketError::rejected("lease exhausted"))
            }
            Some(lease) => {
                lease.remaining -= 1;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_gate_always_admits() {
        let gate = LeaseGate::new(false);
        for _ in 0..16 {
            gate.use_one().expect("no lease accounting when disabled");
        }
    }

    #[test]
    fn requests_without_a_grant_are_rejected() {
        let gate = LeaseGate::new(true);
        let err = gate.use_one().unwrap_err();
        assert!(err.to_string().contains("no lease"));
    }

    #[test]
    fn grants_admit_exactly_their_slot_count() {
        let gate = LeaseGate::new(true);
        gate.grant(60_000, 2);
        gate.use_one().expect("first slot");
        gate.use_one().expect("second slot");
        let err = gate.use_one().unwrap_err();
        assert!(err.to_string().contains("exhausted"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_leases_reject() {
        let gate = LeaseGate::new(true);
        gate.grant(50, 8);
        tokio::time::advance(Duration::from_millis(100)).await;
        let err = gate.use_one().unwrap_err();
        assert!(err.to_string().contains("expired"));
    }
}
