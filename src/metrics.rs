//! Operational counters for a running server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running totals for one server instance.
///
/// All counters are shared atomics; cloning produces another handle onto the
/// same totals, so a monitoring thread can read while the engine writes.
#[derive(Clone, Debug, Default)]
pub struct ServerMetrics {
    /// Datagrams read off the socket
    pub datagrams_received: Arc<AtomicU64>,
    /// Datagrams dropped because the source IP is banned or blocked
    pub dropped_banned: Arc<AtomicU64>,
    /// Datagrams dropped for malformed framing
    pub dropped_malformed: Arc<AtomicU64>,
    /// Datagrams dropped for a checksum mismatch
    pub dropped_checksum: Arc<AtomicU64>,
    /// Non-login packets from peers without a session
    pub dropped_unauthenticated: Arc<AtomicU64>,
    /// Logins accepted
    pub logins_succeeded: Arc<AtomicU64>,
    /// Logins rejected
    pub logins_failed: Arc<AtomicU64>,
    /// Source IPs moved into the block table
    pub ips_blocked: Arc<AtomicU64>,
    /// Keep-alive packets answered
    pub keepalives_answered: Arc<AtomicU64>,
    /// Commands handed to the host callback
    pub commands_dispatched: Arc<AtomicU64>,
    /// Server-message acknowledgements recorded
    pub acks_recorded: Arc<AtomicU64>,
    /// Peers evicted after an unacknowledged broadcast
    pub peers_evicted: Arc<AtomicU64>,
}

impl ServerMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Export all counters in Prometheus text exposition format.
    pub fn export_metrics(&self) -> String {
        format!(
            "bercon_datagrams_received {{}} {}\n\
             bercon_dropped_banned {{}} {}\n\
             bercon_dropped_malformed {{}} {}\n\
             bercon_dropped_checksum {{}} {}\n\
             bercon_dropped_unauthenticated {{}} {}\n\
             bercon_logins_succeeded {{}} {}\n\
             bercon_logins_failed {{}} {}\n\
             bercon_ips_blocked {{}} {}\n\
             bercon_keepalives_answered {{}} {}\n\
             bercon_commands_dispatched {{}} {}\n\
             bercon_acks_recorded {{}} {}\n\
             bercon_peers_evicted {{}} {}\n",
            self.datagrams_received.load(Ordering::Relaxed),
            self.dropped_banned.load(Ordering::Relaxed),
            self.dropped_malformed.load(Ordering::Relaxed),
            self.dropped_checksum.load(Ordering::Relaxed),
            self.dropped_unauthenticated.load(Ordering::Relaxed),
            self.logins_succeeded.load(Ordering::Relaxed),
            self.logins_failed.load(Ordering::Relaxed),
            self.ips_blocked.load(Ordering::Relaxed),
            self.keepalives_answered.load(Ordering::Relaxed),
            self.commands_dispatched.load(Ordering::Relaxed),
            self.acks_recorded.load(Ordering::Relaxed),
            self.peers_evicted.load(Ordering::Relaxed),
        )
    }
}
