//! Per-connection session state.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A client connection.
///
/// Exchanges on one session are strictly sequential: the next request is not
/// handed to a worker until the terminal frame of the previous one has been
/// written.
#[derive(Debug)]
pub struct Session {
    /// Unique session ID.
    pub id: Uuid,

    /// Remote address.
    pub remote_addr: SocketAddr,

    /// Exchanges completed on this session.
    request_count: u64,

    /// Session creation time.
    created_at: Instant,

    /// Last activity time.
    last_activity: Instant,

    /// Whether an exchange is waiting for its terminal frame.
    in_flight: bool,
}

impl Session {
    pub fn new(remote_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            request_count: 0,
            created_at: now,
            last_activity: now,
            in_flight: false,
        }
    }

    /// Marks an exchange as handed to the worker pool.
    pub fn begin_exchange(&mut self) {
        debug_assert!(!self.in_flight, "exchange already in flight");
        self.in_flight = true;
        self.last_activity = Instant::now();
    }

    /// Marks the in-flight exchange as answered.
    pub fn end_exchange(&mut self) {
        self.in_flight = false;
        self.request_count += 1;
        self.last_activity = Instant::now();
    }

    /// Records inbound bytes.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Returns the time since last activity.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Returns the session age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Short form of the id for log lines.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12345)
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new(test_addr());
        assert_eq!(session.request_count(), 0);
        assert!(!session.is_in_flight());
        assert_eq!(session.short_id().len(), 8);
    }

    #[test]
    fn test_exchange_bookkeeping() {
        let mut session = Session::new(test_addr());
        session.begin_exchange();
        assert!(session.is_in_flight());
        session.end_exchange();
        session.begin_exchange();
        session.end_exchange();

        assert!(!session.is_in_flight());
        assert_eq!(session.request_count(), 2);
        assert!(session.idle_duration() <= session.age());
    }

    #[test]
    fn test_unique_ids() {
        let a = Session::new(test_addr());
        let b = Session::new(test_addr());
        assert_ne!(a.id, b.id);
    }
}
