use std::{collections::HashSet, net::TcpStream, time::Instant};

use mqtt_core::{qos::QosLevel, topic::TopicFilter, v3::Will};

/// One subscribed filter and the QoS granted to it. Owned by exactly one
/// session; moved wholesale on substitution/restore.
#[derive(Clone, Debug)]
pub struct Subscription {
    filter: TopicFilter,
    qos: QosLevel,
}

impl Subscription {
    pub fn new(filter: TopicFilter, qos: QosLevel) -> Self {
        return Self { filter, qos };
    }

    pub fn filter(&self) -> &TopicFilter {
        return &self.filter;
    }

    pub fn qos(&self) -> QosLevel {
        return self.qos;
    }
}

/// A client session, spanning half-open (just accepted, no CONNECT yet)
/// through active and, for non-clean disconnects, stored.
pub struct Session {
    pub client_id: Option<String>,
    pub active: bool,
    pub socket: Option<TcpStream>,
    pub clean: bool,
    pub keep_alive: u16,
    pub last_activity: Instant,
    /// Packet-ids of QoS-2 PUBLISH awaiting PUBREL, bounded by max_inflight.
    pub inflight: HashSet<u16>,
    pub will: Option<Will>,
    pub subscriptions: Vec<Subscription>,
    /// Bytes read off the socket but not yet assembled into a complete frame.
    pub read_buf: Vec<u8>,
    max_inflight: usize,
    max_subscriptions: usize,
}

impl Session {
    /// A freshly accepted, half-open session: no client-id, not active yet.
    pub fn half_open(socket: TcpStream, max_inflight: usize, max_subscriptions: usize) -> Self {
        return Self {
            client_id: None,
            active: false,
            socket: Some(socket),
            clean: true,
            keep_alive: 0,
            last_activity: Instant::now(),
            inflight: HashSet::new(),
            will: None,
            subscriptions: Vec::new(),
            read_buf: Vec::new(),
            max_inflight,
            max_subscriptions,
        };
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_stored(&self) -> bool {
        return !self.active && self.socket.is_none() && self.client_id.is_some() && !self.clean;
    }

    /// `2 * keep_alive` while active and nonzero, `inactive_timeout` while
    /// half-open, or never (keep_alive == 0 on an active session).
    pub fn is_timed_out(&self, inactive_timeout_secs: u64) -> bool {
        let elapsed = self.last_activity.elapsed();

        if self.active {
            if self.keep_alive == 0 {
                return false;
            }
            return elapsed.as_secs() > (self.keep_alive as u64) * 2;
        }

        return elapsed.as_secs() > inactive_timeout_secs;
    }

    /// Add or upgrade a subscription. Returns the granted QoS on success,
    /// or `None` if the session is already at its subscription cap and the
    /// filter is new (MQTT 0x80 failure code, assigned by the caller).
    pub fn add_subscription(&mut self, filter: TopicFilter, qos: QosLevel) -> Option<QosLevel> {
        if let Some(existing) = self
            .subscriptions
            .iter_mut()
            .find(|s| s.filter.as_str() == filter.as_str())
        {
            existing.qos = qos;
            return Some(qos);
        }

        if self.subscriptions.len() >= self.max_subscriptions {
            return None;
        }

        self.subscriptions.push(Subscription::new(filter, qos));
        return Some(qos);
    }

    pub fn remove_subscription(&mut self, filter: &TopicFilter) {
        self.subscriptions
            .retain(|s| s.filter.as_str() != filter.as_str());
    }

    pub fn clear_subscriptions(&mut self) {
        self.subscriptions.clear();
    }

    /// Reserve a QoS-2 inbound packet-id. `Some(true)` if newly reserved,
    /// `Some(false)` if already present (a retried PUBLISH with dup set),
    /// `None` if the inflight set is full and this is a genuinely new id.
    pub fn reserve_inflight(&mut self, id: u16) -> Option<bool> {
        if self.inflight.contains(&id) {
            return Some(false);
        }

        if self.inflight.len() >= self.max_inflight {
            return None;
        }

        self.inflight.insert(id);
        return Some(true);
    }

    pub fn clear_inflight(&mut self, id: u16) -> bool {
        return self.inflight.remove(&id);
    }

    /// Transplant another session's inflight set and subscriptions into
    /// this one, per the substitution/restore rule in the session manager.
    pub fn absorb(&mut self, other: &mut Session) {
        self.inflight = std::mem::take(&mut other.inflight);
        self.subscriptions = std::mem::take(&mut other.subscriptions);
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use mqtt_core::{qos::QosLevel, topic::TopicFilter};
    use std::net::{TcpListener, TcpStream};

    fn dummy_socket() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        return TcpStream::connect(addr).unwrap();
    }

    #[test]
    fn subscription_cap_returns_none_past_limit() {
        let mut session = Session::half_open(dummy_socket(), 8, 1);
        let a = TopicFilter::from_str("a").unwrap();
        let b = TopicFilter::from_str("b").unwrap();

        assert!(session
            .add_subscription(a.clone(), QosLevel::AtMostOnce)
            .is_some());
        assert!(session
            .add_subscription(b, QosLevel::AtMostOnce)
            .is_none());

        // re-subscribing the existing filter still succeeds (upgrade, not new).
        assert!(session
            .add_subscription(a, QosLevel::ExactlyOnce)
            .is_some());
    }

    #[test]
    fn inflight_dedups_and_caps() {
        let mut session = Session::half_open(dummy_socket(), 1, 8);

        assert_eq!(session.reserve_inflight(10), Some(true));
        assert_eq!(session.reserve_inflight(10), Some(false));
        assert_eq!(session.reserve_inflight(11), None);

        assert!(session.clear_inflight(10));
        assert_eq!(session.reserve_inflight(11), Some(true));
    }
}
