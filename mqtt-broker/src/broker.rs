use std::{collections::VecDeque, io::Write, net::Ipv4Addr, net::TcpStream};

use mqtt_core::{
    qos::QosLevel,
    topic::{topic_matches, TopicFilter, TopicName},
    v3::{PublishPacket, Will},
};

use crate::{config::BrokerConfig, session::Session};

/// Observable lifecycle state (§4.7/§6): `Inhibit` while
/// `connection.enabled = false` (no listener ever bound), `Down` while the
/// network availability oracle reports unavailable, `Up` otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerState {
    Inhibit,
    Down,
    Up,
}

/// Read-only snapshot for external monitoring (§4.7/§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrokerStatus {
    pub state: BrokerState,
    pub connected_clients_count: usize,
    pub bound_ipv4_address: Option<Ipv4Addr>,
}

/// A PUBLISH payload at rest, owning both its topic and bytes.
#[derive(Clone)]
pub struct Message {
    pub topic: TopicName,
    pub payload: bytes::Bytes,
}

/// A pending publication plus the secondary state the queue drainer needs:
/// the publisher's original QoS (caps delivered QoS per subscriber) and
/// whether this publication should also land in the retained store.
#[derive(Clone)]
pub struct QueueEntry {
    pub message: Message,
    pub p_qos: QosLevel,
    pub retain: bool,
}

/// Process-wide broker state: current sessions, stored (non-clean,
/// disconnected) sessions, the pending fan-out queue, and the retained
/// store. Owned entirely by the reactor task; nothing else touches it.
pub struct Broker {
    config: BrokerConfig,
    sessions: Vec<Session>,
    stored: Vec<Session>,
    pending: VecDeque<QueueEntry>,
    retained: Vec<(TopicName, QueueEntry)>,
    next_packet_id: u16,
    state: BrokerState,
    bound_ipv4_address: Option<Ipv4Addr>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        return Self {
            config,
            sessions: Vec::new(),
            stored: Vec::new(),
            pending: VecDeque::new(),
            retained: Vec::new(),
            next_packet_id: 1,
            state: BrokerState::Up,
            bound_ipv4_address: None,
        };
    }

    pub fn config(&self) -> &BrokerConfig {
        return &self.config;
    }

    pub fn sessions(&self) -> &[Session] {
        return &self.sessions;
    }

    pub fn sessions_mut(&mut self) -> &mut Vec<Session> {
        return &mut self.sessions;
    }

    pub fn connected_clients_count(&self) -> usize {
        return self.sessions.iter().filter(|s| s.active).count();
    }

    pub fn set_state(&mut self, state: BrokerState) {
        self.state = state;
    }

    pub fn set_bound_address(&mut self, addr: Ipv4Addr) {
        self.bound_ipv4_address = Some(addr);
    }

    /// Read-only status view for external monitoring (§4.7/§6).
    pub fn status(&self) -> BrokerStatus {
        return BrokerStatus {
            state: self.state,
            connected_clients_count: self.connected_clients_count(),
            bound_ipv4_address: self.bound_ipv4_address,
        };
    }

    /// TCP accept path (§4.5 Acceptance). Returns the new session's index,
    /// or `None` if MAX_SESSIONS is already reached (caller closes socket).
    pub fn try_accept(&mut self, socket: TcpStream) -> Option<usize> {
        if self.sessions.len() >= self.config.max_sessions() {
            return None;
        }

        self.sessions.push(Session::half_open(
            socket,
            self.config.max_inflight(),
            self.config.max_subscriptions(),
        ));

        return Some(self.sessions.len() - 1);
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        return id;
    }

    /// Substitution / restore (§4.5 Activation). Scans current sessions
    /// first, then stored sessions, for a matching client-id; transfers
    /// inflight + subscriptions into `idx` and reports `session_present`.
    pub fn activate(
        &mut self,
        idx: usize,
        client_id: String,
        keep_alive: u16,
        clean: bool,
        will: Option<Will>,
    ) -> bool {
        let mut session_present = false;

        // the session at `idx` is still half-open (active == false) at this
        // point, so it can never match itself here.
        if let Some(other) = self
            .sessions
            .iter()
            .position(|s| s.active && s.client_id.as_deref() == Some(client_id.as_str()))
        {
            let (left, right) = if other < idx {
                let (l, r) = self.sessions.split_at_mut(idx);
                (&mut r[0], &mut l[other])
            } else {
                let (l, r) = self.sessions.split_at_mut(other);
                (&mut l[idx], &mut r[0])
            };
            left.absorb(right);
            right.active = false;
            right.socket = None;
            session_present = true;
        } else if let Some(stored_idx) = self
            .stored
            .iter()
            .position(|s| s.client_id.as_deref() == Some(client_id.as_str()))
        {
            let mut old = self.stored.remove(stored_idx);
            self.sessions[idx].absorb(&mut old);
            session_present = true;
        }

        let session = &mut self.sessions[idx];
        session.client_id = Some(client_id);
        session.keep_alive = keep_alive;
        session.clean = clean;
        session.will = will;
        session.active = true;
        session.touch();

        if clean {
            session.inflight.clear();
            session.clear_subscriptions();
            session_present = false;
        }

        return session_present;
    }

    /// Close (graceful, §4.5) or drop (ungraceful). `store` decides whether
    /// the session shell survives in the stored table (only valid when the
    /// session has a client-id and `clean == false`).
    pub fn retire_session(&mut self, idx: usize) -> Option<Session> {
        let mut session = self.sessions.remove(idx);
        session.active = false;
        session.socket = None;

        if session.client_id.is_some() && !session.clean {
            if self.stored.len() >= self.config.max_stored_sessions() {
                self.stored.remove(0);
            }
            self.stored.push(session);
            return None;
        }

        return Some(session);
    }

    /// Timeout sweep (§4.5). Returns the indices of sessions that should be
    /// dropped, highest index first so repeated removal doesn't invalidate
    /// earlier indices.
    pub fn sweep_timeouts(&self) -> Vec<usize> {
        let mut expired: Vec<usize> = self
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_timed_out(self.config.inactive_timeout_secs()))
            .map(|(i, _)| i)
            .collect();
        expired.reverse();
        return expired;
    }

    pub fn enqueue(&mut self, entry: QueueEntry) -> bool {
        if self.pending.len() >= self.config.max_queued() {
            return false;
        }
        self.pending.push_back(entry);
        return true;
    }

    fn retained_delete(&mut self, topic: &TopicName) {
        self.retained.retain(|(t, _)| t.as_str() != topic.as_str());
    }

    fn retained_insert(&mut self, topic: TopicName, entry: QueueEntry) {
        self.retained_delete(&topic);
        if self.retained.len() >= self.config.max_retained() {
            self.retained.remove(0);
        }
        self.retained.push((topic, entry));
    }

    /// Drains the pending queue FIFO, fanning out each entry to every
    /// current session with a matching subscription (§4.4). Returns the
    /// indices of sessions whose socket write failed, so the reactor can
    /// drop them (with LWT publication) after this call returns.
    pub fn drain_pending(&mut self) -> Vec<usize> {
        let mut failed = Vec::new();

        while let Some(entry) = self.pending.pop_front() {
            for idx in 0..self.sessions.len() {
                if !self.sessions[idx].active {
                    continue;
                }

                let matches: Vec<(TopicFilter, QosLevel)> = self.sessions[idx]
                    .subscriptions
                    .iter()
                    .filter(|sub| topic_matches(sub.filter().as_str(), entry.message.topic.as_str()))
                    .map(|sub| (sub.filter().clone(), sub.qos()))
                    .collect();

                let granted_qos = matches
                    .into_iter()
                    .map(|(_, qos)| std::cmp::min(qos, entry.p_qos))
                    .max();

                if let Some(qos) = granted_qos {
                    let packet_id = if qos != QosLevel::AtMostOnce {
                        Some(self.next_packet_id())
                    } else {
                        None
                    };

                    if send_publish(
                        &mut self.sessions[idx],
                        &entry.message,
                        qos,
                        false,
                        packet_id,
                    )
                    .is_err()
                    {
                        failed.push(idx);
                    }
                }
            }

            if entry.retain {
                if entry.message.payload.is_empty() {
                    self.retained_delete(&entry.message.topic);
                } else {
                    self.retained_insert(
                        entry.message.topic.clone(),
                        QueueEntry {
                            message: entry.message.clone(),
                            p_qos: entry.p_qos,
                            retain: true,
                        },
                    );
                }
            }
        }

        return failed;
    }

    /// Replays retained messages matching `filter` to the newly subscribed
    /// session at `idx`, immediately after a successful SUBSCRIBE (§4.4).
    pub fn handle_retained(&mut self, idx: usize, filter: &TopicFilter, granted_qos: QosLevel) {
        let matches: Vec<(TopicName, bytes::Bytes, QosLevel)> = self
            .retained
            .iter()
            .filter(|(topic, _)| topic_matches(filter.as_str(), topic.as_str()))
            .map(|(topic, entry)| {
                (
                    topic.clone(),
                    entry.message.payload.clone(),
                    std::cmp::min(entry.p_qos, granted_qos),
                )
            })
            .collect();

        for (topic, payload, qos) in matches {
            let packet_id = if qos != QosLevel::AtMostOnce {
                Some(self.next_packet_id())
            } else {
                None
            };

            let _ = send_publish(
                &mut self.sessions[idx],
                &Message { topic, payload },
                qos,
                true,
                packet_id,
            );
        }
    }
}

fn send_publish(
    session: &mut Session,
    message: &Message,
    qos: QosLevel,
    retain: bool,
    packet_id: Option<u16>,
) -> std::io::Result<()> {
    let mut packet = PublishPacket::new(&message.topic, message.payload.clone());
    packet.set_retain(retain);

    match (qos, packet_id) {
        (QosLevel::AtMostOnce, _) => packet.set_qos_atmostonce(),
        (QosLevel::AtLeastOnce, Some(id)) => packet.set_qos_atleastonce(id),
        (QosLevel::ExactlyOnce, Some(id)) => packet.set_qos_exactlyonce(id),
        _ => packet.set_qos_atmostonce(),
    }

    let bytes = packet
        .encode()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;

    if let Some(socket) = session.socket.as_mut() {
        return socket.write_all(&bytes);
    }

    return Err(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "session has no socket",
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::Read,
        net::{TcpListener, TcpStream},
        time::Duration,
    };

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        return (server, client);
    }

    fn test_config() -> BrokerConfig {
        let toml = r#"
            [limits]
            max_sessions = 2
            max_stored_sessions = 1
            max_subscriptions = 8
            max_inflight = 8
            max_queued = 8
            max_retained = 1
            inactive_timeout_secs = 10
        "#;
        return toml::from_str(toml).unwrap();
    }

    #[test]
    fn try_accept_rejects_past_max_sessions() {
        let mut broker = Broker::new(test_config());
        let (s1, _c1) = socket_pair();
        let (s2, _c2) = socket_pair();
        let (s3, _c3) = socket_pair();

        assert!(broker.try_accept(s1).is_some());
        assert!(broker.try_accept(s2).is_some());
        assert!(broker.try_accept(s3).is_none());
    }

    #[test]
    fn activate_substitutes_an_already_active_session_and_clears_the_old_one() {
        let mut broker = Broker::new(test_config());
        let (s1, _c1) = socket_pair();
        let (s2, _c2) = socket_pair();

        let first = broker.try_accept(s1).unwrap();
        broker.activate(first, "same-client".to_string(), 0, false, None);
        broker.sessions_mut()[first]
            .add_subscription(TopicFilter::from_str("a/b").unwrap(), QosLevel::AtLeastOnce);

        let second = broker.try_accept(s2).unwrap();
        let present = broker.activate(second, "same-client".to_string(), 0, false, None);

        assert!(present);
        assert!(!broker.sessions()[first].active);
        assert!(broker.sessions()[first].socket.is_none());
        assert_eq!(broker.sessions()[second].subscriptions.len(), 1);
    }

    #[test]
    fn activate_restores_a_stored_session() {
        let mut broker = Broker::new(test_config());
        let (s1, _c1) = socket_pair();

        let idx = broker.try_accept(s1).unwrap();
        broker.activate(idx, "stored-client".to_string(), 0, false, None);
        broker.sessions_mut()[idx]
            .add_subscription(TopicFilter::from_str("x").unwrap(), QosLevel::AtMostOnce);
        broker.retire_session(idx);

        assert_eq!(broker.sessions().len(), 0);

        let (s2, _c2) = socket_pair();
        let idx2 = broker.try_accept(s2).unwrap();
        let present = broker.activate(idx2, "stored-client".to_string(), 0, false, None);

        assert!(present);
        assert_eq!(broker.sessions()[idx2].subscriptions.len(), 1);
    }

    #[test]
    fn clean_session_forces_zero_state_and_no_session_present() {
        let mut broker = Broker::new(test_config());
        let (s1, _c1) = socket_pair();

        let idx = broker.try_accept(s1).unwrap();
        broker.activate(idx, "dirty".to_string(), 0, false, None);
        broker.sessions_mut()[idx]
            .add_subscription(TopicFilter::from_str("x").unwrap(), QosLevel::AtMostOnce);
        broker.retire_session(idx);

        let (s2, _c2) = socket_pair();
        let idx2 = broker.try_accept(s2).unwrap();
        let present = broker.activate(idx2, "dirty".to_string(), 0, true, None);

        assert!(!present);
        assert!(broker.sessions()[idx2].subscriptions.is_empty());
    }

    #[test]
    fn retire_session_evicts_oldest_stored_past_cap() {
        let mut broker = Broker::new(test_config()); // max_stored_sessions = 1

        let (s1, _c1) = socket_pair();
        let idx = broker.try_accept(s1).unwrap();
        broker.activate(idx, "first".to_string(), 0, false, None);
        broker.retire_session(idx);

        let (s2, _c2) = socket_pair();
        let idx2 = broker.try_accept(s2).unwrap();
        broker.activate(idx2, "second".to_string(), 0, false, None);
        broker.retire_session(idx2);

        let (s3, _c3) = socket_pair();
        let idx3 = broker.try_accept(s3).unwrap();
        let present = broker.activate(idx3, "first".to_string(), 0, false, None);
        assert!(!present);
    }

    #[test]
    fn drain_pending_fans_out_to_matching_subscribers_at_minimum_qos() {
        let mut broker = Broker::new(test_config());
        let (s1, mut c1) = socket_pair();

        let idx = broker.try_accept(s1).unwrap();
        broker.activate(idx, "sub".to_string(), 0, false, None);
        broker.sessions_mut()[idx]
            .add_subscription(TopicFilter::from_str("a/b").unwrap(), QosLevel::AtMostOnce);

        broker.enqueue(QueueEntry {
            message: Message {
                topic: TopicName::from_str("a/b").unwrap(),
                payload: bytes::Bytes::from_static(b"hi"),
            },
            p_qos: QosLevel::ExactlyOnce,
            retain: false,
        });

        let failed = broker.drain_pending();
        assert!(failed.is_empty());

        let mut buf = [0u8; 64];
        c1.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let n = c1.read(&mut buf).unwrap();
        assert!(n > 0);
        // the subscriber only granted QoS 0, so delivery is capped down to it
        // regardless of the publisher's QoS 2.
        assert_eq!(buf[0] & 0b0000_0110, 0);
    }

    #[test]
    fn retained_replay_caps_qos_to_the_granted_subscription() {
        let mut broker = Broker::new(test_config());
        let (s1, mut c1) = socket_pair();

        broker.enqueue(QueueEntry {
            message: Message {
                topic: TopicName::from_str("r/t").unwrap(),
                payload: bytes::Bytes::from_static(b"retained"),
            },
            p_qos: QosLevel::AtLeastOnce,
            retain: true,
        });
        broker.drain_pending();

        let idx = broker.try_accept(s1).unwrap();
        broker.activate(idx, "late".to_string(), 0, false, None);
        broker.handle_retained(idx, &TopicFilter::from_str("r/t").unwrap(), QosLevel::AtMostOnce);

        let mut buf = [0u8; 64];
        c1.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let n = c1.read(&mut buf).unwrap();
        assert!(n > 0);
        assert_eq!(buf[0] & 0b0000_0110, 0);
    }

    #[test]
    fn retained_store_evicts_oldest_past_cap_and_empty_payload_clears() {
        let mut broker = Broker::new(test_config()); // max_retained = 1

        broker.enqueue(QueueEntry {
            message: Message {
                topic: TopicName::from_str("t/1").unwrap(),
                payload: bytes::Bytes::from_static(b"one"),
            },
            p_qos: QosLevel::AtMostOnce,
            retain: true,
        });
        broker.drain_pending();

        broker.enqueue(QueueEntry {
            message: Message {
                topic: TopicName::from_str("t/2").unwrap(),
                payload: bytes::Bytes::from_static(b"two"),
            },
            p_qos: QosLevel::AtMostOnce,
            retain: true,
        });
        broker.drain_pending();

        assert_eq!(broker.retained.len(), 1);
        assert_eq!(broker.retained[0].0.as_str(), "t/2");

        broker.enqueue(QueueEntry {
            message: Message {
                topic: TopicName::from_str("t/2").unwrap(),
                payload: bytes::Bytes::new(),
            },
            p_qos: QosLevel::AtMostOnce,
            retain: true,
        });
        broker.drain_pending();

        assert!(broker.retained.is_empty());
    }
}
