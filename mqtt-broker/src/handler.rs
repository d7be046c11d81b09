use bytes::Bytes;

use mqtt_core::{
    qos::{QosLevel, SubAckQoS},
    topic::TopicFilter,
    v3::{
        ConnAckPacket, FilterResult, MqttPacket, Protocol, PubAckPacket, PubCompPacket,
        PubRecPacket, PubRelPacket, PingRespPacket, SubAckPacket, UnsubAckPacket,
    },
    ConnectReturnCode,
};

use crate::{
    broker::{Broker, Message, QueueEntry},
    error::BrokerError,
    session::Session,
};

/// What the reactor should do with the session after a packet was handled.
/// `Err` from [`handle_packet`] always means "drop ungracefully"; this enum
/// only distinguishes the two `Ok` outcomes.
pub enum Outcome {
    Continue,
    GracefulClose,
}

/// Authentication hook. Always accepts — there is no real auth backend in
/// this broker (see non-goals); this is the extension point a production
/// deployment would replace.
fn authenticate(_client_id: &str, _username: &Option<String>, _password: &Option<Bytes>) -> bool {
    return true;
}

pub(crate) fn write_session(session: &mut Session, bytes: Bytes) -> Result<(), BrokerError> {
    use std::io::Write;

    let socket = session
        .socket
        .as_mut()
        .ok_or_else(|| BrokerError::protocol("session has no socket to write to"))?;

    socket.write_all(&bytes)?;
    return Ok(());
}

pub fn handle_packet(
    broker: &mut Broker,
    idx: usize,
    packet: MqttPacket,
) -> Result<Outcome, BrokerError> {
    broker.sessions_mut()[idx].touch();

    if !broker.sessions()[idx].active && !matches!(packet, MqttPacket::Connect(_)) {
        return Err(BrokerError::protocol(
            "only CONNECT is accepted on a half-open session",
        ));
    }

    match packet {
        MqttPacket::Connect(connect) => handle_connect(broker, idx, connect),
        MqttPacket::Disconnect(_) => handle_disconnect(broker, idx),
        MqttPacket::Publish(publish) => handle_publish(broker, idx, publish),
        MqttPacket::PubAck(_) => Ok(Outcome::Continue),
        MqttPacket::PubRec(ack) => handle_pubrec(broker, idx, ack),
        MqttPacket::PubRel(rel) => handle_pubrel(broker, idx, rel),
        MqttPacket::PubComp(_) => Ok(Outcome::Continue),
        MqttPacket::Subscribe(sub) => handle_subscribe(broker, idx, sub),
        MqttPacket::Unsubscribe(unsub) => handle_unsubscribe(broker, idx, unsub),
        MqttPacket::PingReq(_) => handle_pingreq(broker, idx),
        MqttPacket::ConnAck(_) | MqttPacket::SubAck(_) | MqttPacket::UnsubAck(_) | MqttPacket::PingResp(_) => {
            Err(BrokerError::protocol("received a server-originated packet type from a client"))
        }
    }
}

fn handle_connect(
    broker: &mut Broker,
    idx: usize,
    connect: mqtt_core::v3::ConnectPacket,
) -> Result<Outcome, BrokerError> {
    if broker.sessions()[idx].active {
        return Err(BrokerError::protocol("second CONNECT on an already-active session"));
    }

    let clean_session = connect.clean_session();
    let client_id = connect.client_id().to_string();

    // v3.1.0 always requires a client-id; v3.1.1 only requires one when the
    // client isn't also asking for a clean session (§4.6).
    let client_id_required = connect.protocol() == Protocol::MQIsdp || !clean_session;

    if client_id.is_empty() && client_id_required {
        let packet = ConnAckPacket::new(false, ConnectReturnCode::IdentifierRejected);
        write_session(&mut broker.sessions_mut()[idx], packet.encode())?;
        return Err(BrokerError::protocol("empty client-id requires clean_session"));
    }

    if let Some(will) = &connect.will {
        if will.will_topic().as_str().starts_with('$') {
            return Err(BrokerError::protocol("will topic must not begin with '$'"));
        }
    }

    if !authenticate(&client_id, connect.username(), connect.password()) {
        let packet = ConnAckPacket::new(false, ConnectReturnCode::NotAuthorized);
        write_session(&mut broker.sessions_mut()[idx], packet.encode())?;
        return Err(BrokerError::protocol("authentication rejected"));
    }

    let client_id = if client_id.is_empty() {
        format!("anonymous-{idx}")
    } else {
        client_id
    };

    let will = connect.will.clone();
    let session_present = broker.activate(idx, client_id, connect.keep_alive, clean_session, will);

    let ack = ConnAckPacket::new(session_present, ConnectReturnCode::Accept);
    write_session(&mut broker.sessions_mut()[idx], ack.encode())?;

    if session_present {
        let filters: Vec<(TopicFilter, QosLevel)> = broker.sessions()[idx]
            .subscriptions
            .iter()
            .map(|s| (s.filter().clone(), s.qos()))
            .collect();

        for (filter, qos) in filters {
            broker.handle_retained(idx, &filter, qos);
        }
    }

    return Ok(Outcome::Continue);
}

fn handle_disconnect(broker: &mut Broker, idx: usize) -> Result<Outcome, BrokerError> {
    broker.sessions_mut()[idx].will = None;
    return Ok(Outcome::GracefulClose);
}

fn handle_publish(
    broker: &mut Broker,
    idx: usize,
    publish: mqtt_core::v3::PublishPacket,
) -> Result<Outcome, BrokerError> {
    if publish.topic().as_str().starts_with('$') {
        return Err(BrokerError::protocol("PUBLISH topic must not begin with '$'"));
    }

    let qos = publish.qos();

    match qos {
        QosLevel::ExactlyOnce => {
            let id = publish.id().expect("QoS 2 PUBLISH always carries a packet id");

            match broker.sessions_mut()[idx].reserve_inflight(id) {
                Some(true) => {}
                Some(false) => {
                    if !publish.dup() {
                        return Err(BrokerError::protocol(
                            "retransmitted QoS 2 PUBLISH without dup set",
                        ));
                    }
                    let ack = PubRecPacket::new(id);
                    write_session(&mut broker.sessions_mut()[idx], ack.encode())?;
                    return Ok(Outcome::Continue);
                }
                None => {
                    return Err(BrokerError::resource_exhausted("inbound inflight table full"));
                }
            }

            enqueue_publish(broker, &publish);

            let ack = PubRecPacket::new(id);
            write_session(&mut broker.sessions_mut()[idx], ack.encode())?;
        }
        QosLevel::AtLeastOnce => {
            let id = publish.id().expect("QoS 1 PUBLISH always carries a packet id");
            enqueue_publish(broker, &publish);
            let ack = PubAckPacket::new(id);
            write_session(&mut broker.sessions_mut()[idx], ack.encode())?;
        }
        QosLevel::AtMostOnce => {
            enqueue_publish(broker, &publish);
        }
    }

    return Ok(Outcome::Continue);
}

fn enqueue_publish(broker: &mut Broker, publish: &mqtt_core::v3::PublishPacket) {
    let entry = QueueEntry {
        message: Message {
            topic: publish.topic().clone(),
            payload: publish.payload().clone(),
        },
        p_qos: publish.qos(),
        retain: publish.retain(),
    };

    broker.enqueue(entry);
}

fn handle_pubrec(broker: &mut Broker, idx: usize, ack: PubRecPacket) -> Result<Outcome, BrokerError> {
    // tolerant_pubrec (quirks.tolerant_pubrec, default on): always reply
    // PUBREL regardless of whether this packet-id is actually outstanding,
    // so a client that lost a PUBREL on the wire isn't stuck retrying.
    debug_assert!(broker.config().tolerant_pubrec(), "strict PUBREC mode is not implemented");
    let rel = PubRelPacket::new(ack.id());
    write_session(&mut broker.sessions_mut()[idx], rel.encode())?;
    return Ok(Outcome::Continue);
}

fn handle_pubrel(broker: &mut Broker, idx: usize, rel: PubRelPacket) -> Result<Outcome, BrokerError> {
    broker.sessions_mut()[idx].clear_inflight(rel.id());
    let comp = PubCompPacket::new(rel.id());
    write_session(&mut broker.sessions_mut()[idx], comp.encode())?;
    return Ok(Outcome::Continue);
}

fn handle_subscribe(
    broker: &mut Broker,
    idx: usize,
    sub: mqtt_core::v3::SubscribePacket,
) -> Result<Outcome, BrokerError> {
    if sub.topic_filters().is_empty() {
        return Err(BrokerError::protocol("SUBSCRIBE with an empty filter list"));
    }

    let mut granted = Vec::with_capacity(sub.topic_filters().len());
    let mut replay: Vec<(TopicFilter, QosLevel)> = Vec::new();

    for filter_result in sub.topic_filters() {
        match filter_result {
            FilterResult::Ok(topic_sub) => {
                match broker.sessions_mut()[idx]
                    .add_subscription(topic_sub.filter().clone(), topic_sub.qos())
                {
                    Some(qos) => {
                        granted.push(SubAckQoS::QOS(qos));
                        replay.push((topic_sub.filter().clone(), qos));
                    }
                    None => granted.push(SubAckQoS::Err),
                }
            }
            FilterResult::Err => granted.push(SubAckQoS::Err),
        }
    }

    let ack = SubAckPacket::new(sub.id(), granted);
    write_session(&mut broker.sessions_mut()[idx], ack.encode()?)?;

    for (filter, qos) in replay {
        broker.handle_retained(idx, &filter, qos);
    }

    return Ok(Outcome::Continue);
}

fn handle_unsubscribe(
    broker: &mut Broker,
    idx: usize,
    unsub: mqtt_core::v3::UnsubscribePacket,
) -> Result<Outcome, BrokerError> {
    if unsub.filters().is_empty() {
        return Err(BrokerError::protocol("UNSUBSCRIBE with an empty filter list"));
    }

    for filter in unsub.filters() {
        broker.sessions_mut()[idx].remove_subscription(filter);
    }

    let ack = UnsubAckPacket::new(unsub.id());
    write_session(&mut broker.sessions_mut()[idx], ack.encode())?;

    return Ok(Outcome::Continue);
}

fn handle_pingreq(broker: &mut Broker, idx: usize) -> Result<Outcome, BrokerError> {
    let resp = PingRespPacket::new();
    write_session(&mut broker.sessions_mut()[idx], resp.encode())?;
    return Ok(Outcome::Continue);
}
