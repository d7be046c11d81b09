use crate::{
    err::{DecodeError, EncodeError},
    qos::QosLevel,
    topic::TopicFilter,
    util::{encode_packet_length, encode_utf8},
    v3::PacketType,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/*
 * The SUBSCRIBE Packet is sent from the Client to the Server to create one or more Subscriptions.
 * Each Subscription registers a Client's interest in one or more Topics.
 *
 * The Server sends PUBLISH Packets to the Client in order to forward Application Messages
 * that were published to Topics that match these Subscriptions.
 */
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub struct SubscribePacket {
    packet_id: u16,

    /*
     * The payload of a SUBSCRIBE Packet contains a list of Topic Filters indicating the Topics
     * to which the Client wants to subscribe [MQTT-3.8.3-1]. Each filter is followed by a byte
     * called the Requested QoS.
     *
     * A filter that fails validation (bad wildcard placement, empty level) does not abort the
     * whole packet; it is carried through as FilterResult::Err so the handler can grant failure
     * (0x80) for that one filter per MQTT-3.8.4-6/MQTT-3.9.3-2.
     */
    payload: Vec<FilterResult>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub enum FilterResult {
    Ok(TopicSubscription),
    Err,
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub struct TopicSubscription {
    filter: TopicFilter,
    qos: QosLevel,
}

impl TopicSubscription {
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

impl SubscribePacket {
    pub fn new(packet_id: u16, payload: Vec<TopicSubscription>) -> Self {
        return Self {
            packet_id,
            payload: payload.into_iter().map(FilterResult::Ok).collect(),
        };
    }

    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let packet_id = bytes.get_u16();

        let mut payload: Vec<FilterResult> = Vec::new();

        // Topic Filter / requested QoS pairs are packed contiguously in the payload.
        loop {
            match TopicFilter::decode(bytes) {
                Ok(filter) => {
                    let qos: QosLevel = bytes.get_u8().try_into()?;
                    payload.push(FilterResult::Ok(TopicSubscription::new(filter, qos)));
                }
                Err(_) => {
                    // still consume the requested-QoS byte so the remaining pairs stay aligned.
                    bytes.get_u8();
                    payload.push(FilterResult::Err);
                }
            }

            if bytes.remaining() == 0 {
                break;
            }
        }

        return Ok(Self { packet_id, payload });
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        // 2 for packet_id
        let mut len = 2;

        for topic in &self.payload {
            match topic {
                FilterResult::Ok(sub) => {
                    len += 2 + 1;
                    len += sub.filter().as_str().len();
                }
                FilterResult::Err => {
                    panic!("Cannot encode invalid TopicFilter.");
                }
            }
        }

        let mut bytes = BytesMut::with_capacity(len);

        bytes.put_u8(PacketType::SUBSCRIBE as u8 | 0x02);

        encode_packet_length(&mut bytes, len)?;

        bytes.put_u16(self.packet_id);

        for topic in &self.payload {
            match topic {
                FilterResult::Ok(sub) => {
                    encode_utf8(&mut bytes, sub.filter().as_str())?;
                    bytes.put_u8(sub.qos() as u8);
                }
                FilterResult::Err => panic!(),
            }
        }

        return Ok(bytes.into());
    }

    pub fn id(&self) -> u16 {
        return self.packet_id;
    }

    pub fn topic_filters(&self) -> &Vec<FilterResult> {
        return &self.payload;
    }
}

#[cfg(test)]
mod packet {
    use super::{SubscribePacket, TopicSubscription};
    use crate::{
        qos::QosLevel,
        topic::TopicFilter,
        v3::{FixedHeader, MqttPacket},
    };

    #[test]
    fn serialize_deserialize() {
        let packet = SubscribePacket::new(
            1234,
            vec![TopicSubscription::new(
                TopicFilter::from_str("test").unwrap(),
                QosLevel::AtLeastOnce,
            )],
        );
        let mut buf = packet.encode().unwrap();

        let f_header = FixedHeader::decode(&mut buf).unwrap();
        let packet_de = MqttPacket::decode(f_header, &mut buf).expect("Could not decode packet");

        assert_eq!(packet_de, MqttPacket::Subscribe(packet));
    }

    #[test]
    fn multiple_filters_different_qos() {
        let packet = SubscribePacket::new(
            1,
            vec![
                TopicSubscription::new(TopicFilter::from_str("a/+").unwrap(), QosLevel::AtMostOnce),
                TopicSubscription::new(
                    TopicFilter::from_str("b/#").unwrap(),
                    QosLevel::ExactlyOnce,
                ),
            ],
        );
        let mut buf = packet.encode().unwrap();

        let f_header = FixedHeader::decode(&mut buf).unwrap();
        let packet_de = MqttPacket::decode(f_header, &mut buf).expect("Could not decode packet");

        assert_eq!(packet_de, MqttPacket::Subscribe(packet));
    }
}
