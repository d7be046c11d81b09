use crate::{
    err::{DecodeError, DecodeErrorKind, EncodeError},
    qos::QosLevel,
    topic::TopicName,
    util::{decode_utf8, encode_packet_length, encode_utf8},
    v3::{FixedHeader, PacketType},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/*
 * A PUBLISH Control Packet is sent from a Client to a Server
 * or from Server to a Client to transport an Application Message.
 *
 * The receiver of a PUBLISH Packet MUST respond according to Table 3.4 -
 * Expected Publish Packet response as determined by the QoS in the PUBLISH Packet [MQTT-3.3.4-1].
 *
 * When Clients make subscriptions with Topic Filters that include wildcards,
 * it is possible for a Client's subscriptions to overlap so that a published message
 * might match multiple filters. In this case the Server MUST deliver the message to
 * the Client respecting the maximum QoS of all the matching subscriptions [MQTT-3.3.5-1].
 */
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub struct PublishPacket {
    flags: PublishFixedHeaderFlags,
    /*
     * The Topic Name MUST be present as the first field in the PUBLISH Packet Variable header.
     * It MUST NOT contain wildcard characters [MQTT-3.3.2-2].
     */
    topic_name: TopicName,
    /*
     * The Packet Identifier field is only present in PUBLISH Packets where the QoS level is 1 or 2.
     */
    packet_id: Option<u16>,
    payload: Bytes,
}

impl PublishPacket {
    pub fn new(topic_name: &TopicName, payload: Bytes) -> Self {
        return Self {
            packet_id: None,
            topic_name: topic_name.clone(),
            flags: PublishFixedHeaderFlags::zero(),
            payload,
        };
    }

    pub fn decode(f_header: FixedHeader, bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let header_byte = f_header.flags.as_byte();

        if header_byte & QOS_BITS == QOS_BITS {
            return Err(DecodeError::new(
                DecodeErrorKind::QoS,
                String::from("PUBLISH cannot have both QoS bits set (QoS 3 is not a valid level)."),
            ));
        }

        if header_byte & QOS_BITS == 0 && header_byte & DUP == DUP {
            return Err(DecodeError::new(
                DecodeErrorKind::ProtocolError,
                String::from("PUBLISH with QoS 0 must not have the DUP flag set."),
            ));
        }

        let topic_name_in = decode_utf8(bytes)?;
        let topic_name = TopicName::from_str(topic_name_in.as_str())?;

        let flags = PublishFixedHeaderFlags::from_byte(header_byte);

        let packet_id = if flags.qos() != QosLevel::AtMostOnce {
            let id = bytes.get_u16();
            if id == 0 {
                return Err(DecodeError::new(
                    DecodeErrorKind::ZeroPacketId,
                    String::from("PUBLISH with QoS 1 or 2 must have a non-zero packet id."),
                ));
            }
            Some(id)
        } else {
            None
        };

        return Ok(Self {
            packet_id,
            flags,
            topic_name,
            payload: bytes.clone(),
        });
    }

    pub fn set_qos_atmostonce(&mut self) {
        self.flags.set_qos(QosLevel::AtMostOnce);
        self.packet_id = None;
    }

    pub fn set_qos_atleastonce(&mut self, packet_id: u16) {
        self.flags.set_qos(QosLevel::AtLeastOnce);
        self.packet_id = Some(packet_id);
    }

    pub fn set_qos_exactlyonce(&mut self, packet_id: u16) {
        self.flags.set_qos(QosLevel::ExactlyOnce);
        self.packet_id = Some(packet_id);
    }

    pub fn topic(&self) -> &TopicName {
        return &self.topic_name;
    }

    pub fn qos(&self) -> QosLevel {
        return self.flags.qos();
    }

    pub fn retain(&self) -> bool {
        return self.flags.retain();
    }

    pub fn set_retain(&mut self, val: bool) {
        self.flags.set_retain(val);
    }

    pub fn dup(&self) -> bool {
        return self.flags.dup();
    }

    pub fn set_dup(&mut self, val: bool) {
        self.flags.set_dup(val);
    }

    pub fn id(&self) -> Option<u16> {
        return self.packet_id;
    }

    pub fn payload(&self) -> &Bytes {
        return &self.payload;
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut len = 2 + self.topic_name.as_str().len();

        if self.packet_id.is_some() {
            len += 2;
        }

        len += self.payload.len();

        let mut bytes = BytesMut::with_capacity(len);

        bytes.put_u8(PacketType::PUBLISH as u8 | self.flags.byte);

        encode_packet_length(&mut bytes, len)?;

        encode_utf8(&mut bytes, self.topic_name.as_str())?;

        if let Some(packet_id) = self.packet_id {
            bytes.put_u16(packet_id);
        }

        bytes.put_slice(&self.payload);

        return Ok(bytes.into());
    }
}

/*
 * If the RETAIN flag is set to 1, in a PUBLISH Packet sent by a Client to a Server,
 * the Server MUST store the Application Message and its QoS, so that it can be delivered
 * to future subscribers whose subscriptions match its topic name [MQTT-3.3.1-5].
 */
const RETAIN: u8 = 0b0000_0001;

/*
 * A PUBLISH Packet MUST NOT have both QoS bits set to 1. If a Server or Client receives
 * a PUBLISH Packet which has both QoS bits set to 1 it MUST close the Network Connection [MQTT-3.3.1-4].
 */
const QOS_1: u8 = 0b0000_0010;
const QOS_2: u8 = 0b0000_0100;
const QOS_BITS: u8 = 0b0000_0110;

/*
 * The DUP flag MUST be set to 1 by the Client or Server when it attempts to re-deliver
 * a PUBLISH Packet [MQTT-3.3.1.-1]. The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
 */
const DUP: u8 = 0b0000_1000;

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct PublishFixedHeaderFlags {
    byte: u8,
}

impl PublishFixedHeaderFlags {
    fn from_byte(byte: u8) -> Self {
        return Self {
            byte: byte & 0b0000_1111,
        };
    }

    fn zero() -> Self {
        return Self { byte: 0 };
    }

    fn qos(&self) -> QosLevel {
        match self.byte & QOS_BITS {
            QOS_1 => QosLevel::AtLeastOnce,
            QOS_2 => QosLevel::ExactlyOnce,
            _ => QosLevel::AtMostOnce,
        }
    }

    fn set_qos(&mut self, val: QosLevel) {
        self.byte = self.byte & !(QOS_BITS);
        self.byte = self.byte | ((val as u8) << 1);
    }

    fn retain(&self) -> bool {
        return self.byte & RETAIN == RETAIN;
    }

    fn set_retain(&mut self, val: bool) {
        if val {
            self.byte = self.byte | RETAIN;
        } else {
            self.byte = self.byte & !RETAIN;
        }
    }

    fn dup(&self) -> bool {
        return self.byte & DUP == DUP;
    }

    fn set_dup(&mut self, val: bool) {
        if val {
            self.byte = self.byte | DUP;
        } else {
            self.byte = self.byte & !DUP;
        }
    }
}

#[cfg(test)]
mod packet {
    use super::PublishPacket;
    use crate::topic::TopicName;
    use crate::v3::{FixedHeader, MqttPacket};
    use bytes::Buf;
    use bytes::Bytes;

    #[test]
    fn serialize_deserialize_generic() {
        let packet = PublishPacket::new(
            &TopicName::from_str("this/is/a/test").expect("Could not create topic name"),
            Bytes::from_iter([117]),
        );
        let mut buf = packet.encode().unwrap();

        let f_header = FixedHeader::decode(&mut buf).unwrap();
        let packet_de = MqttPacket::decode(f_header, &mut buf).expect("Could not decode packet");

        assert_eq!(packet.payload.first().expect("No payload present"), &117);
        assert_eq!(packet_de, MqttPacket::Publish(packet));
    }

    #[test]
    fn serialize_deserialize_qos() {
        let mut packet = PublishPacket::new(
            &TopicName::from_str("this/is/a/test").expect("Could not create topic name"),
            Bytes::from_iter([117]),
        );
        packet.set_qos_atleastonce(1234);

        let mut buf = packet.encode().unwrap();

        let f_header = FixedHeader::decode(&mut buf).unwrap();
        let packet_de = MqttPacket::decode(f_header, &mut buf).expect("Could not decode packet");

        assert_eq!(packet_de, MqttPacket::Publish(packet));
    }

    #[test]
    fn retain_and_dup_flags_roundtrip() {
        let mut packet = PublishPacket::new(
            &TopicName::from_str("a/b").unwrap(),
            Bytes::from_iter([1, 2, 3]),
        );
        packet.set_retain(true);
        packet.set_qos_atleastonce(1);
        packet.set_dup(true);

        let mut buf = packet.encode().unwrap();
        let f_header = FixedHeader::decode(&mut buf).unwrap();
        let packet_de = MqttPacket::decode(f_header, &mut buf).expect("Could not decode packet");

        assert_eq!(packet_de, MqttPacket::Publish(packet));
    }
}
