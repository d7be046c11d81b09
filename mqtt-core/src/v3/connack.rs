use crate::{
    err::{DecodeError, DecodeErrorKind},
    v3::PacketType,
    ConnectReturnCode,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/*
 * The CONNACK Packet is the packet sent by the Server in response to a CONNECT Packet received from a Client.
 * The first packet sent from the Server to the Client MUST be a CONNACK Packet [MQTT-3.2.0-1].
 */
#[derive(PartialEq, Debug, Clone)]
pub struct ConnAckPacket {
    session_present: bool,
    return_code: ConnectReturnCode,
}

impl ConnAckPacket {
    pub fn new(session_present: bool, return_code: ConnectReturnCode) -> Self {
        return Self {
            session_present,
            return_code,
        };
    }

    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let session_present_byte = bytes.get_u8();

        if (session_present_byte & 0b1111_1110) != 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::ProtocolError,
                format!(
                    "One of the reserved bits in the CONNACK flags byte was set: {session_present_byte:#010b}."
                ),
            ));
        }

        let return_code = bytes.get_u8().try_into()?;

        return Ok(Self {
            session_present: session_present_byte != 0,
            return_code,
        });
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(4);

        bytes.put_u8(PacketType::CONNACK as u8);

        // CONNACK packets have a fixed remaining length of 2.
        bytes.put_u8(2);

        bytes.put_u8(self.session_present as u8);

        // if the server sends a non-zero return code it MUST set session present
        // to 0 [MQTT-3.2.2-4]; enforce it here so a misuse can't slip onto the wire.
        if self.return_code != ConnectReturnCode::Accept {
            bytes[2] = 0;
        }

        bytes.put_u8(self.return_code as u8);

        return bytes.into();
    }

    pub fn return_code(&self) -> ConnectReturnCode {
        return self.return_code;
    }

    pub fn session_present(&self) -> bool {
        return self.session_present;
    }

    pub fn set_session_present(&mut self, present: bool) {
        self.session_present = present;
    }
}
