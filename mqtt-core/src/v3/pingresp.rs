use bytes::{BufMut, Bytes, BytesMut};

use crate::err::{DecodeError, DecodeErrorKind};

use super::{FixedHeader, PacketType};

/*
 * A PINGRESP Packet is sent by the Server to the Client in response to a PINGREQ Packet.
 * It indicates that the Server is alive.
 */
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct PingRespPacket;

impl PingRespPacket {
    pub fn new() -> Self {
        return Self;
    }

    pub fn decode(f_header: FixedHeader) -> Result<Self, DecodeError> {
        if f_header.rest_len() != 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedLength,
                String::from("PINGRESP packets can only contain a fixed header."),
            ));
        } else {
            return Ok(Self);
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::new();

        bytes.put_u8(PacketType::PINGRESP as u8);
        bytes.put_u8(0);

        return bytes.into();
    }
}
