use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::err::{DecodeError, DecodeErrorKind, EncodeError, EncodeErrorKind};

/// MQTT's remaining-length field is at most 4 bytes; encoding more than
/// 128^4 - 1 bytes of payload is not representable.
pub const MAX_ENCODED_PACKET_LEN: usize = (128_u64).pow(4) as usize - 1;

/// Base-128, little-endian-significance varint with the continuation bit in
/// the high position of each byte. Mirrors the embedded broker's own
/// `MQTT_br_encodeSize`.
pub fn encode_packet_length(bytes: &mut BytesMut, mut len: usize) -> Result<usize, EncodeError> {
    if len > MAX_ENCODED_PACKET_LEN {
        return Err(EncodeError::new(
            EncodeErrorKind::OversizedPayload,
            format!(
                "Packet payload exceeded max remaining length of {}, found {}",
                MAX_ENCODED_PACKET_LEN, len
            ),
        ));
    }

    let mut num_bytes = 0;

    loop {
        let mut d: u8 = (len % 128) as u8;

        len /= 128;

        if len > 0 {
            d |= 0x80;
        }

        bytes.put_u8(d);

        num_bytes += 1;

        if len == 0 {
            break;
        }
    }

    return Ok(num_bytes);
}

/// Decodes a remaining-length varint from the front of `bytes`, returning
/// `(value, bytes_consumed)`. A fifth continuation byte is rejected, mirroring
/// `MQTT_br_decodeSize`'s `if (++len > 4) goto exit` behavior.
pub fn decode_packet_length(bytes: &mut Bytes) -> Result<usize, DecodeError> {
    let mut value: usize = 0;
    let mut multiplier: usize = 1;
    let mut consumed = 0;

    loop {
        if consumed >= 4 {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedLength,
                String::from("Remaining-length varint exceeded 4 bytes."),
            ));
        }

        if bytes.is_empty() {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedLength,
                String::from("Buffer ended mid remaining-length varint."),
            ));
        }

        let byte = bytes.get_u8();
        consumed += 1;

        value += (byte & 0x7F) as usize * multiplier;
        multiplier *= 128;

        if byte & 0x80 == 0 {
            break;
        }
    }

    return Ok(value);
}

pub fn encode_utf8(bytes: &mut BytesMut, val: &str) -> Result<(), EncodeError> {
    return encode_bytes(bytes, val.as_bytes());
}

pub fn encode_bytes(bytes: &mut BytesMut, val: &[u8]) -> Result<(), EncodeError> {
    if val.len() > u16::MAX as usize {
        return Err(EncodeError::new(
            EncodeErrorKind::OversizedPayload,
            format!("Length-prefixed field exceeded {} bytes.", u16::MAX),
        ));
    }

    bytes.put_u16(val.len() as u16);
    bytes.put_slice(val);

    return Ok(());
}

pub fn decode_u16_len(bytes: &mut Bytes) -> Result<u16, DecodeError> {
    if bytes.len() < 2 {
        return Err(DecodeError::new(
            DecodeErrorKind::MalformedLength,
            String::from("Buffer too short for a 16-bit length prefix."),
        ));
    }

    let len = bytes.get_u16();

    if len as usize > bytes.len() {
        return Err(DecodeError::new(
            DecodeErrorKind::MalformedLength,
            format!(
                "Length prefix {len} exceeds remaining buffer of {} bytes.",
                bytes.len()
            ),
        ));
    }

    return Ok(len);
}

pub fn decode_bytes(bytes: &mut Bytes) -> Result<Bytes, DecodeError> {
    let len = decode_u16_len(bytes)?;
    let slice = bytes.slice(0..len as usize);
    bytes.advance(len as usize);
    return Ok(slice);
}

/// Decodes a length-prefixed UTF-8 string using the broker's lax validator
/// (see `utf8_is_valid`) rather than `str::from_utf8`'s strict one. Preserved
/// for fidelity with the embedded original; see SPEC_FULL.md §4.1 and §9.
pub fn decode_utf8(bytes: &mut Bytes) -> Result<String, DecodeError> {
    let len = decode_u16_len(bytes)?;
    let slice = bytes.slice(0..len as usize);
    bytes.advance(len as usize);

    if !utf8_is_valid(&slice) {
        return Err(DecodeError::new(
            DecodeErrorKind::Utf8ParseError,
            String::from("String failed the lax UTF-8 validator (or contained a NUL byte)."),
        ));
    }

    // utf8_is_valid only checks byte-pattern shape, not that the bytes form
    // a value `str` can represent losslessly (e.g. it accepts overlong
    // encodings); `from_utf8_lossy` never panics and matches what the
    // embedded broker's C strings effectively are: raw validated bytes.
    return Ok(String::from_utf8_lossy(&slice).into_owned());
}

/// The embedded broker's `utf8_validate`: checks only the leading-byte
/// pattern of each multi-byte run and that continuation bytes match
/// `10xxxxxx`. It does not reject overlong encodings or surrogate halves,
/// and it rejects embedded NUL bytes (MQTT strings must not contain one).
/// This is an intentional fidelity choice, not an oversight (SPEC_FULL.md §9).
pub fn utf8_is_valid(data: &[u8]) -> bool {
    let mut continuation_bytes_remaining: u8 = 0;

    for &byte in data {
        if byte == 0 {
            return false;
        }

        if continuation_bytes_remaining == 0 {
            if (byte >> 5) == 0b110 {
                continuation_bytes_remaining = 1;
            } else if (byte >> 4) == 0b1110 {
                continuation_bytes_remaining = 2;
            } else if (byte >> 3) == 0b11110 {
                continuation_bytes_remaining = 3;
            } else if (byte >> 7) != 0 {
                return false;
            }
        } else {
            if (byte >> 6) != 0b10 {
                return false;
            }
            continuation_bytes_remaining -= 1;
        }
    }

    return continuation_bytes_remaining == 0;
}

#[cfg(test)]
mod varint {
    use bytes::{Bytes, BytesMut};

    use super::{decode_packet_length, encode_packet_length, MAX_ENCODED_PACKET_LEN};

    #[test]
    fn round_trips_small_values() {
        for len in [0usize, 1, 127, 128, 16383, 16384, 2097151] {
            let mut buf = BytesMut::new();
            encode_packet_length(&mut buf, len).unwrap();
            let mut bytes = Bytes::from(buf);
            assert_eq!(decode_packet_length(&mut bytes).unwrap(), len);
        }
    }

    #[test]
    fn max_value_at_four_bytes() {
        let mut buf = BytesMut::new();
        let n = encode_packet_length(&mut buf, MAX_ENCODED_PACKET_LEN).unwrap();
        assert_eq!(n, 4);

        let mut bytes = Bytes::from(buf);
        assert_eq!(
            decode_packet_length(&mut bytes).unwrap(),
            MAX_ENCODED_PACKET_LEN
        );
    }

    #[test]
    fn rejects_oversized_encode() {
        let mut buf = BytesMut::new();
        assert!(encode_packet_length(&mut buf, MAX_ENCODED_PACKET_LEN + 1).is_err());
    }

    #[test]
    fn fifth_continuation_byte_is_rejected() {
        let mut bytes = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(decode_packet_length(&mut bytes).is_err());
    }

    #[test]
    fn does_not_consume_past_varint() {
        let mut bytes = Bytes::from_static(&[0x7F, 0xAA, 0xBB]);
        let len = decode_packet_length(&mut bytes).unwrap();
        assert_eq!(len, 127);
        assert_eq!(bytes.as_ref(), &[0xAA, 0xBB]);
    }
}

#[cfg(test)]
mod strings {
    use bytes::{Bytes, BytesMut};

    use super::{decode_utf8, encode_utf8, utf8_is_valid};

    #[test]
    fn round_trips_ascii() {
        let mut buf = BytesMut::new();
        encode_utf8(&mut buf, "sensor/temp").unwrap();
        let mut bytes = Bytes::from(buf);
        assert_eq!(decode_utf8(&mut bytes).unwrap(), "sensor/temp");
    }

    #[test]
    fn rejects_nul_byte() {
        assert!(!utf8_is_valid(&[b'a', 0, b'b']));
    }

    #[test]
    fn accepts_well_formed_multibyte() {
        assert!(utf8_is_valid("caf\u{00e9}".as_bytes()));
    }

    #[test]
    fn lax_validator_does_not_reject_overlong_lead_byte() {
        // 0xC0 0x80 is an overlong encoding of NUL; the lax validator only
        // checks shape, so it's accepted here even though it's not in the
        // embedded NUL-byte sense (the raw input byte isn't 0).
        assert!(utf8_is_valid(&[0xC0, 0xAF]));
    }
}
