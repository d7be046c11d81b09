use std::{fmt::Display, io};

use mqtt_core::err::{DecodeError, EncodeError};

/// Behavioral classification of everything a reactor iteration can fail
/// with. The reactor never unwraps one of these; every `Err` maps to a
/// drop-and-log of the offending session (see BrokerErrorKind doc on each
/// variant for which severity it logs at).
#[derive(Debug)]
pub enum BrokerErrorKind {
    /// Socket error, truncated read, short write, TCP keepalive failure.
    Io(io::Error),
    /// Malformed packet: reserved bits set, length mismatch, invalid UTF-8,
    /// bad wildcard placement, wrong packet type for the session's state.
    Decode(DecodeError),
    /// A response packet could not be re-encoded (oversized payload).
    Encode(EncodeError),
    /// A bounded table was at capacity: MAX_SESSIONS, MAX_QUEUED, MAX_INFLIGHT.
    ResourceExhausted,
    /// A structurally valid packet arrived in a state that doesn't accept it
    /// (e.g. a second CONNECT, an empty SUBSCRIBE payload).
    ProtocolViolation,
}

#[derive(Debug)]
pub struct BrokerError {
    kind: BrokerErrorKind,
    message: String,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, message: String) -> Self {
        return Self { kind, message };
    }

    pub fn kind(&self) -> &BrokerErrorKind {
        return &self.kind;
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        return Self::new(BrokerErrorKind::ProtocolViolation, message.into());
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        return Self::new(BrokerErrorKind::ResourceExhausted, message.into());
    }
}

impl Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BrokerError {}

impl From<io::Error> for BrokerError {
    fn from(value: io::Error) -> Self {
        return Self {
            kind: BrokerErrorKind::Io(value),
            message: String::new(),
        };
    }
}

impl From<DecodeError> for BrokerError {
    fn from(value: DecodeError) -> Self {
        return Self {
            message: value.to_string(),
            kind: BrokerErrorKind::Decode(value),
        };
    }
}

impl From<EncodeError> for BrokerError {
    fn from(value: EncodeError) -> Self {
        return Self {
            message: value.to_string(),
            kind: BrokerErrorKind::Encode(value),
        };
    }
}
