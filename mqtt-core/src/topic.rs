use bytes::Bytes;

use crate::{
    err::{DecodeError, DecodeErrorKind},
    util::decode_utf8,
};

/// Allocation-free topic match: `filter` (subscription pattern, may contain
/// `+`/`#`) against `name` (a literal PUBLISH topic). This is the hot-path
/// matcher used for every fan-out and retained-message replay.
///
/// Ported character-wise from the embedded broker's `isTopicMatched`, with
/// one correction: a trailing `+` also matches an empty final level (e.g.
/// `sport/+` matches `sport/`), which the spec calls out explicitly but the
/// raw C loop exits one byte too early to reach.
pub fn topic_matches(filter: &str, name: &str) -> bool {
    let filter = filter.as_bytes();
    let name = name.as_bytes();

    if filter.first() == Some(&b'#') && name.first() == Some(&b'$') {
        return false;
    }

    let mut fi = 0;
    let mut ni = 0;

    while fi < filter.len() && ni < name.len() {
        let f = filter[fi];

        if name[ni] == b'/' && f != b'/' {
            break;
        }

        if f != b'+' && f != b'#' && f != name[ni] {
            break;
        }

        if f == b'+' {
            while ni < name.len() && name[ni] != b'/' {
                ni += 1;
            }
        } else if f == b'#' {
            ni = name.len();
            fi += 1;
            break;
        } else {
            ni += 1;
        }

        fi += 1;
    }

    if ni == name.len() && fi == filter.len() {
        return true;
    }

    // a lone trailing '+' matches a zero-length final level that the raw
    // scan above has no bytes left to consume.
    if ni == name.len() && fi + 1 == filter.len() && filter[fi] == b'+' {
        return true;
    }

    return false;
}

/// Checks that a SUBSCRIBE/UNSUBSCRIBE filter's wildcards are placed legally:
/// `+` and `#` must each occupy a whole level, and `#` may only be the last
/// level. Grounded in the embedded broker's `subscribe_h` placement checks
/// (it walks the filter with `strchr` looking for a `+`/`#` not flanked by
/// `/` or string boundaries).
pub fn validate_topic_filter(filter: &str) -> Result<(), DecodeError> {
    if filter.is_empty() {
        return Err(DecodeError::new(
            DecodeErrorKind::MalformedTopicFilter,
            String::from("Topic filter must not be empty."),
        ));
    }

    let mut levels = filter.split('/').peekable();

    while let Some(level) = levels.next() {
        if level.contains('+') && level != "+" {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedTopicFilter,
                format!("'+' must occupy a whole topic level, found {level:?}."),
            ));
        }

        if level.contains('#') {
            if level != "#" {
                return Err(DecodeError::new(
                    DecodeErrorKind::MalformedTopicFilter,
                    format!("'#' must occupy a whole topic level, found {level:?}."),
                ));
            }

            if levels.peek().is_some() {
                return Err(DecodeError::new(
                    DecodeErrorKind::MalformedTopicFilter,
                    String::from("'#' is only valid as the last topic level."),
                ));
            }
        }
    }

    return Ok(());
}

/// A PUBLISH/Will topic name: non-empty and free of wildcard characters.
pub fn validate_topic_name(name: &str) -> Result<(), DecodeError> {
    if name.is_empty() {
        return Err(DecodeError::new(
            DecodeErrorKind::MalformedTopicName,
            String::from("Topic name must not be empty."),
        ));
    }

    if name.contains('+') || name.contains('#') {
        return Err(DecodeError::new(
            DecodeErrorKind::MalformedTopicName,
            String::from("Topic name must not contain wildcard characters."),
        ));
    }

    return Ok(());
}

/// A validated subscription pattern. Stores the original string; matching
/// against a concrete topic goes through [`topic_matches`], not equality.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    pub fn from_str(str: &str) -> Result<Self, DecodeError> {
        validate_topic_filter(str)?;
        return Ok(Self(String::from(str)));
    }

    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let string = decode_utf8(bytes)?;
        return Self::from_str(&string);
    }

    pub fn as_str(&self) -> &str {
        return &self.0;
    }

    pub fn matches(&self, name: &str) -> bool {
        return topic_matches(&self.0, name);
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}", self.0);
    }
}

/// A validated, concrete topic name as seen on a PUBLISH or Will.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicName(String);

impl TopicName {
    pub fn from_str(str: &str) -> Result<Self, DecodeError> {
        validate_topic_name(str)?;
        return Ok(Self(String::from(str)));
    }

    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let string = decode_utf8(bytes)?;
        return Self::from_str(&string);
    }

    pub fn as_str(&self) -> &str {
        return &self.0;
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}", self.0);
    }
}
