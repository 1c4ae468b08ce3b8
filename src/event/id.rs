//! Event identifiers.
//!
//! An identifier has the form `stream_id:timestamp_millis:sequence`, where
//! `sequence` is a zero-padded per-generator counter. Identifiers order by
//! `(timestamp_millis, sequence)`, which is also the replay cursor order.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Separator between identifier components, and between session and stream.
pub const ID_SEPARATOR: char = ':';

/// Fixed width of the zero-padded sequence component.
pub const SEQUENCE_WIDTH: usize = 6;

/// The sequence counter wraps here so the component keeps its fixed width.
const SEQUENCE_MODULUS: u64 = 1_000_000;

/// Errors from parsing an event identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventIdError {
    #[error("Malformed event id '{0}': expected stream:timestamp:sequence")]
    Malformed(String),

    #[error("Event id '{0}' has an empty stream component")]
    EmptyStream(String),

    #[error("Event id '{raw}' has a non-numeric {component} component")]
    NotNumeric { raw: String, component: &'static str },
}

/// Parsed event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId {
    stream_id: String,
    timestamp_ms: u64,
    sequence: u64,
}

impl EventId {
    pub fn new(stream_id: impl Into<String>, timestamp_ms: u64, sequence: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            timestamp_ms,
            sequence,
        }
    }

    /// Parse `stream:timestamp:sequence`.
    ///
    /// The stream component may itself contain separators; the last two
    /// components are always timestamp and sequence.
    pub fn parse(raw: &str) -> Result<Self, EventIdError> {
        let mut parts = raw.rsplitn(3, ID_SEPARATOR);
        let (Some(sequence), Some(timestamp), Some(stream_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(EventIdError::Malformed(raw.to_string()));
        };

        if stream_id.is_empty() {
            return Err(EventIdError::EmptyStream(raw.to_string()));
        }

        let timestamp_ms = parse_digits(timestamp).ok_or_else(|| EventIdError::NotNumeric {
            raw: raw.to_string(),
            component: "timestamp",
        })?;
        let sequence = parse_digits(sequence).ok_or_else(|| EventIdError::NotNumeric {
            raw: raw.to_string(),
            component: "sequence",
        })?;

        Ok(Self::new(stream_id, timestamp_ms, sequence))
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Session that owns this identifier's stream.
    pub fn session_id(&self) -> &str {
        session_id_for(&self.stream_id)
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Numeric order used for sorting and replay cursors.
    pub fn order(&self) -> (u64, u64) {
        (self.timestamp_ms, self.sequence)
    }

    /// Sort score for backends that index by a single float.
    ///
    /// Millisecond timestamps are exact in an f64. Ties within a millisecond
    /// need a secondary key that ranks like [`EventId::order`].
    pub fn score(&self) -> f64 {
        self.timestamp_ms as f64
    }
}

/// Derive the session id from a stream id: the text before the first
/// separator, or the whole stream id if it has none.
pub fn session_id_for(stream_id: &str) -> &str {
    match stream_id.split_once(ID_SEPARATOR) {
        Some((session, _)) => session,
        None => stream_id,
    }
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl Ord for EventId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order()
            .cmp(&other.order())
            .then_with(|| self.stream_id.cmp(&other.stream_id))
    }
}

impl PartialOrd for EventId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{:0width$}",
            self.stream_id,
            self.timestamp_ms,
            self.sequence,
            sep = ID_SEPARATOR,
            width = SEQUENCE_WIDTH
        )
    }
}

impl FromStr for EventId {
    type Err = EventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EventId {
    type Error = EventIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Default)]
struct GeneratorState {
    counter: u64,
    last_timestamp_ms: u64,
}

/// Produces ordered event identifiers.
///
/// One generator per store. The counter and the last issued timestamp are
/// updated under a single lock, so identifiers issued by one generator are
/// strictly increasing in [`EventId::order`] regardless of caller concurrency.
#[derive(Debug, Default)]
pub struct EventIdGenerator {
    state: Mutex<GeneratorState>,
}

impl EventIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next identifier for `stream_id` at wall-clock `now_ms`.
    pub fn next(&self, stream_id: &str, now_ms: u64) -> EventId {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        state.counter = (state.counter + 1) % SEQUENCE_MODULUS;
        // Clock steps backwards are clamped so ordering never regresses.
        let timestamp_ms = now_ms.max(state.last_timestamp_ms);
        state.last_timestamp_ms = timestamp_ms;

        EventId::new(stream_id, timestamp_ms, state.counter)
    }

    /// Inverse of [`EventIdGenerator::next`]'s formatting.
    pub fn parse(&self, event_id: &str) -> Result<EventId, EventIdError> {
        EventId::parse(event_id)
    }
}
