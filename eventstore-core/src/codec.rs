//! Event record codec (spec §4.B).
//!
//! Maps between the wire `Notification`/`PublishRequest` and the three
//! opaque string fields a keyed-stream backend actually stores
//! (`event_id`, `event_action`, `event_data`), plus the textual entry ID
//! format the backend assigns on append.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::errors::StoreError;

/// A monotonic entry ID: `<microseconds-since-epoch>-<sequence>`.
///
/// Ordering is the field order here (`ms_part` then `seq_part`), which
/// matches the backend's lexicographic-on-integers total order exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub ms_part: u64,
    pub seq_part: u64,
}

impl EntryId {
    pub const fn new(ms_part: u64, seq_part: u64) -> Self {
        Self { ms_part, seq_part }
    }

    /// Seconds-since-epoch as reported to clients in `Notification.event_ts`.
    ///
    /// The source reconstructs this with `float(last_id.replace('-', '.'))`,
    /// which works there because its first ID component is already seconds
    /// with a six-digit microsecond fraction. Here `ms_part` is
    /// microseconds-since-epoch, so the equivalent conversion is a division
    /// rather than a textual substitution.
    pub fn as_notification_ts(&self) -> f64 {
        self.ms_part as f64 / 1_000_000.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms_part, self.seq_part)
    }
}

impl FromStr for EntryId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = s
            .split_once('-')
            .ok_or_else(|| StoreError::Invalid(format!("malformed entry id: {s}")))?;
        let ms_part = ms
            .parse()
            .map_err(|_| StoreError::Invalid(format!("malformed entry id: {s}")))?;
        let seq_part = seq
            .parse()
            .map_err(|_| StoreError::Invalid(format!("malformed entry id: {s}")))?;
        Ok(Self { ms_part, seq_part })
    }
}

/// The three opaque fields actually held in the backend per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFields {
    pub event_id: String,
    pub event_action: String,
    pub event_data: Vec<u8>,
}

impl StoredFields {
    /// Field names as stored in the backend's keyed-stream entry.
    pub const FIELD_EVENT_ID: &'static str = "event_id";
    pub const FIELD_EVENT_ACTION: &'static str = "event_action";
    pub const FIELD_EVENT_DATA: &'static str = "event_data";

    /// Encodes into the `(field, value)` pairs a keyed-stream `XADD`-style
    /// append call expects. `event_data` is base64-encoded so arbitrary
    /// bytes survive a text-oriented stream field.
    pub fn to_field_pairs(&self) -> [(&'static str, String); 3] {
        [
            (Self::FIELD_EVENT_ID, self.event_id.clone()),
            (Self::FIELD_EVENT_ACTION, self.event_action.clone()),
            (Self::FIELD_EVENT_DATA, BASE64.encode(&self.event_data)),
        ]
    }

    /// Decodes from the fields a backend read returns. Missing fields are
    /// treated as empty rather than an error: a misbehaving producer
    /// writing directly to the backend (bypassing `publish`) should not
    /// make reads fail.
    pub fn from_fields<'a, I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut event_id = String::new();
        let mut event_action = String::new();
        let mut event_data = Vec::new();
        for (k, v) in fields {
            match k {
                Self::FIELD_EVENT_ID => event_id = v.to_string(),
                Self::FIELD_EVENT_ACTION => event_action = v.to_string(),
                Self::FIELD_EVENT_DATA => event_data = BASE64.decode(v).unwrap_or_default(),
                _ => {}
            }
        }
        Self {
            event_id,
            event_action,
            event_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_round_trips_through_display_and_parse() {
        let id = EntryId::new(1_700_000_000_123_456, 7);
        let text = id.to_string();
        assert_eq!(text, "1700000000123456-7");
        assert_eq!(text.parse::<EntryId>().unwrap(), id);
    }

    #[test]
    fn entry_id_ordering_is_lexicographic_on_components() {
        let a = EntryId::new(100, 9);
        let b = EntryId::new(101, 0);
        assert!(a < b);

        let c = EntryId::new(100, 10);
        assert!(a < c);
    }

    #[test]
    fn notification_ts_is_microseconds_converted_to_seconds() {
        let id = EntryId::new(1_700_000_000_500_000, 5);
        assert_eq!(id.as_notification_ts(), 1_700_000_000.5);
    }

    #[test]
    fn stored_fields_round_trip_through_field_pairs() {
        let fields = StoredFields {
            event_id: "e1".into(),
            event_action: "entity_created".into(),
            event_data: b"\x00\x01binary".to_vec(),
        };
        let pairs = fields.to_field_pairs();
        let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let decoded = StoredFields::from_fields(borrowed);
        assert_eq!(decoded, fields);
    }
}
