//! Monotonic → wall-clock conversion and the data file's timestamp format.
//!
//! All engine timing runs on monotonic microseconds.  A [`Timebase`] pins
//! one monotonic instant to one UTC instant (truncated to whole
//! microseconds) so every stamp it produces survives an ISO 8601
//! round-trip unchanged.

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    wall: DateTime<Utc>,
    mono_us: u64,
}

impl Timebase {
    pub fn new(wall: DateTime<Utc>, mono_us: u64) -> Self {
        Self {
            wall: wall.trunc_subsecs(6),
            mono_us,
        }
    }

    /// Absolute instant of a monotonic timestamp.  Instants before the
    /// anchor clamp to it.
    pub fn stamp(&self, at_us: u64) -> DateTime<Utc> {
        let offset = TimeDelta::microseconds(at_us.saturating_sub(self.mono_us) as i64);
        self.wall.checked_add_signed(offset).unwrap_or(self.wall)
    }
}

/// Serde adapter: RFC 3339 UTC with exactly six fractional digits.
pub mod iso_micros {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(at: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
            match at {
                Some(at) => s.serialize_some(&super::format(at)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|raw| {
                    DateTime::parse_from_rfc3339(&raw)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(serde::de::Error::custom)
                })
                .transpose()
        }
    }
}
