use std::fmt::{Display, Formatter};

use serde::{Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time};

use crate::ValidationError;

/// UTC instant attached to a series point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn from_offset_datetime(value: OffsetDateTime) -> Self {
        Self(value.to_offset(time::UtcOffset::UTC))
    }

    pub fn from_date(date: Date) -> Self {
        Self(date.midnight().assume_utc())
    }

    /// Parse the shapes the warehouse and rule documents produce: RFC3339,
    /// `YYYY-MM-DD HH:MM:SS[.fff]`, `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();

        if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
            return Ok(Self::from_offset_datetime(parsed));
        }

        let space = format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
        );
        let tee = format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
        );
        for format in [space, tee] {
            if let Ok(parsed) = PrimitiveDateTime::parse(trimmed, format) {
                return Ok(Self(parsed.assume_utc()));
            }
        }

        Date::parse(trimmed, format_description!("[year]-[month]-[day]"))
            .map(Self::from_date)
            .map_err(|_| ValidationError::InvalidTimestamp {
                value: input.to_owned(),
            })
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn date(self) -> Date {
        self.0.date()
    }

    /// Shift back by whole days, saturating at the earliest representable instant.
    pub fn days_before(self, days: i64) -> Self {
        Self(
            self.0
                .checked_sub(Duration::days(days))
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        )
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let date = self.0.date();
        let (year, month, day) = (date.year(), u8::from(date.month()), date.day());
        if self.0.time() == Time::MIDNIGHT {
            write!(f, "{year:04}-{month:02}-{day:02}")
        } else {
            let (hour, minute, second) = self.0.to_hms();
            write!(
                f,
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            )
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
