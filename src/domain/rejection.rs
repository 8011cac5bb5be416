//! Typed reasons a message is dropped before persistence

use thiserror::Error;

/// Which side of the operating window a timestamp fell on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoursViolation {
    NotYetOpen,
    AlreadyClosed,
}

impl std::fmt::Display for HoursViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoursViolation::NotYetOpen => f.write_str("museum not open"),
            HoursViolation::AlreadyClosed => f.write_str("museum is closed"),
        }
    }
}

/// Message-scoped rejection. Every variant is recoverable: the message is
/// dropped and the ingest loop keeps polling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing '{0}' key")]
    MissingField(&'static str),

    #[error("invalid date format: {0}")]
    MalformedTimestamp(String),

    #[error("{0}")]
    OutsideOperatingHours(HoursViolation),

    #[error("invalid site value, must be between 0-5")]
    InvalidSite,

    #[error("invalid val value, must be between -1 and 4 (excluding 0)")]
    InvalidValue,

    #[error("invalid type, must be either 0 or 1")]
    InvalidType,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl Rejection {
    /// Number of distinct reasons (for per-reason counters)
    pub const REASONS: usize = 7;

    /// Stable snake_case label for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::MissingField(_) => "missing_field",
            Rejection::MalformedTimestamp(_) => "malformed_timestamp",
            Rejection::OutsideOperatingHours(_) => "outside_operating_hours",
            Rejection::InvalidSite => "invalid_site",
            Rejection::InvalidValue => "invalid_value",
            Rejection::InvalidType => "invalid_type",
            Rejection::MalformedPayload(_) => "malformed_payload",
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Rejection::MissingField(_) => 0,
            Rejection::MalformedTimestamp(_) => 1,
            Rejection::OutsideOperatingHours(_) => 2,
            Rejection::InvalidSite => 3,
            Rejection::InvalidValue => 4,
            Rejection::InvalidType => 5,
            Rejection::MalformedPayload(_) => 6,
        }
    }

    /// Labels ordered by [`Rejection::index`]
    pub const LABELS: [&'static str; Self::REASONS] = [
        "missing_field",
        "malformed_timestamp",
        "outside_operating_hours",
        "invalid_site",
        "invalid_value",
        "invalid_type",
        "malformed_payload",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(Rejection::MissingField("site").to_string(), "missing 'site' key");
        assert_eq!(
            Rejection::OutsideOperatingHours(HoursViolation::NotYetOpen).to_string(),
            "museum not open"
        );
        assert_eq!(
            Rejection::OutsideOperatingHours(HoursViolation::AlreadyClosed).to_string(),
            "museum is closed"
        );
    }

    #[test]
    fn test_labels_match_index() {
        let samples = [
            Rejection::MissingField("at"),
            Rejection::MalformedTimestamp(String::new()),
            Rejection::OutsideOperatingHours(HoursViolation::NotYetOpen),
            Rejection::InvalidSite,
            Rejection::InvalidValue,
            Rejection::InvalidType,
            Rejection::MalformedPayload(String::new()),
        ];
        for rejection in samples {
            assert_eq!(Rejection::LABELS[rejection.index()], rejection.reason());
        }
    }
}
