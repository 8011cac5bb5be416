//! Schema validation for kiosk messages
//!
//! `validate` is a pure function: raw decoded message in, validated record
//! or typed rejection out. Checks run in a fixed order and stop at the
//! first failure, so the same bad message always yields the same reason.
//!
//! Loosely typed fields (`"site": "2"` vs `"site": 2`) go through
//! [`coerce_int`] before any membership rule runs.

use crate::domain::rejection::{HoursViolation, Rejection};
use crate::domain::types::{CallType, RatingValue, RawMessage, SiteId, ValidatedRecord};
use chrono::{DateTime, FixedOffset, Timelike};
use serde_json::Value;

/// Wire format of the `at` field, e.g. `2024-03-12T13:12:18.645631+00:00`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%6f%:z";

/// Length of a well-formed `at` value: 26 chars of date-time plus `±HH:MM`
const TIMESTAMP_LEN: usize = 32;

/// Wall-clock time of day at minute resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockTime {
    hour: u32,
    minute: u32,
}

impl ClockTime {
    pub const fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }
}

impl std::str::FromStr for ClockTime {
    type Err = String;

    /// Parse `HH:MM`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s.split_once(':').ok_or_else(|| format!("expected HH:MM, got '{s}'"))?;
        let hour = h.parse::<u32>().map_err(|e| format!("bad hour in '{s}': {e}"))?;
        let minute = m.parse::<u32>().map_err(|e| format!("bad minute in '{s}': {e}"))?;
        ClockTime::new(hour, minute).ok_or_else(|| format!("time out of range: '{s}'"))
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Opening window, both bounds inclusive at minute resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingHours {
    pub opens: ClockTime,
    pub closes: ClockTime,
}

impl OperatingHours {
    pub const DEFAULT_OPENS: ClockTime = ClockTime { hour: 8, minute: 45 };
    pub const DEFAULT_CLOSES: ClockTime = ClockTime { hour: 18, minute: 15 };

    /// Check a timestamp in its own offset. Seconds are ignored, so
    /// 18:15:59 is still inside a window closing at 18:15.
    pub fn check(&self, at: &DateTime<FixedOffset>) -> Result<(), HoursViolation> {
        let local = ClockTime { hour: at.hour(), minute: at.minute() };
        if local < self.opens {
            return Err(HoursViolation::NotYetOpen);
        }
        if local > self.closes {
            return Err(HoursViolation::AlreadyClosed);
        }
        Ok(())
    }
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self { opens: Self::DEFAULT_OPENS, closes: Self::DEFAULT_CLOSES }
    }
}

/// Tunable validation rules
#[derive(Debug, Clone, Default)]
pub struct ValidationRules {
    pub hours: OperatingHours,
    /// Reject `val == -1` messages that carry no `type`. Off by default:
    /// such messages are stored as plain ratings.
    pub require_call_type: bool,
}

/// Validate with default rules
pub fn validate_default(raw: &RawMessage) -> Result<ValidatedRecord, Rejection> {
    validate(raw, &ValidationRules::default())
}

/// Validate a decoded message
pub fn validate(raw: &RawMessage, rules: &ValidationRules) -> Result<ValidatedRecord, Rejection> {
    let at_value = raw.get("at").ok_or(Rejection::MissingField("at"))?;
    let at = parse_timestamp(at_value)?;
    rules.hours.check(&at).map_err(Rejection::OutsideOperatingHours)?;

    let site_value = raw.get("site").ok_or(Rejection::MissingField("site"))?;
    let site = coerce_int(site_value).and_then(SiteId::new).ok_or(Rejection::InvalidSite)?;

    let val_value = raw.get("val").ok_or(Rejection::MissingField("val"))?;
    let value = coerce_int(val_value).and_then(RatingValue::new).ok_or(Rejection::InvalidValue)?;

    let call_type = match raw.get("type") {
        Some(v) => Some(coerce_int(v).and_then(CallType::new).ok_or(Rejection::InvalidType)?),
        None => None,
    };

    if rules.require_call_type && value.is_call() && call_type.is_none() {
        return Err(Rejection::MissingField("type"));
    }

    Ok(ValidatedRecord { at, site, value, call_type })
}

/// Decode a broker payload into a JSON object
pub fn decode(payload: &[u8]) -> Result<RawMessage, Rejection> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Rejection::MalformedPayload(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(Rejection::MalformedPayload(e.to_string())),
    }
}

fn parse_timestamp(value: &Value) -> Result<DateTime<FixedOffset>, Rejection> {
    let Value::String(s) = value else {
        return Err(Rejection::MalformedTimestamp(format!(
            "expected a string, got {}",
            json_kind(value)
        )));
    };
    if !has_wire_shape(s) {
        return Err(Rejection::MalformedTimestamp(format!(
            "'{s}': expected YYYY-MM-DDTHH:MM:SS.ffffff+HH:MM"
        )));
    }
    DateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| Rejection::MalformedTimestamp(format!("'{s}': {e}")))
}

/// chrono accepts a missing fraction and a colon-less offset; the wire
/// format allows neither.
fn has_wire_shape(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == TIMESTAMP_LEN
        && b[19] == b'.'
        && b[20..26].iter().all(u8::is_ascii_digit)
        && matches!(b[26], b'+' | b'-')
        && b[27..29].iter().all(u8::is_ascii_digit)
        && b[29] == b':'
        && b[30..32].iter().all(u8::is_ascii_digit)
}

/// Coerce a JSON integer or canonical decimal string to `i64`.
///
/// `2` and `"2"` coerce; `"02"`, `" 2"`, `"+2"`, `2.0` and booleans do not.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok().filter(|n| n.to_string() == *s),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OPEN_AT: &str = "2024-03-12T13:12:18.645631+00:00";

    fn message(value: Value) -> RawMessage {
        match value {
            Value::Object(map) => map,
            _ => panic!("test message must be an object"),
        }
    }

    fn at(ts: &str) -> RawMessage {
        message(json!({"at": ts, "site": "2", "val": 4}))
    }

    #[test]
    fn test_valid_rating() {
        let record = validate_default(&message(json!({"at": OPEN_AT, "site": "2", "val": 4})))
            .unwrap();
        assert_eq!(record.site.get(), 2);
        assert_eq!(record.value.get(), 4);
        assert_eq!(record.call_type, None);
        assert_eq!(record.at.hour(), 13);
        assert_eq!(record.at.nanosecond(), 645_631_000);
    }

    #[test]
    fn test_valid_emergency_call() {
        let record = validate_default(&message(
            json!({"at": OPEN_AT, "site": "2", "val": -1, "type": 1}),
        ))
        .unwrap();
        assert!(record.value.is_call());
        assert_eq!(record.call_type, Some(CallType::Emergency));
    }

    #[test]
    fn test_missing_at() {
        let result = validate_default(&message(json!({"site": 3, "val": 4})));
        assert_eq!(result, Err(Rejection::MissingField("at")));
    }

    #[test]
    fn test_missing_site() {
        let result = validate_default(&message(json!({"at": OPEN_AT, "val": 4})));
        assert_eq!(result, Err(Rejection::MissingField("site")));
    }

    #[test]
    fn test_missing_val() {
        let result = validate_default(&message(json!({"at": OPEN_AT, "site": "3"})));
        assert_eq!(result, Err(Rejection::MissingField("val")));
    }

    #[test]
    fn test_malformed_timestamps() {
        for ts in ["01/12/2024", "not a timestamp", "", "2024-03-12T13:12:18.645631"] {
            let result = validate_default(&at(ts));
            assert!(
                matches!(result, Err(Rejection::MalformedTimestamp(_))),
                "{ts:?} should be malformed, got {result:?}"
            );
        }
        let result = validate_default(&message(json!({"at": 1710249138, "site": "2", "val": 4})));
        assert!(matches!(result, Err(Rejection::MalformedTimestamp(_))));
    }

    #[test]
    fn test_timestamp_requires_exact_wire_pattern() {
        for ts in [
            "2024-03-12T13:12:18+00:00",
            "2024-03-12T13:12:18.6+00:00",
            "2024-03-12T13:12:18.645+00:00",
            "2024-03-12T13:12:18.6456310+00:00",
            "2024-03-12T13:12:18.645631+0000",
            "2024-03-12T13:12:18.645631Z",
            "2024-03-12T13:12:18.645631+00",
            "2024-03-12 13:12:18.645631+00:00",
        ] {
            let result = validate_default(&at(ts));
            assert!(
                matches!(result, Err(Rejection::MalformedTimestamp(_))),
                "{ts:?} should be malformed, got {result:?}"
            );
        }
        for ts in ["2024-03-12T13:12:18.645631+00:00", "2024-03-12T13:12:18.000000-04:00"] {
            assert!(validate_default(&at(ts)).is_ok(), "{ts:?} should be accepted");
        }
    }

    #[test]
    fn test_timestamp_keeps_offset() {
        let record = validate_default(&at("2024-03-12T13:12:18.645631+05:30")).unwrap();
        assert_eq!(record.at.offset().local_minus_utc(), 5 * 3600 + 30 * 60);
        assert_eq!(record.at.hour(), 13);
    }

    #[test]
    fn test_too_early() {
        for ts in [
            "2024-03-12T07:00:00.000000+00:00",
            "2024-03-12T00:00:00.000000+00:00",
            "2024-03-12T08:44:59.999999+00:00",
            "2024-03-12T08:00:00.000000+00:00",
        ] {
            assert_eq!(
                validate_default(&at(ts)),
                Err(Rejection::OutsideOperatingHours(HoursViolation::NotYetOpen)),
                "{ts}"
            );
        }
    }

    #[test]
    fn test_too_late() {
        for ts in [
            "2024-03-12T18:16:00.000000+00:00",
            "2024-03-12T19:00:00.000000+00:00",
            "2024-03-12T23:59:59.000000+00:00",
        ] {
            assert_eq!(
                validate_default(&at(ts)),
                Err(Rejection::OutsideOperatingHours(HoursViolation::AlreadyClosed)),
                "{ts}"
            );
        }
    }

    #[test]
    fn test_operating_hours_bounds_inclusive() {
        for ts in [
            "2024-03-12T08:45:00.000000+00:00",
            "2024-03-12T18:15:00.000000+00:00",
            "2024-03-12T18:15:59.999999+00:00",
        ] {
            assert!(validate_default(&at(ts)).is_ok(), "{ts} should be inside the window");
        }
    }

    #[test]
    fn test_hours_use_embedded_offset() {
        // 07:30 UTC is 13:00 in +05:30: judged by local time, so accepted
        assert!(validate_default(&at("2024-03-12T13:00:00.000000+05:30")).is_ok());
        // 10:00 UTC is 05:00 in -05:00: rejected as not yet open
        assert_eq!(
            validate_default(&at("2024-03-12T05:00:00.000000-05:00")),
            Err(Rejection::OutsideOperatingHours(HoursViolation::NotYetOpen))
        );
    }

    #[test]
    fn test_hours_checked_before_site() {
        let result = validate_default(&message(json!({"at": "2024-03-12T07:00:00.000000+00:00"})));
        assert_eq!(result, Err(Rejection::OutsideOperatingHours(HoursViolation::NotYetOpen)));
    }

    #[test]
    fn test_every_site_in_range_passes() {
        for site in 0..=5 {
            let as_string = message(json!({"at": OPEN_AT, "site": site.to_string(), "val": 1}));
            let as_int = message(json!({"at": OPEN_AT, "site": site, "val": 1}));
            assert_eq!(validate_default(&as_string).unwrap().site.get(), site as u8);
            assert_eq!(validate_default(&as_int).unwrap().site.get(), site as u8);
        }
    }

    #[test]
    fn test_invalid_sites() {
        for site in [json!("6"), json!(-1), json!(42), json!("02"), json!(" 2"), json!("two"), json!(2.5), json!(true), json!(null)] {
            let result = validate_default(&message(json!({"at": OPEN_AT, "site": site, "val": 1})));
            assert_eq!(result, Err(Rejection::InvalidSite), "site {site}");
        }
    }

    #[test]
    fn test_invalid_values() {
        for val in [json!(0), json!(5), json!(-2), json!(100), json!("x"), json!(null)] {
            let result = validate_default(&message(json!({"at": OPEN_AT, "site": "1", "val": val})));
            assert_eq!(result, Err(Rejection::InvalidValue), "val {val}");
        }
    }

    #[test]
    fn test_value_coerced_from_string() {
        let record = validate_default(&message(json!({"at": OPEN_AT, "site": "1", "val": "-1", "type": "0"})))
            .unwrap();
        assert!(record.value.is_call());
        assert_eq!(record.call_type, Some(CallType::Assistance));
    }

    #[test]
    fn test_invalid_types() {
        for ty in [json!(2), json!(-1), json!("emergency"), json!(null)] {
            let result = validate_default(&message(
                json!({"at": OPEN_AT, "site": "1", "val": -1, "type": ty}),
            ));
            assert_eq!(result, Err(Rejection::InvalidType), "type {ty}");
        }
    }

    #[test]
    fn test_type_checked_even_for_ratings() {
        let result =
            validate_default(&message(json!({"at": OPEN_AT, "site": "1", "val": 3, "type": 7})));
        assert_eq!(result, Err(Rejection::InvalidType));
    }

    #[test]
    fn test_call_without_type_accepted_by_default() {
        let record =
            validate_default(&message(json!({"at": OPEN_AT, "site": "1", "val": -1}))).unwrap();
        assert!(record.value.is_call());
        assert_eq!(record.call_type, None);
    }

    #[test]
    fn test_call_without_type_rejected_when_required() {
        let rules = ValidationRules { require_call_type: true, ..Default::default() };
        let result = validate(&message(json!({"at": OPEN_AT, "site": "1", "val": -1})), &rules);
        assert_eq!(result, Err(Rejection::MissingField("type")));

        // Ratings never need a type
        assert!(validate(&message(json!({"at": OPEN_AT, "site": "1", "val": 2})), &rules).is_ok());
    }

    #[test]
    fn test_custom_hours() {
        let rules = ValidationRules {
            hours: OperatingHours {
                opens: "10:00".parse().unwrap(),
                closes: "16:30".parse().unwrap(),
            },
            require_call_type: false,
        };
        assert!(validate(&at("2024-03-12T09:59:00.000000+00:00"), &rules).is_err());
        assert!(validate(&at("2024-03-12T10:00:00.000000+00:00"), &rules).is_ok());
        assert!(validate(&at("2024-03-12T16:31:00.000000+00:00"), &rules).is_err());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let inputs = [
            message(json!({"at": OPEN_AT, "site": "2", "val": 4})),
            message(json!({"at": OPEN_AT, "site": "9", "val": 4})),
            message(json!({"at": "2024-03-12T07:00:00.000000+00:00", "site": "2", "val": 4})),
        ];
        for input in &inputs {
            assert_eq!(validate_default(input), validate_default(input));
        }
    }

    #[test]
    fn test_decode() {
        let map = decode(br#"{"at": "x", "site": "1"}"#).unwrap();
        assert_eq!(map.len(), 2);

        assert!(matches!(decode(b"not json"), Err(Rejection::MalformedPayload(_))));
        assert!(matches!(decode(b"[1, 2]"), Err(Rejection::MalformedPayload(_))));
        assert!(matches!(decode(b""), Err(Rejection::MalformedPayload(_))));
    }

    #[test]
    fn test_clock_time_parse() {
        let t: ClockTime = "08:45".parse().unwrap();
        assert_eq!((t.hour(), t.minute()), (8, 45));
        assert_eq!(t.to_string(), "08:45");
        assert!("24:00".parse::<ClockTime>().is_err());
        assert!("0845".parse::<ClockTime>().is_err());
        assert!("08:60".parse::<ClockTime>().is_err());
    }
}
