//! Shared types for the exhibit ingest pipeline

use chrono::{DateTime, FixedOffset};

/// Decoded broker payload before any validation
pub type RawMessage = serde_json::Map<String, serde_json::Value>;

/// Exhibit site identifier as sent by kiosks (0-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SiteId(u8);

impl SiteId {
    /// Number of exhibit sites on the floor
    pub const COUNT: u8 = 6;

    pub fn new(raw: i64) -> Option<Self> {
        u8::try_from(raw).ok().filter(|site| *site < Self::COUNT).map(SiteId)
    }

    #[inline]
    pub fn get(&self) -> u8 {
        self.0
    }

    /// 1-based identifier stored in the `exhibition_id` column
    #[inline]
    pub fn exhibition_id(&self) -> i32 {
        i32::from(self.0) + 1
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kiosk button code: -1 is a call for help, 1-4 are ratings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RatingValue(i8);

impl RatingValue {
    /// The code kiosks send when a visitor presses a help button
    pub const CALL: RatingValue = RatingValue(-1);

    /// Accepted codes; 0 is reserved and never sent
    pub const VALID: [i8; 5] = [-1, 1, 2, 3, 4];

    pub fn new(raw: i64) -> Option<Self> {
        i8::try_from(raw).ok().filter(|v| Self::VALID.contains(v)).map(RatingValue)
    }

    #[inline]
    pub fn get(&self) -> i8 {
        self.0
    }

    #[inline]
    pub fn is_call(&self) -> bool {
        *self == Self::CALL
    }

    /// Value stored in `rating.rating_value` (shifted to 0..5)
    #[inline]
    pub fn stored(&self) -> i32 {
        i32::from(self.0) + 1
    }
}

impl std::fmt::Display for RatingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of help requested by a call event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Assistance,
    Emergency,
}

impl CallType {
    pub fn new(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(CallType::Assistance),
            1 => Some(CallType::Emergency),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Assistance => "assistance",
            CallType::Emergency => "emergency",
        }
    }
}

/// A message that passed every schema check
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    pub at: DateTime<FixedOffset>,
    pub site: SiteId,
    pub value: RatingValue,
    /// Only meaningful when `value` is [`RatingValue::CALL`]
    pub call_type: Option<CallType>,
}

/// Classification of a validated record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Rating,
    AssistanceCall,
    EmergencyCall,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Rating => "rating",
            RecordKind::AssistanceCall => "assistance_call",
            RecordKind::EmergencyCall => "emergency_call",
        }
    }
}

/// Destination tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Rating,
    CallAssistance,
    CallEmergency,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Rating, Table::CallAssistance, Table::CallEmergency];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Rating => "rating",
            Table::CallAssistance => "call_assistance",
            Table::CallEmergency => "call_emergency",
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Table::Rating => 0,
            Table::CallAssistance => 1,
            Table::CallEmergency => 2,
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_id_range() {
        for raw in 0..=5 {
            let site = SiteId::new(raw).unwrap();
            assert_eq!(site.get() as i64, raw);
            assert_eq!(site.exhibition_id() as i64, raw + 1);
        }
        assert!(SiteId::new(-1).is_none());
        assert!(SiteId::new(6).is_none());
        assert!(SiteId::new(256).is_none());
    }

    #[test]
    fn test_rating_value_membership() {
        for raw in [-1, 1, 2, 3, 4] {
            assert!(RatingValue::new(raw).is_some(), "{raw} should be accepted");
        }
        for raw in [-2, 0, 5, 128, i64::MAX] {
            assert!(RatingValue::new(raw).is_none(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_rating_value_storage_shift() {
        assert_eq!(RatingValue::CALL.stored(), 0);
        assert_eq!(RatingValue::new(4).unwrap().stored(), 5);
        assert!(RatingValue::CALL.is_call());
        assert!(!RatingValue::new(1).unwrap().is_call());
    }

    #[test]
    fn test_call_type_codes() {
        assert_eq!(CallType::new(0), Some(CallType::Assistance));
        assert_eq!(CallType::new(1), Some(CallType::Emergency));
        assert_eq!(CallType::new(2), None);
        assert_eq!(CallType::Emergency.as_str(), "emergency");
    }
}
