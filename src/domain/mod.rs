//! Domain models - core record types and error taxonomy
//!
//! This module contains the canonical data types used throughout the system:
//! - `RawMessage` - decoded but unchecked broker payload
//! - `ValidatedRecord` - a message that passed every schema check
//! - `RecordKind` - rating, assistance call or emergency call
//! - `Rejection` - typed reason a message was dropped
//! - `BrokerError` / `PersistenceError` / `SetupError` - I/O failures

pub mod error;
pub mod rejection;
pub mod types;

// Re-export commonly used types at module level
pub use error::{BrokerError, PersistenceError, SetupError};
pub use rejection::{HoursViolation, Rejection};
pub use types::{
    CallType, RatingValue, RawMessage, RecordKind, SiteId, Table, ValidatedRecord,
};
