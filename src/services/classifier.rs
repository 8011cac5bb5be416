//! Record classification and table dispatch
//!
//! A validated record becomes an ordered plan of single-row inserts:
//! the call-table row first (for call events), then the rating row.
//! Whether call events also produce a rating row is decided by
//! [`DispatchPolicy`].
//!
//! Each insert commits on its own. A failure part-way through a plan
//! leaves the earlier rows committed; [`DispatchError::committed`] lists
//! them.

use crate::domain::error::PersistenceError;
use crate::domain::types::{CallType, RecordKind, Table, ValidatedRecord};
use crate::services::gateway::RecordGateway;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

/// Whether call events are also counted as ratings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Call events are written to their call table and to `rating`
    #[default]
    DualWrite,
    /// Call events are written to their call table only
    CallTableOnly,
}

impl DispatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchPolicy::DualWrite => "dual_write",
            DispatchPolicy::CallTableOnly => "call_table_only",
        }
    }
}

/// One row to insert, with storage columns already mapped
#[derive(Debug, Clone, PartialEq)]
pub enum RowInsert {
    Rating { at: DateTime<FixedOffset>, exhibition_id: i32, rating_value: i32 },
    Assistance { at: DateTime<FixedOffset>, exhibition_id: i32 },
    Emergency { at: DateTime<FixedOffset>, exhibition_id: i32 },
}

impl RowInsert {
    pub fn table(&self) -> Table {
        match self {
            RowInsert::Rating { .. } => Table::Rating,
            RowInsert::Assistance { .. } => Table::CallAssistance,
            RowInsert::Emergency { .. } => Table::CallEmergency,
        }
    }
}

pub type DispatchPlan = SmallVec<[RowInsert; 2]>;

/// Classify a validated record. A call without a `type` falls back to a
/// plain rating.
pub fn classify(record: &ValidatedRecord) -> RecordKind {
    if !record.value.is_call() {
        return RecordKind::Rating;
    }
    match record.call_type {
        Some(CallType::Assistance) => RecordKind::AssistanceCall,
        Some(CallType::Emergency) => RecordKind::EmergencyCall,
        None => RecordKind::Rating,
    }
}

/// Build the ordered insert plan for a record
pub fn plan(record: &ValidatedRecord, policy: DispatchPolicy) -> DispatchPlan {
    let at = record.at;
    let exhibition_id = record.site.exhibition_id();
    let mut rows = DispatchPlan::new();

    let kind = classify(record);
    match kind {
        RecordKind::AssistanceCall => rows.push(RowInsert::Assistance { at, exhibition_id }),
        RecordKind::EmergencyCall => rows.push(RowInsert::Emergency { at, exhibition_id }),
        RecordKind::Rating => {}
    }

    let is_call = kind != RecordKind::Rating;
    if !is_call || policy == DispatchPolicy::DualWrite {
        rows.push(RowInsert::Rating { at, exhibition_id, rating_value: record.value.stored() });
    }

    rows
}

/// Tables written for a successfully dispatched record
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub kind: RecordKind,
    pub tables: SmallVec<[Table; 2]>,
}

#[derive(Debug, Error)]
#[error("insert into {failed} failed after committing {committed:?}: {source}")]
pub struct DispatchError {
    pub kind: RecordKind,
    pub failed: Table,
    /// Rows committed before the failure
    pub committed: SmallVec<[Table; 2]>,
    #[source]
    pub source: PersistenceError,
}

/// Classify a record and write it through the gateway
pub async fn dispatch<G>(
    record: &ValidatedRecord,
    policy: DispatchPolicy,
    gateway: &mut G,
) -> Result<DispatchReport, DispatchError>
where
    G: RecordGateway + ?Sized,
{
    let kind = classify(record);
    let mut committed = SmallVec::new();

    for row in plan(record, policy) {
        let table = row.table();
        let result = match row {
            RowInsert::Rating { at, exhibition_id, rating_value } => {
                gateway.insert_rating(at, exhibition_id, rating_value).await
            }
            RowInsert::Assistance { at, exhibition_id } => {
                gateway.insert_assistance(at, exhibition_id).await
            }
            RowInsert::Emergency { at, exhibition_id } => {
                gateway.insert_emergency(at, exhibition_id).await
            }
        };

        match result {
            Ok(()) => {
                debug!(table = %table, site = %record.site, "row_committed");
                committed.push(table);
            }
            Err(source) => return Err(DispatchError { kind, failed: table, committed, source }),
        }
    }

    Ok(DispatchReport { kind, tables: committed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{RatingValue, SiteId};
    use crate::services::gateway::InMemoryGateway;

    fn record(site: i64, value: i64, call_type: Option<CallType>) -> ValidatedRecord {
        ValidatedRecord {
            at: DateTime::parse_from_rfc3339("2024-03-12T13:12:18.645631+00:00").unwrap(),
            site: SiteId::new(site).unwrap(),
            value: RatingValue::new(value).unwrap(),
            call_type,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&record(0, 3, None)), RecordKind::Rating);
        assert_eq!(classify(&record(0, -1, Some(CallType::Assistance))), RecordKind::AssistanceCall);
        assert_eq!(classify(&record(0, -1, Some(CallType::Emergency))), RecordKind::EmergencyCall);
        assert_eq!(classify(&record(0, -1, None)), RecordKind::Rating);
    }

    #[test]
    fn test_type_ignored_on_ratings() {
        assert_eq!(classify(&record(1, 2, Some(CallType::Emergency))), RecordKind::Rating);
        let rows = plan(&record(1, 2, Some(CallType::Emergency)), DispatchPolicy::DualWrite);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].table(), Table::Rating);
    }

    #[test]
    fn test_rating_plan_maps_columns() {
        let r = record(2, 4, None);
        let rows = plan(&r, DispatchPolicy::DualWrite);
        assert_eq!(
            rows.as_slice(),
            &[RowInsert::Rating { at: r.at, exhibition_id: 3, rating_value: 5 }]
        );
    }

    #[test]
    fn test_assistance_dual_write() {
        let r = record(0, -1, Some(CallType::Assistance));
        let rows = plan(&r, DispatchPolicy::DualWrite);
        assert_eq!(
            rows.as_slice(),
            &[
                RowInsert::Assistance { at: r.at, exhibition_id: 1 },
                RowInsert::Rating { at: r.at, exhibition_id: 1, rating_value: 0 },
            ]
        );
    }

    #[test]
    fn test_call_table_only_policy() {
        let r = record(5, -1, Some(CallType::Emergency));
        let rows = plan(&r, DispatchPolicy::CallTableOnly);
        assert_eq!(rows.as_slice(), &[RowInsert::Emergency { at: r.at, exhibition_id: 6 }]);

        // Plain ratings are unaffected by the policy
        let rows = plan(&record(5, 1, None), DispatchPolicy::CallTableOnly);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].table(), Table::Rating);
    }

    #[test]
    fn test_typeless_call_stored_as_rating() {
        for policy in [DispatchPolicy::DualWrite, DispatchPolicy::CallTableOnly] {
            let rows = plan(&record(3, -1, None), policy);
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].table(), Table::Rating);
        }
    }

    #[tokio::test]
    async fn test_dispatch_emergency_writes_both_tables() {
        let mut gateway = InMemoryGateway::new();
        let report = dispatch(
            &record(2, -1, Some(CallType::Emergency)),
            DispatchPolicy::DualWrite,
            &mut gateway,
        )
        .await
        .unwrap();

        assert_eq!(report.kind, RecordKind::EmergencyCall);
        assert_eq!(report.tables.as_slice(), &[Table::CallEmergency, Table::Rating]);
        assert_eq!(gateway.rows_in(Table::CallEmergency).count(), 1);
        let rating = gateway.rows_in(Table::Rating).next().unwrap();
        assert_eq!(rating.exhibition_id, 3);
        assert_eq!(rating.rating_value, Some(0));
    }

    #[tokio::test]
    async fn test_dispatch_stops_at_first_failure() {
        let mut gateway = InMemoryGateway::new();
        gateway.fail_next(Table::CallAssistance);

        let err = dispatch(
            &record(1, -1, Some(CallType::Assistance)),
            DispatchPolicy::DualWrite,
            &mut gateway,
        )
        .await
        .unwrap_err();

        assert_eq!(err.failed, Table::CallAssistance);
        assert!(err.committed.is_empty());
        assert!(gateway.rows().is_empty(), "rating row must not be attempted after a failure");
    }

    #[tokio::test]
    async fn test_dispatch_reports_partial_commit() {
        let mut gateway = InMemoryGateway::new();
        gateway.fail_next(Table::Rating);

        let err = dispatch(
            &record(1, -1, Some(CallType::Emergency)),
            DispatchPolicy::DualWrite,
            &mut gateway,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, RecordKind::EmergencyCall);
        assert_eq!(err.failed, Table::Rating);
        assert_eq!(err.committed.as_slice(), &[Table::CallEmergency]);
        assert_eq!(gateway.rows().len(), 1);
    }

    #[test]
    fn test_policy_from_config_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: DispatchPolicy,
        }
        let w: Wrapper = toml::from_str(r#"policy = "call_table_only""#).unwrap();
        assert_eq!(w.policy, DispatchPolicy::CallTableOnly);
        assert_eq!(DispatchPolicy::default(), DispatchPolicy::DualWrite);
    }
}
