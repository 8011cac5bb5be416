//! Persistence gateway interface
//!
//! Each operation inserts a single row and commits it before returning.
//! The core never retries; a failed commit comes back as
//! [`PersistenceError`] and the record is lost.

use crate::domain::error::PersistenceError;
use crate::domain::types::Table;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

#[async_trait]
pub trait RecordGateway: Send {
    async fn insert_rating(
        &mut self,
        at: DateTime<FixedOffset>,
        exhibition_id: i32,
        rating_value: i32,
    ) -> Result<(), PersistenceError>;

    async fn insert_assistance(
        &mut self,
        at: DateTime<FixedOffset>,
        exhibition_id: i32,
    ) -> Result<(), PersistenceError>;

    async fn insert_emergency(
        &mut self,
        at: DateTime<FixedOffset>,
        exhibition_id: i32,
    ) -> Result<(), PersistenceError>;
}

/// A row committed by [`InMemoryGateway`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub table: Table,
    pub at: DateTime<FixedOffset>,
    pub exhibition_id: i32,
    /// `Some` only for rating rows
    pub rating_value: Option<i32>,
}

/// Gateway that keeps committed rows in memory
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    rows: Vec<StoredRow>,
    fail_next: Vec<Table>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next insert into `table` fail
    pub fn fail_next(&mut self, table: Table) {
        self.fail_next.push(table);
    }

    pub fn rows(&self) -> &[StoredRow] {
        &self.rows
    }

    pub fn rows_in(&self, table: Table) -> impl Iterator<Item = &StoredRow> {
        self.rows.iter().filter(move |row| row.table == table)
    }

    fn commit(&mut self, row: StoredRow) -> Result<(), PersistenceError> {
        if let Some(pos) = self.fail_next.iter().position(|t| *t == row.table) {
            self.fail_next.remove(pos);
            return Err(PersistenceError::Injected(row.table));
        }
        self.rows.push(row);
        Ok(())
    }
}

#[async_trait]
impl RecordGateway for InMemoryGateway {
    async fn insert_rating(
        &mut self,
        at: DateTime<FixedOffset>,
        exhibition_id: i32,
        rating_value: i32,
    ) -> Result<(), PersistenceError> {
        self.commit(StoredRow {
            table: Table::Rating,
            at,
            exhibition_id,
            rating_value: Some(rating_value),
        })
    }

    async fn insert_assistance(
        &mut self,
        at: DateTime<FixedOffset>,
        exhibition_id: i32,
    ) -> Result<(), PersistenceError> {
        self.commit(StoredRow { table: Table::CallAssistance, at, exhibition_id, rating_value: None })
    }

    async fn insert_emergency(
        &mut self,
        at: DateTime<FixedOffset>,
        exhibition_id: i32,
    ) -> Result<(), PersistenceError> {
        self.commit(StoredRow { table: Table::CallEmergency, at, exhibition_id, rating_value: None })
    }
}
