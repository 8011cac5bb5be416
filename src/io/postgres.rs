//! PostgreSQL record gateway
//!
//! Holds a single `tokio_postgres::Client`. The ingest loop is the only
//! user, so inserts are sequential and need no pool. Each insert runs in
//! its own transaction and is committed before returning.

use crate::domain::error::{PersistenceError, SetupError};
use crate::domain::types::Table;
use crate::infra::config::DatabaseConfig;
use crate::services::gateway::RecordGateway;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

const INSERT_RATING: &str =
    "INSERT INTO rating (rating_timestamp, rating_value, exhibition_id) VALUES ($1, $2, $3)";
const INSERT_ASSISTANCE: &str =
    "INSERT INTO call_assistance (call_assistance_timestamp, exhibition_id) VALUES ($1, $2)";
const INSERT_EMERGENCY: &str =
    "INSERT INTO call_emergency (call_emergency_timestamp, exhibition_id) VALUES ($1, $2)";

pub struct PostgresGateway {
    client: Client,
}

impl PostgresGateway {
    /// Connect and spawn the connection driver
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, SetupError> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.name)
            .user(&config.user)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(password) = &config.password {
            pg.password(password);
        }

        let (client, connection) = pg.connect(NoTls).await.map_err(SetupError::Database)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres_connection_error");
            }
        });

        info!(host = %config.host, port = %config.port, db = %config.name, "postgres_connected");
        Ok(Self { client })
    }

    /// Verify the connection is usable
    pub async fn ping(&self) -> Result<(), PersistenceError> {
        self.client.execute("SELECT 1", &[]).await?;
        debug!("postgres_ping_ok");
        Ok(())
    }

    /// Delete every row from the three event tables in one transaction
    pub async fn reset_tables(&mut self) -> Result<(), PersistenceError> {
        let tx = self.client.transaction().await?;
        for table in Table::ALL {
            let sql = format!("DELETE FROM {}", table.as_str());
            let deleted = tx.execute(sql.as_str(), &[]).await?;
            info!(table = %table, rows = %deleted, "table_cleared");
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert(
        &mut self,
        table: Table,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<(), PersistenceError> {
        let tx = self.client.transaction().await?;
        tx.execute(sql, params).await?;
        tx.commit().await?;
        debug!(table = %table, "row_inserted");
        Ok(())
    }
}

#[async_trait]
impl RecordGateway for PostgresGateway {
    async fn insert_rating(
        &mut self,
        at: DateTime<FixedOffset>,
        exhibition_id: i32,
        rating_value: i32,
    ) -> Result<(), PersistenceError> {
        self.insert(Table::Rating, INSERT_RATING, &[&at, &rating_value, &exhibition_id]).await
    }

    async fn insert_assistance(
        &mut self,
        at: DateTime<FixedOffset>,
        exhibition_id: i32,
    ) -> Result<(), PersistenceError> {
        self.insert(Table::CallAssistance, INSERT_ASSISTANCE, &[&at, &exhibition_id]).await
    }

    async fn insert_emergency(
        &mut self,
        at: DateTime<FixedOffset>,
        exhibition_id: i32,
    ) -> Result<(), PersistenceError> {
        self.insert(Table::CallEmergency, INSERT_EMERGENCY, &[&at, &exhibition_id]).await
    }
}
