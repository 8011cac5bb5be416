//! Error types for broker, persistence and startup failures

use crate::domain::types::Table;
use thiserror::Error;

/// Per-message broker failure. Reported; polling continues.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("mqtt error: {0}")]
    Mqtt(#[from] rumqttc::ConnectionError),

    #[error("message source closed")]
    Closed,
}

/// A single-row insert or its commit failed. The record is lost.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("injected failure on {0}")]
    Injected(Table),
}

/// Fatal at startup; the ingest loop is never entered
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cannot connect to the database: {0}")]
    Database(#[source] tokio_postgres::Error),

    #[error("cannot create kafka consumer: {0}")]
    Kafka(#[source] rdkafka::error::KafkaError),

    #[error("cannot subscribe to mqtt topic: {0}")]
    Mqtt(#[source] rumqttc::ClientError),

    #[error("cannot open error log {path}: {source}")]
    Sink {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
