//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `source` - Message source trait and in-process channel source
//! - `kafka` - Kafka consumer source
//! - `mqtt` - MQTT subscriber source
//! - `postgres` - PostgreSQL record gateway
//! - `reporter` - Rejection log sinks (console or file)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod kafka;
pub mod mqtt;
pub mod postgres;
pub mod prometheus;
pub mod reporter;
pub mod source;

// Re-export commonly used types
pub use kafka::KafkaSource;
pub use mqtt::MqttSource;
pub use postgres::PostgresGateway;
pub use reporter::{open_sink, ConsoleSink, ErrorSink, FileSink};
pub use source::{ChannelSource, MessageSource, Polled};
