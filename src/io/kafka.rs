//! Kafka message source
//!
//! Consumes one topic through an rdkafka `StreamConsumer`. Connection
//! parameters are handed to librdkafka as configured.

use crate::domain::error::{BrokerError, SetupError};
use crate::infra::config::KafkaConfig;
use crate::io::source::{MessageSource, Polled};
use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use std::time::Duration;
use tracing::{debug, info};

/// Build the librdkafka client configuration
pub fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("group.id", &config.group_id);

    let optional = [
        ("security.protocol", &config.security_protocol),
        ("sasl.mechanisms", &config.sasl_mechanism),
        ("sasl.username", &config.username),
        ("sasl.password", &config.password),
        ("auto.offset.reset", &config.auto_offset_reset),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            client.set(key, value);
        }
    }

    for (key, value) in &config.properties {
        client.set(key, value);
    }

    client
}

pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSource {
    /// Create the consumer and subscribe to `topic`
    pub fn connect(config: &KafkaConfig, topic: &str) -> Result<Self, SetupError> {
        let consumer: StreamConsumer = client_config(config).create().map_err(SetupError::Kafka)?;
        consumer.subscribe(&[topic]).map_err(SetupError::Kafka)?;

        info!(
            brokers = %config.bootstrap_servers,
            group_id = %config.group_id,
            topic = %topic,
            "kafka_consumer_subscribed"
        );
        Ok(Self { consumer, topic: topic.to_string() })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn poll(&mut self, timeout: Duration) -> Polled {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(Ok(msg)) => {
                debug!(
                    partition = %msg.partition(),
                    offset = %msg.offset(),
                    "kafka_message_received"
                );
                // An empty payload is passed on and rejected by decoding
                Polled::Message(msg.payload().map(<[u8]>::to_vec).unwrap_or_default())
            }
            Ok(Err(e)) => Polled::BrokerError(BrokerError::Kafka(e)),
            Err(_) => Polled::Timeout,
        }
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "kafka_consumer_closed");
    }
}
