//! MQTT message source
//!
//! Subscribes to one topic with rumqttc and hands each publish payload to
//! the ingest loop. Connection events are logged; event-loop errors come
//! back as broker errors and rumqttc reconnects on the next poll.

use crate::domain::error::{BrokerError, SetupError};
use crate::infra::config::MqttConfig;
use crate::io::source::{MessageSource, Polled};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Build client options from config
pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut mqttoptions = MqttOptions::new(&config.client_id, &config.host, config.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        mqttoptions.set_credentials(username, password);
    }

    mqttoptions
}

pub struct MqttSource {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

impl MqttSource {
    /// Create the client and queue the subscription. The connection itself
    /// is established on the first poll.
    pub async fn connect(config: &MqttConfig, topic: &str) -> Result<Self, SetupError> {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), 100);
        client.subscribe(topic, QoS::AtLeastOnce).await.map_err(SetupError::Mqtt)?;

        info!(topic = %topic, host = %config.host, port = %config.port, "mqtt_client_subscribed");
        Ok(Self { client, eventloop, topic: topic.to_string() })
    }
}

#[async_trait]
impl MessageSource for MqttSource {
    async fn poll(&mut self, timeout: Duration) -> Polled {
        let deadline = Instant::now() + timeout;

        // Drive the event loop until a publish arrives; acks and pings are
        // consumed along the way
        loop {
            let event = match tokio::time::timeout_at(deadline, self.eventloop.poll()).await {
                Ok(event) => event,
                Err(_) => return Polled::Timeout,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(topic = %publish.topic, bytes = %publish.payload.len(), "mqtt_message_received");
                    return Polled::Message(publish.payload.to_vec());
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt_connected");
                }
                Ok(_) => {}
                Err(e) => return Polled::BrokerError(BrokerError::Mqtt(e)),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.unsubscribe(&self.topic).await {
            warn!(error = %e, "mqtt_unsubscribe_failed");
        }
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "mqtt_disconnect_failed");
        }
        info!(topic = %self.topic, "mqtt_client_closed");
    }
}
