//! Message source abstraction
//!
//! A source hands the ingest loop one payload at a time through a
//! bounded-wait receive. Kafka and MQTT implement it against real
//! brokers; [`ChannelSource`] feeds payloads from a tokio channel.

use crate::domain::error::BrokerError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Result of one bounded-wait receive
#[derive(Debug)]
pub enum Polled {
    Message(Vec<u8>),
    Timeout,
    BrokerError(BrokerError),
}

#[async_trait]
pub trait MessageSource: Send {
    /// Wait at most `timeout` for the next message
    async fn poll(&mut self, timeout: Duration) -> Polled;

    /// Release the subscription
    async fn close(&mut self);
}

/// In-process source backed by an mpsc channel
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<u8>>,
    closed: bool,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it
    pub fn new(buffer: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx, closed: false })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn poll(&mut self, timeout: Duration) -> Polled {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(payload)) => Polled::Message(payload),
            Ok(None) => Polled::BrokerError(BrokerError::Closed),
            Err(_) => Polled::Timeout,
        }
    }

    async fn close(&mut self) {
        self.rx.close();
        self.closed = true;
    }
}
