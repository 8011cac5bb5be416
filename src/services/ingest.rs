//! Ingest loop
//!
//! Drives one message at a time from the source through decode,
//! validation and dispatch:
//!
//! ```text
//! Polling ──message──> Decoding ──> Validating ──> Dispatching ──throttle──> Polling
//!    │                    │              │
//!    │                    └──rejected────┴──> sink ──────────────────────> Polling
//!    ├──timeout──> idle_backoff ──> Polling
//!    ├──broker error──> sink ──> idle_backoff ──> Polling
//!    └──shutdown──> Closed
//! ```
//!
//! Processing is sequential; a record in dispatch always runs to completion
//! before shutdown is observed.

use crate::domain::rejection::Rejection;
use crate::infra::metrics::Metrics;
use crate::io::reporter::ErrorSink;
use crate::io::source::{MessageSource, Polled};
use crate::services::classifier::{dispatch, DispatchError, DispatchPolicy, DispatchReport};
use crate::services::gateway::RecordGateway;
use crate::services::validator::{decode, validate, ValidationRules};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Bounded wait for each poll
    pub poll_timeout: Duration,
    /// Pause after an empty poll or a broker error
    pub idle_backoff: Duration,
    /// Pause after each dispatched record
    pub throttle: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            idle_backoff: Duration::from_secs(1),
            throttle: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Polling,
    Decoding,
    Validating,
    Dispatching,
    Closed,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Polling => "polling",
            LoopState::Decoding => "decoding",
            LoopState::Validating => "validating",
            LoopState::Dispatching => "dispatching",
            LoopState::Closed => "closed",
        }
    }
}

/// What happened to a single payload
#[derive(Debug)]
pub enum MessageOutcome {
    Persisted(DispatchReport),
    Rejected(Rejection),
    PersistFailed(DispatchError),
}

impl MessageOutcome {
    /// Whether a dispatch was attempted (and the throttle applies)
    pub fn dispatched(&self) -> bool {
        !matches!(self, MessageOutcome::Rejected(_))
    }
}

/// Counters returned when the loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub received: u64,
    pub persisted: u64,
    pub rejected: u64,
    pub failed: u64,
    pub broker_errors: u64,
}

pub struct IngestLoop<S, G, K> {
    source: S,
    gateway: G,
    sink: K,
    rules: ValidationRules,
    policy: DispatchPolicy,
    schedule: Schedule,
    metrics: Arc<Metrics>,
    state: LoopState,
    stats: LoopStats,
}

impl<S, G, K> IngestLoop<S, G, K>
where
    S: MessageSource,
    G: RecordGateway,
    K: ErrorSink,
{
    pub fn new(
        source: S,
        gateway: G,
        sink: K,
        rules: ValidationRules,
        policy: DispatchPolicy,
        schedule: Schedule,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            gateway,
            sink,
            rules,
            policy,
            schedule,
            metrics,
            state: LoopState::Polling,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(from = %self.state.as_str(), to = %next.as_str(), "loop_state");
            self.state = next;
        }
    }

    /// Run one payload through decode, validation and dispatch
    pub async fn process_payload(&mut self, payload: &[u8]) -> MessageOutcome {
        self.stats.received += 1;
        self.metrics.record_received();

        self.transition(LoopState::Decoding);
        let raw = match decode(payload) {
            Ok(raw) => raw,
            Err(rejection) => return self.reject(rejection),
        };

        self.transition(LoopState::Validating);
        let record = match validate(&raw, &self.rules) {
            Ok(record) => record,
            Err(rejection) => return self.reject(rejection),
        };
        self.metrics.record_accepted();

        self.transition(LoopState::Dispatching);
        let started = Instant::now();
        let result = dispatch(&record, self.policy, &mut self.gateway).await;
        self.metrics.record_dispatch_latency(saturating_micros(started.elapsed()));

        match result {
            Ok(report) => {
                for table in &report.tables {
                    self.metrics.record_row(*table);
                }
                self.stats.persisted += 1;
                info!(
                    kind = %report.kind.as_str(),
                    site = %record.site,
                    val = %record.value,
                    at = %record.at,
                    rows = %report.tables.len(),
                    "record_persisted"
                );
                MessageOutcome::Persisted(report)
            }
            Err(err) => {
                for table in &err.committed {
                    self.metrics.record_row(*table);
                }
                self.metrics.record_persistence_failure();
                self.stats.failed += 1;
                error!(
                    kind = %err.kind.as_str(),
                    site = %record.site,
                    failed = %err.failed,
                    committed = ?err.committed,
                    error = %err.source,
                    "record_persist_failed"
                );
                self.sink.report(&format!("Error: {err}"));
                MessageOutcome::PersistFailed(err)
            }
        }
    }

    fn reject(&mut self, rejection: Rejection) -> MessageOutcome {
        self.stats.rejected += 1;
        self.metrics.record_rejection(&rejection);
        debug!(reason = %rejection.reason(), "message_rejected");
        self.sink.report(&format!("Error: {rejection}"));
        MessageOutcome::Rejected(rejection)
    }

    /// Pause for `duration`, returning early (true) if shutdown fires
    async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        if duration.is_zero() {
            return *shutdown.borrow();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = shutdown.changed() => true,
        }
    }

    /// Poll until the shutdown signal fires, then close the source
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> LoopStats {
        info!(
            policy = %self.policy.as_str(),
            poll_timeout_ms = %self.schedule.poll_timeout.as_millis(),
            throttle_ms = %self.schedule.throttle.as_millis(),
            "ingest_loop_started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.transition(LoopState::Polling);

            let polled = tokio::select! {
                polled = self.source.poll(self.schedule.poll_timeout) => polled,
                _ = shutdown.changed() => break,
            };

            let stop = match polled {
                Polled::Message(payload) => {
                    let outcome = self.process_payload(&payload).await;
                    if outcome.dispatched() {
                        Self::pause(self.schedule.throttle, &mut shutdown).await
                    } else {
                        false
                    }
                }
                Polled::Timeout => {
                    self.metrics.record_poll_timeout();
                    Self::pause(self.schedule.idle_backoff, &mut shutdown).await
                }
                Polled::BrokerError(e) => {
                    self.stats.broker_errors += 1;
                    self.metrics.record_broker_error();
                    warn!(error = %e, "broker_error");
                    self.sink.report(&format!("Error: {e}"));
                    Self::pause(self.schedule.idle_backoff, &mut shutdown).await
                }
            };

            if stop {
                break;
            }
        }

        self.transition(LoopState::Closed);
        self.source.close().await;
        info!(
            received = %self.stats.received,
            persisted = %self.stats.persisted,
            rejected = %self.stats.rejected,
            failed = %self.stats.failed,
            broker_errors = %self.stats.broker_errors,
            "ingest_loop_stopped"
        );
        self.stats
    }
}

fn saturating_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}
