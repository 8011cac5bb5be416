//! museum-ingest - kiosk feedback ingest service
//!
//! Consumes visitor ratings and assistance/emergency calls from the
//! exhibit kiosks' broker topic, validates them and writes them to
//! PostgreSQL.
//!
//! Module structure:
//! - `domain/` - Record types and error taxonomy
//! - `io/` - External interfaces (Kafka, MQTT, PostgreSQL, rejection log, Prometheus)
//! - `services/` - Validation, classification and the ingest loop
//! - `infra/` - Infrastructure (Config, Logging, Metrics)

use anyhow::Context;
use clap::Parser;
use museum_ingest::infra::config::BrokerKind;
use museum_ingest::infra::logging::init_tracing;
use museum_ingest::infra::{Config, Metrics};
use museum_ingest::io::{open_sink, ErrorSink, KafkaSource, MessageSource, MqttSource, PostgresGateway};
use museum_ingest::services::{IngestLoop, LoopStats};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Kiosk feedback ingest service
#[derive(Parser, Debug)]
#[command(name = "museum-ingest", version, about)]
struct Args {
    /// Write rejected messages to this file instead of stdout
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

async fn run_loop<S, K>(
    source: S,
    gateway: PostgresGateway,
    sink: K,
    config: &Config,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> LoopStats
where
    S: MessageSource,
    K: ErrorSink,
{
    let mut ingest = IngestLoop::new(
        source,
        gateway,
        sink,
        config.validation_rules(),
        config.dispatch_policy(),
        config.schedule(),
        metrics,
    );
    ingest.run(shutdown).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Config decides the log format, so load it before tracing is up and
    // report a fallback afterwards
    let (mut config, load_error) = match Config::from_file(&args.config) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    init_tracing(config.log_format());
    if let Some(e) = load_error {
        warn!(error = %format!("{e:#}"), "config_fallback_to_defaults");
    }
    config.apply_env();

    info!(git_hash = %env!("GIT_HASH"), "museum-ingest starting");
    info!(
        config_file = %config.config_file(),
        broker = %config.broker_kind().as_str(),
        topic = %config.topic(),
        db_host = %config.database().host,
        db_name = %config.database().name,
        call_rating = %config.dispatch_policy().as_str(),
        opens_at = %config.operating_hours().opens,
        closes_at = %config.operating_hours().closes,
        require_call_type = %config.require_call_type(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let gateway = PostgresGateway::connect(config.database())
        .await
        .context("database setup failed")?;
    gateway.ping().await.context("database ping failed")?;

    let sink = open_sink(args.log.as_deref()).context("rejection log setup failed")?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_topic = config.topic().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = museum_ingest::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_topic,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    let stats = match config.broker_kind() {
        BrokerKind::Kafka => {
            let source = KafkaSource::connect(config.kafka(), config.topic())
                .context("kafka setup failed")?;
            run_loop(source, gateway, sink, &config, metrics.clone(), shutdown_rx).await
        }
        BrokerKind::Mqtt => {
            let source = MqttSource::connect(config.mqtt(), config.topic())
                .await
                .context("mqtt setup failed")?;
            run_loop(source, gateway, sink, &config, metrics.clone(), shutdown_rx).await
        }
    };

    metrics.report().log();
    info!(
        received = %stats.received,
        persisted = %stats.persisted,
        rejected = %stats.rejected,
        failed = %stats.failed,
        "museum-ingest shutdown complete"
    );
    Ok(())
}
