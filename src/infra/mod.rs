//! Infrastructure - configuration, logging and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, env overrides, defaults)
//! - `logging` - Tracing subscriber setup
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod logging;
pub mod metrics;

// Re-export commonly used types
pub use config::{BrokerKind, Config};
pub use metrics::Metrics;
