//! Services - validation, classification and the ingest loop
//!
//! This module contains the core business logic services:
//! - `validator` - Schema checks turning raw messages into validated records
//! - `classifier` - Record kind and table dispatch
//! - `gateway` - Persistence interface and in-memory implementation
//! - `ingest` - Poll / validate / dispatch loop

pub mod classifier;
pub mod gateway;
pub mod ingest;
pub mod validator;

// Re-export commonly used types
pub use classifier::{classify, dispatch, DispatchPolicy};
pub use gateway::{InMemoryGateway, RecordGateway};
pub use ingest::{IngestLoop, LoopStats, MessageOutcome, Schedule};
pub use validator::{validate, ValidationRules};
