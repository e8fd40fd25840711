//! Monitoring for FieldQL
//!
//! Structured logging with tracing and slow projection tracking

pub mod logging;

pub use logging::*;
