//! FieldQL Core - field-selection queries over relational records
//!
//! This crate provides:
//! - The brace-delimited selector DSL and its parser
//! - The recursive projector turning records into ordered JSON
//! - The schema collaborator contract and an in-memory record registry
//! - Configuration and logging setup

pub mod config;
pub mod monitoring;
pub mod query;
pub mod record;
pub mod registry;
pub mod schema;
pub mod serializer;

pub use config::*;
pub use monitoring::*;
pub use query::*;
pub use record::*;
pub use registry::*;
pub use schema::*;
pub use serializer::*;
