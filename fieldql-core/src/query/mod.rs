//! Field-selection query language
//!
//! This module provides the brace-delimited selector DSL, its parser and
//! the projector that applies a parsed query to entities.

pub mod ast;
pub mod parser;
pub mod projector;

pub use ast::{NestedField, QueryNode, Selected};
pub use parser::{FormatErrorKind, QueryFormatError, QueryParser, DEFAULT_MAX_DEPTH, DEFAULT_QUERY};
pub use projector::{JsonMap, Projected, ProjectionError, Projector, Target};
