//! Drover Core - pure algorithms for the declarative controller engine
//!
//! This crate has no Kubernetes client dependency. It provides:
//! - `apply`: the three-way merge used to compute minimal child updates,
//!   plus the last-applied annotation lifecycle
//! - `object`: helpers for navigating schema-less JSON objects (nested
//!   fields, dotted field paths, status conditions)

pub mod apply;
pub mod error;
pub mod object;

pub use apply::{LAST_APPLIED_ANNOTATION, merge, parse_last_applied, render_last_applied};
pub use error::{CoreError, Result};
pub use object::{StatusCondition, get_nested, observed_generation, set_condition};
