//! Drover Hooks - the decision-function boundary
//!
//! A drover controller delegates the "what should exist?" question to an
//! external decision function. This crate defines that boundary:
//! - `request`: the JSON envelopes crossing it
//! - `client`: the `DecisionHook` trait and the webhook implementation
//! - `config`: endpoint configuration (url or service+path, timeout)

pub mod client;
pub mod config;
pub mod error;
pub mod request;

pub use client::{DecisionHook, HookEndpoints, WebhookClient};
pub use config::{ServiceReference, WebhookConfig};
pub use error::{HookError, Result};
pub use request::{ObjectMap, SyncRequest, SyncResponse, object_map_key};
