//! Durable agents: stateful actors with persisted state, a durable priority
//! message queue, outbound retry, and rate-limited HTTP ingress.

pub mod actors;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod store;
pub mod utils;
