//! Infrastructure layer: record stores, rate-limit counters, config.

pub mod config;
pub mod rate_limit;
pub mod store;
