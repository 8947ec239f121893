//! HTTP surface of the harvester: operator API, metrics and live notifications.

pub mod api;
pub mod metrics;
pub mod state;
