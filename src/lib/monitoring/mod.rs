//! Metric registry and HTTP exposition.
//!
//! Read-mostly surface: the collector writes gauge samples, scrapers read
//! the Prometheus text rendering. A scrape also nudges the collector, but
//! never waits for it.

pub mod http_server;
pub mod metrics;

pub use http_server::MonitoringServer;
pub use metrics::BuildMetrics;
