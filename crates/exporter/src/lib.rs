//! Prometheus exporter for TEMPer USB thermometers
//!
//! Polls every attached TEMPer stick on a dedicated thread and serves the
//! latest readings over HTTP in the Prometheus text format.

pub mod config;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod poller;

pub use config::{ExporterConfig, FailurePolicy, PollSettings, ServerSettings};
pub use http::HttpServer;
pub use logging::setup_logging;
pub use metrics::{Readings, SharedReadings};
pub use poller::{PollCommand, PollEvent, PollerBridge, create_poller_bridge, spawn_poller};
