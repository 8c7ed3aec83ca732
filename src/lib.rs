//! Library crate for router-honeypot: the port-scan aggregation engine, the
//! fake login front and the sinks they report through.
pub mod aggregator;
pub mod alerting;
pub mod audit;
pub mod config;
pub mod error;
pub mod identity;
pub mod listener;
pub mod logging;
pub mod notify;
pub mod ports;
pub mod server;
pub mod types;
